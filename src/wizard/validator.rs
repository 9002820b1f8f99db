use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::api::{AccessApi, EntityKind, MatchMode};

/// Names at or beyond this many characters are rejected locally
pub const NAME_MAX_LENGTH: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Required,
    TooLong,
    LookupFailed(String),
    TimedOut,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Required => f.write_str("required"),
            RejectReason::TooLong => f.write_str("too long"),
            RejectReason::LookupFailed(msg) => write!(f, "lookup failed: {msg}"),
            RejectReason::TimedOut => f.write_str("lookup timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidationOutcome {
    #[default]
    Pending,
    Available,
    Conflict,
    Rejected(RejectReason),
}

impl ValidationOutcome {
    pub fn is_available(&self) -> bool {
        *self == ValidationOutcome::Available
    }

    /// Field-level message for the name step, if any
    pub fn message(&self, kind: EntityKind) -> Option<String> {
        match self {
            ValidationOutcome::Pending | ValidationOutcome::Available => None,
            ValidationOutcome::Conflict => Some(format!("A {kind} with this name already exists")),
            ValidationOutcome::Rejected(RejectReason::Required) => Some("Name is required".to_string()),
            ValidationOutcome::Rejected(RejectReason::TooLong) => Some(format!(
                "Name must be fewer than {NAME_MAX_LENGTH} characters"
            )),
            ValidationOutcome::Rejected(reason) => Some(format!("Could not check name: {reason}")),
        }
    }
}

/// Checks candidate names against the remote directory.
///
/// Calls are debounced and tagged with a sequence number; only the most
/// recently issued call may publish an outcome.
pub struct UniquenessValidator {
    api: Arc<dyn AccessApi>,
    kind: EntityKind,
    debounce: Duration,
    timeout: Duration,
    issued: AtomicU64,
    latest: watch::Sender<ValidationOutcome>,
}

impl UniquenessValidator {
    pub fn new(api: Arc<dyn AccessApi>, kind: EntityKind, debounce: Duration, timeout: Duration) -> Self {
        let (latest, _) = watch::channel(ValidationOutcome::Pending);
        Self {
            api,
            kind,
            debounce,
            timeout,
            issued: AtomicU64::new(0),
            latest,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ValidationOutcome> {
        self.latest.subscribe()
    }

    pub fn latest(&self) -> ValidationOutcome {
        self.latest.borrow().clone()
    }

    /// Validate a candidate. Returns `None` when a newer call superseded this one.
    pub async fn validate(&self, candidate: &str) -> Option<ValidationOutcome> {
        let ticket = self.issue();
        self.check(ticket, candidate).await
    }

    /// Reserve the next sequence number. Issuing a ticket supersedes every earlier one.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Validate under a ticket obtained from [`issue`](Self::issue)
    pub async fn check(&self, ticket: u64, candidate: &str) -> Option<ValidationOutcome> {
        let name = candidate.trim();

        if name.is_empty() {
            return self.settle(ticket, ValidationOutcome::Rejected(RejectReason::Required));
        }
        if name.chars().count() >= NAME_MAX_LENGTH {
            return self.settle(ticket, ValidationOutcome::Rejected(RejectReason::TooLong));
        }

        if self.is_latest(ticket) {
            self.latest.send_replace(ValidationOutcome::Pending);
        }
        tokio::time::sleep(self.debounce).await;
        if !self.is_latest(ticket) {
            debug!("validation #{} for {:?} debounced", ticket, name);
            return None;
        }

        debug!("validation #{} looking up {:?}", ticket, name);
        let lookup = self.api.lookup_by_name(self.kind, name, MatchMode::Exact);
        let outcome = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(matches)) if matches.is_empty() => ValidationOutcome::Available,
            Ok(Ok(_)) => ValidationOutcome::Conflict,
            Ok(Err(e)) => ValidationOutcome::Rejected(RejectReason::LookupFailed(e.to_string())),
            Err(_) => ValidationOutcome::Rejected(RejectReason::TimedOut),
        };
        self.settle(ticket, outcome)
    }

    fn is_latest(&self, ticket: u64) -> bool {
        self.issued.load(Ordering::SeqCst) == ticket
    }

    fn settle(&self, ticket: u64, outcome: ValidationOutcome) -> Option<ValidationOutcome> {
        if !self.is_latest(ticket) {
            debug!("validation #{} is stale, dropping {:?}", ticket, outcome);
            return None;
        }
        self.latest.send_replace(outcome.clone());
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, DryrunApi, Operation};

    const DEBOUNCE: Duration = Duration::from_millis(300);

    fn validator(api: Arc<DryrunApi>) -> UniquenessValidator {
        UniquenessValidator::new(api, EntityKind::Group, DEBOUNCE, Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_calls_issue_one_lookup_for_the_last_candidate() {
        let api = Arc::new(DryrunApi::new());
        let validator = validator(api.clone());

        let (a, ab, abc) = tokio::join!(
            validator.validate("a"),
            validator.validate("ab"),
            validator.validate("abc"),
        );

        assert_eq!(a, None);
        assert_eq!(ab, None);
        assert_eq!(abc, Some(ValidationOutcome::Available));

        let calls = api.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].call,
            ApiCall::Lookup {
                kind: EntityKind::Group,
                name: "abc".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_for_superseded_name_is_dropped() {
        let api = Arc::new(
            DryrunApi::new()
                .with_existing(EntityKind::Group, "old")
                .with_lookup_delay("old", Duration::from_millis(500))
                .with_lookup_delay("new", Duration::from_millis(10)),
        );
        let validator = Arc::new(validator(api.clone()));

        let old = tokio::spawn({
            let validator = validator.clone();
            async move { validator.validate("old").await }
        });
        // Let "old" clear the debounce window so its lookup is in flight
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
        assert_eq!(api.count(Operation::Lookup), 1);

        let new = validator.validate("new").await;
        assert_eq!(new, Some(ValidationOutcome::Available));

        assert_eq!(old.await.unwrap(), None);
        assert_eq!(api.count(Operation::Lookup), 2);
        assert_eq!(validator.latest(), ValidationOutcome::Available);
    }

    #[tokio::test(start_paused = true)]
    async fn existing_name_is_a_conflict() {
        let api = Arc::new(DryrunApi::new().with_existing(EntityKind::Group, "Engineering"));
        let outcome = validator(api).validate("engineering").await;
        assert_eq!(outcome, Some(ValidationOutcome::Conflict));
    }

    #[tokio::test(start_paused = true)]
    async fn local_rejections_skip_the_remote_call() {
        let api = Arc::new(DryrunApi::new());
        let validator = validator(api.clone());

        assert_eq!(
            validator.validate("   ").await,
            Some(ValidationOutcome::Rejected(RejectReason::Required))
        );
        let long = "x".repeat(NAME_MAX_LENGTH);
        assert_eq!(
            validator.validate(&long).await,
            Some(ValidationOutcome::Rejected(RejectReason::TooLong))
        );
        assert_eq!(api.count(Operation::Lookup), 0);

        let almost = "x".repeat(NAME_MAX_LENGTH - 1);
        assert_eq!(validator.validate(&almost).await, Some(ValidationOutcome::Available));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_times_out_as_rejection() {
        let api = Arc::new(DryrunApi::new().with_latency(Operation::Lookup, Duration::from_secs(30)));
        let outcome = validator(api).validate("Engineering").await;
        assert_eq!(outcome, Some(ValidationOutcome::Rejected(RejectReason::TimedOut)));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_error_is_a_rejection_not_a_conflict() {
        let api = Arc::new(DryrunApi::new().fail_on(Operation::Lookup));
        let validator = validator(api);
        let outcome = validator.validate("Engineering").await;
        assert!(matches!(
            outcome,
            Some(ValidationOutcome::Rejected(RejectReason::LookupFailed(_)))
        ));
        assert!(validator.latest().message(EntityKind::Group).is_some());
    }
}
