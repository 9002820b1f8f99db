use std::sync::Arc;
use std::time::Duration;

use access_wizard::api::{ApiCall, DryrunApi, EntityKind, NewEntity, Operation};
use access_wizard::config::{FeatureToggles, WizardTimings};
use access_wizard::wizard::{
    Association, Field, Phase, Selection, StepKind, TerminalFlag, ValidationOutcome,
    WizardController,
};

fn timings() -> WizardTimings {
    WizardTimings {
        debounce: Duration::from_millis(250),
        lookup_timeout: Duration::from_secs(5),
        stage_timeout: Duration::from_secs(10),
    }
}

fn pick(ids: &[&str]) -> Selection {
    ids.iter().map(|id| (*id, *id)).collect()
}

/// Walk a default group session up to the review step
async fn fill_group(wizard: &mut WizardController, roles: &[&str], members: &[&str]) {
    wizard
        .start(EntityKind::Group, FeatureToggles::default())
        .unwrap();
    assert_eq!(wizard.current_step(), Some(StepKind::Name));

    wizard.set_field(Field::Name, "Engineering".into()).unwrap();
    wizard.set_field(Field::Description, "".into()).unwrap();
    assert_eq!(wizard.wait_for_validation().await, ValidationOutcome::Available);

    assert_eq!(wizard.go_next(), Ok(StepKind::Roles));
    wizard.set_field(Field::Roles, pick(roles).into()).unwrap();

    assert_eq!(wizard.go_next(), Ok(StepKind::Members));
    wizard.set_field(Field::Members, pick(members).into()).unwrap();

    assert_eq!(wizard.go_next(), Ok(StepKind::Review));
}

#[tokio::test(start_paused = true)]
async fn engineering_group_end_to_end() {
    let latency = Duration::from_millis(40);
    let api = Arc::new(
        DryrunApi::new()
            .with_latency(Operation::CreateEntity, latency)
            .with_latency(Operation::AssignRoles, latency)
            .with_latency(Operation::AssignMembers, latency),
    );
    let mut wizard = WizardController::new(api.clone(), timings());

    fill_group(&mut wizard, &["role-1"], &["alice.johnson"]).await;
    wizard.submit().unwrap();
    let result = wizard.wait_for_submission().await.unwrap();

    assert_eq!(result.phase, Phase::Succeeded);
    assert_eq!(
        wizard.session().unwrap().terminal(),
        TerminalFlag::Success
    );

    let calls = api.calls();
    let writes: Vec<_> = calls
        .iter()
        .filter(|c| c.call.operation() != Operation::Lookup)
        .collect();
    assert_eq!(writes.len(), 3);

    assert_eq!(
        writes[0].call,
        ApiCall::CreateEntity(NewEntity {
            kind: EntityKind::Group,
            name: "Engineering".to_string(),
            description: None,
            permissions: Vec::new(),
        })
    );
    let parent = result.parent_id.clone().unwrap();
    let created_at = writes[0].issued_at + latency;
    assert!(writes[1..].iter().all(|c| c.issued_at == created_at));
    assert!(writes[1..].iter().any(|c| c.call
        == ApiCall::AssignRoles {
            group: parent.clone(),
            ids: vec!["role-1".to_string()]
        }));
    assert!(writes[1..].iter().any(|c| c.call
        == ApiCall::AssignMembers {
            group: parent.clone(),
            ids: vec!["alice.johnson".to_string()]
        }));

    assert_eq!(
        wizard.view().unwrap().terminal_message().as_deref(),
        Some("Group 'Engineering' created")
    );
    wizard.close().unwrap();
    assert!(wizard.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn partial_failure_still_closes_and_names_failed_association() {
    let api = Arc::new(DryrunApi::new().fail_on(Operation::AssignMembers));
    let mut wizard = WizardController::new(api.clone(), timings());

    fill_group(&mut wizard, &["role-1"], &["alice.johnson"]).await;
    wizard.submit().unwrap();
    let result = wizard.wait_for_submission().await.unwrap();

    assert_eq!(result.phase, Phase::PartialFailure);
    assert_eq!(result.failed_associations(), vec![Association::Members]);
    assert_eq!(
        wizard.session().unwrap().terminal(),
        TerminalFlag::Success
    );
    assert!(
        wizard
            .set_field(Field::Members, Selection::new().into())
            .is_err()
    );
    assert_eq!(api.count(Operation::CreateEntity), 1);
}

#[tokio::test(start_paused = true)]
async fn service_accounts_step_is_part_of_the_session_graph() {
    let api = Arc::new(DryrunApi::new());
    let mut wizard = WizardController::new(api, timings());

    let toggles = FeatureToggles {
        workspaces: false,
        service_accounts: true,
    };
    let steps = wizard
        .start(EntityKind::Group, toggles)
        .unwrap()
        .step_kinds();

    assert_eq!(
        steps,
        vec![
            StepKind::Name,
            StepKind::Roles,
            StepKind::Members,
            StepKind::ServiceAccounts,
            StepKind::Review
        ]
    );
    assert_eq!(wizard.view().unwrap().position, (0, 5));
}
