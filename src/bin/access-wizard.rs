use std::sync::Arc;

use access_wizard::api::{self, AccessApi, EntityKind};
use access_wizard::config::{ConsoleConfig, FeatureToggles, WizardTimings};
use access_wizard::error::{ConsoleError, Result};
use access_wizard::wizard::{
    Field, Phase, Selection, StepKind, WizardController, resolve,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "access-wizard")]
#[command(author, version, about = "Create access-control groups and roles step by step")]
struct Args {
    /// Path to config file (default: ~/.config/access-wizard/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Use the in-memory backend instead of the remote API
    #[arg(long)]
    dryrun: bool,

    /// Log file path (logging disabled if not specified)
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the step sequence a new session would use
    Steps {
        #[arg(long, value_enum, default_value_t = KindArg::Group)]
        kind: KindArg,

        #[command(flatten)]
        toggles: ToggleArgs,
    },

    /// Create a group, then attach roles, members and service accounts
    CreateGroup {
        #[arg(long)]
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Role to add, as ID or ID=LABEL (repeatable)
        #[arg(long = "role", value_parser = parse_pick)]
        roles: Vec<(String, String)>,

        /// Principal username to add (repeatable)
        #[arg(long = "member", value_parser = parse_pick)]
        members: Vec<(String, String)>,

        /// Service account client id to add (repeatable)
        #[arg(long = "service-account", value_parser = parse_pick)]
        service_accounts: Vec<(String, String)>,

        #[command(flatten)]
        toggles: ToggleArgs,
    },

    /// Create a role with its permissions
    CreateRole {
        #[arg(long)]
        name: String,

        #[arg(long)]
        description: Option<String>,

        /// Permission as application:resource:verb (repeatable)
        #[arg(long = "permission", required = true, value_parser = parse_pick)]
        permissions: Vec<(String, String)>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ToggleArgs {
    /// Simplified access model: role assignment is managed elsewhere
    #[arg(long)]
    workspaces: bool,

    /// Offer the service-accounts step
    #[arg(long)]
    service_accounts: bool,
}

impl ToggleArgs {
    /// Flags can only switch features on; the config file supplies the rest
    fn merge(&self, config: &FeatureToggles) -> FeatureToggles {
        FeatureToggles {
            workspaces: config.workspaces || self.workspaces,
            service_accounts: config.service_accounts || self.service_accounts,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum KindArg {
    Group,
    Role,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Group => EntityKind::Group,
            KindArg::Role => EntityKind::Role,
        }
    }
}

fn parse_pick(raw: &str) -> std::result::Result<(String, String), String> {
    let (id, label) = raw.split_once('=').unwrap_or((raw, raw));
    if id.trim().is_empty() {
        return Err("identifier must not be empty".to_string());
    }
    Ok((id.trim().to_string(), label.trim().to_string()))
}

/// Values the headless driver enters on each step
#[derive(Debug, Default)]
struct Answers {
    name: String,
    description: Option<String>,
    roles: Selection,
    members: Selection,
    service_accounts: Selection,
    permissions: Selection,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging only if log file is specified
    if let Some(ref log_path) = args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .ok();

        if let Some(file) = file {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .init();

            info!("Starting access-wizard");
        }
    }

    let mut config = match args.config.as_deref() {
        Some(path) => ConsoleConfig::load_from(path)?,
        None => ConsoleConfig::load()?,
    };

    // --dryrun flag overrides config
    if args.dryrun {
        config.general.dryrun = true;
    }

    let result = run(args.command, &config).await;
    if let Err(ref e) = result {
        error!("access-wizard error: {}", e);
    }
    result
}

async fn run(command: Command, config: &ConsoleConfig) -> Result<()> {
    match command {
        Command::Steps { kind, toggles } => {
            let toggles = toggles.merge(&config.features);
            for step in resolve(kind.into(), &toggles) {
                println!("{}. {} ({})", step.position + 1, step.kind.title(), step.kind.label());
            }
            Ok(())
        }
        Command::CreateGroup {
            name,
            description,
            roles,
            members,
            service_accounts,
            toggles,
        } => {
            let answers = Answers {
                name,
                description,
                roles: roles.into_iter().collect(),
                members: members.into_iter().collect(),
                service_accounts: service_accounts.into_iter().collect(),
                ..Answers::default()
            };
            let api = api::create_api(config)?;
            drive(api, config.timings(), EntityKind::Group, toggles.merge(&config.features), answers).await
        }
        Command::CreateRole {
            name,
            description,
            permissions,
        } => {
            let answers = Answers {
                name,
                description,
                permissions: permissions.into_iter().collect(),
                ..Answers::default()
            };
            let api = api::create_api(config)?;
            drive(api, config.timings(), EntityKind::Role, config.features, answers).await
        }
    }
}

/// Walk every step of a fresh session, entering the given answers, then submit
async fn drive(
    api: Arc<dyn AccessApi>,
    timings: WizardTimings,
    kind: EntityKind,
    toggles: FeatureToggles,
    answers: Answers,
) -> Result<()> {
    let mut wizard = WizardController::new(api, timings);
    wizard.start(kind, toggles)?;

    loop {
        let Some(view) = wizard.view() else {
            return Ok(());
        };
        println!("{}", view.heading());

        match view.step {
            StepKind::Name => {
                wizard.set_field(Field::Name, answers.name.as_str().into())?;
                if let Some(description) = &answers.description {
                    wizard.set_field(Field::Description, description.as_str().into())?;
                }
                let outcome = wizard.wait_for_validation().await;
                if let Some(message) = outcome.message(kind) {
                    wizard.request_cancel()?;
                    wizard.confirm_cancel()?;
                    return Err(ConsoleError::Aborted(message));
                }
            }
            StepKind::Roles => {
                wizard.set_field(Field::Roles, answers.roles.clone().into())?;
            }
            StepKind::Members => {
                wizard.set_field(Field::Members, answers.members.clone().into())?;
            }
            StepKind::ServiceAccounts => {
                wizard.set_field(Field::ServiceAccounts, answers.service_accounts.clone().into())?;
            }
            StepKind::Permissions => {
                wizard.set_field(Field::Permissions, answers.permissions.clone().into())?;
            }
            StepKind::Review => return submit(&mut wizard).await,
        }

        wizard.go_next()?;
    }
}

async fn submit(wizard: &mut WizardController) -> Result<()> {
    let values = wizard.values();
    println!("  name: {}", values.name);
    if let Some(description) = &values.description {
        println!("  description: {description}");
    }
    for (label, selection) in [
        ("roles", &values.roles),
        ("members", &values.members),
        ("service accounts", &values.service_accounts),
        ("permissions", &values.permissions),
    ] {
        if !selection.is_empty() {
            println!("  {label}: {}", selection.labels().collect::<Vec<_>>().join(", "));
        }
    }

    wizard.submit()?;
    while wizard.is_submitting() {
        let Some(msg) = wizard.recv().await else {
            break;
        };
        wizard.handle_message(msg);
        if let Some(progress) = wizard.progress() {
            let (current, total) = progress.progress();
            println!("[{current} of {total}] {:?}", progress.phase);
        }
    }

    let Some(result) = wizard.progress().cloned() else {
        return Err(ConsoleError::Aborted("submission ended without a result".to_string()));
    };
    let message = result.message().unwrap_or_default();
    match result.phase {
        Phase::Succeeded | Phase::PartialFailure => {
            println!("{message}");
            wizard.close()?;
            Ok(())
        }
        Phase::TotalFailure | Phase::CreatingParent | Phase::AttachingAssociations => {
            Err(ConsoleError::Aborted(message))
        }
    }
}
