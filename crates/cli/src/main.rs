use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use claimchain_engine::{
    ClaimClient, ClaimchainConfig, InMemoryClaimClient, Orchestrator, OrchestratorSettings, claim_client_from_config, load_config,
    load_config_from_path, notification_sink_from_config, parse_contract_file, resolve_names,
};
use claimchain_types::{CleanupOutcome, CleanupRecord, ParameterContract, RunStatus, WorkflowExecutionState, validate_contract};
use claimchain_util::{expand_tilde, redact_sensitive};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let matches = build_cli().get_matches();
    let config = match matches.get_one::<String>("config") {
        Some(path) => load_config_from_path(&expand_tilde(path))?,
        None => load_config()?,
    };

    match matches.subcommand() {
        Some(("create", sub)) => run_create(&config, sub).await,
        Some(("validate", sub)) => run_validate(sub),
        Some(("resolve", sub)) => run_resolve(sub),
        Some(("status", sub)) => run_status(&config, sub).await,
        Some(("delete", sub)) => run_delete(&config, sub).await,
        _ => anyhow::bail!("expected a subcommand; see --help"),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let file = Arg::new("file")
        .long("file")
        .short('f')
        .required(true)
        .action(ArgAction::Set)
        .help("Path to the contract YAML/JSON");
    let simulate = Arg::new("simulate")
        .long("simulate")
        .action(ArgAction::SetTrue)
        .help("Use an in-memory cluster instead of the API server");
    let json = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print machine-readable JSON");

    Command::new("claimchain")
        .about("Provision resources through chained cluster claims")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .action(ArgAction::Set)
                .help("Config file; defaults to $CLAIMCHAIN_CONFIG_PATH or the user config dir"),
        )
        .subcommand(
            Command::new("create")
                .about("Validate a contract and provision every stage")
                .arg(file.clone())
                .arg(simulate.clone())
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a contract without touching the cluster")
                .arg(file.clone())
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("resolve")
                .about("Print the names a run would derive")
                .arg(file.clone()),
        )
        .subcommand(
            Command::new("status")
                .about("Show the readiness of each planned claim")
                .arg(file.clone())
                .arg(simulate.clone())
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete every planned claim, latest stage first")
                .arg(file)
                .arg(simulate)
                .arg(json),
        )
}

fn contract_path(matches: &ArgMatches) -> Result<PathBuf> {
    let file = matches.get_one::<String>("file").context("--file is required")?;
    Ok(expand_tilde(file))
}

fn load_contract(matches: &ArgMatches) -> Result<ParameterContract> {
    let raw = parse_contract_file(contract_path(matches)?)?;
    validate_contract(&raw).map_err(|error| anyhow::anyhow!("{} [{}]", error, error.reason_code()))
}

fn orchestrator(config: &ClaimchainConfig, simulate: bool) -> Result<Orchestrator> {
    let client: Arc<dyn ClaimClient> = if simulate {
        info!("using the in-memory cluster");
        Arc::new(InMemoryClaimClient::simulated())
    } else {
        claim_client_from_config(config)?
    };
    let sink = notification_sink_from_config(config)?;
    let settings = OrchestratorSettings::from_config(config)?;
    Ok(Orchestrator::new(client, sink, settings))
}

async fn run_create(config: &ClaimchainConfig, matches: &ArgMatches) -> Result<ExitCode> {
    let raw = parse_contract_file(contract_path(matches)?)?;
    let orchestrator = orchestrator(config, matches.get_flag("simulate"))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling run");
            on_interrupt.cancel();
        }
    });

    let state = orchestrator.create_resource(&raw, &cancel).await;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print_run_summary(&state);
    }
    Ok(ExitCode::from(exit_status(&state)))
}

fn run_validate(matches: &ArgMatches) -> Result<ExitCode> {
    let raw = parse_contract_file(contract_path(matches)?)?;
    match validate_contract(&raw) {
        Ok(contract) => {
            if matches.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&contract)?);
            } else {
                println!("{} {} is valid", contract.resource_type(), contract.resource_name());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            if matches.get_flag("json") {
                let out = serde_json::json!({
                    "field": error.field,
                    "reason": error.reason_code(),
                    "message": error.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!("{}", error);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_resolve(matches: &ArgMatches) -> Result<ExitCode> {
    let contract = load_contract(matches)?;
    let names = resolve_names(&contract);
    println!("{}", serde_json::to_string_pretty(&names)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_status(config: &ClaimchainConfig, matches: &ArgMatches) -> Result<ExitCode> {
    let contract = load_contract(matches)?;
    let observations = orchestrator(config, matches.get_flag("simulate"))?.status(&contract).await?;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&observations)?);
        return Ok(ExitCode::SUCCESS);
    }
    for observation in &observations {
        let readiness = observation
            .readiness
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "absent".to_string());
        println!("{:<14} {:<40} {}", observation.stage, observation.claim.to_string(), readiness);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_delete(config: &ClaimchainConfig, matches: &ArgMatches) -> Result<ExitCode> {
    let contract = load_contract(matches)?;
    let records = orchestrator(config, matches.get_flag("simulate"))?.teardown(&contract).await;
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print_cleanup(&records);
    }
    let all_deleted = records.iter().all(|record| record.outcome == CleanupOutcome::Deleted);
    Ok(if all_deleted { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn exit_status(state: &WorkflowExecutionState) -> u8 {
    match state.status {
        RunStatus::Completed => 0,
        RunStatus::Cancelled => 130,
        RunStatus::Failed | RunStatus::Running => 1,
    }
}

fn print_run_summary(state: &WorkflowExecutionState) {
    println!("run {} ({:?})", state.run_id, state.status);
    for stage in &state.stages {
        let claim = stage.claim.as_ref().map(ToString::to_string).unwrap_or_default();
        let reused = if stage.preexisting { " (existing)" } else { "" };
        println!("  {:<14} {:<14} {}{}", stage.stage_name, format!("{:?}", stage.status), claim, reused);
    }
    if let Some(endpoints) = &state.endpoints {
        for (label, value) in [
            ("vcluster", &endpoints.vcluster_name),
            ("repository", &endpoints.repository_url),
            ("service", &endpoints.service_url),
        ] {
            if let Some(value) = value {
                println!("  {:<14} {}", label, value);
            }
        }
    }
    if let Some(failure) = &state.failure {
        eprintln!(
            "{} at {}: {}",
            failure.kind,
            failure.stage.as_deref().unwrap_or("validation"),
            redact_sensitive(&failure.message)
        );
    }
    if let Some(detail) = last_observed(state) {
        eprintln!("  {}", detail);
    }
    print_cleanup(&state.cleanup);
}

/// Last readiness seen on the stage that stopped the run.
fn last_observed(state: &WorkflowExecutionState) -> Option<String> {
    let stage = state.first_failed_stage()?;
    let claim = stage.claim.as_ref()?;
    let condition = stage.last_condition.as_ref()?;
    Some(format!("{} last reported {}", claim, condition))
}

fn print_cleanup(records: &[CleanupRecord]) {
    for record in records {
        match &record.outcome {
            CleanupOutcome::Deleted => println!("  deleted {}", record.claim),
            CleanupOutcome::Failed { message } => eprintln!("  could not delete {}: {}", record.claim, redact_sensitive(message)),
        }
    }
}
