//! proxup is a CLI tool to deploy, upgrade and verify proxy implementations.

mod cli;
mod report;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use proxup_upgrade::{UpgradeConfig, WorkflowBuilder, WorkflowProgress, WorkflowReport};

/// Failed before anything was committed on chain.
const EXIT_NO_STATE_CHANGE: u8 = 1;
/// Failed after a deployment or upgrade was (or may have been) committed.
const EXIT_STATE_CHANGED: u8 = 2;
/// Interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    tokio::select! {
        result = run(&cli) => match result {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = ?e, "proxup failed");
                ExitCode::from(EXIT_NO_STATE_CHANGE)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted before the workflow started, nothing was broadcast");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let config = UpgradeConfig::load(cli.config.as_deref())?;
    tracing::debug!(config = ?config, "Configuration loaded");

    let mut builder = WorkflowBuilder::new(config);
    if let Some(rpc_url) = &cli.rpc_url {
        builder = builder.rpc_url(rpc_url.clone());
    }

    // Reject bad plans before connecting anywhere.
    let plan = cli.command.plan();
    if let Some(plan) = &plan {
        plan.validate()?;
    }

    let workflow = builder.build().await?;

    let Some(plan) = plan else {
        let Command::Inspect(args) = &cli.command else {
            anyhow::bail!("Subcommand {:?} has no upgrade plan", cli.command);
        };
        let state = workflow.upgrader().proxy_state(args.proxy).await?;
        report::print_proxy_state(&state, cli.output)?;
        return Ok(ExitCode::SUCCESS);
    };

    let report = tokio::select! {
        report = workflow.run(&plan) => report?,
        _ = tokio::signal::ctrl_c() => {
            let progress = workflow.progress();
            tracing::warn!(
                deployed = ?progress.deployed,
                upgraded = progress.upgraded,
                "{}",
                interrupted_message(progress)
            );
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };
    report::print_report(&report, cli.output)?;

    Ok(exit_code(&report))
}

/// What an interrupted run leaves behind on chain.
fn interrupted_message(progress: WorkflowProgress) -> String {
    match progress {
        WorkflowProgress { upgraded: true, .. } => {
            "Interrupted after the upgrade was confirmed, only verification is missing".to_string()
        }
        WorkflowProgress {
            deployed: Some(address),
            ..
        } => format!(
            "Interrupted after deploying {address}. An upgrade transaction may already be broadcast, inspect the proxy before retrying"
        ),
        WorkflowProgress { deployed: None, .. } => {
            "Interrupted before a deployment was confirmed. A deployment transaction may already be broadcast, inspect the sender's nonce before retrying".to_string()
        }
    }
}

fn exit_code(report: &WorkflowReport) -> ExitCode {
    if report.succeeded() {
        ExitCode::SUCCESS
    } else if report.state_changed() {
        tracing::warn!("On-chain state changed before the failure, inspect it before retrying");
        ExitCode::from(EXIT_STATE_CHANGED)
    } else {
        ExitCode::from(EXIT_NO_STATE_CHANGE)
    }
}
