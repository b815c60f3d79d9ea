//! Rendering of workflow reports and proxy state.

use alloy_core::primitives::Address;
use anyhow::Result;
use comfy_table::{Attribute, Cell, Color, Table, presets::ASCII_MARKDOWN};
use proxup_upgrade::{
    DeploymentReceipt, ProxyState, Step, TransactionReceipt, VerificationOutcome, WorkflowReport,
    WorkflowState,
};
use serde::Serialize;

use crate::cli::OutputFormat;

#[derive(Debug, Serialize)]
struct FailureView {
    step: Step,
    error: String,
}

/// Serializable snapshot of a [`WorkflowReport`].
#[derive(Debug, Serialize)]
pub struct ReportView {
    state: WorkflowState,
    state_changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment: Option<DeploymentReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upgrade: Option<TransactionReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verification: Option<VerificationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureView>,
}

impl From<&WorkflowReport> for ReportView {
    fn from(report: &WorkflowReport) -> Self {
        Self {
            state: report.state,
            state_changed: report.state_changed(),
            deployment: report.deployment.clone(),
            upgrade: report.upgrade.clone(),
            verification: report.verification.clone(),
            failure: report.failure.as_ref().map(|failure| FailureView {
                step: failure.step,
                error: failure.error.to_string(),
            }),
        }
    }
}

fn header(title: &str) -> Cell {
    Cell::new(title).add_attribute(Attribute::Bold).fg(Color::Blue)
}

fn add(table: &mut Table, field: &str, value: impl std::fmt::Display) {
    table.add_row([field.to_string(), value.to_string()]);
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(ASCII_MARKDOWN);
    table.set_header([header("Field"), header("Value")]);
    table
}

impl ReportView {
    fn table(&self) -> Table {
        let mut table = new_table();

        let state_color = match self.state {
            WorkflowState::Done => Color::Green,
            _ => Color::Red,
        };
        table.add_row([
            Cell::new("state"),
            Cell::new(self.state.to_string()).fg(state_color),
        ]);
        add(&mut table, "state changed on chain", if self.state_changed { "yes" } else { "no" });

        if let Some(deployment) = &self.deployment {
            add(&mut table, "implementation", deployment.address);
            add(&mut table, "contract", &deployment.contract_name);
            add(&mut table, "deploy tx", deployment.transaction_hash);
            add(&mut table, "deploy block", deployment.block_number);
            add(&mut table, "deploy gas", deployment.gas_used);
        }
        if let Some(upgrade) = &self.upgrade {
            add(&mut table, "upgrade tx", upgrade.transaction_hash);
            add(&mut table, "upgrade block", upgrade.block_number);
            add(&mut table, "upgrade gas", upgrade.gas_used);
        }
        if let Some(verification) = &self.verification {
            add(&mut table, "verification", verification);
        }
        if let Some(failure) = &self.failure {
            table.add_row([
                Cell::new("failed step"),
                Cell::new(failure.step.to_string()).fg(Color::Red),
            ]);
            add(&mut table, "error", &failure.error);
        }

        table
    }
}

/// Print `report` in the requested format.
pub fn print_report(report: &WorkflowReport, format: OutputFormat) -> Result<()> {
    let view = ReportView::from(report);
    match format {
        OutputFormat::Table => println!("{}", view.table()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
    }
    Ok(())
}

/// Print the EIP-1967 pointers of a proxy.
pub fn print_proxy_state(state: &ProxyState, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            let mut table = new_table();
            add(&mut table, "proxy", state.proxy);
            add(&mut table, "implementation", display_slot(state.implementation));
            add(&mut table, "admin", display_slot(state.admin));
            println!("{table}");
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(state)?),
    }
    Ok(())
}

fn display_slot(address: Address) -> String {
    if address.is_zero() {
        "(empty)".to_string()
    } else {
        address.to_string()
    }
}
