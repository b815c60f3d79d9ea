//! Command line arguments.

use std::path::PathBuf;

use alloy_core::primitives::{Address, Bytes};
use clap::{Args, Parser, Subcommand};
use proxup_upgrade::{Step, UpgradePlan};
use tracing::level_filters::LevelFilter;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
}

/// proxup deploys upgrade implementations, repoints proxies at them and verifies their source.
#[derive(Parser, Debug)]
#[command(name = "proxup", version, about, long_about = None)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "PROXUP_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Proxup.toml file (or a directory containing one).
    #[arg(short, long, global = true, alias = "conf", env = "PROXUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON-RPC endpoint. Overrides `network.rpc_url`.
    #[arg(long, global = true, alias = "rpc", env = "PROXUP_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Output format of the final report.
    #[arg(long, global = true, env = "PROXUP_OUTPUT", default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Deploy an implementation, upgrade the proxy to it and verify it.
    Upgrade(UpgradeArgs),
    /// Deploy an implementation contract.
    Deploy(DeployArgs),
    /// Point a proxy at an already deployed implementation.
    UpgradeProxy(UpgradeProxyArgs),
    /// Verify the source of a deployed implementation.
    Verify(VerifyArgs),
    /// Show the current implementation and admin of a proxy.
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Contract name, plain (`TokenV2`) or fully qualified (`contracts/TokenV2.sol:TokenV2`).
    #[arg(long, env = "PROXUP_CONTRACT")]
    pub contract: String,

    /// Proxy to upgrade.
    #[arg(long, env = "PROXUP_PROXY_ADDRESS")]
    pub proxy: Option<Address>,

    /// Already deployed implementation, for runs without the deploy step.
    #[arg(long, alias = "impl", env = "PROXUP_IMPLEMENTATION")]
    pub implementation: Option<Address>,

    /// Steps to run.
    #[arg(
        long,
        env = "PROXUP_STEPS",
        value_delimiter = ',',
        default_value = "deploy,upgrade,verify"
    )]
    pub steps: Vec<Step>,

    /// Calldata forwarded to the new implementation with the upgrade.
    #[arg(long, env = "PROXUP_UPGRADE_CALLDATA", default_value_t = Bytes::new())]
    pub calldata: Bytes,

    /// ABI-encoded constructor arguments used at deployment.
    #[arg(long, env = "PROXUP_CONSTRUCTOR_ARGS", default_value_t = Bytes::new())]
    pub constructor_args: Bytes,
}

#[derive(Args, Debug)]
pub struct DeployArgs {
    #[arg(long, env = "PROXUP_CONTRACT")]
    pub contract: String,
}

#[derive(Args, Debug)]
pub struct UpgradeProxyArgs {
    #[arg(long, env = "PROXUP_PROXY_ADDRESS")]
    pub proxy: Address,

    #[arg(long, alias = "impl", env = "PROXUP_IMPLEMENTATION")]
    pub implementation: Address,

    #[arg(long, env = "PROXUP_UPGRADE_CALLDATA", default_value_t = Bytes::new())]
    pub calldata: Bytes,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Address of the deployed implementation.
    #[arg(long, env = "PROXUP_IMPLEMENTATION")]
    pub address: Address,

    #[arg(long, env = "PROXUP_CONTRACT")]
    pub contract: String,

    #[arg(long, env = "PROXUP_CONSTRUCTOR_ARGS", default_value_t = Bytes::new())]
    pub constructor_args: Bytes,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[arg(long, env = "PROXUP_PROXY_ADDRESS")]
    pub proxy: Address,
}

impl Command {
    /// The plan a workflow subcommand runs, `None` for `inspect`.
    pub fn plan(&self) -> Option<UpgradePlan> {
        let plan = match self {
            Command::Upgrade(args) => UpgradePlan {
                contract_name: args.contract.clone(),
                proxy: args.proxy,
                implementation: args.implementation,
                steps: args.steps.iter().copied().collect(),
                constructor_args: args.constructor_args.clone(),
                upgrade_calldata: args.calldata.clone(),
            },
            Command::Deploy(args) => UpgradePlan {
                contract_name: args.contract.clone(),
                proxy: None,
                implementation: None,
                steps: [Step::Deploy].into(),
                constructor_args: Bytes::new(),
                upgrade_calldata: Bytes::new(),
            },
            Command::UpgradeProxy(args) => UpgradePlan {
                contract_name: String::new(),
                proxy: Some(args.proxy),
                implementation: Some(args.implementation),
                steps: [Step::Upgrade].into(),
                constructor_args: Bytes::new(),
                upgrade_calldata: args.calldata.clone(),
            },
            Command::Verify(args) => UpgradePlan::verify_only(args.contract.clone(), args.address)
                .with_constructor_args(args.constructor_args.clone()),
            Command::Inspect(_) => return None,
        };
        Some(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROXY: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    #[test]
    fn test_upgrade_defaults_to_all_steps() {
        let cli = Cli::parse_from(["proxup", "upgrade", "--contract", "TokenV2", "--proxy", PROXY]);
        let plan = cli.command.plan().unwrap();
        assert_eq!(plan.steps, [Step::Deploy, Step::Upgrade, Step::Verify].into());
        assert_eq!(plan.proxy, Some(PROXY.parse().unwrap()));
        assert!(plan.validate().is_ok());
        assert_eq!(cli.output, OutputFormat::Table);
    }

    #[test]
    fn test_step_selection() {
        let cli = Cli::parse_from([
            "proxup",
            "--output",
            "json",
            "upgrade",
            "--contract",
            "TokenV2",
            "--implementation",
            PROXY,
            "--steps",
            "verify",
        ]);
        let plan = cli.command.plan().unwrap();
        assert_eq!(plan.steps, [Step::Verify].into());
        assert!(plan.validate().is_ok());
        assert_eq!(cli.output, OutputFormat::Json);
    }

    #[test]
    fn test_unknown_step_rejected() {
        assert!(
            Cli::try_parse_from(["proxup", "upgrade", "--contract", "A", "--steps", "rollback"])
                .is_err()
        );
    }

    #[test]
    fn test_inspect_has_no_plan() {
        let cli = Cli::parse_from(["proxup", "inspect", "--proxy", PROXY]);
        assert!(cli.command.plan().is_none());
    }

    #[test]
    fn test_upgrade_proxy_with_calldata() {
        let cli = Cli::parse_from([
            "proxup",
            "upgrade-proxy",
            "--proxy",
            PROXY,
            "--implementation",
            PROXY,
            "--calldata",
            "0x8129fc1c",
        ]);
        let plan = cli.command.plan().unwrap();
        assert_eq!(plan.upgrade_calldata.as_ref(), &[0x81, 0x29, 0xfc, 0x1c]);
        assert!(plan.validate().is_ok());
    }
}
