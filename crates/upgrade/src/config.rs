//! `Proxup.toml` configuration.
//!
//! Values are layered with figment: built-in defaults, then the TOML file,
//! then `PROXUP_`-prefixed environment variables (`__` separates nesting, so
//! `PROXUP_NETWORK__CHAIN_ID=11155111` sets `network.chain_id`). Command line
//! flags are applied on top by the binary.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ConfirmationPolicy, ProxyKind, RegistrarPolicy, TxOptions, TxSender, TxSigner};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "Proxup.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "PROXUP_";

/// Default Etherscan multichain endpoint.
pub const DEFAULT_EXPLORER_URL: &str = "https://api.etherscan.io/v2/api";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    pub network: NetworkConfig,
    pub signer: SignerConfig,
    pub artifacts: ArtifactsConfig,
    pub explorer: ExplorerConfig,
    pub proxy: ProxyConfig,
}

/// Chain endpoint and transaction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_url: String,
    /// Checked against `eth_chainId` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Send type-0 transactions.
    pub legacy: bool,
    pub gas_limit_multiplier_percent: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: None,
            legacy: false,
            gas_limit_multiplier_percent: 120,
            confirmation_timeout_secs: 120,
            poll_interval_ms: 2_000,
        }
    }
}

impl NetworkConfig {
    pub fn rpc_url(&self) -> Result<Url> {
        Url::parse(&self.rpc_url).with_context(|| format!("Invalid RPC URL: {}", self.rpc_url))
    }

    pub fn confirmation_policy(&self) -> ConfirmationPolicy {
        ConfirmationPolicy {
            timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn tx_options(&self) -> TxOptions {
        TxOptions {
            chain_id: self.chain_id,
            legacy: self.legacy,
            gas_limit_multiplier_percent: self.gas_limit_multiplier_percent,
        }
    }
}

/// Credentials used to sign deployment and upgrade transactions.
///
/// Exactly one of `private_key`, `mnemonic` or `unlocked` must be set.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    pub mnemonic_index: u32,
    /// Account unlocked on the node, signed with `eth_sendTransaction`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked: Option<Address>,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("SignerConfig")
            .field("private_key", &redact(&self.private_key))
            .field("mnemonic", &redact(&self.mnemonic))
            .field("mnemonic_index", &self.mnemonic_index)
            .field("unlocked", &self.unlocked)
            .finish()
    }
}

impl SignerConfig {
    pub fn sender(&self) -> Result<TxSender> {
        match (&self.private_key, &self.mnemonic, self.unlocked) {
            (Some(key), None, None) => Ok(TxSender::Local(TxSigner::from_private_key(key)?)),
            (None, Some(phrase), None) => Ok(TxSender::Local(TxSigner::from_mnemonic(
                phrase,
                self.mnemonic_index,
            )?)),
            (None, None, Some(address)) => Ok(TxSender::Unlocked(address)),
            (None, None, None) => anyhow::bail!(
                "No signer configured: set signer.private_key, signer.mnemonic or signer.unlocked"
            ),
            _ => anyhow::bail!(
                "Conflicting signer configuration: set only one of signer.private_key, signer.mnemonic, signer.unlocked"
            ),
        }
    }
}

/// Build toolchain that produced the artifacts.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactLayout {
    #[default]
    Hardhat,
    Foundry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub layout: ArtifactLayout,
    /// Artifact directory. Defaults to `artifacts` (Hardhat) or `out` (Foundry).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Root the source paths in compiler metadata are relative to.
    pub project_root: PathBuf,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            layout: ArtifactLayout::default(),
            path: None,
            project_root: PathBuf::from("."),
        }
    }
}

impl ArtifactsConfig {
    pub fn artifacts_dir(&self) -> PathBuf {
        match (&self.path, self.layout) {
            (Some(path), _) => path.clone(),
            (None, ArtifactLayout::Hardhat) => self.project_root.join("artifacts"),
            (None, ArtifactLayout::Foundry) => self.project_root.join("out"),
        }
    }
}

/// Block explorer verification settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sent as `chainid`. Defaults to the chain id of the RPC endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    pub max_polls: usize,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub max_submit_attempts: usize,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        let policy = RegistrarPolicy::default();
        Self {
            api_url: DEFAULT_EXPLORER_URL.to_string(),
            api_key: None,
            chain_id: None,
            max_polls: policy.max_polls,
            poll_interval_ms: policy.poll_interval.as_millis() as u64,
            max_poll_interval_ms: policy.max_poll_interval.as_millis() as u64,
            max_submit_attempts: policy.max_submit_attempts,
        }
    }
}

impl fmt::Debug for ExplorerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("chain_id", &self.chain_id)
            .field("max_polls", &self.max_polls)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_interval_ms", &self.max_poll_interval_ms)
            .field("max_submit_attempts", &self.max_submit_attempts)
            .finish()
    }
}

impl ExplorerConfig {
    pub fn api_url(&self) -> Result<Url> {
        Url::parse(&self.api_url)
            .with_context(|| format!("Invalid explorer API URL: {}", self.api_url))
    }

    pub fn registrar_policy(&self) -> RegistrarPolicy {
        RegistrarPolicy {
            max_polls: self.max_polls.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_interval: Duration::from_millis(self.max_poll_interval_ms),
            max_submit_attempts: self.max_submit_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
}

impl UpgradeConfig {
    /// Layer defaults, the TOML file and the environment.
    ///
    /// With `path` set the file must exist. Without it, `Proxup.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(UpgradeConfig::default()));

        match path {
            Some(path) => {
                let file = if path.is_dir() {
                    path.join(CONFIG_FILENAME)
                } else {
                    path.to_path_buf()
                };
                if !file.exists() {
                    anyhow::bail!("Configuration file not found: {}", file.display());
                }
                tracing::debug!(path = %file.display(), "Loading configuration file");
                figment = figment.merge(Toml::file(file));
            }
            None if Path::new(CONFIG_FILENAME).exists() => {
                tracing::debug!(path = CONFIG_FILENAME, "Loading configuration file");
                figment = figment.merge(Toml::file(CONFIG_FILENAME));
            }
            None => {}
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Invalid configuration")
    }

    /// Write the configuration as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}
