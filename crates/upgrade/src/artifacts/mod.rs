//! Compiled contract artifacts.
//!
//! Artifacts are produced by an external build toolchain. This module only
//! reads them: [`HardhatArtifacts`] understands the `artifacts/` + `build-info/`
//! layout, [`FoundryArtifacts`] the `out/` layout.

mod foundry;
mod hardhat;

use std::path::{Path, PathBuf};

use alloy_core::{json_abi::JsonAbi, primitives::Bytes};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use foundry::FoundryArtifacts;
pub use hardhat::HardhatArtifacts;

use crate::UpgradeError;

/// Compiler inputs needed to reproduce an artifact's bytecode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Full compiler version, e.g. `0.8.20+commit.a1b79de6`.
    pub compiler_version: String,
    /// The solc standard JSON input the contract was compiled from.
    pub standard_json_input: Value,
}

/// A compiled contract resolved by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractArtifact {
    /// Contract name, e.g. `TokenV2`.
    pub contract_name: String,
    /// Source unit the contract lives in, e.g. `contracts/TokenV2.sol`.
    pub source_name: String,
    /// Creation bytecode.
    pub bytecode: Bytes,
    pub abi: JsonAbi,
    /// Present when the toolchain kept enough information to verify the source.
    pub metadata: Option<SourceMetadata>,
}

impl ContractArtifact {
    /// `source:Name`, the form explorers expect as contract name.
    pub fn fully_qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }

    /// Whether the constructor takes arguments.
    pub fn constructor_has_inputs(&self) -> bool {
        self.abi
            .constructor
            .as_ref()
            .is_some_and(|ctor| !ctor.inputs.is_empty())
    }
}

/// Resolves contract names to compiled artifacts.
pub trait ArtifactSource: Send + Sync {
    /// Look up `name`, either a bare contract name or `path/File.sol:Name`.
    fn resolve(&self, name: &str) -> Result<ContractArtifact, UpgradeError>;
}

/// Split `path/File.sol:Name` into its source and contract parts.
pub(crate) fn split_qualified_name(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once(':') {
        Some((source, contract)) => (Some(source), contract),
        None => (None, name),
    }
}

/// Decode hex bytecode, rejecting unlinked library placeholders.
pub(crate) fn decode_bytecode(name: &str, hex_code: &str) -> Result<Bytes, UpgradeError> {
    let code = hex_code.trim_start_matches("0x");
    if code.contains("__") {
        return Err(UpgradeError::DeploymentFailed {
            contract: name.to_string(),
            reason: "bytecode has unlinked library references".to_string(),
            at: crate::FailurePoint::PreBroadcast,
        });
    }

    hex::decode(code)
        .map(Bytes::from)
        .map_err(|e| UpgradeError::InvalidArtifact {
            name: name.to_string(),
            reason: format!("invalid bytecode hex: {e}"),
        })
}

/// Pick the single candidate among `paths`, failing on zero or several matches.
pub(crate) fn unique_match(name: &str, mut paths: Vec<PathBuf>) -> Result<PathBuf, UpgradeError> {
    match paths.len() {
        0 => Err(UpgradeError::ArtifactNotFound(name.to_string())),
        1 => Ok(paths.remove(0)),
        _ => {
            let candidates = paths
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            Err(UpgradeError::InvalidArtifact {
                name: name.to_string(),
                reason: format!("ambiguous name, use a fully qualified name. Candidates: {candidates}"),
            })
        }
    }
}

/// Read and parse the artifact file at `path` for contract `name`.
pub(crate) fn read_artifact<T: serde::de::DeserializeOwned>(
    name: &str,
    path: &Path,
) -> Result<T, UpgradeError> {
    read_json(path).map_err(|e| UpgradeError::InvalidArtifact {
        name: name.to_string(),
        reason: format!("{e:#}"),
    })
}

/// Read and parse a JSON file.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, anyhow::Error> {
    use anyhow::Context;

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
