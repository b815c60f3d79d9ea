//! Hardhat artifact layout.
//!
//! ```text
//! artifacts/
//! ├── build-info/<hash>.json
//! └── contracts/TokenV2.sol/
//!     ├── TokenV2.json
//!     └── TokenV2.dbg.json   -> { "buildInfo": "../../build-info/<hash>.json" }
//! ```

use std::path::{Path, PathBuf};

use alloy_core::json_abi::JsonAbi;
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use super::{
    ArtifactSource, ContractArtifact, SourceMetadata, decode_bytecode, read_artifact, read_json,
    split_qualified_name, unique_match,
};
use crate::UpgradeError;

const BUILD_INFO_DIR: &str = "build-info";
const DBG_SUFFIX: &str = ".dbg.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardhatArtifact {
    contract_name: String,
    source_name: String,
    abi: JsonAbi,
    bytecode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugFile {
    build_info: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    solc_long_version: String,
    input: Value,
}

/// Reads artifacts from a Hardhat `artifacts/` directory.
#[derive(Debug, Clone)]
pub struct HardhatArtifacts {
    root: PathBuf,
}

impl HardhatArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, source: Option<&str>, contract: &str) -> Vec<PathBuf> {
        let file_name = format!("{contract}.json");

        if let Some(source) = source {
            let path = self.root.join(source).join(&file_name);
            return if path.is_file() { vec![path] } else { vec![] };
        }

        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != BUILD_INFO_DIR)
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == file_name.as_str())
            .map(|entry| entry.into_path())
            .collect()
    }

    fn load_metadata(&self, artifact_path: &Path) -> Option<SourceMetadata> {
        let file_name = artifact_path.file_name()?.to_str()?;
        let dbg_path = artifact_path.with_file_name(file_name.replace(".json", DBG_SUFFIX));
        let dir = artifact_path.parent()?;

        let result = read_json::<DebugFile>(&dbg_path).and_then(|dbg| {
            let build_info: BuildInfo = read_json(&dir.join(&dbg.build_info))?;
            Ok(SourceMetadata {
                compiler_version: build_info.solc_long_version,
                standard_json_input: build_info.input,
            })
        });

        match result {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::debug!(
                    artifact = %artifact_path.display(),
                    error = %e,
                    "No build info for artifact, source verification will be unavailable"
                );
                None
            }
        }
    }
}

impl ArtifactSource for HardhatArtifacts {
    fn resolve(&self, name: &str) -> Result<ContractArtifact, UpgradeError> {
        let (source, contract) = split_qualified_name(name);
        let path = unique_match(name, self.candidates(source, contract))?;

        let raw: HardhatArtifact = read_artifact(name, &path)?;
        let bytecode = decode_bytecode(&raw.contract_name, &raw.bytecode)?;
        let metadata = self.load_metadata(&path);

        tracing::debug!(
            contract = %raw.contract_name,
            source = %raw.source_name,
            path = %path.display(),
            has_metadata = metadata.is_some(),
            "Resolved Hardhat artifact"
        );

        Ok(ContractArtifact {
            contract_name: raw.contract_name,
            source_name: raw.source_name,
            bytecode,
            abi: raw.abi,
            metadata,
        })
    }
}
