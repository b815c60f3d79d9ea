//! Foundry artifact layout (`out/<File>.sol/<Name>.json`).
//!
//! Foundry does not keep the compiler input around, so the standard JSON
//! input is rebuilt from the `metadata` embedded in the artifact plus the
//! source files under the project root.

use std::path::{Path, PathBuf};

use alloy_core::json_abi::JsonAbi;
use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use super::{
    ArtifactSource, ContractArtifact, SourceMetadata, decode_bytecode, read_artifact,
    split_qualified_name, unique_match,
};
use crate::UpgradeError;

#[derive(Debug, Deserialize)]
struct FoundryArtifact {
    abi: JsonAbi,
    bytecode: BytecodeObject,
    #[serde(default)]
    metadata: Option<CompilerMetadata>,
}

#[derive(Debug, Deserialize)]
struct BytecodeObject {
    object: String,
}

#[derive(Debug, Deserialize)]
struct CompilerMetadata {
    compiler: CompilerVersion,
    language: String,
    settings: Map<String, Value>,
    sources: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CompilerVersion {
    version: String,
}

impl CompilerMetadata {
    /// The `(source, contract)` this artifact was compiled for.
    fn compilation_target(&self) -> Option<(String, String)> {
        let targets = self.settings.get("compilationTarget")?.as_object()?;
        let (source, contract) = targets.iter().next()?;
        Some((source.clone(), contract.as_str()?.to_string()))
    }

    /// Rebuild the solc standard JSON input, reading sources from `project_root`.
    fn standard_json_input(&self, project_root: &Path) -> Result<Value, anyhow::Error> {
        let mut sources = Map::new();
        for path in self.sources.keys() {
            let content = std::fs::read_to_string(project_root.join(path))
                .with_context(|| format!("Failed to read source {}", path))?;
            sources.insert(path.clone(), serde_json::json!({ "content": content }));
        }

        let mut settings = self.settings.clone();
        settings.remove("compilationTarget");
        settings.insert(
            "outputSelection".to_string(),
            serde_json::json!({ "*": { "*": ["abi", "evm.bytecode", "evm.deployedBytecode", "metadata"] } }),
        );

        Ok(serde_json::json!({
            "language": self.language,
            "sources": sources,
            "settings": settings,
        }))
    }
}

/// Reads artifacts from a Foundry `out/` directory.
#[derive(Debug, Clone)]
pub struct FoundryArtifacts {
    out_dir: PathBuf,
    project_root: PathBuf,
}

impl FoundryArtifacts {
    /// `out_dir` holds the artifacts, `project_root` the sources they were built from.
    pub fn new(out_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            project_root: project_root.into(),
        }
    }

    fn candidates(&self, source: Option<&str>, contract: &str) -> Vec<PathBuf> {
        let file_name = format!("{contract}.json");

        if let Some(source) = source {
            let unit = Path::new(source).file_name().unwrap_or_default();
            let path = self.out_dir.join(unit).join(&file_name);
            return if path.is_file() { vec![path] } else { vec![] };
        }

        WalkDir::new(&self.out_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == file_name.as_str())
            .map(|entry| entry.into_path())
            .collect()
    }
}

impl ArtifactSource for FoundryArtifacts {
    fn resolve(&self, name: &str) -> Result<ContractArtifact, UpgradeError> {
        let (source, contract) = split_qualified_name(name);
        let path = unique_match(name, self.candidates(source, contract))?;

        let raw: FoundryArtifact = read_artifact(name, &path)?;
        let bytecode = decode_bytecode(contract, &raw.bytecode.object)?;

        let target = raw.metadata.as_ref().and_then(CompilerMetadata::compilation_target);
        if let (Some(expected), Some((actual, _))) = (source, target.as_ref()) {
            if expected != actual {
                return Err(UpgradeError::ArtifactNotFound(name.to_string()));
            }
        }

        let source_name = match (target, source) {
            (Some((source, _)), _) => source,
            (None, Some(source)) => source.to_string(),
            (None, None) => path
                .parent()
                .and_then(Path::file_name)
                .map(|unit| unit.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let metadata = match raw.metadata {
            Some(compiler) => match compiler.standard_json_input(&self.project_root) {
                Ok(input) => Some(SourceMetadata {
                    compiler_version: compiler.compiler.version,
                    standard_json_input: input,
                }),
                Err(e) => {
                    tracing::warn!(
                        contract,
                        error = %e,
                        "Could not rebuild compiler input, source verification will be unavailable"
                    );
                    None
                }
            },
            None => None,
        };

        tracing::debug!(
            contract,
            source = %source_name,
            path = %path.display(),
            has_metadata = metadata.is_some(),
            "Resolved Foundry artifact"
        );

        Ok(ContractArtifact {
            contract_name: contract.to_string(),
            source_name,
            bytecode,
            abi: raw.abi,
            metadata,
        })
    }
}
