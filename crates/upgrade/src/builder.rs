//! Assembling a [`UpgradeWorkflow`] from an [`UpgradeConfig`].

use anyhow::{Context, Result};
use url::Url;

use crate::{
    ArtifactLayout, ArtifactSource, ContractArtifact, EtherscanClient, FoundryArtifacts,
    HardhatArtifacts, RpcChainClient, UpgradeConfig, UpgradeError, UpgradeWorkflow,
};

/// Artifact source selected by `artifacts.layout`.
#[derive(Debug, Clone)]
pub enum ProjectArtifacts {
    Hardhat(HardhatArtifacts),
    Foundry(FoundryArtifacts),
}

impl ArtifactSource for ProjectArtifacts {
    fn resolve(&self, name: &str) -> Result<ContractArtifact, UpgradeError> {
        match self {
            ProjectArtifacts::Hardhat(artifacts) => artifacts.resolve(name),
            ProjectArtifacts::Foundry(artifacts) => artifacts.resolve(name),
        }
    }
}

/// A workflow wired to a JSON-RPC endpoint, project artifacts and Etherscan.
pub type ConfiguredWorkflow = UpgradeWorkflow<RpcChainClient, ProjectArtifacts, EtherscanClient>;

/// Builds a [`ConfiguredWorkflow`], letting callers override configured values.
#[derive(Debug, Clone)]
pub struct WorkflowBuilder {
    config: UpgradeConfig,
}

impl WorkflowBuilder {
    pub fn new(config: UpgradeConfig) -> Self {
        Self { config }
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.network.rpc_url = url.into();
        self
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    pub fn artifacts(&self) -> ProjectArtifacts {
        let artifacts = &self.config.artifacts;
        let dir = artifacts.artifacts_dir();
        match artifacts.layout {
            ArtifactLayout::Hardhat => ProjectArtifacts::Hardhat(HardhatArtifacts::new(dir)),
            ArtifactLayout::Foundry => ProjectArtifacts::Foundry(FoundryArtifacts::new(
                dir,
                artifacts.project_root.clone(),
            )),
        }
    }

    /// Connect to the chain and assemble the workflow.
    pub async fn build(self) -> Result<ConfiguredWorkflow> {
        let UpgradeConfig {
            network,
            signer,
            explorer,
            proxy,
            ..
        } = &self.config;

        let rpc_url: Url = network.rpc_url()?;
        let sender = signer.sender().context("Failed to load signer")?;
        let client = RpcChainClient::connect(rpc_url, sender, network.tx_options()).await?;

        let explorer_chain_id = explorer.chain_id.unwrap_or(client.chain_id());
        let api_key = explorer.api_key.clone().unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("No explorer API key configured, verification requests will likely be rejected");
        }
        let service = EtherscanClient::new(explorer.api_url()?, api_key, Some(explorer_chain_id))?;

        tracing::info!(
            layout = %self.config.artifacts.layout,
            artifacts = %self.config.artifacts.artifacts_dir().display(),
            proxy_kind = %proxy.kind,
            explorer = %explorer.api_url,
            "Upgrade workflow configured"
        );

        Ok(UpgradeWorkflow::new(
            client,
            self.artifacts(),
            service,
            proxy.kind,
            network.confirmation_policy(),
            explorer.registrar_policy(),
        ))
    }
}
