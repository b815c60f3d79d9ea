//! proxup-upgrade - Upgrade library for proxy-based contracts.
//!
//! This crate deploys new implementation contracts, repoints EIP-1967 proxies
//! at them and publishes their source with a block explorer. The operations
//! only see the chain, the artifacts and the explorer through the
//! [`ChainClient`], [`ArtifactSource`] and [`VerificationService`] traits.

mod error;
pub use error::{FailurePoint, UpgradeError};

pub mod rpc;

mod chain;
pub use chain::{
    CallResult, ChainClient, ConfirmationPolicy, RpcChainClient, TransactionReceipt,
    TransactionRequest, TxOptions, TxSender, TxSigner, wait_for_receipt,
};

mod artifacts;
pub use artifacts::{
    ArtifactSource, ContractArtifact, FoundryArtifacts, HardhatArtifacts, SourceMetadata,
};

mod deployer;
pub use deployer::{DeploymentReceipt, ImplementationDeployer};

pub mod proxy;
pub use proxy::{ProxyKind, ProxyState, ProxyUpgrader};

mod verify;
pub use verify::{
    EtherscanClient, RegistrarPolicy, ServiceError, SubmitResponse, VerificationOutcome,
    VerificationRegistrar, VerificationRequest, VerificationService, VerificationStatus,
};

mod workflow;
pub use workflow::{
    Step, StepFailure, UpgradePlan, UpgradeWorkflow, WorkflowProgress, WorkflowReport,
    WorkflowState,
};

mod config;
pub use config::{
    ArtifactLayout, ArtifactsConfig, CONFIG_FILENAME, ENV_PREFIX, ExplorerConfig, NetworkConfig,
    ProxyConfig, SignerConfig, UpgradeConfig,
};

mod builder;
pub use builder::{ConfiguredWorkflow, ProjectArtifacts, WorkflowBuilder};
