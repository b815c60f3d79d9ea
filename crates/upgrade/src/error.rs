//! Error taxonomy of the upgrade operations.

use alloy_core::primitives::Address;

/// Where a transaction-backed operation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum FailurePoint {
    /// Rejected before anything was broadcast (validation or simulation).
    PreBroadcast,
    /// Broadcast and mined, but the transaction reverted.
    Reverted,
    /// Broadcast, but no receipt was observed before the confirmation timeout.
    Unconfirmed,
    /// Mined successfully, but the resulting on-chain state did not check out.
    PostCheck,
}

impl FailurePoint {
    /// Whether the chain may hold a state change the caller has not observed.
    pub fn may_have_changed_state(&self) -> bool {
        matches!(self, FailurePoint::Unconfirmed | FailurePoint::PostCheck)
    }
}

/// Errors surfaced by the deployer, the upgrader, the registrar and the workflow.
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    /// No compiled artifact matches the requested contract name.
    #[error("no artifact found for contract `{0}`")]
    ArtifactNotFound(String),

    /// An artifact matched but cannot be used as is (ambiguous name, unreadable file, bad bytecode).
    #[error("artifact for `{name}` is unusable: {reason}")]
    InvalidArtifact { name: String, reason: String },

    /// The implementation contract could not be deployed.
    #[error("deployment of `{contract}` failed ({at}): {reason}")]
    DeploymentFailed {
        contract: String,
        reason: String,
        at: FailurePoint,
    },

    /// The signer is not allowed to change the proxy's implementation.
    #[error("{caller} is not authorized to upgrade proxy {proxy}: {reason}")]
    UpgradeUnauthorized {
        proxy: Address,
        caller: Address,
        reason: String,
    },

    /// The proxy rejected the upgrade or the upgrade could not be confirmed.
    #[error("upgrade of proxy {proxy} failed ({at}): {reason}")]
    UpgradeFailed {
        proxy: Address,
        reason: String,
        at: FailurePoint,
    },

    /// The explorer did not accept the source code.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The requested steps cannot run with the inputs provided.
    #[error("invalid upgrade plan: {0}")]
    InvalidPlan(String),

    /// Transport or node failure while talking to the chain.
    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

impl UpgradeError {
    /// Whether this failure may have left an unobserved state change on chain.
    pub fn may_have_changed_state(&self) -> bool {
        match self {
            UpgradeError::DeploymentFailed { at, .. } | UpgradeError::UpgradeFailed { at, .. } => {
                at.may_have_changed_state()
            }
            _ => false,
        }
    }
}
