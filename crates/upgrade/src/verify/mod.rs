//! Source verification with a block explorer.
//!
//! Explorers accept a submission, hand back a receipt id and settle the
//! result asynchronously. [`VerificationRegistrar`] drives that exchange
//! through any [`VerificationService`], retrying transient failures with
//! exponential backoff and polling until a terminal status is reached.

mod etherscan;

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, Bytes};
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use etherscan::EtherscanClient;

use crate::{ArtifactSource, UpgradeError};

/// Everything the explorer needs to recompile and match a deployed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationRequest {
    pub address: Address,
    /// Fully qualified name (`contracts/TokenV2.sol:TokenV2`).
    pub contract_name: String,
    /// ABI-encoded constructor arguments, empty for implementations.
    pub constructor_args: Bytes,
    /// Full compiler version, e.g. `0.8.20+commit.a1b79de6`.
    pub compiler_version: String,
    pub standard_json_input: Value,
}

/// Terminal result of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified,
    AlreadyVerified,
    Failed(String),
}

impl std::fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationOutcome::Verified => write!(f, "verified"),
            VerificationOutcome::AlreadyVerified => write!(f, "already verified"),
            VerificationOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

impl VerificationOutcome {
    /// `Verified` and `AlreadyVerified` both leave the source published.
    pub fn is_success(&self) -> bool {
        !matches!(self, VerificationOutcome::Failed(_))
    }
}

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    /// Queued under the given receipt id.
    Accepted(String),
    AlreadyVerified,
    /// Refused outright (bad input, unsupported compiler, ...).
    Rejected(String),
}

/// Answer to a status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    Pending,
    Verified,
    AlreadyVerified,
    Failed(String),
}

/// Failure talking to the verification service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Worth retrying: rate limits, transport errors, bytecode not indexed yet.
    #[error("transient service error: {0}")]
    Transient(String),
    #[error("service error: {0}")]
    Fatal(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transient(_))
    }
}

/// Block explorer verification API.
pub trait VerificationService: Send + Sync {
    /// Whether the explorer already has source code for `address`.
    fn is_verified(
        &self,
        address: Address,
    ) -> impl Future<Output = Result<bool, ServiceError>> + Send;

    fn submit(
        &self,
        request: &VerificationRequest,
    ) -> impl Future<Output = Result<SubmitResponse, ServiceError>> + Send;

    fn check_status(
        &self,
        guid: &str,
    ) -> impl Future<Output = Result<VerificationStatus, ServiceError>> + Send;
}

/// Retry bounds of the registrar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrarPolicy {
    /// Status checks before giving up on a pending submission.
    pub max_polls: usize,
    /// Delay before the second status check; doubles afterwards.
    pub poll_interval: Duration,
    /// Upper bound on the backoff delay.
    pub max_poll_interval: Duration,
    /// Submission attempts while the service reports transient errors.
    pub max_submit_attempts: usize,
}

impl Default for RegistrarPolicy {
    fn default() -> Self {
        Self {
            max_polls: 10,
            poll_interval: Duration::from_secs(5),
            max_poll_interval: Duration::from_secs(60),
            max_submit_attempts: 5,
        }
    }
}

impl RegistrarPolicy {
    fn backoff(&self, attempts: usize) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.poll_interval)
            .with_max_delay(self.max_poll_interval.max(self.poll_interval))
            .with_factor(2.0)
            .with_max_times(attempts.saturating_sub(1))
    }
}

/// Why a status poll did not reach a terminal answer.
#[derive(Debug)]
enum PollError {
    Pending,
    Service(ServiceError),
}

impl PollError {
    fn is_retryable(&self) -> bool {
        match self {
            PollError::Pending => true,
            PollError::Service(e) => e.is_transient(),
        }
    }
}

/// Registers implementation sources with a [`VerificationService`].
pub struct VerificationRegistrar<'a, V, A> {
    service: &'a V,
    artifacts: &'a A,
    policy: RegistrarPolicy,
}

impl<'a, V: VerificationService, A: ArtifactSource> VerificationRegistrar<'a, V, A> {
    pub fn new(service: &'a V, artifacts: &'a A, policy: RegistrarPolicy) -> Self {
        Self {
            service,
            artifacts,
            policy,
        }
    }

    /// Publish the source of `contract_name` deployed at `address`.
    ///
    /// Only artifact resolution errors are returned as `Err`; everything the
    /// explorer reports ends up in the [`VerificationOutcome`].
    pub async fn verify_implementation(
        &self,
        address: Address,
        contract_name: &str,
        constructor_args: Bytes,
    ) -> Result<VerificationOutcome, UpgradeError> {
        let artifact = self.artifacts.resolve(contract_name)?;

        let Some(metadata) = artifact.metadata.clone() else {
            return Ok(VerificationOutcome::Failed(format!(
                "no compiler metadata available for {}",
                artifact.fully_qualified_name()
            )));
        };

        match self.service.is_verified(address).await {
            Ok(true) => {
                tracing::info!(address = %address, "Source already verified, skipping submission");
                return Ok(VerificationOutcome::AlreadyVerified);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "Could not check verification status, submitting anyway");
            }
        }

        let request = VerificationRequest {
            address,
            contract_name: artifact.fully_qualified_name(),
            constructor_args,
            compiler_version: metadata.compiler_version,
            standard_json_input: metadata.standard_json_input,
        };

        tracing::info!(
            address = %address,
            contract = %request.contract_name,
            compiler = %request.compiler_version,
            "Submitting source for verification..."
        );

        let guid = match self.submit(&request).await {
            Ok(SubmitResponse::Accepted(guid)) => guid,
            Ok(SubmitResponse::AlreadyVerified) => {
                tracing::info!(address = %address, "Explorer reports source already verified");
                return Ok(VerificationOutcome::AlreadyVerified);
            }
            Ok(SubmitResponse::Rejected(reason)) => {
                return Ok(VerificationOutcome::Failed(reason));
            }
            Err(e) => {
                return Ok(VerificationOutcome::Failed(format!(
                    "submission failed: {e}"
                )));
            }
        };

        tracing::info!(address = %address, guid = %guid, "Submission accepted, waiting for result...");

        let outcome = match self.poll(&guid).await {
            Ok(VerificationStatus::Verified) => VerificationOutcome::Verified,
            Ok(VerificationStatus::AlreadyVerified) => VerificationOutcome::AlreadyVerified,
            Ok(VerificationStatus::Failed(reason)) => VerificationOutcome::Failed(reason),
            Ok(VerificationStatus::Pending) | Err(PollError::Pending) => {
                VerificationOutcome::Failed(format!(
                    "still pending after {} status checks (guid {guid})",
                    self.policy.max_polls
                ))
            }
            Err(PollError::Service(e)) => VerificationOutcome::Failed(e.to_string()),
        };

        tracing::info!(address = %address, outcome = %outcome, "Verification finished");
        Ok(outcome)
    }

    async fn submit(&self, request: &VerificationRequest) -> Result<SubmitResponse, ServiceError> {
        let service = self.service;

        (|| async move { service.submit(request).await })
            .retry(self.policy.backoff(self.policy.max_submit_attempts))
            .when(ServiceError::is_transient)
            .notify(|err: &ServiceError, delay: Duration| {
                tracing::warn!(error = %err, ?delay, "Submission failed, retrying...");
            })
            .await
    }

    async fn poll(&self, guid: &str) -> Result<VerificationStatus, PollError> {
        let service = self.service;

        (|| async move {
            match service.check_status(guid).await {
                Ok(VerificationStatus::Pending) => Err(PollError::Pending),
                Ok(status) => Ok(status),
                Err(e) => Err(PollError::Service(e)),
            }
        })
        .retry(self.policy.backoff(self.policy.max_polls))
        .when(PollError::is_retryable)
        .notify(|err: &PollError, delay: Duration| match err {
            PollError::Pending => tracing::debug!(guid, ?delay, "Verification pending"),
            PollError::Service(e) => {
                tracing::warn!(guid, error = %e, ?delay, "Status check failed, retrying...")
            }
        })
        .await
    }
}
