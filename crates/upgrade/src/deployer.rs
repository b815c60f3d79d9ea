//! Implementation contract deployment.

use alloy_core::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::{
    ArtifactSource, ChainClient, ConfirmationPolicy, FailurePoint, TransactionRequest,
    UpgradeError, chain::wait_for_receipt,
};

/// A confirmed contract deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    pub contract_name: String,
    pub address: Address,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Deploys implementation contracts from compiled artifacts.
///
/// Implementations behind a proxy are initialized through the proxy, so the
/// creation transaction never carries constructor arguments.
pub struct ImplementationDeployer<'a, C, A> {
    client: &'a C,
    artifacts: &'a A,
    confirmation: ConfirmationPolicy,
}

impl<'a, C: ChainClient, A: ArtifactSource> ImplementationDeployer<'a, C, A> {
    pub fn new(client: &'a C, artifacts: &'a A, confirmation: ConfirmationPolicy) -> Self {
        Self {
            client,
            artifacts,
            confirmation,
        }
    }

    /// Deploy `contract_name` and wait until its code is live on chain.
    pub async fn deploy_implementation(
        &self,
        contract_name: &str,
    ) -> Result<DeploymentReceipt, UpgradeError> {
        let artifact = self.artifacts.resolve(contract_name)?;
        let failed = |reason: String, at: FailurePoint| UpgradeError::DeploymentFailed {
            contract: artifact.contract_name.clone(),
            reason,
            at,
        };

        if artifact.constructor_has_inputs() {
            return Err(failed(
                "constructor takes arguments, implementation contracts must be initialized through the proxy"
                    .to_string(),
                FailurePoint::PreBroadcast,
            ));
        }
        if artifact.bytecode.is_empty() {
            return Err(failed(
                "artifact has no creation bytecode (abstract contract or interface?)".to_string(),
                FailurePoint::PreBroadcast,
            ));
        }

        tracing::info!(
            contract = %artifact.contract_name,
            source = %artifact.source_name,
            deployer = %self.client.sender(),
            bytecode_size = artifact.bytecode.len(),
            "Deploying implementation..."
        );

        let tx_hash = self
            .client
            .send_transaction(TransactionRequest::create(artifact.bytecode.clone()))
            .await
            .map_err(|e| failed(format!("{e:#}"), FailurePoint::PreBroadcast))?;

        tracing::info!(tx_hash = %tx_hash, "Creation transaction broadcast");

        let receipt = wait_for_receipt(self.client, tx_hash, self.confirmation)
            .await
            .map_err(|e| failed(format!("{e:#}"), FailurePoint::Unconfirmed))?;

        if !receipt.succeeded() {
            return Err(failed(
                format!("creation transaction {tx_hash} reverted"),
                FailurePoint::Reverted,
            ));
        }

        let address = receipt.contract_address.ok_or_else(|| {
            failed(
                format!("receipt of {tx_hash} has no contract address"),
                FailurePoint::Reverted,
            )
        })?;

        let code = self.client.code_at(address).await.map_err(|e| {
            failed(
                format!("could not read code at {address}: {e:#}"),
                FailurePoint::PostCheck,
            )
        })?;
        if code.is_empty() {
            return Err(failed(
                format!("no code at {address} after deployment"),
                FailurePoint::PostCheck,
            ));
        }

        tracing::info!(
            contract = %artifact.contract_name,
            address = %address,
            block_number = receipt.block_number,
            gas_used = receipt.gas_used,
            "Implementation deployed"
        );

        Ok(DeploymentReceipt {
            contract_name: artifact.contract_name,
            address,
            transaction_hash: tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}
