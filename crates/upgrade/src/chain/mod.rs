//! Chain access boundary.
//!
//! The upgrade operations only need a handful of capabilities from a node:
//! simulate a call, broadcast a signed transaction, look up its receipt and
//! read code or storage. [`ChainClient`] captures exactly those so the
//! operations can run against a live endpoint ([`RpcChainClient`]) or an
//! in-memory chain in tests.

mod rpc_client;
mod signer;

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use rpc_client::{RpcChainClient, TxOptions, TxSender};
pub use signer::TxSigner;

use crate::rpc::{self, deserialize_u64_from_hex, serialize_u64_as_hex};

/// A transaction the client should sign and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// `Create` for contract deployments, `Call(address)` otherwise.
    pub to: TxKind,
    /// Creation bytecode or calldata.
    pub input: Bytes,
    /// Wei attached to the transaction.
    pub value: U256,
}

impl TransactionRequest {
    /// A contract-creation transaction carrying `bytecode`.
    pub fn create(bytecode: Bytes) -> Self {
        Self {
            to: TxKind::Create,
            input: bytecode,
            value: U256::ZERO,
        }
    }

    /// A call to `to` with `input` as calldata.
    pub fn call(to: Address, input: impl Into<Bytes>) -> Self {
        Self {
            to: TxKind::Call(to),
            input: input.into(),
            value: U256::ZERO,
        }
    }
}

/// Outcome of a read-only `eth_call`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallResult {
    /// The call returned normally.
    Success(Bytes),
    /// The call reverted; the payload is the raw revert data (possibly empty).
    Reverted { data: Bytes, message: String },
}

/// Receipt of a mined transaction, as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    #[serde(
        serialize_with = "serialize_u64_as_hex",
        deserialize_with = "deserialize_u64_from_hex"
    )]
    pub block_number: u64,
    #[serde(
        serialize_with = "serialize_u64_as_hex",
        deserialize_with = "deserialize_u64_from_hex"
    )]
    pub gas_used: u64,
    #[serde(
        serialize_with = "serialize_u64_as_hex",
        deserialize_with = "deserialize_u64_from_hex"
    )]
    pub status: u64,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

impl TransactionReceipt {
    /// Whether the transaction executed without reverting.
    pub fn succeeded(&self) -> bool {
        self.status == 1
    }
}

/// Capabilities the upgrade operations consume from a chain endpoint.
pub trait ChainClient: Send + Sync {
    /// The account that signs every transaction sent through this client.
    fn sender(&self) -> Address;

    /// Execute `tx` as a read-only call from [`Self::sender`] against the latest block.
    fn call(
        &self,
        tx: &TransactionRequest,
    ) -> impl Future<Output = Result<CallResult, anyhow::Error>> + Send;

    /// Sign and broadcast `tx`, returning its hash once the node accepted it.
    fn send_transaction(
        &self,
        tx: TransactionRequest,
    ) -> impl Future<Output = Result<B256, anyhow::Error>> + Send;

    /// The receipt of `hash`, or `None` while it is still pending.
    fn transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<TransactionReceipt>, anyhow::Error>> + Send;

    /// Runtime bytecode at `address` (empty for accounts without code).
    fn code_at(&self, address: Address)
    -> impl Future<Output = Result<Bytes, anyhow::Error>> + Send;

    /// Raw 32-byte storage word of `address` at `slot`.
    fn storage_at(
        &self,
        address: Address,
        slot: B256,
    ) -> impl Future<Output = Result<B256, anyhow::Error>> + Send;
}

/// How long to wait for, and how often to poll for, transaction receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Wait until `hash` is mined and return its receipt.
///
/// Errors once `policy.timeout` elapses without a receipt. A timeout says
/// nothing about the transaction itself: it may still be mined later.
pub async fn wait_for_receipt<C: ChainClient>(
    client: &C,
    hash: B256,
    policy: ConfirmationPolicy,
) -> Result<TransactionReceipt, anyhow::Error> {
    tracing::debug!(tx_hash = %hash, timeout = ?policy.timeout, "Waiting for confirmation...");

    let receipt = rpc::poll_until(
        &format!("receipt of {hash}"),
        policy.timeout,
        policy.poll_interval,
        || client.transaction_receipt(hash),
    )
    .await
    .with_context(|| format!("Transaction {hash} was not confirmed"))?;

    tracing::debug!(
        tx_hash = %hash,
        block_number = receipt.block_number,
        gas_used = receipt.gas_used,
        status = receipt.status,
        "Transaction mined"
    );

    Ok(receipt)
}
