//! [`ChainClient`] over HTTP JSON-RPC.

use alloy_core::primitives::{Address, B256, Bytes, TxKind, U256};
use anyhow::Context;
use serde_json::Value;
use url::Url;

use crate::rpc::{self, RpcError, json_rpc_call};

use super::{
    CallResult, ChainClient, TransactionReceipt, TransactionRequest,
    signer::{Fees, TxSigner, UnsignedTx},
};

/// Who signs outgoing transactions.
#[derive(Debug, Clone)]
pub enum TxSender {
    /// Sign locally and broadcast with `eth_sendRawTransaction`.
    Local(TxSigner),
    /// Let the node sign with an account it has unlocked (`eth_sendTransaction`).
    Unlocked(Address),
}

impl TxSender {
    pub fn address(&self) -> Address {
        match self {
            TxSender::Local(signer) => signer.address(),
            TxSender::Unlocked(address) => *address,
        }
    }
}

/// Transaction construction options for [`RpcChainClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    /// Expected chain id. Checked against `eth_chainId` when set.
    pub chain_id: Option<u64>,
    /// Send type-0 transactions priced with `eth_gasPrice`.
    pub legacy: bool,
    /// Percentage applied to `eth_estimateGas` (e.g. 120 = +20%).
    pub gas_limit_multiplier_percent: u64,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            chain_id: None,
            legacy: false,
            gas_limit_multiplier_percent: 120,
        }
    }
}

/// JSON-RPC backed chain client.
#[derive(Debug, Clone)]
pub struct RpcChainClient {
    client: reqwest::Client,
    url: Url,
    sender: TxSender,
    chain_id: u64,
    options: TxOptions,
}

impl RpcChainClient {
    /// Connect to `url`, resolving and checking the chain id.
    pub async fn connect(
        url: Url,
        sender: TxSender,
        options: TxOptions,
    ) -> Result<Self, anyhow::Error> {
        let client = rpc::create_client()?;

        let chain_id_hex: String = json_rpc_call(&client, url.as_str(), "eth_chainId", vec![])
            .await
            .with_context(|| format!("Failed to reach RPC endpoint {}", url))?;
        let chain_id = rpc::parse_quantity(&chain_id_hex)?;

        if let Some(expected) = options.chain_id.filter(|expected| *expected != chain_id) {
            anyhow::bail!(
                "Chain id mismatch: configured {}, endpoint {} reports {}",
                expected,
                url,
                chain_id
            );
        }

        tracing::info!(
            rpc_url = %url,
            chain_id,
            sender = %sender.address(),
            legacy = options.legacy,
            "Connected to chain"
        );

        Ok(Self {
            client,
            url,
            sender,
            chain_id,
            options,
        })
    }

    /// Chain id reported by the endpoint.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, anyhow::Error> {
        json_rpc_call(&self.client, self.url.as_str(), method, params).await
    }

    fn tx_object(&self, tx: &TransactionRequest) -> Value {
        let mut object = serde_json::json!({
            "from": self.sender.address(),
            "data": tx.input,
            "value": format!("0x{:x}", tx.value),
        });
        if let TxKind::Call(to) = tx.to {
            object["to"] = serde_json::json!(to);
        }
        object
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, anyhow::Error> {
        let estimate: String = self
            .rpc("eth_estimateGas", vec![self.tx_object(tx)])
            .await
            .context("Gas estimation failed")?;
        let estimate = rpc::parse_quantity(&estimate)?;
        Ok(estimate.saturating_mul(self.options.gas_limit_multiplier_percent) / 100)
    }

    async fn fees(&self) -> Result<Fees, anyhow::Error> {
        let gas_price: String = self.rpc("eth_gasPrice", vec![]).await?;
        let gas_price = rpc::parse_quantity_u128(&gas_price)?;

        if self.options.legacy {
            return Ok(Fees::Legacy { gas_price });
        }

        let block: Value = self
            .rpc(
                "eth_getBlockByNumber",
                vec![serde_json::json!("latest"), serde_json::json!(false)],
            )
            .await?;

        let Some(base_fee) = block.get("baseFeePerGas").and_then(Value::as_str) else {
            tracing::debug!("Latest block has no base fee, pricing EIP-1559 fields from gas price");
            return Ok(Fees::Eip1559 {
                max_fee_per_gas: gas_price,
                max_priority_fee_per_gas: gas_price,
            });
        };
        let base_fee = rpc::parse_quantity_u128(base_fee)?;

        let priority_fee = match self
            .rpc::<String>("eth_maxPriorityFeePerGas", vec![])
            .await
            .and_then(|fee| rpc::parse_quantity_u128(&fee))
        {
            Ok(fee) => fee,
            Err(e) => {
                tracing::debug!(error = %e, "eth_maxPriorityFeePerGas unavailable, deriving from gas price");
                gas_price.saturating_sub(base_fee)
            }
        };

        Ok(Fees::Eip1559 {
            max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(priority_fee),
            max_priority_fee_per_gas: priority_fee,
        })
    }

    async fn send_signed(
        &self,
        signer: &TxSigner,
        tx: TransactionRequest,
    ) -> Result<B256, anyhow::Error> {
        let gas_limit = self.estimate_gas(&tx).await?;
        let fees = self.fees().await?;
        let nonce: String = self
            .rpc(
                "eth_getTransactionCount",
                vec![
                    serde_json::json!(signer.address()),
                    serde_json::json!("pending"),
                ],
            )
            .await
            .context("Failed to fetch signer nonce")?;
        let nonce = rpc::parse_quantity(&nonce)?;

        tracing::debug!(nonce, gas_limit, fees = ?fees, "Signing transaction");

        let raw = signer.sign(UnsignedTx {
            chain_id: self.chain_id,
            nonce,
            gas_limit,
            fees,
            to: tx.to,
            value: tx.value,
            input: tx.input,
        })?;

        self.rpc("eth_sendRawTransaction", vec![serde_json::json!(raw)])
            .await
            .context("Node rejected signed transaction")
    }
}

impl ChainClient for RpcChainClient {
    fn sender(&self) -> Address {
        self.sender.address()
    }

    async fn call(&self, tx: &TransactionRequest) -> Result<CallResult, anyhow::Error> {
        let result: Result<Bytes, anyhow::Error> = self
            .rpc(
                "eth_call",
                vec![self.tx_object(tx), serde_json::json!("latest")],
            )
            .await;

        call_result(result)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<B256, anyhow::Error> {
        match &self.sender {
            TxSender::Local(signer) => self.send_signed(signer, tx).await,
            TxSender::Unlocked(_) => self
                .rpc("eth_sendTransaction", vec![self.tx_object(&tx)])
                .await
                .context("Node rejected transaction"),
        }
    }

    async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, anyhow::Error> {
        self.rpc("eth_getTransactionReceipt", vec![serde_json::json!(hash)])
            .await
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, anyhow::Error> {
        self.rpc(
            "eth_getCode",
            vec![serde_json::json!(address), serde_json::json!("latest")],
        )
        .await
    }

    async fn storage_at(&self, address: Address, slot: B256) -> Result<B256, anyhow::Error> {
        let word: String = self
            .rpc(
                "eth_getStorageAt",
                vec![
                    serde_json::json!(address),
                    serde_json::json!(slot),
                    serde_json::json!("latest"),
                ],
            )
            .await?;
        let word: U256 = word
            .parse()
            .with_context(|| format!("Invalid storage word: {}", word))?;
        Ok(B256::from(word))
    }
}

/// Turn an `eth_call` response into a [`CallResult`], keeping transport errors as errors.
fn call_result(result: Result<Bytes, anyhow::Error>) -> Result<CallResult, anyhow::Error> {
    match result {
        Ok(data) => Ok(CallResult::Success(data)),
        Err(err) => match err.downcast_ref::<RpcError>() {
            Some(rpc_err) if rpc_err.is_revert() => Ok(CallResult::Reverted {
                data: rpc_err.revert_data().unwrap_or_default(),
                message: rpc_err.message.clone(),
            }),
            _ => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::decode_response;

    fn eth_call(body: Value) -> Result<CallResult, anyhow::Error> {
        call_result(decode_response("eth_call", body))
    }

    #[test]
    fn test_call_success() {
        let result = eth_call(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": "0x0000000000000000000000000000000000000000000000000000000000000001"
        }))
        .unwrap();
        assert!(matches!(result, CallResult::Success(data) if data.len() == 32));
    }

    #[test]
    fn test_call_revert_with_data() {
        let result = eth_call(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {
                "code": 3,
                "message": "execution reverted",
                "data": "0x118cdaa7000000000000000000000000000000000000000000000000000000000000000e"
            }
        }))
        .unwrap();

        let CallResult::Reverted { data, message } = result else {
            panic!("expected a revert");
        };
        assert_eq!(&data[..4], &[0x11, 0x8c, 0xda, 0xa7]);
        assert_eq!(message, "execution reverted");
    }

    #[test]
    fn test_call_revert_without_data() {
        let result = eth_call(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32000, "message": "execution reverted: Ownable: caller is not the owner" }
        }))
        .unwrap();
        assert!(matches!(result, CallResult::Reverted { data, .. } if data.is_empty()));
    }

    #[test]
    fn test_call_transport_error_is_kept() {
        let err = eth_call(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32005, "message": "limit exceeded" }
        }))
        .unwrap_err();
        assert!(err.downcast_ref::<RpcError>().is_some());
    }
}
