//! Shared helpers for talking to Ethereum JSON-RPC endpoints.

use std::{future::Future, str::FromStr, time::Duration};

use alloy_core::primitives::Bytes;
use anyhow::Context;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

/// Default timeout for a single HTTP request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Error object returned by a JSON-RPC endpoint.
///
/// Carried inside [`anyhow::Error`] so callers can downcast and inspect the
/// revert payload of a failed `eth_call` or `eth_estimateGas`.
#[derive(Debug, Clone, Deserialize, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl RpcError {
    /// Node-specific revert payload, if the error carries one.
    ///
    /// Geth and anvil put the hex string directly in `data`; some providers
    /// nest it one level deeper as `data.data`.
    pub fn revert_data(&self) -> Option<Bytes> {
        let raw = match self.data.as_ref()? {
            Value::String(s) => s.as_str(),
            Value::Object(map) => map.get("data")?.as_str()?,
            _ => return None,
        };
        Bytes::from_str(raw).ok()
    }

    /// Whether the node reported an EVM revert rather than a transport problem.
    pub fn is_revert(&self) -> bool {
        self.code == 3
            || self.message.contains("revert")
            || self.revert_data().is_some_and(|data| !data.is_empty())
    }
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Returns
/// The deserialized result. A JSON-RPC error object is returned as an
/// [`RpcError`] wrapped in [`anyhow::Error`].
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let body: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    decode_response(method, body)
}

/// Extract the `result` of a JSON-RPC response body, or its error object as [`RpcError`].
pub fn decode_response<T: DeserializeOwned>(method: &str, mut body: Value) -> Result<T, anyhow::Error> {
    if let Some(error) = body.get_mut("error").map(Value::take) {
        let error: RpcError = serde_json::from_value(error)
            .with_context(|| format!("Malformed error object in {} response", method))?;
        return Err(anyhow::Error::new(error).context(format!("{} failed", method)));
    }

    let result_value = body
        .get_mut("result")
        .map(Value::take)
        .context("No result in response")?;

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Poll `check_fn` until it yields a value or `timeout` elapses.
///
/// `Ok(None)` means "not there yet". Transport and node errors are logged and
/// retried; a response that cannot be decoded ends the wait with that error.
pub async fn poll_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    interval: Duration,
    check_fn: F,
) -> Result<T, anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, anyhow::Error>>,
{
    let start = tokio::time::Instant::now();

    loop {
        match check_fn().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                tracing::trace!(target_name = %name, "Not ready yet, polling again...");
            }
            Err(e) if is_decode_error(&e) => {
                return Err(e.context(format!("Unreadable response while waiting for {}", name)));
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), target_name = %name, "Poll failed, retrying...");
            }
        }

        if start.elapsed() >= timeout {
            anyhow::bail!("Timeout after {:?} waiting for {}", timeout, name);
        }

        tokio::time::sleep(interval).await;
    }
}

/// Whether `error` comes from a JSON-RPC result that arrived but could not be decoded.
///
/// Bodies reqwest failed to read (truncated, HTML error pages) stay retryable.
fn is_decode_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<serde_json::Error>())
        && !error.chain().any(|cause| cause.is::<reqwest::Error>())
}

/// Parse a hex quantity (`0x`-prefixed) into a `u64`.
pub fn parse_quantity(value: &str) -> Result<u64, anyhow::Error> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", value))
}

/// Parse a hex quantity (`0x`-prefixed) into a `u128`.
pub fn parse_quantity_u128(value: &str) -> Result<u128, anyhow::Error> {
    u128::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity: {}", value))
}

/// Deserialize a u64 from a hex string (with 0x prefix).
pub(crate) fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_quantity(&s).map_err(serde::de::Error::custom)
}

/// Serialize a u64 as a `0x`-prefixed hex quantity, the inverse of [`deserialize_u64_from_hex`].
pub(crate) fn serialize_u64_as_hex<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{value:#x}"))
}
