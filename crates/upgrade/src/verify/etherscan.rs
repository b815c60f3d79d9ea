//! Etherscan-compatible verification API.

use alloy_core::primitives::Address;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{
    ServiceError, SubmitResponse, VerificationRequest, VerificationService, VerificationStatus,
};

/// Envelope shared by every Etherscan endpoint.
#[derive(Debug, Clone, Deserialize)]
struct EtherscanResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: Value,
}

impl EtherscanResponse {
    fn ok(&self) -> bool {
        self.status == "1"
    }

    fn result_text(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Client for the `module=contract` endpoints of an Etherscan-compatible explorer.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
    api_url: Url,
    api_key: String,
    /// Sent as `chainid` to multichain (v2) endpoints.
    chain_id: Option<u64>,
}

impl EtherscanClient {
    pub fn new(
        api_url: Url,
        api_key: impl Into<String>,
        chain_id: Option<u64>,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: crate::rpc::create_client()?,
            api_url,
            api_key: api_key.into(),
            chain_id,
        })
    }

    fn base_query(&self, action: &str) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("module", "contract".to_string()),
            ("action", action.to_string()),
            ("apikey", self.api_key.clone()),
        ];
        if let Some(chain_id) = self.chain_id {
            query.push(("chainid", chain_id.to_string()));
        }
        query
    }

    async fn read(&self, request: reqwest::RequestBuilder) -> Result<EtherscanResponse, ServiceError> {
        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::Transient(format!("failed to read response: {e}")))?;

        parse_body(status, &body)
    }

    /// Split a submission into the query string and the form body.
    fn submission_form(
        &self,
        request: &VerificationRequest,
    ) -> Result<(Vec<(&'static str, String)>, Vec<(&'static str, String)>), ServiceError> {
        let (query, body) = self.submission_form(request)?;

        Ok((query, body))
    }
}

/// Map an HTTP status and body onto the Etherscan envelope.
fn parse_body(status: reqwest::StatusCode, body: &str) -> Result<EtherscanResponse, ServiceError> {
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ServiceError::Transient(format!("HTTP {status}: {body}")));
    }
    if !status.is_success() {
        return Err(ServiceError::Fatal(format!("HTTP {status}: {body}")));
    }

    serde_json::from_str(body)
        .map_err(|e| ServiceError::Transient(format!("unexpected response ({e}): {body}")))
}

impl VerificationService for EtherscanClient {
    async fn is_verified(&self, address: Address) -> Result<bool, ServiceError> {
        let mut query = self.base_query("getsourcecode");
        query.push(("address", address.to_string()));

        let response = self
            .read(self.client.get(self.api_url.clone()).query(&query))
            .await?;
        source_code_present(&response)
    }

    async fn submit(&self, request: &VerificationRequest) -> Result<SubmitResponse, ServiceError> {
        let (query, body) = self.submission_form(request)?;

        let response = self
            .read(
                self.client
                    .post(self.api_url.clone())
                    .query(&query)
                    .form(&body),
            )
            .await?;
        classify_submission(&response)
    }

    async fn check_status(&self, guid: &str) -> Result<VerificationStatus, ServiceError> {
        let mut query = self.base_query("checkverifystatus");
        query.push(("guid", guid.to_string()));

        let response = self
            .read(self.client.get(self.api_url.clone()).query(&query))
            .await?;
        classify_status(&response)
    }
}

/// Etherscan expects the `v`-prefixed long version, e.g. `v0.8.20+commit.a1b79de6`.
fn compiler_version(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

fn is_rate_limited(text: &str) -> bool {
    text.contains("rate limit") || text.contains("too many requests")
}

fn is_api_key_error(text: &str) -> bool {
    text.contains("invalid api key") || text.contains("missing/invalid api key")
}

fn source_code_present(response: &EtherscanResponse) -> Result<bool, ServiceError> {
    if !response.ok() {
        let text = response.result_text().to_lowercase();
        if is_rate_limited(&text) {
            return Err(ServiceError::Transient(response.result_text()));
        }
        if is_api_key_error(&text) {
            return Err(ServiceError::Fatal(response.result_text()));
        }
        // Unknown or unindexed addresses come back as errors too.
        return Ok(false);
    }

    Ok(response
        .result
        .as_array()
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("SourceCode"))
        .and_then(Value::as_str)
        .is_some_and(|source| !source.is_empty()))
}

fn classify_submission(response: &EtherscanResponse) -> Result<SubmitResponse, ServiceError> {
    let result = response.result_text();
    let text = result.to_lowercase();

    if text.contains("already verified") {
        return Ok(SubmitResponse::AlreadyVerified);
    }
    if response.ok() {
        return Ok(SubmitResponse::Accepted(result));
    }
    if is_rate_limited(&text) || text.contains("unable to locate contractcode") {
        return Err(ServiceError::Transient(result));
    }
    if is_api_key_error(&text) {
        return Err(ServiceError::Fatal(result));
    }

    tracing::debug!(message = %response.message, result = %result, "Submission rejected");
    Ok(SubmitResponse::Rejected(result))
}

fn classify_status(response: &EtherscanResponse) -> Result<VerificationStatus, ServiceError> {
    let result = response.result_text();
    let text = result.to_lowercase();

    if text.contains("pending in queue") || text.contains("in progress") {
        return Ok(VerificationStatus::Pending);
    }
    if text.contains("already verified") {
        return Ok(VerificationStatus::AlreadyVerified);
    }
    if response.ok() || text.contains("pass - verified") {
        return Ok(VerificationStatus::Verified);
    }
    if is_rate_limited(&text) {
        return Err(ServiceError::Transient(result));
    }
    if is_api_key_error(&text) {
        return Err(ServiceError::Fatal(result));
    }

    Ok(VerificationStatus::Failed(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: &str, result: Value) -> EtherscanResponse {
        EtherscanResponse {
            status: status.to_string(),
            message: if status == "1" { "OK" } else { "NOTOK" }.to_string(),
            result,
        }
    }

    #[test]
    fn test_compiler_version_prefix() {
        assert_eq!(compiler_version("0.8.20+commit.a1b79de6"), "v0.8.20+commit.a1b79de6");
        assert_eq!(compiler_version("v0.8.20+commit.a1b79de6"), "v0.8.20+commit.a1b79de6");
    }

    #[test]
    fn test_source_code_present() {
        let verified = response(
            "1",
            serde_json::json!([{ "SourceCode": "{{...}}", "ContractName": "TokenV2" }]),
        );
        assert!(source_code_present(&verified).unwrap());

        let unverified = response(
            "1",
            serde_json::json!([{ "SourceCode": "", "ABI": "Contract source code not verified" }]),
        );
        assert!(!source_code_present(&unverified).unwrap());

        let limited = response("0", Value::String("Max rate limit reached".into()));
        assert!(source_code_present(&limited).unwrap_err().is_transient());
    }

    #[test]
    fn test_classify_submission() {
        assert_eq!(
            classify_submission(&response("1", "ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn".into())).unwrap(),
            SubmitResponse::Accepted("ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn".into())
        );
        assert_eq!(
            classify_submission(&response("0", "Contract source code already verified".into())).unwrap(),
            SubmitResponse::AlreadyVerified
        );
        assert!(
            classify_submission(&response(
                "0",
                "Unable to locate ContractCode at 0x5fbdb2315678afecb367f032d93f642f64180aa3".into()
            ))
            .unwrap_err()
            .is_transient()
        );
        assert!(!classify_submission(&response("0", "Invalid API Key".into()))
            .unwrap_err()
            .is_transient());
        assert_eq!(
            classify_submission(&response("0", "Invalid constructor arguments provided".into()))
                .unwrap(),
            SubmitResponse::Rejected("Invalid constructor arguments provided".into())
        );
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(&response("0", "Pending in queue".into())).unwrap(),
            VerificationStatus::Pending
        );
        assert_eq!(
            classify_status(&response("1", "Pass - Verified".into())).unwrap(),
            VerificationStatus::Verified
        );
        assert_eq!(
            classify_status(&response("0", "Already Verified".into())).unwrap(),
            VerificationStatus::AlreadyVerified
        );
        assert_eq!(
            classify_status(&response("0", "Fail - Unable to verify".into())).unwrap(),
            VerificationStatus::Failed("Fail - Unable to verify".into())
        );
    }

    #[test]
    fn test_chain_id_in_query() {
        let client = EtherscanClient::new(
            "https://api.etherscan.io/v2/api".parse().unwrap(),
            "KEY",
            Some(11155111),
        )
        .unwrap();
        let query = client.base_query("checkverifystatus");
        assert!(query.contains(&("chainid", "11155111".to_string())));
        assert!(query.contains(&("apikey", "KEY".to_string())));
    }

    #[test]
    fn test_parse_getsourcecode_bodies() {
        let verified = parse_body(
            reqwest::StatusCode::OK,
            r#"{"status":"1","message":"OK","result":[{"SourceCode":"pragma solidity ^0.8.20;","ABI":"[]","ContractName":"TokenV2","CompilerVersion":"v0.8.20+commit.a1b79de6"}]}"#,
        )
        .unwrap();
        assert!(source_code_present(&verified).unwrap());

        let unverified = parse_body(
            reqwest::StatusCode::OK,
            r#"{"status":"1","message":"OK","result":[{"SourceCode":"","ABI":"Contract source code not verified","ContractName":""}]}"#,
        )
        .unwrap();
        assert!(!source_code_present(&unverified).unwrap());

        let bad_key = parse_body(
            reqwest::StatusCode::OK,
            r#"{"status":"0","message":"NOTOK","result":"Missing/Invalid API Key"}"#,
        )
        .unwrap();
        assert!(!source_code_present(&bad_key).unwrap_err().is_transient());
    }

    #[test]
    fn test_parse_submission_and_status_bodies() {
        let accepted = parse_body(
            reqwest::StatusCode::OK,
            r#"{"status":"1","message":"OK","result":"ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn"}"#,
        )
        .unwrap();
        assert_eq!(
            classify_submission(&accepted).unwrap(),
            SubmitResponse::Accepted("ezq878u486pzijkvvmerl6a9mzwhv6sefgvqi5tkwceejc7tvn".into())
        );

        let pending = parse_body(
            reqwest::StatusCode::OK,
            r#"{"status":"0","message":"NOTOK","result":"Pending in queue"}"#,
        )
        .unwrap();
        assert_eq!(classify_status(&pending).unwrap(), VerificationStatus::Pending);
    }

    #[test]
    fn test_parse_http_errors() {
        let unavailable = parse_body(reqwest::StatusCode::SERVICE_UNAVAILABLE, "upstream down");
        assert!(unavailable.unwrap_err().is_transient());

        let limited = parse_body(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(limited.unwrap_err().is_transient());

        let forbidden = parse_body(reqwest::StatusCode::FORBIDDEN, "forbidden");
        assert!(!forbidden.unwrap_err().is_transient());
    }

    #[test]
    fn test_parse_non_json_body() {
        let err = parse_body(reqwest::StatusCode::OK, "<html>Cloudflare</html>").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_submission_form() {
        let client = EtherscanClient::new(
            "https://api.etherscan.io/v2/api".parse().unwrap(),
            "KEY",
            Some(1),
        )
        .unwrap();
        let request = VerificationRequest {
            address: Address::repeat_byte(0x01),
            contract_name: "contracts/TokenV2.sol:TokenV2".to_string(),
            compiler_version: "0.8.20+commit.a1b79de6".to_string(),
            standard_json_input: serde_json::json!({ "language": "Solidity" }),
            constructor_args: vec![0xab, 0xcd].into(),
        };

        let (query, body) = client.submission_form(&request).unwrap();

        assert_eq!(query, vec![("chainid", "1".to_string())]);
        assert!(!body.iter().any(|(key, _)| *key == "chainid"));
        assert!(body.contains(&("compilerversion", "v0.8.20+commit.a1b79de6".to_string())));
        assert!(body.contains(&("constructorArguements", "abcd".to_string())));
        assert!(body.contains(&("action", "verifysourcecode".to_string())));
    }
}
