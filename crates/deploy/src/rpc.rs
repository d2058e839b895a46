//! JSON-RPC helpers with typed failures, and a breaker-protected connectivity check.

use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    clock::Clock,
    error::OperationError,
    resilience::{ExecutionResult, OperationClass, ResilientExecutor},
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON-RPC error codes that mean the request itself is wrong.
const INVALID_REQUEST_CODES: &[i64] = &[-32600, -32601, -32602, -32700];

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// Transport and protocol failures are mapped to an [`crate::ErrorKind`] so
/// the executor can tell transient failures from permanent ones.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, OperationError> {
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
        .map_err(|e| classify_transport_error(method, &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(method, status));
    }

    let result: Value = response.json().await.map_err(|e| {
        OperationError::server(format!("Failed to parse {} response: {}", method, e))
    })?;

    if let Some(error) = result.get("error") {
        return Err(classify_rpc_error(error));
    }

    let result_value = result
        .get("result")
        .cloned()
        .ok_or_else(|| OperationError::server(format!("No result in {} response", method)))?;

    serde_json::from_value(result_value).map_err(|e| {
        OperationError::invalid_input(format!("Failed to deserialize {} result: {}", method, e))
    })
}

/// Query `eth_chainId` through `executor`, with the breaker keyed by `url`.
pub async fn check_connectivity<C: Clock>(
    executor: &ResilientExecutor<C>,
    client: &reqwest::Client,
    url: &str,
) -> ExecutionResult<u64> {
    executor
        .execute(
            move || async move {
                let chain_id: String = json_rpc_call(client, url, "eth_chainId", vec![]).await?;
                parse_hex_u64(&chain_id)
            },
            OperationClass::Api,
            Some(url),
        )
        .await
}

fn parse_hex_u64(value: &str) -> Result<u64, OperationError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| OperationError::invalid_input(format!("Invalid hex quantity '{}': {}", value, e)))
}

fn classify_transport_error(method: &str, error: &reqwest::Error) -> OperationError {
    let message = format!("Failed to send {} request: {}", method, error);
    if error.is_timeout() {
        OperationError::timeout(message)
    } else if error.is_connect() || error.is_request() {
        OperationError::network(message)
    } else if error.is_builder() {
        OperationError::invalid_input(message)
    } else {
        OperationError::unknown(message)
    }
}

fn classify_status(method: &str, status: StatusCode) -> OperationError {
    let message = format!("{} request failed with HTTP {}", method, status);
    match status {
        StatusCode::TOO_MANY_REQUESTS => OperationError::rate_limit(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => OperationError::authorization(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => OperationError::timeout(message),
        s if s.is_server_error() => OperationError::server(message),
        _ => OperationError::invalid_input(message),
    }
}

fn classify_rpc_error(error: &Value) -> OperationError {
    let message = format!(
        "RPC error: {}",
        error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
    );
    match error.get("code").and_then(Value::as_i64) {
        Some(code) if INVALID_REQUEST_CODES.contains(&code) => OperationError::invalid_input(message),
        Some(429) | Some(-32005) => OperationError::rate_limit(message),
        _ => OperationError::server(message),
    }
}
