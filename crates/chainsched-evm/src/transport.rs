//! Transport layer: sends one JSON-RPC 2.0 call and returns the reply.
//!
//! No retry happens here. A failed call fails the current worker tick and the
//! next tick retries the same block range.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainsched_core::ClientError;

/// Outgoing call. Ids are always numeric.
#[derive(Debug, Clone, Serialize)]
pub struct RpcCall {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcCall {
    pub fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Reply body. Only `result` and `error` are read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

impl RpcReply {
    pub fn ok(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn fault(code: i64, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(RpcFault {
                code,
                message: message.into(),
            }),
        }
    }

    /// Node-reported errors become [`ClientError::Rpc`]; a missing result is `null`.
    pub fn into_result(self) -> Result<Value, ClientError> {
        match self.error {
            Some(RpcFault { code, message }) => Err(ClientError::Rpc { code, message }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, call: &RpcCall) -> Result<RpcReply, ClientError>;

    /// Endpoint URL, for logging.
    fn url(&self) -> &str;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP JSON-RPC transport backed by `reqwest`.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, config: &HttpClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, call: &RpcCall) -> Result<RpcReply, ClientError> {
        let resp = self
            .http
            .post(&self.url)
            .json(call)
            .send()
            .await
            .map_err(|e| ClientError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<RpcReply>()
            .await
            .map_err(|e| ClientError::Decode(format!("{}: {e}", call.method)))
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn call_carries_version_and_numeric_id() {
        let call = RpcCall::new(7, "eth_getLogs", vec![json!({"fromBlock": "0x1"})]);
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "eth_getLogs",
                "params": [{"fromBlock": "0x1"}],
            })
        );
    }

    #[test]
    fn node_error_becomes_rpc_error() {
        let reply: RpcReply = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"query returned more than 10000 results"}}"#,
        )
        .unwrap();
        let err = reply.into_result().unwrap_err();
        assert!(matches!(err, ClientError::Rpc { code: -32005, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_result_is_null() {
        let reply: RpcReply = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"abc"}"#).unwrap();
        assert_eq!(reply.into_result().unwrap(), Value::Null);
    }
}
