//! EVM chain client over JSON-RPC.
//!
//! Uses `eth_blockNumber`, `eth_getLogs` and `eth_chainId`.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainsched_core::{ChainClient, ChainConnector, ClientError, EventLog, LogFilter};

use crate::transport::{HttpClientConfig, HttpTransport, RpcCall, RpcTransport};

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "blockHash")]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: Option<String>,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Decode into an [`EventLog`]. Pending logs (no block number) are rejected.
    pub fn into_event_log(self) -> Result<EventLog, ClientError> {
        let removed = self.is_removed();
        let block_number = self
            .block_number
            .as_deref()
            .ok_or_else(|| ClientError::Decode("log without blockNumber".into()))
            .and_then(parse_hex_u64)?;
        let log_index = self.log_index.as_deref().map(parse_hex_u64).transpose()?.unwrap_or(0);

        Ok(EventLog {
            address: parse_fixed::<Address>("address", &self.address)?,
            topics: self
                .topics
                .iter()
                .map(|t| parse_fixed::<B256>("topic", t))
                .collect::<Result<_, _>>()?,
            data: if self.data.is_empty() {
                Bytes::new()
            } else {
                parse_fixed::<Bytes>("data", &self.data)?
            },
            block_number,
            block_hash: self
                .block_hash
                .as_deref()
                .map(|h| parse_fixed::<B256>("blockHash", h))
                .transpose()?
                .unwrap_or_default(),
            tx_hash: self
                .tx_hash
                .as_deref()
                .map(|h| parse_fixed::<B256>("transactionHash", h))
                .transpose()?
                .unwrap_or_default(),
            log_index,
            removed,
        })
    }
}

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Result<u64, ClientError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|_| ClientError::Decode(format!("invalid hex quantity: {s:?}")))
}

fn parse_fixed<T: FromStr>(field: &str, s: &str) -> Result<T, ClientError> {
    T::from_str(s).map_err(|_| ClientError::Decode(format!("invalid {field}: {s:?}")))
}

fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// [`ChainClient`] for one EVM chain.
pub struct EvmChainClient<T = HttpTransport> {
    chain_id: String,
    transport: T,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<T: RpcTransport> EvmChainClient<T> {
    pub fn new(chain_id: impl Into<String>, transport: T) -> Self {
        Self {
            chain_id: chain_id.into(),
            transport,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<R, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed(self.chain_id.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let value = self.transport.send(&RpcCall::new(id, method, params)).await?.into_result()?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode(format!("{method}: {e}")))
    }
}

#[async_trait]
impl<T: RpcTransport> ChainClient for EvmChainClient<T> {
    async fn block_number(&self) -> Result<u64, ClientError> {
        let hex: String = self.call("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<EventLog>, ClientError> {
        let params = json!({
            "fromBlock": to_quantity(filter.from_block),
            "toBlock": to_quantity(filter.to_block),
            "address": filter.address,
            "topics": [filter.topic0],
        });
        let raw: Vec<RawLog> = self.call("eth_getLogs", vec![params]).await?;
        tracing::trace!(
            chain_id = %self.chain_id,
            from_block = filter.from_block,
            to_block = filter.to_block,
            count = raw.len(),
            "eth_getLogs"
        );
        raw.into_iter().map(RawLog::into_event_log).collect()
    }

    async fn chain_id(&self) -> Result<u64, ClientError> {
        let hex: String = self.call("eth_chainId", vec![]).await?;
        parse_hex_u64(&hex)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(chain_id = %self.chain_id, url = %self.transport.url(), "chain client closed");
        }
    }
}

// ─── Connector ───────────────────────────────────────────────────────────────

/// [`ChainConnector`] that builds HTTP-backed [`EvmChainClient`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    config: HttpClientConfig,
}

impl HttpConnector {
    pub fn new(config: HttpClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ChainConnector for HttpConnector {
    async fn connect(
        &self,
        chain_id: &str,
        rpc_url: &str,
    ) -> Result<Arc<dyn ChainClient>, ClientError> {
        let transport = HttpTransport::new(rpc_url, &self.config)?;
        Ok(Arc::new(EvmChainClient::new(chain_id, transport)))
    }
}
