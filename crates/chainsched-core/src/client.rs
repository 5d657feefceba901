//! Chain client abstraction used by workers.
//!
//! A [`ChainConnector`] turns a `(chain_id, rpc_url)` pair into a shared
//! [`ChainClient`]. The scheduler owns one client per chain and hands clones of
//! the `Arc` to every worker watching that chain.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Log query over an inclusive block range for one contract and one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub address: Address,
    pub topic0: B256,
}

impl LogFilter {
    /// Number of blocks covered by the filter.
    pub fn span(&self) -> u64 {
        self.to_block.saturating_sub(self.from_block) + 1
    }
}

/// A log returned by [`ChainClient::filter_logs`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_hash: B256,
    pub log_index: u64,
    /// `true` if the node reports the log as reverted by a reorg.
    #[serde(default)]
    pub removed: bool,
}

/// Read-only access to one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number.
    async fn block_number(&self) -> Result<u64, ClientError>;

    /// All logs matching `filter`, in block order.
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<EventLog>, ClientError>;

    /// Network chain ID reported by the node.
    async fn chain_id(&self) -> Result<u64, ClientError>;

    /// Release the underlying connection. Later calls fail with
    /// [`ClientError::Closed`].
    fn close(&self);
}

/// Factory for chain clients.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(
        &self,
        chain_id: &str,
        rpc_url: &str,
    ) -> Result<Arc<dyn ChainClient>, ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_span_is_inclusive() {
        let filter = LogFilter {
            from_block: 101,
            to_block: 107,
            address: Address::ZERO,
            topic0: B256::ZERO,
        };
        assert_eq!(filter.span(), 7);
    }
}
