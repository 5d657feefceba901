//! Action dispatch seam.
//!
//! The scheduler decides *when* a job fires. What firing means (building and
//! submitting the target-chain transaction, running a dynamic-argument script,
//! forwarding to a keeper) belongs to an [`ActionDispatcher`].

use async_trait::async_trait;

use crate::client::EventLog;
use crate::error::DispatchError;
use crate::job::JobDefinition;
use crate::topic::to_hex;

#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Run the job's action for one confirmed trigger event.
    async fn dispatch(&self, job: &JobDefinition, log: &EventLog) -> Result<(), DispatchError>;
}

/// Dispatcher that only logs what it would execute.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyDispatcher;

#[async_trait]
impl ActionDispatcher for LogOnlyDispatcher {
    async fn dispatch(&self, job: &JobDefinition, log: &EventLog) -> Result<(), DispatchError> {
        tracing::info!(
            job_id = job.job_id,
            target_chain_id = %job.target_chain_id,
            target_contract = %job.target_contract_address,
            target_function = %job.target_function,
            tx_hash = %to_hex(log.tx_hash),
            block_number = log.block_number,
            "executing job action"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, Bytes, B256};

    use super::*;

    #[tokio::test]
    async fn log_only_dispatcher_succeeds() {
        let job = JobDefinition::new(1, "1", "0xabc", "Ping()");
        let log = EventLog {
            address: Address::ZERO,
            topics: vec![B256::ZERO],
            data: Bytes::new(),
            block_number: 10,
            block_hash: B256::ZERO,
            tx_hash: B256::repeat_byte(0xab),
            log_index: 0,
            removed: false,
        };
        assert!(LogOnlyDispatcher.dispatch(&job, &log).await.is_ok());
    }
}
