//! Read-only snapshots of manager and worker state.

use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::worker::{EventWorker, WorkerState};

/// Snapshot returned by [`Manager::stats`](crate::Manager::stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub manager_id: String,
    pub total_workers: usize,
    pub running_workers: usize,
    pub max_workers: usize,
    pub connected_chains: usize,
    /// Sorted chain IDs with a live client.
    pub supported_chains: Vec<String>,
    pub cache_available: bool,
    pub stream_available: bool,
}

/// Snapshot returned by [`Manager::job_worker_stats`](crate::Manager::job_worker_stats).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub job_id: JobId,
    pub manager_id: String,
    pub state: WorkerState,
    pub is_running: bool,
    pub trigger_chain_id: String,
    pub contract_address: String,
    pub trigger_event: String,
    pub last_block: u64,
    pub created_at: i64,
}

impl WorkerStats {
    pub(crate) fn of(worker: &EventWorker, manager_id: &str) -> Self {
        let job = worker.job();
        let state = worker.state();
        Self {
            job_id: job.job_id,
            manager_id: manager_id.to_string(),
            state,
            is_running: state == WorkerState::Running,
            trigger_chain_id: job.trigger_chain_id.clone(),
            contract_address: job.trigger_contract_address.clone(),
            trigger_event: job.trigger_event.clone(),
            last_block: worker.last_block(),
            created_at: worker.created_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_stats_json_shape() {
        let stats = ManagerStats {
            manager_id: "m".into(),
            total_workers: 2,
            running_workers: 1,
            max_workers: 10,
            connected_chains: 1,
            supported_chains: vec!["11155111".into()],
            cache_available: false,
            stream_available: true,
        };
        let v = serde_json::to_value(&stats).unwrap();
        assert_eq!(v["total_workers"], 2);
        assert_eq!(v["supported_chains"][0], "11155111");
    }
}
