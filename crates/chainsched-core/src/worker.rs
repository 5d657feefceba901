//! Per-job event worker.
//!
//! One worker watches one `(chain, contract, event)` triple. Every poll tick it:
//!
//! 1. reads the chain head and refreshes the shared block-number cache
//! 2. computes the safe block `head - confirmations`
//! 3. fetches matching logs over `[last_block + 1, safe]`
//! 4. processes each log in order (dedupe, publish, dispatch)
//! 5. advances `last_block` to `safe`
//!
//! A failed tick leaves `last_block` untouched, so the next tick retries the
//! same range.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::cache::{event_key, store_block_number, Cache};
use crate::client::{ChainClient, EventLog, LogFilter};
use crate::dispatch::ActionDispatcher;
use crate::error::{ClientError, SchedulerError};
use crate::job::JobDefinition;
use crate::metrics::SchedulerMetrics;
use crate::stream::{publish_best_effort, EventPublisher, EventStream, EventType, StreamRecord};
use crate::topic::{event_topic, parse_address, to_hex};

/// Lifecycle state of a worker. Transitions only move forward:
/// `Created → Running → Stopped`, or `Created → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Created,
    Running,
    Stopped,
}

/// Collaborators and tunables shared by every worker of a manager.
pub(crate) struct WorkerContext {
    pub manager_id: String,
    pub poll_interval: Duration,
    pub confirmations: u64,
    pub rpc_timeout: Duration,
    pub block_cache_ttl: Duration,
    pub duplicate_event_window: Duration,
    pub cache: Arc<dyn Cache>,
    pub publisher: Arc<dyn EventPublisher>,
    pub dispatcher: Arc<dyn ActionDispatcher>,
    pub metrics: Arc<SchedulerMetrics>,
    /// Parent span for worker tasks.
    pub span: Span,
}

/// Summary of one successful poll tick that found new blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanReport {
    pub from_block: u64,
    pub to_block: u64,
    pub logs: usize,
    pub completed: usize,
    pub failed: usize,
    pub duplicates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventOutcome {
    Completed,
    Failed,
    Duplicate,
}

/// Highest block that is at least `confirmations` behind `head`. Chains
/// shorter than the confirmation depth use the head itself.
pub fn safe_block(head: u64, confirmations: u64) -> u64 {
    if head > confirmations {
        head - confirmations
    } else {
        head
    }
}

pub struct EventWorker {
    job: JobDefinition,
    contract: Address,
    topic: B256,
    client: Arc<dyn ChainClient>,
    ctx: Arc<WorkerContext>,
    cancel: CancellationToken,
    last_block: AtomicU64,
    state: Mutex<WorkerState>,
    created_at: i64,
}

impl EventWorker {
    /// Build a worker in the `Created` state. Fails if the trigger contract
    /// address is malformed.
    pub(crate) fn new(
        job: JobDefinition,
        client: Arc<dyn ChainClient>,
        ctx: Arc<WorkerContext>,
        parent: &CancellationToken,
    ) -> Result<Self, SchedulerError> {
        let contract = parse_address(&job.trigger_contract_address).ok_or_else(|| {
            SchedulerError::InvalidContractAddress(job.trigger_contract_address.clone())
        })?;
        let topic = event_topic(&job.trigger_event);

        Ok(Self {
            job,
            contract,
            topic,
            client,
            ctx,
            cancel: parent.child_token(),
            last_block: AtomicU64::new(0),
            state: Mutex::new(WorkerState::Created),
            created_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Seed the scan position. The first tick scans from `block + 1`.
    pub(crate) fn starting_at(self, block: u64) -> Self {
        self.last_block.store(block, Ordering::SeqCst);
        self
    }

    pub fn job(&self) -> &JobDefinition {
        &self.job
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn topic(&self) -> B256 {
        self.topic
    }

    /// Highest block fully processed.
    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Move `Created → Running` and spawn the poll loop. Returns `None` if the
    /// worker was already started or stopped.
    pub(crate) fn spawn(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        {
            let mut state = self.lock_state();
            if *state != WorkerState::Created {
                return None;
            }
            *state = WorkerState::Running;
        }

        let span = tracing::info_span!(
            parent: &self.ctx.span,
            "event_worker",
            job_id = self.job.job_id,
            chain_id = %self.job.trigger_chain_id,
        );
        let worker = Arc::clone(self);
        Some(tokio::spawn(worker.run().instrument(span)))
    }

    /// Cancel the poll loop. Returns `true` on the first call only.
    pub fn stop(&self) -> bool {
        let mut state = self.lock_state();
        let previous = *state;
        if previous == WorkerState::Stopped {
            return false;
        }
        *state = WorkerState::Stopped;
        drop(state);

        self.cancel.cancel();
        if previous == WorkerState::Running {
            self.ctx.metrics.workers_stopped.inc();
        }
        tracing::debug!(job_id = self.job.job_id, last_block = self.last_block(), "worker stop requested");
        true
    }

    async fn run(self: Arc<Self>) {
        let started = Instant::now();
        let poll_interval = self.ctx.poll_interval;
        self.ctx.metrics.workers_started.inc();

        tracing::info!(
            starting_block = self.last_block(),
            contract = %self.job.trigger_contract_address,
            event = %self.job.trigger_event,
            topic = %to_hex(self.topic),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "starting event worker"
        );
        publish_best_effort(
            self.ctx.publisher.as_ref(),
            EventStream::Ready,
            self.record(EventType::WorkerStarted)
                .with("starting_block", self.last_block())
                .with("poll_interval_seconds", poll_interval.as_secs())
                .with("cache_available", self.ctx.cache.is_available())
                .with("status", "running"),
        )
        .await;

        let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.check_for_events().await {
                        self.report_tick_error(&e).await;
                    }
                }
            }
        }

        // Root cancellation ends the loop without an explicit stop.
        self.stop();

        let runtime = started.elapsed();
        tracing::info!(
            final_block = self.last_block(),
            runtime_ms = runtime.as_millis() as u64,
            "event worker stopped"
        );
        publish_best_effort(
            self.ctx.publisher.as_ref(),
            EventStream::Ready,
            self.record(EventType::WorkerStopped)
                .with("final_block", self.last_block())
                .with("runtime_seconds", runtime.as_secs_f64())
                .with("status", "stopped"),
        )
        .await;
    }

    async fn report_tick_error(&self, error: &ClientError) {
        self.ctx.metrics.worker_errors.inc();
        tracing::error!(
            error = %error,
            retryable = error.is_retryable(),
            last_block = self.last_block(),
            "error checking for events"
        );
        publish_best_effort(
            self.ctx.publisher.as_ref(),
            EventStream::Retry,
            self.record(EventType::WorkerError)
                .with("error", error.to_string())
                .with("error_kind", error.kind().to_string())
                .with("last_block", self.last_block()),
        )
        .await;
    }

    // ─── Polling ─────────────────────────────────────────────────────────────

    /// Run one poll tick. Returns `None` when no new safe blocks exist.
    pub(crate) async fn check_for_events(&self) -> Result<Option<ScanReport>, ClientError> {
        let chain_id = self.job.trigger_chain_id.as_str();
        let head = self.rpc("eth_blockNumber", self.client.block_number()).await?;
        store_block_number(self.ctx.cache.as_ref(), chain_id, head, self.ctx.block_cache_ttl).await;

        let safe = safe_block(head, self.ctx.confirmations);
        let last = self.last_block();
        if safe <= last {
            tracing::trace!(head, safe, last_block = last, "no new confirmed blocks");
            return Ok(None);
        }

        let filter = LogFilter {
            from_block: last + 1,
            to_block: safe,
            address: self.contract,
            topic0: self.topic,
        };
        let logs = self.rpc("eth_getLogs", self.client.filter_logs(&filter)).await?;

        let mut report = ScanReport {
            from_block: filter.from_block,
            to_block: filter.to_block,
            ..ScanReport::default()
        };

        for log in &logs {
            if log.removed {
                tracing::debug!(tx_hash = %to_hex(log.tx_hash), "skipping removed log");
                continue;
            }
            report.logs += 1;
            self.ctx.metrics.events_detected.inc();

            match self.process_event(log).await {
                EventOutcome::Completed => {
                    report.completed += 1;
                    self.ctx.metrics.events_processed.inc();
                }
                EventOutcome::Failed => {
                    report.failed += 1;
                    self.ctx.metrics.jobs_failed.inc();
                }
                EventOutcome::Duplicate => {
                    report.duplicates += 1;
                    self.ctx.metrics.events_duplicate.inc();
                }
            }
        }

        self.last_block.fetch_max(safe, Ordering::SeqCst);

        if report.logs > 0 {
            tracing::info!(
                from_block = report.from_block,
                to_block = report.to_block,
                events_found = report.logs,
                "processed blocks for events"
            );
        } else {
            tracing::debug!(from_block = report.from_block, to_block = report.to_block, "no events in range");
        }
        Ok(Some(report))
    }

    async fn process_event(&self, log: &EventLog) -> EventOutcome {
        let started = Instant::now();
        let tx_hash = to_hex(log.tx_hash);

        if self.is_duplicate(&tx_hash, log).await {
            tracing::debug!(tx_hash, log_index = log.log_index, "duplicate event skipped");
            publish_best_effort(
                self.ctx.publisher.as_ref(),
                EventStream::Ready,
                self.record(EventType::EventDuplicateDetected)
                    .with("tx_hash", tx_hash.as_str())
                    .with("block_number", log.block_number)
                    .with("log_index", log.log_index),
            )
            .await;
            return EventOutcome::Duplicate;
        }

        tracing::info!(
            tx_hash,
            block_number = log.block_number,
            log_index = log.log_index,
            "event detected"
        );

        let mut record = self
            .record(EventType::EventDetected)
            .with("tx_hash", tx_hash.as_str())
            .with("block_number", log.block_number)
            .with("block_hash", to_hex(log.block_hash))
            .with("log_index", log.log_index)
            .with("detected_at", chrono::Utc::now().timestamp())
            .with("status", "processing");
        publish_best_effort(self.ctx.publisher.as_ref(), EventStream::Ready, record.clone()).await;

        let result = self.ctx.dispatcher.dispatch(&self.job, log).await;
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;
        self.ctx.metrics.event_processing_seconds.observe(elapsed.as_secs_f64());
        let status = if result.is_ok() { "completed" } else { "failed" };
        let job_id = self.job.job_id.to_string();
        self.ctx
            .metrics
            .action_executions
            .with_label_values(&[job_id.as_str(), status])
            .inc();
        record.set("duration_ms", duration_ms);
        record.set("completed_at", chrono::Utc::now().timestamp());

        match result {
            Ok(()) => {
                record.set("event_type", EventType::EventCompleted.as_str());
                record.set("status", "completed");
                tracing::info!(tx_hash, duration_ms, "job action completed");
                publish_best_effort(self.ctx.publisher.as_ref(), EventStream::Ready, record).await;
                EventOutcome::Completed
            }
            Err(e) => {
                record.set("event_type", EventType::EventFailed.as_str());
                record.set("status", "failed");
                record.set("error", e.to_string());
                record.set("error_kind", e.kind.to_string());
                tracing::error!(tx_hash, duration_ms, error = %e, "job action failed");
                publish_best_effort(self.ctx.publisher.as_ref(), EventStream::Retry, record).await;
                EventOutcome::Failed
            }
        }
    }

    /// Check-and-mark in the duplicate window. Cache failures count as "not seen".
    async fn is_duplicate(&self, tx_hash: &str, log: &EventLog) -> bool {
        let cache = self.ctx.cache.as_ref();
        if !cache.is_available() {
            return false;
        }
        let key = event_key(self.job.job_id, tx_hash, log.log_index);

        match cache.get(&key).await {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(key, error = %e, "duplicate check failed");
                return false;
            }
        }

        let seen_at = chrono::Utc::now().timestamp().to_string();
        if let Err(e) = cache.set(&key, &seen_at, self.ctx.duplicate_event_window).await {
            tracing::debug!(key, error = %e, "failed to mark event as seen");
        }
        false
    }

    /// Run one RPC call under `rpc_timeout`, counting it by method and status.
    async fn rpc<T, F>(&self, method: &str, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let limit = self.ctx.rpc_timeout;
        let result = match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout {
                ms: limit.as_millis() as u64,
            }),
        };
        let status = if result.is_ok() { "success" } else { "failed" };
        self.ctx
            .metrics
            .rpc_requests
            .with_label_values(&[self.job.trigger_chain_id.as_str(), method, status])
            .inc();
        result
    }

    fn record(&self, event_type: EventType) -> StreamRecord {
        StreamRecord::new(event_type, &self.ctx.manager_id).with_job(&self.job)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use alloy_primitives::Bytes;
    use async_trait::async_trait;

    use super::*;
    use crate::cache::{block_number_key, MemoryCache, NoopCache};
    use crate::error::DispatchError;
    use crate::stream::MemoryPublisher;

    const CONTRACT: &str = "0x1234567890123456789012345678901234567890";
    const EVENT: &str = "Transfer(address,address,uint256)";

    struct MockClient {
        head: AtomicU64,
        logs: Mutex<Vec<EventLog>>,
        filters: Mutex<Vec<(u64, u64)>>,
        fail: AtomicBool,
    }

    impl MockClient {
        fn new(head: u64) -> Arc<Self> {
            Arc::new(Self {
                head: AtomicU64::new(head),
                logs: Mutex::new(Vec::new()),
                filters: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn ranges(&self) -> Vec<(u64, u64)> {
            self.filters.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainClient for MockClient {
        async fn block_number(&self) -> Result<u64, ClientError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Http("HTTP 502: bad gateway".into()));
            }
            Ok(self.head.load(Ordering::SeqCst))
        }

        async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<EventLog>, ClientError> {
            self.filters
                .lock()
                .unwrap()
                .push((filter.from_block, filter.to_block));
            Ok(self
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|l| l.block_number >= filter.from_block && l.block_number <= filter.to_block)
                .cloned()
                .collect())
        }

        async fn chain_id(&self) -> Result<u64, ClientError> {
            Ok(11155111)
        }

        fn close(&self) {}
    }

    struct FlakyDispatcher {
        fail_blocks: Vec<u64>,
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ActionDispatcher for FlakyDispatcher {
        async fn dispatch(&self, _job: &JobDefinition, log: &EventLog) -> Result<(), DispatchError> {
            self.seen.lock().unwrap().push(log.block_number);
            if self.fail_blocks.contains(&log.block_number) {
                Err(DispatchError::transient("target reverted"))
            } else {
                Ok(())
            }
        }
    }

    fn log_at(block: u64, tx: u8, removed: bool) -> EventLog {
        EventLog {
            address: parse_address(CONTRACT).unwrap(),
            topics: vec![event_topic(EVENT)],
            data: Bytes::new(),
            block_number: block,
            block_hash: B256::repeat_byte(block as u8),
            tx_hash: B256::repeat_byte(tx),
            log_index: 0,
            removed,
        }
    }

    fn context(
        cache: Arc<dyn Cache>,
        publisher: Arc<MemoryPublisher>,
        dispatcher: Arc<dyn ActionDispatcher>,
    ) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            manager_id: "test-manager".into(),
            poll_interval: Duration::from_secs(10),
            confirmations: 3,
            rpc_timeout: Duration::from_secs(30),
            block_cache_ttl: Duration::from_secs(120),
            duplicate_event_window: Duration::from_secs(30),
            cache,
            publisher,
            dispatcher,
            metrics: Arc::new(SchedulerMetrics::new().unwrap()),
            span: Span::none(),
        })
    }

    fn worker(client: Arc<MockClient>, ctx: Arc<WorkerContext>, start: u64) -> EventWorker {
        let job = JobDefinition::new(1, "11155111", CONTRACT, EVENT);
        EventWorker::new(job, client, ctx, &CancellationToken::new())
            .unwrap()
            .starting_at(start)
    }

    #[test]
    fn safe_block_subtracts_confirmations() {
        assert_eq!(safe_block(100, 3), 97);
        assert_eq!(safe_block(3, 3), 3);
        assert_eq!(safe_block(2, 3), 2);
        assert_eq!(safe_block(0, 3), 0);
        assert_eq!(safe_block(50, 0), 50);
    }

    #[test]
    fn rejects_invalid_contract() {
        let ctx = context(
            Arc::new(NoopCache),
            Arc::new(MemoryPublisher::new()),
            Arc::new(crate::dispatch::LogOnlyDispatcher),
        );
        let job = JobDefinition::new(1, "1", "invalid-address", EVENT);
        let err = EventWorker::new(job, MockClient::new(0), ctx, &CancellationToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, SchedulerError::InvalidContractAddress(ref a) if a == "invalid-address"));
    }

    #[tokio::test]
    async fn scans_contiguous_confirmed_ranges() {
        let client = MockClient::new(100);
        let ctx = context(
            Arc::new(NoopCache),
            Arc::new(MemoryPublisher::new()),
            Arc::new(crate::dispatch::LogOnlyDispatcher),
        );
        let w = worker(client.clone(), ctx, 100);

        // Head has not moved past the confirmation depth yet.
        assert_eq!(w.check_for_events().await.unwrap(), None);

        client.head.store(110, Ordering::SeqCst);
        let report = w.check_for_events().await.unwrap().unwrap();
        assert_eq!((report.from_block, report.to_block), (101, 107));
        assert_eq!(w.last_block(), 107);

        client.head.store(112, Ordering::SeqCst);
        w.check_for_events().await.unwrap();
        assert_eq!(client.ranges(), vec![(101, 107), (108, 109)]);
        assert_eq!(w.last_block(), 109);
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_block_progress() {
        let client = MockClient::new(120);
        client
            .logs
            .lock()
            .unwrap()
            .extend([log_at(105, 1, false), log_at(106, 2, true), log_at(110, 3, false)]);
        let publisher = Arc::new(MemoryPublisher::new());
        let dispatcher = Arc::new(FlakyDispatcher {
            fail_blocks: vec![105],
            seen: Mutex::new(Vec::new()),
        });
        let ctx = context(Arc::new(NoopCache), publisher.clone(), dispatcher.clone());
        let w = worker(client, ctx.clone(), 100);

        let report = w.check_for_events().await.unwrap().unwrap();
        assert_eq!(report.logs, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(w.last_block(), 117);
        assert_eq!(*dispatcher.seen.lock().unwrap(), vec![105, 110]);

        let failed = publisher.by_type(EventType::EventFailed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, EventStream::Retry);
        assert_eq!(failed[0].1.get_str("status"), Some("failed"));
        assert!(failed[0].1.get("duration_ms").is_some());

        let completed = publisher.by_type(EventType::EventCompleted);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, EventStream::Ready);
        assert_eq!(publisher.count(EventType::EventDetected), 2);

        assert_eq!(ctx.metrics.events_detected.get(), 2);
        assert_eq!(ctx.metrics.jobs_failed.get(), 1);
        assert_eq!(ctx.metrics.events_processed.get(), 1);
        let actions = &ctx.metrics.action_executions;
        assert_eq!(actions.with_label_values(&["1", "failed"]).get(), 1);
        assert_eq!(actions.with_label_values(&["1", "completed"]).get(), 1);
        assert_eq!(ctx.metrics.event_processing_seconds.get_sample_count(), 2);
    }

    #[tokio::test]
    async fn head_is_read_from_chain_and_written_to_cache() {
        let client = MockClient::new(110);
        let cache = Arc::new(MemoryCache::new());
        cache
            .set(&block_number_key("11155111"), "100", Duration::from_secs(120))
            .await
            .unwrap();
        let ctx = context(
            cache.clone(),
            Arc::new(MemoryPublisher::new()),
            Arc::new(crate::dispatch::LogOnlyDispatcher),
        );
        let w = worker(client.clone(), ctx.clone(), 100);

        // A stale cached head does not hold the worker back.
        let report = w.check_for_events().await.unwrap().unwrap();
        assert_eq!((report.from_block, report.to_block), (101, 107));
        assert_eq!(
            cache.get(&block_number_key("11155111")).await.unwrap().as_deref(),
            Some("110")
        );

        client.fail.store(true, Ordering::SeqCst);
        assert!(w.check_for_events().await.is_err());

        let rpc = &ctx.metrics.rpc_requests;
        assert_eq!(rpc.with_label_values(&["11155111", "eth_blockNumber", "success"]).get(), 1);
        assert_eq!(rpc.with_label_values(&["11155111", "eth_getLogs", "success"]).get(), 1);
        assert_eq!(rpc.with_label_values(&["11155111", "eth_blockNumber", "failed"]).get(), 1);
    }

    #[tokio::test]
    async fn duplicate_events_are_suppressed() {
        let client = MockClient::new(120);
        client.logs.lock().unwrap().push(log_at(105, 1, false));
        let publisher = Arc::new(MemoryPublisher::new());
        let dispatcher = Arc::new(FlakyDispatcher {
            fail_blocks: vec![],
            seen: Mutex::new(Vec::new()),
        });
        let ctx = context(Arc::new(MemoryCache::new()), publisher.clone(), dispatcher.clone());
        let w = worker(client, ctx.clone(), 100);

        let log = log_at(105, 1, false);
        assert_eq!(w.process_event(&log).await, EventOutcome::Completed);
        assert_eq!(w.process_event(&log).await, EventOutcome::Duplicate);
        assert_eq!(dispatcher.seen.lock().unwrap().len(), 1);
        assert_eq!(publisher.count(EventType::EventDuplicateDetected), 1);
    }

    #[tokio::test]
    async fn rpc_failure_keeps_position() {
        let client = MockClient::new(120);
        client.fail.store(true, Ordering::SeqCst);
        let ctx = context(
            Arc::new(NoopCache),
            Arc::new(MemoryPublisher::new()),
            Arc::new(crate::dispatch::LogOnlyDispatcher),
        );
        let w = worker(client.clone(), ctx, 100);

        assert!(w.check_for_events().await.is_err());
        assert_eq!(w.last_block(), 100);

        client.fail.store(false, Ordering::SeqCst);
        let report = w.check_for_events().await.unwrap().unwrap();
        assert_eq!(report.from_block, 101);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_final() {
        let ctx = context(
            Arc::new(NoopCache),
            Arc::new(MemoryPublisher::new()),
            Arc::new(crate::dispatch::LogOnlyDispatcher),
        );
        let w = Arc::new(worker(MockClient::new(100), ctx.clone(), 100));
        assert_eq!(w.state(), WorkerState::Created);

        assert!(w.stop());
        assert!(!w.stop());
        assert_eq!(w.state(), WorkerState::Stopped);
        // Never ran, so nothing to count.
        assert_eq!(ctx.metrics.workers_stopped.get(), 0);

        // A stopped worker never starts.
        assert!(w.spawn().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn running_worker_ticks_until_stopped() {
        let client = MockClient::new(100);
        let publisher = Arc::new(MemoryPublisher::new());
        let ctx = context(
            Arc::new(NoopCache),
            publisher.clone(),
            Arc::new(crate::dispatch::LogOnlyDispatcher),
        );
        let w = Arc::new(worker(client.clone(), ctx.clone(), 100));

        let handle = w.spawn().unwrap();
        assert!(w.is_running());
        assert!(w.spawn().is_none());

        client.head.store(110, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(w.last_block(), 107);

        assert!(w.stop());
        handle.await.unwrap();

        assert_eq!(publisher.count(EventType::WorkerStarted), 1);
        let stopped = publisher.by_type(EventType::WorkerStopped);
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].1.get("final_block"), Some(&serde_json::Value::from(107u64)));
        assert_eq!(ctx.metrics.workers_started.get(), 1);
        assert_eq!(ctx.metrics.workers_stopped.get(), 1);
    }
}
