//! Scheduler manager: worker registry, admission control and lifecycle.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(connector: &dyn chainsched_core::ChainConnector) -> Result<(), chainsched_core::SchedulerError> {
//! use chainsched_core::{JobDefinition, ManagerBuilder, SchedulerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = SchedulerConfig::builder()
//!     .chain("11155111", "https://sepolia.example")
//!     .max_workers(50)
//!     .build();
//!
//! let manager = ManagerBuilder::new("event-scheduler-1")
//!     .config(config)
//!     .connect(connector)
//!     .await?;
//!
//! manager
//!     .schedule_job(JobDefinition::new(
//!         1,
//!         "11155111",
//!         "0x1234567890123456789012345678901234567890",
//!         "Transfer(address,address,uint256)",
//!     ))
//!     .await?;
//!
//! let shutdown = CancellationToken::new();
//! manager.start(shutdown).await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::cache::{cached_block_number, Cache, NoopCache};
use crate::client::{ChainClient, ChainConnector};
use crate::config::SchedulerConfig;
use crate::dispatch::{ActionDispatcher, LogOnlyDispatcher};
use crate::error::{ClientError, SchedulerError};
use crate::job::{JobDefinition, JobId};
use crate::metrics::SchedulerMetrics;
use crate::stats::{ManagerStats, WorkerStats};
use crate::stream::{publish_best_effort, EventPublisher, EventStream, EventType, NoopPublisher, StreamRecord};
use crate::worker::{EventWorker, WorkerContext};

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Fluent builder for [`Manager`]. Collaborators default to no-op
/// implementations.
pub struct ManagerBuilder {
    manager_id: String,
    config: SchedulerConfig,
    cache: Arc<dyn Cache>,
    publisher: Arc<dyn EventPublisher>,
    dispatcher: Arc<dyn ActionDispatcher>,
    metrics: Option<Arc<SchedulerMetrics>>,
}

impl ManagerBuilder {
    pub fn new(manager_id: impl Into<String>) -> Self {
        Self {
            manager_id: manager_id.into(),
            config: SchedulerConfig::default(),
            cache: Arc::new(NoopCache),
            publisher: Arc::new(NoopPublisher),
            dispatcher: Arc::new(LogOnlyDispatcher),
            metrics: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn ActionDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Share an existing metrics set instead of creating a fresh registry.
    pub fn metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Connect to every configured chain and build the manager.
    ///
    /// Chains that fail to connect or to answer `chain_id` are logged and
    /// skipped. Fails with [`SchedulerError::NoChainsConnected`] if none
    /// remain.
    pub async fn connect(self, connector: &dyn ChainConnector) -> Result<Manager, SchedulerError> {
        self.config.validate()?;
        let metrics = match self.metrics {
            Some(m) => m,
            None => Arc::new(SchedulerMetrics::new()?),
        };
        let span = tracing::info_span!("event_scheduler", manager_id = %self.manager_id);
        let config = self.config;

        let clients = connect_chains(connector, &config, &metrics)
            .instrument(span.clone())
            .await;
        if clients.is_empty() {
            tracing::error!(parent: &span, "no chain clients initialized successfully");
            return Err(SchedulerError::NoChainsConnected);
        }

        let ctx = Arc::new(WorkerContext {
            manager_id: self.manager_id.clone(),
            poll_interval: config.poll_interval(),
            confirmations: config.confirmations,
            rpc_timeout: config.rpc_timeout(),
            block_cache_ttl: config.block_cache_ttl(),
            duplicate_event_window: config.duplicate_event_window(),
            cache: self.cache,
            publisher: self.publisher,
            dispatcher: self.dispatcher,
            metrics,
            span: span.clone(),
        });

        let manager = Manager {
            manager_id: self.manager_id,
            max_workers: config.max_workers,
            shutdown_grace: config.shutdown_grace(),
            root: CancellationToken::new(),
            workers: RwLock::new(HashMap::new()),
            clients: RwLock::new(clients),
            ctx,
            stopped: AtomicBool::new(false),
            started_at: chrono::Utc::now().timestamp(),
            span,
        };
        manager.announce_startup().await;
        Ok(manager)
    }
}

async fn connect_chains(
    connector: &dyn ChainConnector,
    config: &SchedulerConfig,
    metrics: &SchedulerMetrics,
) -> HashMap<String, Arc<dyn ChainClient>> {
    let mut clients = HashMap::new();
    let rpc_timeout = config.rpc_timeout();
    let record = |chain_id: &str, status: &str| {
        metrics
            .chain_connections
            .with_label_values(&[chain_id, status])
            .inc();
    };

    for (chain_id, endpoint) in &config.chains {
        let client = match connector.connect(chain_id, &endpoint.rpc_url).await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(chain_id, rpc_url = %endpoint.rpc_url, error = %e, "failed to connect to chain");
                record(chain_id.as_str(), "failed");
                continue;
            }
        };

        let reported = tokio::time::timeout(rpc_timeout, client.chain_id())
            .await
            .unwrap_or(Err(ClientError::Timeout {
                ms: rpc_timeout.as_millis() as u64,
            }));
        match reported {
            Ok(network_id) => {
                if chain_id.parse::<u64>().is_ok_and(|configured| configured != network_id) {
                    tracing::warn!(chain_id, network_id, "node reports a different chain ID");
                }
                tracing::info!(chain_id, network_id, rpc_url = %endpoint.rpc_url, "connected to chain");
                record(chain_id.as_str(), "success");
                clients.insert(chain_id.clone(), client);
            }
            Err(e) => {
                tracing::error!(chain_id, error = %e, "chain did not answer chain ID request");
                record(chain_id.as_str(), "failed");
                client.close();
            }
        }
    }
    clients
}

// ─── Manager ─────────────────────────────────────────────────────────────────

struct WorkerEntry {
    worker: Arc<EventWorker>,
    task: Option<JoinHandle<()>>,
}

/// Owns the worker registry and the chain clients.
///
/// All methods take `&self`; wrap the manager in an `Arc` to share it between
/// an API surface and the task that runs [`start`](Self::start).
pub struct Manager {
    manager_id: String,
    max_workers: usize,
    shutdown_grace: Duration,
    root: CancellationToken,
    workers: RwLock<HashMap<JobId, WorkerEntry>>,
    clients: RwLock<HashMap<String, Arc<dyn ChainClient>>>,
    ctx: Arc<WorkerContext>,
    stopped: AtomicBool,
    started_at: i64,
    span: Span,
}

impl Manager {
    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.ctx.metrics
    }

    /// Prometheus text exposition of this manager's metrics.
    pub fn render_metrics(&self) -> Result<String, prometheus::Error> {
        self.ctx.metrics.render()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self, job_id: JobId) -> bool {
        self.read_workers().contains_key(&job_id)
    }

    pub fn worker_count(&self) -> usize {
        self.read_workers().len()
    }

    /// Wait until `shutdown` (or an explicit [`stop`](Self::stop)) fires,
    /// then stop every worker.
    pub async fn start(&self, shutdown: CancellationToken) {
        tracing::info!(parent: &self.span, "event scheduler ready for job scheduling");
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(parent: &self.span, "shutdown requested, stopping all workers");
            }
            _ = self.root.cancelled() => {}
        }
        self.stop().await;
    }

    // ─── Scheduling ──────────────────────────────────────────────────────────

    /// Register a worker for `job` and start it.
    ///
    /// Checks run in order: shutdown, duplicate job, capacity, supported
    /// chain, contract address, starting block.
    pub async fn schedule_job(&self, job: JobDefinition) -> Result<(), SchedulerError> {
        let started = Instant::now();
        let result = self.try_schedule(&job).instrument(self.span.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((active_workers, starting_block)) => {
                self.ctx.metrics.jobs_scheduled.inc();
                tracing::info!(
                    parent: &self.span,
                    job_id = job.job_id,
                    trigger_chain_id = %job.trigger_chain_id,
                    contract = %job.trigger_contract_address,
                    event = %job.trigger_event,
                    starting_block,
                    active_workers,
                    duration_ms,
                    "event job scheduled"
                );
                self.publish(
                    EventStream::Ready,
                    StreamRecord::new(EventType::JobScheduled, &self.manager_id)
                        .with_job(&job)
                        .with("starting_block", starting_block)
                        .with("active_workers", active_workers)
                        .with("max_workers", self.max_workers)
                        .with("duration_ms", duration_ms)
                        .with("scheduled_at", chrono::Utc::now().timestamp())
                        .with("status", "scheduled"),
                )
                .await;
                Ok(())
            }
            Err(e) => {
                self.ctx.metrics.schedule_rejections.inc();
                tracing::warn!(parent: &self.span, job_id = job.job_id, error = %e, "failed to schedule job");
                self.publish(
                    EventStream::Retry,
                    StreamRecord::new(EventType::JobScheduleFailed, &self.manager_id)
                        .with_job(&job)
                        .with("reason", e.reason())
                        .with("error", e.to_string())
                        .with("error_kind", e.kind().to_string())
                        .with("duration_ms", duration_ms)
                        .with("status", "failed"),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Returns `(active_workers, starting_block)`.
    async fn try_schedule(&self, job: &JobDefinition) -> Result<(usize, u64), SchedulerError> {
        if self.root.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        self.check_admission(&self.read_workers(), job.job_id)?;

        let client = self
            .read_clients()
            .get(&job.trigger_chain_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnsupportedChain(job.trigger_chain_id.clone()))?;

        let worker = EventWorker::new(job.clone(), Arc::clone(&client), Arc::clone(&self.ctx), &self.root)?;

        let starting_block = self.starting_block(client.as_ref(), &job.trigger_chain_id).await?;
        let worker = Arc::new(worker.starting_at(starting_block));

        // Another request may have won the slot while the head was fetched.
        let mut workers = self.write_workers();
        if self.root.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        self.check_admission(&workers, job.job_id)?;

        let task = worker.spawn();
        workers.insert(job.job_id, WorkerEntry { worker, task });
        self.ctx.metrics.jobs_running.inc();
        Ok((workers.len(), starting_block))
    }

    fn check_admission(
        &self,
        workers: &HashMap<JobId, WorkerEntry>,
        job_id: JobId,
    ) -> Result<(), SchedulerError> {
        if workers.contains_key(&job_id) {
            return Err(SchedulerError::AlreadyScheduled(job_id));
        }
        if workers.len() >= self.max_workers {
            return Err(SchedulerError::MaxWorkersReached {
                max: self.max_workers,
                job_id,
            });
        }
        Ok(())
    }

    async fn starting_block(
        &self,
        client: &dyn ChainClient,
        chain_id: &str,
    ) -> Result<u64, SchedulerError> {
        let limit = self.ctx.rpc_timeout;
        let head = tokio::time::timeout(
            limit,
            cached_block_number(self.ctx.cache.as_ref(), client, chain_id, self.ctx.block_cache_ttl),
        )
        .await
        .unwrap_or(Err(ClientError::Timeout {
            ms: limit.as_millis() as u64,
        }));

        head.map_err(|source| SchedulerError::StartingBlock {
            chain_id: chain_id.to_string(),
            source,
        })
    }

    /// Stop and remove the worker for `job_id`. The worker's in-flight tick
    /// is not awaited.
    pub async fn unschedule_job(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let (entry, remaining_workers) = {
            let mut workers = self.write_workers();
            let entry = workers.remove(&job_id);
            (entry, workers.len())
        };

        let Some(entry) = entry else {
            let err = SchedulerError::JobNotScheduled(job_id);
            tracing::warn!(parent: &self.span, job_id, "attempted to unschedule a job that is not scheduled");
            self.publish(
                EventStream::Retry,
                StreamRecord::new(EventType::JobUnscheduleFailed, &self.manager_id)
                    .with("job_id", job_id)
                    .with("reason", err.reason())
                    .with("error", err.to_string())
                    .with("status", "failed"),
            )
            .await;
            return Err(err);
        };

        let worker = entry.worker;
        let last_block = worker.last_block();
        let was_running = worker.is_running();
        worker.stop();
        self.ctx.metrics.jobs_running.dec();

        tracing::info!(
            parent: &self.span,
            job_id,
            last_block,
            was_running,
            remaining_workers,
            "event job unscheduled"
        );
        self.publish(
            EventStream::Ready,
            StreamRecord::new(EventType::JobUnscheduled, &self.manager_id)
                .with_job(worker.job())
                .with("last_block", last_block)
                .with("was_running", was_running)
                .with("remaining_workers", remaining_workers)
                .with("unscheduled_at", chrono::Utc::now().timestamp())
                .with("status", "unscheduled"),
        )
        .await;
        Ok(())
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Stop every worker, wait up to the shutdown grace for in-flight ticks,
    /// and close all chain clients. Safe to call more than once.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!(parent: &self.span, "scheduler already stopped");
            return;
        }
        let started = Instant::now();
        tracing::info!(parent: &self.span, "stopping event scheduler");

        let running_workers = self
            .read_workers()
            .values()
            .filter(|e| e.worker.is_running())
            .count();

        // No schedule request can register a worker after this point.
        self.root.cancel();
        let drained: Vec<(JobId, WorkerEntry)> = self.write_workers().drain().collect();
        let total_workers = drained.len();

        let mut tasks = Vec::with_capacity(total_workers);
        let mut worker_details = Vec::with_capacity(total_workers);
        for (job_id, entry) in drained {
            worker_details.push(json!({
                "job_id": job_id,
                "trigger_chain_id": entry.worker.job().trigger_chain_id,
                "last_block": entry.worker.last_block(),
                "was_running": entry.worker.is_running(),
            }));
            entry.worker.stop();
            self.ctx.metrics.jobs_running.dec();
            tracing::debug!(parent: &self.span, job_id, "stopped worker");
            tasks.extend(entry.task);
        }

        if !tasks.is_empty()
            && tokio::time::timeout(self.shutdown_grace, join_all(tasks))
                .await
                .is_err()
        {
            tracing::warn!(
                parent: &self.span,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "workers still busy after shutdown grace period"
            );
        }

        let clients: Vec<(String, Arc<dyn ChainClient>)> = self.write_clients().drain().collect();
        let connected_chains = clients.len();
        for (chain_id, client) in clients {
            client.close();
            tracing::info!(parent: &self.span, chain_id, "closed chain client");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.publish(
            EventStream::Ready,
            StreamRecord::new(EventType::SchedulerShutdown, &self.manager_id)
                .with("total_workers", total_workers)
                .with("running_workers", running_workers)
                .with("connected_chains", connected_chains)
                .with("worker_details", Value::Array(worker_details))
                .with("duration_ms", duration_ms)
                .with("uptime_seconds", chrono::Utc::now().timestamp() - self.started_at)
                .with("graceful_shutdown", true),
        )
        .await;
        tracing::info!(
            parent: &self.span,
            total_workers_stopped = total_workers,
            running_workers_stopped = running_workers,
            chains_disconnected = connected_chains,
            duration_ms,
            "event scheduler stopped"
        );
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    pub fn stats(&self) -> ManagerStats {
        let (total_workers, running_workers) = {
            let workers = self.read_workers();
            let running = workers.values().filter(|e| e.worker.is_running()).count();
            (workers.len(), running)
        };
        let mut supported_chains: Vec<String> = self.read_clients().keys().cloned().collect();
        supported_chains.sort();

        ManagerStats {
            manager_id: self.manager_id.clone(),
            total_workers,
            running_workers,
            max_workers: self.max_workers,
            connected_chains: supported_chains.len(),
            supported_chains,
            cache_available: self.ctx.cache.is_available(),
            stream_available: self.ctx.publisher.is_available(),
        }
    }

    pub fn job_worker_stats(&self, job_id: JobId) -> Result<WorkerStats, SchedulerError> {
        self.read_workers()
            .get(&job_id)
            .map(|e| WorkerStats::of(&e.worker, &self.manager_id))
            .ok_or(SchedulerError::JobNotScheduled(job_id))
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    async fn announce_startup(&self) {
        let mut supported_chains: Vec<String> = self.read_clients().keys().cloned().collect();
        supported_chains.sort();

        tracing::info!(
            parent: &self.span,
            max_workers = self.max_workers,
            connected_chains = supported_chains.len(),
            cache_available = self.ctx.cache.is_available(),
            stream_available = self.ctx.publisher.is_available(),
            "event scheduler initialized"
        );
        self.publish(
            EventStream::Ready,
            StreamRecord::new(EventType::SchedulerStartup, &self.manager_id)
                .with("max_workers", self.max_workers)
                .with("cache_available", self.ctx.cache.is_available())
                .with("supported_chains", supported_chains.len())
                .with("chain_ids", supported_chains)
                .with("started_at", self.started_at),
        )
        .await;
    }

    async fn publish(&self, stream: EventStream, record: StreamRecord) {
        publish_best_effort(self.ctx.publisher.as_ref(), stream, record).await;
    }

    fn read_workers(&self) -> RwLockReadGuard<'_, HashMap<JobId, WorkerEntry>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_workers(&self) -> RwLockWriteGuard<'_, HashMap<JobId, WorkerEntry>> {
        self.workers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn ChainClient>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn ChainClient>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        // Workers hold child tokens; cancelling the root ends their loops.
        self.root.cancel();
    }
}
