//! Lifecycle event streams.
//!
//! Every state change of the scheduler is published as a flat JSON record to
//! one of two logical streams: [`EventStream::Ready`] for successful
//! transitions and [`EventStream::Retry`] for failures a downstream consumer
//! may want to act on. Publishing is best-effort.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PublishError;
use crate::job::JobDefinition;

/// Logical stream a record is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStream {
    #[serde(rename = "jobs:ready:event")]
    Ready,
    #[serde(rename = "jobs:retry:event")]
    Retry,
}

impl EventStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "jobs:ready:event",
            Self::Retry => "jobs:retry:event",
        }
    }
}

impl fmt::Display for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of the `event_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SchedulerStartup,
    SchedulerShutdown,
    JobScheduled,
    JobScheduleFailed,
    JobUnscheduled,
    JobUnscheduleFailed,
    WorkerStarted,
    WorkerStopped,
    WorkerError,
    EventDetected,
    EventCompleted,
    EventFailed,
    EventDuplicateDetected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchedulerStartup => "scheduler_startup",
            Self::SchedulerShutdown => "scheduler_shutdown",
            Self::JobScheduled => "job_scheduled",
            Self::JobScheduleFailed => "job_schedule_failed",
            Self::JobUnscheduled => "job_unscheduled",
            Self::JobUnscheduleFailed => "job_unschedule_failed",
            Self::WorkerStarted => "worker_started",
            Self::WorkerStopped => "worker_stopped",
            Self::WorkerError => "worker_error",
            Self::EventDetected => "event_detected",
            Self::EventCompleted => "event_completed",
            Self::EventFailed => "event_failed",
            Self::EventDuplicateDetected => "event_duplicate_detected",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── StreamRecord ────────────────────────────────────────────────────────────

/// A flat string-keyed record. Always carries `event_type`, `manager_id` and a
/// Unix `timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamRecord(Map<String, Value>);

impl StreamRecord {
    pub fn new(event_type: EventType, manager_id: &str) -> Self {
        Self::default()
            .with("event_type", event_type.as_str())
            .with("manager_id", manager_id)
            .with("timestamp", chrono::Utc::now().timestamp())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Add the job's identifying trigger and target fields.
    pub fn with_job(self, job: &JobDefinition) -> Self {
        self.with("job_id", job.job_id)
            .with("trigger_chain_id", job.trigger_chain_id.as_str())
            .with("trigger_contract_address", job.trigger_contract_address.as_str())
            .with("trigger_event", job.trigger_event.as_str())
            .with("target_chain_id", job.target_chain_id.as_str())
            .with("target_contract_address", job.target_contract_address.as_str())
            .with("target_function", job.target_function.as_str())
            .with("recurring", job.recurring)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.get_str("event_type")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

// ─── Publishers ──────────────────────────────────────────────────────────────

/// Append-only sink for lifecycle records.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, stream: EventStream, record: StreamRecord) -> Result<(), PublishError>;

    /// `false` for publishers that drop everything.
    fn is_available(&self) -> bool {
        true
    }
}

/// Publisher that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _stream: EventStream, _record: StreamRecord) -> Result<(), PublishError> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Publisher that keeps every record in memory, in publish order.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    records: Mutex<Vec<(EventStream, StreamRecord)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(EventStream, StreamRecord)> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Records with the given `event_type`, in publish order.
    pub fn by_type(&self, event_type: EventType) -> Vec<(EventStream, StreamRecord)> {
        self.records()
            .into_iter()
            .filter(|(_, r)| r.event_type() == Some(event_type.as_str()))
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.by_type(event_type).len()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, stream: EventStream, record: StreamRecord) -> Result<(), PublishError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((stream, record));
        Ok(())
    }
}

/// Publish `record`, logging and swallowing any failure.
pub(crate) async fn publish_best_effort(
    publisher: &dyn EventPublisher,
    stream: EventStream,
    record: StreamRecord,
) {
    if !publisher.is_available() {
        return;
    }
    let event_type = record.event_type().unwrap_or_default().to_string();
    if let Err(e) = publisher.publish(stream, record).await {
        tracing::warn!(%stream, event_type, error = %e, "failed to publish lifecycle event");
    }
}
