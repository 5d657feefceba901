//! chainsched-core: event-driven job scheduling for operator stacks.
//!
//! A [`Manager`] keeps one [`EventWorker`] per scheduled job. Each worker polls
//! its trigger chain for a single contract event, waits for block
//! confirmations, and hands every matching log to an [`ActionDispatcher`].
//!
//! # Architecture
//!
//! ```text
//! ManagerBuilder → Manager
//!                    ├── ChainClient × chains  (shared by workers on the same chain)
//!                    ├── Cache                 (block height + duplicate suppression)
//!                    ├── EventPublisher        (jobs:ready:event / jobs:retry:event)
//!                    ├── SchedulerMetrics      (prometheus registry)
//!                    └── EventWorker × jobs
//!                           └── ActionDispatcher
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod manager;
pub mod metrics;
pub mod stats;
pub mod stream;
pub mod topic;
pub mod worker;

pub use cache::{Cache, MemoryCache, NoopCache};
pub use client::{ChainClient, ChainConnector, EventLog, LogFilter};
pub use config::{ChainEndpoint, SchedulerConfig, SchedulerConfigBuilder};
pub use dispatch::{ActionDispatcher, LogOnlyDispatcher};
pub use error::{
    CacheError, ClientError, ConfigError, DispatchError, ErrorKind, PublishError, SchedulerError,
};
pub use job::{JobDefinition, JobId};
pub use manager::{Manager, ManagerBuilder};
pub use metrics::SchedulerMetrics;
pub use stats::{ManagerStats, WorkerStats};
pub use stream::{EventPublisher, EventStream, EventType, MemoryPublisher, NoopPublisher, StreamRecord};
pub use worker::{EventWorker, ScanReport, WorkerState};
