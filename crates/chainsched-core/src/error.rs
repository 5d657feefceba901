//! Error types for the scheduler and its collaborators.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;

/// Coarse classification shared by every error in the crate.
///
/// `Rejected` means the request itself was refused and retrying it unchanged
/// will fail again. `Transient` failures may succeed on retry. `Fatal` means
/// the scheduler cannot operate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Rejected,
    Transient,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "rejected"),
            Self::Transient => write!(f, "transient"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

// ─── SchedulerError ──────────────────────────────────────────────────────────

/// Errors returned by the [`Manager`](crate::Manager).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} is already scheduled")]
    AlreadyScheduled(JobId),

    #[error("maximum number of workers ({max}) reached, cannot schedule job {job_id}")]
    MaxWorkersReached { max: usize, job_id: JobId },

    #[error("unsupported chain ID: {0}")]
    UnsupportedChain(String),

    #[error("invalid contract address: {0}")]
    InvalidContractAddress(String),

    #[error("job {0} is not scheduled (job not found)")]
    JobNotScheduled(JobId),

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("failed to get starting block for chain {chain_id}: {source}")]
    StartingBlock {
        chain_id: String,
        #[source]
        source: ClientError,
    },

    #[error("no chain clients initialized successfully")]
    NoChainsConnected,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl SchedulerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyScheduled(_)
            | Self::MaxWorkersReached { .. }
            | Self::UnsupportedChain(_)
            | Self::InvalidContractAddress(_)
            | Self::JobNotScheduled(_)
            | Self::ShuttingDown => ErrorKind::Rejected,
            Self::StartingBlock { .. } => ErrorKind::Transient,
            Self::NoChainsConnected | Self::Config(_) | Self::Metrics(_) => ErrorKind::Fatal,
        }
    }

    /// Short machine-readable reason, used as the `reason` field of failure events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::AlreadyScheduled(_) => "already_scheduled",
            Self::MaxWorkersReached { .. } => "max_workers_reached",
            Self::UnsupportedChain(_) => "unsupported_chain",
            Self::InvalidContractAddress(_) => "invalid_contract_address",
            Self::JobNotScheduled(_) => "job_not_found",
            Self::ShuttingDown => "shutting_down",
            Self::StartingBlock { .. } => "starting_block_unavailable",
            Self::NoChainsConnected => "no_chains_connected",
            Self::Config(_) => "invalid_config",
            Self::Metrics(_) => "metrics",
        }
    }
}

// ─── ClientError ─────────────────────────────────────────────────────────────

/// Errors returned by a [`ChainClient`](crate::ChainClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("client for chain {0} is closed")]
    Closed(String),
}

impl ClientError {
    /// Returns `true` if the request may succeed when retried on a later tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout { .. } => true,
            // -32005 limit exceeded, -32603 internal error
            Self::Rpc { code, .. } => matches!(code, -32005 | -32603),
            Self::Decode(_) | Self::Closed(_) => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            ErrorKind::Transient
        } else {
            ErrorKind::Fatal
        }
    }
}

// ─── DispatchError ───────────────────────────────────────────────────────────

/// Failure reported by an [`ActionDispatcher`](crate::ActionDispatcher).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} dispatch failure: {message}")]
pub struct DispatchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DispatchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Rejected, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

// ─── Collaborator errors ─────────────────────────────────────────────────────

/// Cache backend failure. Always non-fatal to the scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

/// Event-stream backend failure. Always non-fatal to the scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("publish error: {0}")]
pub struct PublishError(pub String);

/// Configuration parsing or validation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{0}")]
    Invalid(String),
}
