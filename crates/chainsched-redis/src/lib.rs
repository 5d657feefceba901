//! chainsched-redis: Redis backends for the scheduler.
//!
//! - [`RedisStreamPublisher`] appends lifecycle records to `jobs:ready:event`
//!   and `jobs:retry:event` with `XADD`.
//! - [`RedisCache`] stores block heights and duplicate markers with `SET EX`.
//!
//! Both share one [`ConnectionManager`](redis::aio::ConnectionManager), which
//! reconnects on its own after a dropped connection.

pub mod cache;
pub mod publisher;

pub use cache::RedisCache;
pub use publisher::{stream_fields, RedisStreamPublisher};

/// Open a shared connection manager for `url`.
pub async fn connect(url: &str) -> Result<redis::aio::ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(url)?;
    redis::aio::ConnectionManager::new(client).await
}
