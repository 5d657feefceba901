//! chainsched-evm: JSON-RPC chain client for EVM networks.
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), chainsched_core::ClientError> {
//! use chainsched_core::{ChainClient, ChainConnector};
//! use chainsched_evm::HttpConnector;
//!
//! let client = HttpConnector::default()
//!     .connect("11155111", "https://rpc.sepolia.org")
//!     .await?;
//! let head = client.block_number().await?;
//! println!("head: {head}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod transport;

pub use client::{EvmChainClient, HttpConnector, RawLog};
pub use transport::{HttpClientConfig, HttpTransport, RpcCall, RpcReply, RpcTransport};
