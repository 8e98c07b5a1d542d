//! proofindex-rpc — the chain-facing half of proofindex.
//!
//! # Overview
//!
//! - [`RpcTransport`] — async trait every JSON-RPC transport implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`] — wire types
//! - [`HttpRpcClient`] — `reqwest` transport with connection-level retry
//! - [`RetryPolicy`] — exponential backoff schedule shared with the log fetcher
//! - [`ChainReader`] — the typed view of the chain the indexer consumes
//! - [`TransportError`] — structured error type

pub mod error;
pub mod http;
pub mod reader;
pub mod request;
pub mod retry;
pub mod transport;

pub use error::TransportError;
pub use http::{HttpClientConfig, HttpRpcClient};
pub use reader::{parse_hex_u64, ChainReader, RawLog, RpcChainReader};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::RpcTransport;
