//! The `RpcTransport` trait: raw JSON-RPC request/response exchange.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// The async trait every JSON-RPC transport implements.
///
/// Object-safe for the `send` path; stored as `Arc<dyn RpcTransport>` or used
/// generically by [`RpcChainReader`](crate::reader::RpcChainReader).
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a single JSON-RPC request and return the raw response.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Return the transport's identifier (URL or name).
    fn url(&self) -> &str;

    /// Call a method and deserialize the result.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError>
    where
        Self: Sized,
    {
        let resp = self.send(JsonRpcRequest::next(method, params)).await?;
        let result = resp.into_result().map_err(|err| {
            let err = TransportError::Rpc(err);
            if err.is_rate_limited() {
                TransportError::RateLimited {
                    provider: self.url().to_string(),
                    message: err.message(),
                }
            } else {
                err
            }
        })?;
        serde_json::from_value(result).map_err(TransportError::Deserialization)
    }
}
