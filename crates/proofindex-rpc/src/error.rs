//! Transport-level error types.

use thiserror::Error;

use crate::request::JsonRpcError;

/// JSON-RPC codes providers use for throttling.
const RATE_LIMIT_CODES: &[i64] = &[429, -32005, -32029];

/// Phrases providers put in throttling messages.
const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "compute units",
    "request limit",
    "throughput",
];

/// Errors that can occur during an RPC call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, reset, non-2xx status, ...).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The provider throttled the request; back off before retrying.
    #[error("Rate limit exceeded (provider: {provider}): {message}")]
    RateLimited { provider: String, message: String },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The node answered but the requested object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` for connection-level faults the HTTP client retries on its own.
    ///
    /// Throttling is deliberately excluded: the log fetcher owns that backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// Returns `true` if the provider throttled this request.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Rpc(err) => {
                RATE_LIMIT_CODES.contains(&err.code) || mentions_rate_limit(&err.message)
            }
            Self::Http(msg) => msg.starts_with("HTTP 429") || mentions_rate_limit(msg),
            _ => false,
        }
    }

    /// Provider-facing message text (used to mine range hints from errors).
    pub fn message(&self) -> String {
        match self {
            Self::Rpc(err) => match &err.data {
                Some(data) => format!("{} {}", err.message, data),
                None => err.message.clone(),
            },
            Self::RateLimited { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(code: i64, message: &str) -> TransportError {
        TransportError::Rpc(JsonRpcError {
            code,
            message: message.into(),
            data: None,
        })
    }

    #[test]
    fn rate_limit_by_code_and_message() {
        assert!(rpc(429, "slow down").is_rate_limited());
        assert!(rpc(-32000, "Your app has exceeded its compute units per second capacity").is_rate_limited());
        assert!(TransportError::Http("HTTP 429: Too Many Requests".into()).is_rate_limited());
        assert!(!rpc(-32000, "execution reverted").is_rate_limited());
    }

    #[test]
    fn throttling_is_not_transport_retryable() {
        let err = TransportError::RateLimited {
            provider: "http://node".into(),
            message: "429".into(),
        };
        assert!(err.is_rate_limited());
        assert!(!err.is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
    }

    #[test]
    fn message_includes_error_data() {
        let err = TransportError::Rpc(JsonRpcError {
            code: -32602,
            message: "query exceeds max block range".into(),
            data: Some(serde_json::json!("limit 2000")),
        });
        assert!(err.message().contains("limit 2000"));
    }
}
