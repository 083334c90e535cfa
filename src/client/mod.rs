//! Upstream CRM client abstraction.
//!
//! The engine only ever talks to the CRM through the [`CrmClient`] trait:
//! a GET against a JSON endpoint returning the standard
//! `{data, meta, links}` envelope, or a typed failure. The production
//! implementation lives in [`http`]; tests substitute the trait with a
//! canned-envelope mock.

mod http;

pub use http::HttpCrmClient;

use crate::pipeline::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Endpoint for the paginated order search most reports consume.
pub const ORDERS_SEARCH: &str = "orders/search";

/// Result type for CRM operations.
pub type CrmResult<T> = Result<T, CrmError>;

/// Errors raised by the CRM collaborator.
///
/// `Unavailable` and `RequestFailed` are deliberately distinct: the former
/// is a transport-level failure callers may retry, the latter carries the
/// upstream status and payload and must never be read as "no data".
#[derive(Debug, Error)]
pub enum CrmError {
    /// Connection failure or timeout. Recoverable; callers may retry.
    #[error("CRM is unreachable: {0}")]
    Unavailable(String),

    /// The CRM answered with a non-2xx status.
    #[error("CRM responded with status {status}")]
    RequestFailed {
        status: u16,
        /// Decoded response payload, `Null` when the body was empty or not
        /// JSON.
        payload: Value,
    },

    /// The response body could not be decoded into the expected envelope.
    #[error("invalid CRM response: {0}")]
    InvalidResponse(String),

    /// Client-side configuration is missing (token, base URL).
    #[error("CRM client is not configured: {0}")]
    NotConfigured(String),
}

impl CrmError {
    /// Transport-level failures are worth retrying; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CrmError::Unavailable(_))
    }
}

/// Pagination links returned by the CRM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    /// Absolute or relative URL of the next page, absent on the last one.
    #[serde(default)]
    pub next: Option<String>,
}

/// The CRM's standard JSON envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub data: Vec<Record>,
    #[serde(default)]
    pub meta: serde_json::Map<String, Value>,
    #[serde(default)]
    pub links: Links,
}

/// HTTP access to the upstream CRM API.
///
/// Implementations own authentication, headers and timeouts; callers only
/// see envelopes and [`CrmError`]s.
pub trait CrmClient: Send + Sync {
    /// Issue a GET with query parameters against an endpoint.
    fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        trace_id: &str,
    ) -> CrmResult<ApiEnvelope>;

    /// Convenience shape bound to the order-search endpoint.
    fn search_orders(&self, query: &[(String, String)], trace_id: &str) -> CrmResult<ApiEnvelope> {
        self.get(ORDERS_SEARCH, query, trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_tolerates_missing_fields() {
        let envelope: ApiEnvelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.data.is_empty());
        assert!(envelope.links.next.is_none());

        let envelope: ApiEnvelope =
            serde_json::from_str(r#"{"data": [{"uuid": "x"}], "links": {"next": null}}"#).unwrap();
        assert_eq!(envelope.data.len(), 1);
        assert!(envelope.links.next.is_none());
    }

    #[test]
    fn unavailable_is_retryable_request_failure_is_not() {
        assert!(CrmError::Unavailable("t/o".into()).is_retryable());
        assert!(!CrmError::RequestFailed {
            status: 502,
            payload: Value::Null
        }
        .is_retryable());
    }
}
