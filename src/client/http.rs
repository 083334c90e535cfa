//! Blocking reqwest implementation of [`CrmClient`].

use super::{ApiEnvelope, CrmClient, CrmError, CrmResult};
use crate::config::CrmSettings;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client for the CRM API.
///
/// Requests carry `Accept: application/json`, the configured token in
/// `Authorization` and the caller's `Trace-Id`. Report runs are
/// synchronous, so the blocking client is intentional; the per-request
/// timeout is the only deadline the engine propagates.
pub struct HttpCrmClient {
    base_url: String,
    token: String,
    http: Client,
}

impl HttpCrmClient {
    pub fn new(settings: &CrmSettings) -> CrmResult<Self> {
        if settings.base_url.trim().is_empty() {
            return Err(CrmError::NotConfigured("base_url is empty".into()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CrmError::NotConfigured(e.to_string()))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            http,
        })
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

impl CrmClient for HttpCrmClient {
    fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        trace_id: &str,
    ) -> CrmResult<ApiEnvelope> {
        if self.token.is_empty() {
            return Err(CrmError::NotConfigured("token is empty".into()));
        }

        let url = self.url_for(endpoint);
        debug!(endpoint, trace_id, "crm request");

        let response = self
            .http
            .get(&url)
            .query(query)
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, &self.token)
            .header("Trace-Id", trace_id)
            .send()
            .map_err(|e| {
                warn!(endpoint, trace_id, error = %e, "crm unreachable");
                CrmError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| CrmError::Unavailable(e.to_string()))?;

        if status.is_success() {
            if body.is_empty() {
                return Ok(ApiEnvelope::default());
            }
            return serde_json::from_str(&body).map_err(|e| {
                warn!(endpoint, trace_id, error = %e, "crm body is not a valid envelope");
                CrmError::InvalidResponse(e.to_string())
            });
        }

        let payload: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        warn!(
            endpoint,
            trace_id,
            status = status.as_u16(),
            "crm responded with an error status"
        );

        // 408/504 surface from some gateways instead of a transport timeout.
        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            return Err(CrmError::Unavailable(format!("upstream status {status}")));
        }

        Err(CrmError::RequestFailed {
            status: status.as_u16(),
            payload,
        })
    }
}
