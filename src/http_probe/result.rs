use std::time::Duration;

use serde::{Serialize, Serializer};
use url::Url;

use super::error::ProbeError;
use super::report;

/// A resource to check, tagged with the CDN serving it and the workflow it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub url: Url,
    pub cdn: String,
    pub workflow: String,
}

/// The outcome of one probe. Either every measurement is populated and `error` is `None`,
/// or `error` is set and all measurements are left at their defaults.
#[derive(Debug, Default, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub dns_lookup_ms: f64,
    pub tcp_connect_ms: f64,
    pub tls_handshake_ms: f64,
    pub server_processing_ms: f64,
    pub content_transfer_ms: f64,
    pub total_ms: f64,
    /// HTTP status code, `None` when no response was received.
    pub availability: Option<u16>,
    pub cdn: String,
    pub workflow: String,
    pub content_type: String,
    pub headers: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    /// An error-only result for `resource`.
    pub fn failed(resource: &Resource, error: ProbeError) -> Self {
        ProbeResult {
            url: resource.url.to_string(),
            cdn: resource.cdn.clone(),
            workflow: resource.workflow.clone(),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| report(e))
    }
}

pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn serialize_error<S: Serializer>(error: &Option<ProbeError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&report(e)),
        None => s.serialize_none(),
    }
}
