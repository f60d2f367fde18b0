use async_trait::async_trait;
use chrono::Utc;
use client::prompb;
use reqwest::Client;

use super::{ERROR_FIELD, Sink, SinkError, numeric_fields, tags};
use crate::config::probe_config::SinkConfig;
use crate::http_probe::result::ProbeResult;

pub mod client;

const URL_LABEL: &str = "url";
const ERROR_PHASE_LABEL: &str = "error_phase";
const AVAILABILITY_SUFFIX: &str = "availability";

/// Writes results to a Mimir (or any Prometheus remote write) endpoint.
/// String fields cannot be stored as samples: headers are dropped and the error becomes a
/// 0/1 series labelled with the failing phase.
pub struct MimirSink {
    client: Client,
    endpoint: String,
    tenant: Option<String>,
    metric_prefix: String,
}

impl MimirSink {
    pub fn new(client: Client, config: &SinkConfig) -> Self {
        MimirSink {
            client,
            endpoint: config.endpoint.clone(),
            tenant: (!config.org.is_empty()).then(|| config.org.clone()),
            metric_prefix: config.measurement.clone(),
        }
    }
}

#[async_trait]
impl Sink for MimirSink {
    async fn write(&self, result: &ProbeResult, tag_prefix: &str) -> Result<(), SinkError> {
        let metrics = create_probe_metrics(
            result,
            &self.metric_prefix,
            tag_prefix,
            Utc::now().timestamp_millis(),
        );
        client::send_to_mimir(&self.client, &self.endpoint, self.tenant.as_deref(), metrics).await
    }
}

/// Creates the series for one probe result, all sharing the same labels and timestamp.
/// The series are:
///    - `<metric>_<prefix><phase>` for every timing field, in milliseconds.
///    - `<metric>_<prefix>availability`: the HTTP status code, 0 when no response was received.
///    - `<metric>_<prefix>error`: 1.0 when the probe failed, 0.0 otherwise.
pub fn create_probe_metrics(
    result: &ProbeResult,
    metric_prefix: &str,
    tag_prefix: &str,
    timestamp_ms: i64,
) -> Vec<prompb::TimeSeries> {
    let tag_names: Vec<(String, &str)> = tags(result)
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| (sanitize(&format!("{tag_prefix}{name}")), value))
        .collect();
    let mut labels: Vec<(&str, &str)> = tag_names
        .iter()
        .map(|(name, value)| (name.as_str(), *value))
        .collect();
    labels.push((URL_LABEL, result.url.as_str()));

    let metric_name = |field: &str| sanitize(&format!("{metric_prefix}_{tag_prefix}{field}"));
    let mut metrics = Vec::new();

    for (field, value) in numeric_fields(result) {
        metrics.push(client::create_time_series(
            &metric_name(field),
            &labels,
            value,
            timestamp_ms,
        ));
    }

    metrics.push(client::create_time_series(
        &metric_name(AVAILABILITY_SUFFIX),
        &labels,
        result.availability.map(f64::from).unwrap_or(0.0),
        timestamp_ms,
    ));

    let mut error_labels = labels.clone();
    let phase = result
        .error
        .as_ref()
        .map(|e| e.phase().map(|p| p.as_str()).unwrap_or("unknown"));
    if let Some(phase) = phase {
        error_labels.push((ERROR_PHASE_LABEL, phase));
    }
    metrics.push(client::create_time_series(
        &metric_name(ERROR_FIELD),
        &error_labels,
        if result.error.is_some() { 1.0 } else { 0.0 },
        timestamp_ms,
    ));

    metrics
}

/// Map a name onto the Prometheus metric and label charset `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn sanitize(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }
    sanitized
}
