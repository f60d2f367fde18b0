pub mod prompb {
    //! The subset of the Prometheus remote write protocol used by the probe.

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        #[prost(double, tag = "1")]
        pub value: f64,
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }
}

use prompb::{Label, Sample, TimeSeries, WriteRequest};
use reqwest::{
    Client,
    header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use snap::raw::Encoder;

use crate::sink::SinkError;

/// Sends Prometheus metrics to a Mimir remote write endpoint.
///
/// # Arguments
///
/// * `client` - The HTTP client to send with.
/// * `mimir_endpoint` - The base URL of your Mimir instance (e.g., "http://localhost:9009").
/// * `tenant_id` - An optional tenant ID string for multi-tenant Mimir setups.
/// * `metrics` - A vector of `TimeSeries` to send.
pub async fn send_to_mimir(
    client: &Client,
    mimir_endpoint: &str,
    tenant_id: Option<&str>,
    metrics: Vec<TimeSeries>,
) -> Result<(), SinkError> {
    if metrics.is_empty() {
        log::warn!("No metrics to send.");
        return Ok(());
    }

    let write_request = WriteRequest {
        timeseries: metrics,
    };

    let mut buf = Vec::new();
    prost::Message::encode(&write_request, &mut buf)?;

    let mut encoder = Encoder::new();
    let compressed_data = encoder.compress_vec(&buf)?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("snappy"));
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-protobuf"),
    );
    headers.insert(
        "X-Prometheus-Remote-Write-Version",
        HeaderValue::from_static("0.1.0"),
    );
    if let Some(id) = tenant_id {
        headers.insert("X-Scope-OrgID", HeaderValue::from_str(id)?);
    }

    let response = client
        .post(format!("{}/api/v1/push", mimir_endpoint.trim_end_matches('/'))) // Mimir's remote write endpoint
        .headers(headers)
        .body(compressed_data)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(SinkError::Rejected { status, body });
    }
    Ok(())
}

/// Creates a `TimeSeries` metric with the given metric name, labels, value and timestamp.
/// # Arguments
///     * `metric_name` - The name of the metric (e.g., "cdn_probe_dnslookup").
///     * `labels` - A slice of tuples representing labels for the metric (e.g., &[("cdn", "akamai")]).
///     * `value` - The value of the metric.
///     * `timestamp_ms` - The sample timestamp in milliseconds.
pub fn create_time_series(
    metric_name: &str,
    labels: &[(&str, &str)],
    value: f64,
    timestamp_ms: i64,
) -> TimeSeries {
    let mut all_labels = Vec::with_capacity(labels.len() + 1);
    all_labels.push(Label {
        name: "__name__".to_string(),
        value: metric_name.to_string(),
    });

    for (name, val) in labels {
        all_labels.push(Label {
            name: name.to_string(),
            value: val.to_string(),
        });
    }
    // remote write requires labels sorted by name
    all_labels.sort_by(|a, b| a.name.cmp(&b.name));

    TimeSeries {
        labels: all_labels,
        samples: vec![Sample {
            value,
            timestamp: timestamp_ms,
        }],
    }
}
