pub mod influx;
pub mod mimir;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::probe_config::{SinkConfig, SinkKind};
use crate::http_probe::result::ProbeResult;

pub const DNS_LOOKUP_FIELD: &str = "dnslookup";
pub const TCP_CONNECTION_FIELD: &str = "tcpconnection";
pub const TLS_HANDSHAKE_FIELD: &str = "tlshandshake";
pub const SERVER_PROCESSING_FIELD: &str = "serverprocessing";
pub const CONTENT_TRANSFER_FIELD: &str = "contenttransfer";
pub const TOTAL_FIELD: &str = "total";
pub const AVAILABILITY_FIELD: &str = "availability";
pub const HEADERS_FIELD: &str = "headers";
pub const ERROR_FIELD: &str = "error";
pub const CDN_TAG: &str = "cdn";
pub const WORKFLOW_TAG: &str = "workflow";
pub const CONTENT_TYPE_TAG: &str = "contenttype";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to sink failed")]
    Request(#[from] reqwest::Error),

    #[error("sink rejected write: {status} - {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to encode write request")]
    Encode(#[from] prost::EncodeError),

    #[error("failed to compress write request")]
    Compress(#[from] snap::Error),

    #[error("invalid header value")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// A destination for probe results. Each call persists one result as a single point.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, result: &ProbeResult, tag_prefix: &str) -> Result<(), SinkError>;
}

/// The numeric fields of a result in write order, paired with their unprefixed names.
pub fn numeric_fields(result: &ProbeResult) -> [(&'static str, f64); 6] {
    [
        (DNS_LOOKUP_FIELD, result.dns_lookup_ms),
        (TCP_CONNECTION_FIELD, result.tcp_connect_ms),
        (TLS_HANDSHAKE_FIELD, result.tls_handshake_ms),
        (SERVER_PROCESSING_FIELD, result.server_processing_ms),
        (CONTENT_TRANSFER_FIELD, result.content_transfer_ms),
        (TOTAL_FIELD, result.total_ms),
    ]
}

/// The tags of a result paired with their unprefixed names.
pub fn tags(result: &ProbeResult) -> [(&'static str, &str); 3] {
    [
        (CDN_TAG, result.cdn.as_str()),
        (WORKFLOW_TAG, result.workflow.as_str()),
        (CONTENT_TYPE_TAG, result.content_type.as_str()),
    ]
}

/// Build the sink described by `config`, or `None` when writing is disabled.
pub fn build_sink(config: &SinkConfig) -> Option<Box<dyn Sink>> {
    if !config.enabled {
        return None;
    }
    let client = reqwest::Client::new();
    Some(match config.kind {
        SinkKind::Influx => Box::new(influx::InfluxSink::new(client, config)),
        SinkKind::Mimir => Box::new(mimir::MimirSink::new(client, config)),
    })
}
