use async_trait::async_trait;
use chrono::Utc;
use reqwest::{
    Client,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue},
};

use super::{
    AVAILABILITY_FIELD, ERROR_FIELD, HEADERS_FIELD, Sink, SinkError, numeric_fields, tags,
};
use crate::config::probe_config::SinkConfig;
use crate::http_probe::result::ProbeResult;

/// Writes results to the InfluxDB v2 write API as line protocol.
pub struct InfluxSink {
    client: Client,
    write_url: String,
    org: String,
    bucket: String,
    api_key: String,
    measurement: String,
}

impl InfluxSink {
    pub fn new(client: Client, config: &SinkConfig) -> Self {
        InfluxSink {
            client,
            write_url: format!("{}/api/v2/write", config.endpoint.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            api_key: config.api_key.clone(),
            measurement: config.measurement.clone(),
        }
    }
}

#[async_trait]
impl Sink for InfluxSink {
    async fn write(&self, result: &ProbeResult, tag_prefix: &str) -> Result<(), SinkError> {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let line = encode_line(&self.measurement, tag_prefix, result, timestamp);

        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Token {}", self.api_key))?,
            )
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected { status, body });
        }
        Ok(())
    }
}

/// Encode one result as a line protocol point.
/// Tags with an empty value are left out, line protocol does not allow them.
pub fn encode_line(
    measurement: &str,
    tag_prefix: &str,
    result: &ProbeResult,
    timestamp_ns: i64,
) -> String {
    let mut line = escape(measurement, &[',', ' ']);

    for (name, value) in tags(result) {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(tag_prefix, name));
        line.push('=');
        line.push_str(&escape(value, &[',', '=', ' ']));
    }

    let mut fields: Vec<String> = numeric_fields(result)
        .into_iter()
        .map(|(name, value)| format!("{}={}", escape_key(tag_prefix, name), value))
        .collect();
    fields.push(format!(
        "{}={}i",
        escape_key(tag_prefix, AVAILABILITY_FIELD),
        result.availability.unwrap_or(0)
    ));
    fields.push(format!(
        "{}={}",
        escape_key(tag_prefix, HEADERS_FIELD),
        quote(&result.headers)
    ));
    fields.push(format!(
        "{}={}",
        escape_key(tag_prefix, ERROR_FIELD),
        quote(&result.error_message().unwrap_or_default())
    ));

    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&timestamp_ns.to_string());
    line
}

fn escape_key(prefix: &str, name: &str) -> String {
    escape(&format!("{prefix}{name}"), &[',', '=', ' '])
}

fn escape(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            c if special.contains(&c) => {
                escaped.push('\\');
                escaped.push(c);
            }
            c => escaped.push(c),
        }
    }
    escaped
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
