pub mod app_config;
pub mod probe_config;

use thiserror::Error;

/// Configuration problems. Any of these aborts the process before probing starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in config file")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid resource url `{url}`: {reason}")]
    InvalidResource { url: String, reason: String },

    #[error("invalid DNS host `{host}`")]
    InvalidDnsHost {
        host: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("probe.timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("sink is enabled but `{0}` is not set")]
    MissingSinkField(&'static str),

    #[error("failed to build TLS connector")]
    Tls(#[from] native_tls::Error),

    #[error("failed to build HTTP client")]
    HttpClient(#[from] reqwest::Error),
}
