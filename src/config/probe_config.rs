use serde::Deserialize;

pub const DEFAULT_USER_AGENT: &str = "cdnprobe/1.0 Performance Metrics Agent";

/// The campaign configuration for the probe.
/// Describes how many virtual users to simulate, which resources each of them checks
/// and where the results are forwarded to.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Prepended to every field and tag name written to the sink.
    #[serde(default)]
    pub tag_prefix: String,

    /// The number of virtual users, each of them runs exactly one round.
    pub num_users: usize,

    /// Print every result as a JSON line on stdout.
    #[serde(default)]
    pub debug: bool,

    /// Upper bound on probes running at the same time within a round.
    /// `0` removes the bound.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub sink: SinkConfig,

    pub resources: Vec<ResourceConfig>,
}

/// A resource checked once per virtual user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceConfig {
    /// The http or https URL to probe.
    pub url: String,

    /// The CDN serving the resource, used as a tag.
    #[serde(default)]
    pub cdn: String,

    /// The workflow the resource belongs to, used as a tag.
    #[serde(default)]
    pub workflow: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSettings {
    /// Deadline for a single probe, covering every phase including DNS.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub transfer_mode: TransferMode,

    /// Name servers to resolve with. The system resolver is used when empty.
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            transfer_mode: TransferMode::default(),
            dns_servers: Vec::new(),
        }
    }
}

/// How the content transfer phase is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Drain the body of the response whose head was timed, on the same connection.
    #[default]
    SameConnection,
    /// Fetch the resource again through a regular HTTP client and drain that body.
    SecondRequest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Influx,
    Mimir,
}

/// Connection parameters for the time-series sink.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub kind: SinkKind,

    #[serde(default)]
    pub endpoint: String,

    /// API token for InfluxDB. Not used by Mimir.
    #[serde(default)]
    pub api_key: String,

    /// The InfluxDB organisation, or the Mimir tenant sent as 'X-Scope-OrgID'.
    #[serde(default)]
    pub org: String,

    #[serde(default)]
    pub bucket: String,

    /// The InfluxDB measurement, or the metric name prefix for Mimir.
    #[serde(default)]
    pub measurement: String,
}

fn default_max_concurrent_probes() -> usize {
    32
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
