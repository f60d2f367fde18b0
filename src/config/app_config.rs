use std::{
    net::{IpAddr, SocketAddr},
    path::Path,
    time::Duration,
};
use std::env;

use tokio_native_tls::TlsConnector as TokioTlsConnector;
use trust_dns_resolver::{
    TokioAsyncResolver,
    config::{NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts},
};
use url::Url;

use super::ConfigError;
use super::probe_config::{Config, ResourceConfig, SinkKind};
use crate::http_probe::dns::DnsResolver;
use crate::http_probe::result::Resource;

pub struct AppConfig {
    pub config: Config,
    pub resources: Vec<Resource>,
}

/// Load the application configuration from a YAML file and environment variables
/// This function reads the configuration file specified by the `CONFIG_FILE` environment variable,
/// parses it into a `Config` struct, and overrides the sink endpoint, sink key and DNS hosts
/// with `SINK_ENDPOINT`, `SINK_API_KEY` and `DNS_HOSTS` when those are set.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let config_file_location =
        env::var("CONFIG_FILE").unwrap_or_else(|_| "config.yml".to_string());
    load_config_from(config_file_location, |key| env::var(key).ok())
}

pub fn load_config_from(
    path: impl AsRef<Path>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut config: Config = serde_yaml::from_str(&config_str)?;

    if let Some(endpoint) = env_lookup("SINK_ENDPOINT") {
        config.sink.endpoint = endpoint;
    }
    if let Some(key) = env_lookup("SINK_API_KEY") {
        config.sink.api_key = key;
    }
    if let Some(dns_hosts) = env_lookup("DNS_HOSTS") {
        config.probe.dns_servers = dns_hosts
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    from_config(config)
}

/// Validate a parsed `Config` and resolve its resources.
pub fn from_config(config: Config) -> Result<AppConfig, ConfigError> {
    validate(&config)?;

    let resources = config
        .resources
        .iter()
        .map(parse_resource)
        .collect::<Result<Vec<_>, _>>()?;

    log::info!(
        "Loaded {} resources for {} virtual users",
        resources.len(),
        config.num_users
    );
    if config.probe.dns_servers.is_empty() {
        log::info!("Using system DNS resolver");
    } else {
        log::info!("Using DNS hosts: {:?}", config.probe.dns_servers);
    }
    if config.sink.enabled {
        log::info!("Using {:?} sink at {}", config.sink.kind, config.sink.endpoint);
    }

    Ok(AppConfig { config, resources })
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.probe.timeout_ms == 0 {
        return Err(ConfigError::ZeroTimeout);
    }

    for host in &config.probe.dns_servers {
        parse_dns_host(host)?;
    }

    let sink = &config.sink;
    if sink.enabled {
        if sink.endpoint.is_empty() {
            return Err(ConfigError::MissingSinkField("sink.endpoint"));
        }
        if sink.measurement.is_empty() {
            return Err(ConfigError::MissingSinkField("sink.measurement"));
        }
        if sink.kind == SinkKind::Influx {
            if sink.org.is_empty() {
                return Err(ConfigError::MissingSinkField("sink.org"));
            }
            if sink.bucket.is_empty() {
                return Err(ConfigError::MissingSinkField("sink.bucket"));
            }
        }
    }

    Ok(())
}

fn parse_resource(resource: &ResourceConfig) -> Result<Resource, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidResource {
        url: resource.url.clone(),
        reason,
    };

    let url = Url::parse(&resource.url).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if url.host().is_none() {
        return Err(invalid("missing host".to_string()));
    }

    Ok(Resource {
        url,
        cdn: resource.cdn.clone(),
        workflow: resource.workflow.clone(),
    })
}

/// Setup a TLS connector that accepts invalid certificates and hostnames.
/// The probe measures reachability and latency, not trust.
pub fn setup_tls_connector() -> Result<TokioTlsConnector, native_tls::Error> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(true);
    builder.danger_accept_invalid_hostnames(true);
    let connector = builder.build()?;
    Ok(TokioTlsConnector::from(connector))
}

const DNS_PORT: u16 = 53;

/// Parse a DNS host given as `ip` or `ip:port` (`[v6]:port` for IPv6), defaulting to port 53.
fn parse_dns_host(host: &str) -> Result<SocketAddr, ConfigError> {
    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }
    host.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|source| ConfigError::InvalidDnsHost {
            host: host.to_string(),
            source,
        })
}

/// Setup the DNS resolver for the probe.
/// With no DNS hosts the system resolver is used. Otherwise this creates a `TokioAsyncResolver`
/// configured with the specified DNS hosts, 2 attempts and caching disabled, so every lookup is
/// measured against the name servers. A lookup that runs out of time is cut off by the probe
/// deadline, so each attempt is allowed slightly longer than the probe timeout.
/// # Arguments
///     * `dns_hosts` - DNS hosts as IPs or socket addresses (e.g., "1.1.1.1", "10.0.0.2:5353")
///     * `timeout` - The probe timeout
pub fn setup_resolver(dns_hosts: &[String], timeout: Duration) -> Result<DnsResolver, ConfigError> {
    if dns_hosts.is_empty() {
        return Ok(DnsResolver::System);
    }

    let mut opts = ResolverOpts::default();
    opts.attempts = 2;
    opts.timeout = timeout + Duration::from_millis(250);
    opts.cache_size = 0;

    let mut name_servers = NameServerConfigGroup::new();

    for host in dns_hosts {
        name_servers.push(NameServerConfig {
            socket_addr: parse_dns_host(host)?,
            protocol: Protocol::Tcp, // TCP is more reliable then UDP for DNS queries
            tls_dns_name: None,
            trust_negative_responses: false,
            bind_addr: None,
        });
    }

    let resolver_config = ResolverConfig::from_parts(None, vec![], name_servers);
    Ok(DnsResolver::NameServers(TokioAsyncResolver::tokio(
        resolver_config,
        opts,
    )))
}
