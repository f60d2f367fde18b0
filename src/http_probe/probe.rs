use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_native_tls::TlsConnector as TokioTlsConnector;
use url::{Host, Url};

use super::dns::DnsResolver;
use super::prelude::*;
use super::result::millis;
use super::wire::{ResponseHead, build_request, drain_body, headers_json, read_head, write_request};
use crate::config::ConfigError;
use crate::config::app_config::{setup_resolver, setup_tls_connector};
use crate::config::probe_config::{ProbeSettings, TransferMode};

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

struct ResponseSummary {
    status: u16,
    content_type: String,
    headers: String,
}

impl From<&ResponseHead> for ResponseSummary {
    fn from(head: &ResponseHead) -> Self {
        ResponseSummary {
            status: head.status,
            content_type: head.header("content-type").unwrap_or_default().to_string(),
            headers: headers_json(head.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))),
        }
    }
}

/// Checks a single resource, timing every phase of the exchange on its own connection.
/// Shared read-only between the probe tasks of a round.
pub struct Prober {
    resolver: DnsResolver,
    connector: TokioTlsConnector,
    client: reqwest::Client,
    timeout: Duration,
    user_agent: String,
    transfer_mode: TransferMode,
}

impl Prober {
    pub fn new(
        resolver: DnsResolver,
        connector: TokioTlsConnector,
        settings: &ProbeSettings,
    ) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(settings.timeout_ms);

        // Only used for the second request transfer mode. It must reach the origin directly
        // on a fresh connection, like the timed exchange.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .pool_max_idle_per_host(0)
            .no_proxy()
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(Prober {
            resolver,
            connector,
            client,
            timeout,
            user_agent: settings.user_agent.clone(),
            transfer_mode: settings.transfer_mode,
        })
    }

    pub fn from_settings(settings: &ProbeSettings) -> Result<Self, ConfigError> {
        let timeout = Duration::from_millis(settings.timeout_ms);
        let resolver = setup_resolver(&settings.dns_servers, timeout)?;
        let connector = setup_tls_connector()?;
        Ok(Prober::new(resolver, connector, settings)?)
    }

    /// Probe `resource` once. Never fails: errors end up in `ProbeResult::error`.
    pub async fn probe(&self, resource: &Resource) -> ProbeResult {
        match self.measure(resource).await {
            Ok(result) => result,
            Err(error) => {
                log::debug!("Probe of {} failed: {}", resource.url, error);
                ProbeResult::failed(resource, error)
            }
        }
    }

    async fn measure(&self, resource: &Resource) -> Result<ProbeResult, ProbeError> {
        let url = &resource.url;
        let host = url.host().ok_or_else(|| invalid_url(url, "missing host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| invalid_url(url, "no port for scheme"))?;

        let start = Instant::now();
        let deadline = start + self.timeout;

        let addrs = self.within(deadline, Phase::Dns, self.resolve(&host, port)).await?;
        let dns_lookup = start.elapsed();

        let tcp_start = Instant::now();
        let tcp = self.within(deadline, Phase::TcpConnect, connect(&addrs)).await?;
        let tcp_connect = tcp_start.elapsed();

        let mut tls_handshake = Duration::ZERO;
        let mut stream: Box<dyn Connection> = if url.scheme() == "https" {
            let tls_start = Instant::now();
            let server_name = match &host {
                Host::Domain(domain) => domain.to_string(),
                Host::Ipv4(ip) => ip.to_string(),
                Host::Ipv6(ip) => ip.to_string(),
            };
            let tls = self
                .within(deadline, Phase::TlsHandshake, async {
                    self.connector
                        .connect(&server_name, tcp)
                        .await
                        .map_err(|source| ProbeError::Handshake {
                            host: server_name.clone(),
                            source,
                        })
                })
                .await?;
            tls_handshake = tls_start.elapsed();
            Box::new(tls)
        } else {
            Box::new(tcp)
        };

        let server_start = Instant::now();
        let request = build_request(url, &self.user_agent);
        let head = self
            .within(deadline, Phase::ServerProcessing, async {
                write_request(&mut stream, &request)
                    .await
                    .map_err(ProbeError::RequestWrite)?;
                read_head(&mut stream).await.map_err(ProbeError::ResponseRead)
            })
            .await?;
        let server_processing = server_start.elapsed();

        let transfer_start = Instant::now();
        let response = match self.transfer_mode {
            TransferMode::SameConnection => {
                self.within(deadline, Phase::ContentTransfer, async {
                    drain_body(&mut stream, &head)
                        .await
                        .map_err(ProbeError::BodyRead)
                })
                .await?;
                ResponseSummary::from(&head)
            }
            TransferMode::SecondRequest => {
                drop(stream);
                self.within(deadline, Phase::ContentTransfer, self.fetch(url))
                    .await?
            }
        };
        let content_transfer = transfer_start.elapsed();

        Ok(ProbeResult {
            url: url.to_string(),
            dns_lookup_ms: millis(dns_lookup),
            tcp_connect_ms: millis(tcp_connect),
            tls_handshake_ms: millis(tls_handshake),
            server_processing_ms: millis(server_processing),
            content_transfer_ms: millis(content_transfer),
            total_ms: millis(start.elapsed()),
            availability: Some(response.status),
            cdn: resource.cdn.clone(),
            workflow: resource.workflow.clone(),
            content_type: response.content_type,
            headers: response.headers,
            error: None,
        })
    }

    /// Run one phase against the probe's overall deadline.
    async fn within<T>(
        &self,
        deadline: Instant,
        phase: Phase,
        fut: impl Future<Output = Result<T, ProbeError>>,
    ) -> Result<T, ProbeError> {
        match timeout_at(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                phase,
                after: self.timeout,
            }),
        }
    }

    async fn resolve(&self, host: &Host<&str>, port: u16) -> Result<Vec<SocketAddr>, ProbeError> {
        match host {
            Host::Domain(domain) => {
                self.resolver
                    .lookup(domain, port)
                    .await
                    .map_err(|source| ProbeError::Resolution {
                        host: domain.to_string(),
                        source,
                    })
            }
            Host::Ipv4(ip) => Ok(vec![SocketAddr::new((*ip).into(), port)]),
            Host::Ipv6(ip) => Ok(vec![SocketAddr::new((*ip).into(), port)]),
        }
    }

    /// Fetch `url` again through the HTTP client and drain its body.
    async fn fetch(&self, url: &Url) -> Result<ResponseSummary, ProbeError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ProbeError::BodyRead(e.into()))?;

        let summary = ResponseSummary {
            status: response.status().as_u16(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            headers: headers_json(
                response
                    .headers()
                    .iter()
                    .filter_map(|(k, v)| Some((k.as_str(), v.to_str().ok()?))),
            ),
        };

        response
            .bytes()
            .await
            .map_err(|e| ProbeError::BodyRead(e.into()))?;

        Ok(summary)
    }
}

/// Connect to the first address that accepts.
async fn connect(addrs: &[SocketAddr]) -> Result<TcpStream, ProbeError> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(*addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_error = Some((*addr, e)),
        }
    }

    let (addr, source) = last_error.unwrap_or_else(|| {
        (
            SocketAddr::from(([0, 0, 0, 0], 0)),
            io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to"),
        )
    });
    Err(ProbeError::Connect {
        addr: addr.to_string(),
        source,
    })
}

fn invalid_url(url: &Url, reason: &str) -> ProbeError {
    ProbeError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}
