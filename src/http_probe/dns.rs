use std::net::{IpAddr, SocketAddr};

use trust_dns_resolver::TokioAsyncResolver;

use super::error::BoxError;

/// Resolves probe hostnames, either through the operating system or against pinned name servers.
pub enum DnsResolver {
    System,
    NameServers(TokioAsyncResolver),
}

impl DnsResolver {
    /// Resolve `host` to the socket addresses to connect to on `port`.
    pub async fn lookup(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>, BoxError> {
        let addrs: Vec<SocketAddr> = match self {
            DnsResolver::System => tokio::net::lookup_host((host, port)).await?.collect(),
            DnsResolver::NameServers(resolver) => resolver
                .lookup_ip(host)
                .await?
                .iter()
                .map(|ip: IpAddr| SocketAddr::new(ip, port))
                .collect(),
        };

        if addrs.is_empty() {
            return Err(format!("no addresses found for {host}").into());
        }
        Ok(addrs)
    }
}
