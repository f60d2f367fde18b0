use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::ConfigError;
use crate::config::app_config::AppConfig;
use crate::config::probe_config::Config;
use crate::http_probe::prelude::*;
use crate::http_probe::report;
use crate::sink::{Sink, build_sink};
use crate::virtual_user::{run_round, worker_pool};

fn to_fixed_width(input: &str, width: usize) -> String {
    use unicode_truncate::UnicodeTruncateStr;

    let (truncated, _) = input.unicode_truncate(width);
    format!("{:<width$}", truncated, width = width)
}

/// Counts of what a campaign did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CampaignSummary {
    pub rounds: usize,
    pub results: usize,
    pub failed_probes: usize,
    pub failed_writes: usize,
}

/// Runs one round per virtual user, one after the other, and reports every result.
pub struct ProbeCampaign {
    prober: Arc<Prober>,
    resources: Arc<[Resource]>,
    pool: Arc<Semaphore>,
    sink: Option<Box<dyn Sink>>,
    num_users: usize,
    debug: bool,
    tag_prefix: String,
    cdn_width: usize,
}

impl ProbeCampaign {
    pub fn new(
        prober: Arc<Prober>,
        resources: Vec<Resource>,
        config: &Config,
        sink: Option<Box<dyn Sink>>,
    ) -> Self {
        let cdn_width = resources.iter().map(|r| r.cdn.len()).max().unwrap_or(10);
        ProbeCampaign {
            prober,
            pool: worker_pool(config.max_concurrent_probes, resources.len()),
            resources: resources.into(),
            sink,
            num_users: config.num_users,
            debug: config.debug,
            tag_prefix: config.tag_prefix.clone(),
            cdn_width,
        }
    }

    /// Build the prober and sink described by a loaded configuration.
    pub fn from_app_config(app: AppConfig) -> Result<Self, ConfigError> {
        let prober = Prober::from_settings(&app.config.probe)?;
        let sink = build_sink(&app.config.sink);
        Ok(ProbeCampaign::new(
            Arc::new(prober),
            app.resources,
            &app.config,
            sink,
        ))
    }

    pub async fn run(&self) -> CampaignSummary {
        let mut summary = CampaignSummary::default();

        for user in 1..=self.num_users {
            let results = run_round(
                self.prober.clone(),
                self.resources.clone(),
                self.pool.clone(),
            )
            .await;
            log::info!(
                "Virtual user {user}/{} completed {} probes",
                self.num_users,
                results.len()
            );

            summary.rounds += 1;
            for result in results {
                summary.results += 1;
                if !result.is_success() {
                    summary.failed_probes += 1;
                }
                if !self.report(&result).await {
                    summary.failed_writes += 1;
                }
            }
        }

        summary
    }

    /// Log, print and forward one result. Returns false when the sink write failed.
    async fn report(&self, result: &ProbeResult) -> bool {
        let cdn = to_fixed_width(&result.cdn, self.cdn_width);
        match &result.error {
            None => log::info!(
                "[{cdn}] ✅ URL: {}, Status: {:?}, Total: {:.2}ms, DNS: {:.2}ms, TCP: {:.2}ms, TLS: {:.2}ms, Server: {:.2}ms, Transfer: {:.2}ms",
                result.url,
                result.availability,
                result.total_ms,
                result.dns_lookup_ms,
                result.tcp_connect_ms,
                result.tls_handshake_ms,
                result.server_processing_ms,
                result.content_transfer_ms,
            ),
            Some(e) => log::warn!("[{cdn}] ❌ Probe error for {}: {}", result.url, report(e)),
        }

        if self.debug {
            match serde_json::to_string(result) {
                Ok(json) => println!("{json}"),
                Err(e) => log::error!("In debug: failed to serialize result: {e}"),
            }
        }

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.write(result, &self.tag_prefix).await {
                log::error!("[{cdn}] Failed to write result for {}: {}", result.url, report(&e));
                return false;
            }
        }
        true
    }
}
