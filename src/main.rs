use anyhow::Context;

pub mod campaign;
use campaign::ProbeCampaign;
pub mod config;
use config::app_config::load_config;
pub mod http_probe;
pub mod sink;
pub mod virtual_user;

#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app_config = load_config().context("Failed to load configuration")?;
    let campaign =
        ProbeCampaign::from_app_config(app_config).context("Failed to set up probe campaign")?;

    let summary = campaign.run().await;
    log::info!(
        "Campaign finished: {} rounds, {} results, {} failed probes, {} failed writes",
        summary.rounds,
        summary.results,
        summary.failed_probes,
        summary.failed_writes
    );

    Ok(())
}
