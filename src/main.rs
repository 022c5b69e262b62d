mod catalog;
mod config;
mod fetcher;
mod notifier;
mod price;
mod recorder;
mod tracker;

use anyhow::Context;
use chrono::Local;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use crate::catalog::Catalog;
use crate::config::AppSettings;
use crate::fetcher::{ChromeFetcher, PriceSelector};
use crate::notifier::TelegramNotifier;
use crate::recorder::Recorder;
use crate::tracker::PriceTracker;

fn init_tracing() {
    // stdout is reserved for the run summary line
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = AppSettings::load().context("failed to load settings")?;
    let catalog = Catalog::new(settings.products.clone()).context("invalid product catalog")?;
    if catalog.is_empty() {
        tracing::warn!("Product catalog is empty, only the timestamp will be logged");
    }
    for product in catalog.alerting() {
        tracing::info!(product = %product.name, alert = ?product.alert, "Price alert configured");
    }

    let selector = PriceSelector::parse(&settings.price_selector)?;
    let sandbox = !config::running_in_ci();
    let fetcher = ChromeFetcher::launch(&settings.browser, selector, sandbox)
        .context("failed to start browser")?;

    let timestamp = recorder::run_timestamp(&Local::now());
    let recorder = Recorder::open(&settings.csv_path, &settings.log_path, timestamp)
        .context("failed to prepare CSV file")?;

    let notifier = TelegramNotifier::from_settings(&settings.telegram)?;

    tracing::info!(products = catalog.len(), "Starting price check");
    let tracker = PriceTracker::new(catalog, fetcher, notifier);
    let report = tracker.run(recorder).await.context("failed to record results")?;

    print!("{}", report.summary_line);
    Ok(())
}
