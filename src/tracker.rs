use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

use crate::catalog::{Catalog, Product};
use crate::fetcher::{FetchError, PageFetcher};
use crate::notifier::{NotifyError, Notifier};
use crate::price::{PriceError, PriceQuote};
use crate::recorder::{RecordError, Recorder};

/// Anything that keeps a single product from being priced. Never aborts a run.
#[derive(Debug, Error)]
pub enum ProductError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Price(#[from] PriceError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub summary_line: String,
    pub succeeded: usize,
    pub failed: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
}

pub struct PriceTracker<F, N> {
    catalog: Catalog,
    fetcher: F,
    notifier: N,
}

impl<F: PageFetcher, N: Notifier> PriceTracker<F, N> {
    pub fn new(catalog: Catalog, fetcher: F, notifier: N) -> Self {
        Self {
            catalog,
            fetcher,
            notifier,
        }
    }

    async fn observe(&self, product: &Product) -> Result<PriceQuote, ProductError> {
        let raw_text = self.fetcher.fetch_price_text(product).await?;
        Ok(PriceQuote::from_raw(raw_text, product.pack_count)?)
    }

    /// Visits every product in catalog order, records each outcome, then
    /// sends any price alerts. Only recording failures end the run early.
    #[instrument(skip_all, fields(products = self.catalog.len(), timestamp = recorder.timestamp()))]
    pub async fn run(&self, mut recorder: Recorder) -> Result<RunReport, RecordError> {
        let start = Instant::now();
        let mut succeeded = 0;
        let mut failed = 0;
        let mut triggered = Vec::new();

        for product in self.catalog.iter() {
            match self.observe(product).await {
                Ok(quote) => {
                    recorder.record_success(product, &quote)?;
                    succeeded += 1;
                    if product.alert_triggered(quote.price) {
                        tracing::info!(product = %product.name, price = quote.price, "Price alert triggered");
                        triggered.push((product, quote.price));
                    }
                }
                Err(e) => {
                    tracing::error!(product = %product.name, error = %e, "Error fetching product");
                    recorder.record_failure(product, &e.to_string());
                    failed += 1;
                }
            }
        }

        let mut alerts_sent = 0;
        let mut alerts_failed = 0;
        for (product, price) in triggered {
            match self.notifier.notify(product, price).await {
                Ok(()) => alerts_sent += 1,
                Err(NotifyError::Disabled) => {
                    tracing::warn!(product = %product.name, price, "Price alert not sent, notifications disabled");
                    alerts_failed += 1;
                }
                Err(e) => {
                    tracing::error!(product = %product.name, error = %e, "Error sending price alert");
                    alerts_failed += 1;
                }
            }
        }

        let summary_line = recorder.finish()?;

        tracing::info!(
            succeeded,
            failed,
            alerts_sent,
            alerts_failed,
            duration = ?start.elapsed(),
            "Run completed"
        );

        Ok(RunReport {
            summary_line,
            succeeded,
            failed,
            alerts_sent,
            alerts_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PriceAlert;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const HEADER: &str = "Fecha,Producto,Numero de Pañales,Precio,Precio por unidad\r\n";
    const TS: &str = "07/03/2025, 09:05:02";

    /// Serves canned page text per product name.
    struct StubFetcher {
        pages: HashMap<String, Result<String, String>>,
        visited: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn new(pages: &[(&str, Result<&str, &str>)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(name, page)| {
                        let page = page.map(str::to_string).map_err(str::to_string);
                        (name.to_string(), page)
                    })
                    .collect(),
                visited: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch_price_text(&self, product: &Product) -> Result<String, FetchError> {
            self.visited.lock().unwrap().push(product.name.clone());
            match self.pages.get(&product.name) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(reason)) => Err(FetchError::Navigation {
                    url: product.url.clone(),
                    reason: reason.clone(),
                }),
                None => Err(FetchError::PriceNotFound(".a-price-whole".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, u64)>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, product: &Product, price: u64) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((product.name.clone(), price));
            if self.fail {
                Err(NotifyError::Disabled)
            } else {
                Ok(())
            }
        }
    }

    fn product(name: &str, pack_count: u32, threshold: Option<u64>) -> Product {
        Product {
            name: name.to_string(),
            pack_count,
            url: format!("https://www.amazon.es/dp/{}", name.replace(' ', "-")),
            alert: threshold.map(|threshold| PriceAlert { threshold }),
        }
    }

    struct Files {
        _dir: TempDir,
        csv: std::path::PathBuf,
        log: std::path::PathBuf,
    }

    impl Files {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            Self {
                csv: dir.path().join("frontend/public/diapers.csv"),
                log: dir.path().join("diapers.txt"),
                _dir: dir,
            }
        }

        fn recorder(&self) -> Recorder {
            Recorder::open(&self.csv, &self.log, TS.to_string()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_single_product_run() {
        let files = Files::new();
        let catalog = Catalog::new(vec![product("A", 2, None)]).unwrap();
        let fetcher = StubFetcher::new(&[("A", Ok("100"))]);
        let tracker = PriceTracker::new(catalog, fetcher, RecordingNotifier::default());

        let report = tracker.run(files.recorder()).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(
            report.summary_line,
            format!("{} A (2 pañales): 100 por unidad : 50.000\n", TS)
        );
        assert_eq!(
            fs::read_to_string(&files.csv).unwrap(),
            format!("{}\"{}\",\"A\",2,100,50.000\r\n", HEADER, TS)
        );
        assert_eq!(fs::read_to_string(&files.log).unwrap(), report.summary_line);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_run_or_write_csv() {
        let files = Files::new();
        let catalog = Catalog::new(vec![
            product("B", 1, None),
            product("C", 4, None),
            product("D", 3, None),
        ])
        .unwrap();
        let fetcher = StubFetcher::new(&[
            ("B", Err("net::ERR_TIMED_OUT")),
            ("C", Ok("10")),
            ("D", Ok("Currently unavailable")),
        ]);
        let tracker = PriceTracker::new(catalog, fetcher, RecordingNotifier::default());

        let report = tracker.run(files.recorder()).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(
            report.summary_line,
            format!(
                "{} B: Error C (4 pañales): 10 por unidad : 2.500 D: Error\n",
                TS
            )
        );

        let csv = fs::read_to_string(&files.csv).unwrap();
        assert_eq!(csv, format!("{}\"{}\",\"C\",4,10,2.500\r\n", HEADER, TS));
        assert!(!csv.contains("\"B\""));
        assert!(!csv.contains("\"D\""));
    }

    #[tokio::test]
    async fn test_products_visited_in_catalog_order() {
        let files = Files::new();
        let catalog = Catalog::new(vec![
            product("Z", 1, None),
            product("A", 1, None),
            product("M", 1, None),
        ])
        .unwrap();
        let fetcher = StubFetcher::new(&[("Z", Ok("1")), ("A", Err("boom")), ("M", Ok("3"))]);
        let tracker = PriceTracker::new(catalog, fetcher, RecordingNotifier::default());

        tracker.run(files.recorder()).await.unwrap();

        let visited = tracker.fetcher.visited.lock().unwrap().clone();
        assert_eq!(visited, vec!["Z", "A", "M"]);
    }

    #[tokio::test]
    async fn test_alert_fires_at_or_below_threshold() {
        let files = Files::new();
        let catalog = Catalog::new(vec![
            product("Dodot talla 1", 224, None),
            product("Nido capazo bebe", 1, Some(170)),
        ])
        .unwrap();
        let fetcher = StubFetcher::new(&[
            ("Dodot talla 1", Ok("100")),
            ("Nido capazo bebe", Ok("165,")),
        ]);
        let tracker = PriceTracker::new(catalog, fetcher, RecordingNotifier::default());

        let report = tracker.run(files.recorder()).await.unwrap();

        assert_eq!(report.alerts_sent, 1);
        let sent = tracker.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("Nido capazo bebe".to_string(), 165)]);
    }

    #[tokio::test]
    async fn test_alert_not_fired_above_threshold() {
        let files = Files::new();
        let catalog = Catalog::new(vec![product("Nido capazo bebe", 1, Some(170))]).unwrap();
        let fetcher = StubFetcher::new(&[("Nido capazo bebe", Ok("175"))]);
        let tracker = PriceTracker::new(catalog, fetcher, RecordingNotifier::default());

        let report = tracker.run(files.recorder()).await.unwrap();

        assert_eq!(report.alerts_sent, 0);
        assert!(tracker.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alert_failure_does_not_affect_records() {
        let files = Files::new();
        let catalog = Catalog::new(vec![product("Nido capazo bebe", 1, Some(170))]).unwrap();
        let fetcher = StubFetcher::new(&[("Nido capazo bebe", Ok("150"))]);
        let notifier = RecordingNotifier {
            fail: true,
            ..Default::default()
        };
        let tracker = PriceTracker::new(catalog, fetcher, notifier);

        let report = tracker.run(files.recorder()).await.unwrap();

        assert_eq!(report.alerts_sent, 0);
        assert_eq!(report.alerts_failed, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            fs::read_to_string(&files.csv).unwrap(),
            format!("{}\"{}\",\"Nido capazo bebe\",1,150,150.000\r\n", HEADER, TS)
        );
    }

    #[tokio::test]
    async fn test_empty_catalog_logs_timestamp_only() {
        let files = Files::new();
        let catalog = Catalog::new(Vec::new()).unwrap();
        let tracker = PriceTracker::new(catalog, StubFetcher::new(&[]), RecordingNotifier::default());

        let report = tracker.run(files.recorder()).await.unwrap();

        assert_eq!(report.summary_line, format!("{}\n", TS));
        assert_eq!(fs::read_to_string(&files.csv).unwrap(), HEADER);
    }
}
