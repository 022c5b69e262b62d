use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use scraper::{Html, Selector};
use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

use crate::catalog::Product;
use crate::config::BrowserSettings;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to launch browser: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("could not read page content: {0}")]
    Content(String),
    #[error("no element matches price selector '{0}'")]
    PriceNotFound(String),
}

#[derive(Debug, Error)]
#[error("invalid price selector '{selector}': {reason}")]
pub struct SelectorError {
    selector: String,
    reason: String,
}

/// CSS selector for the element holding the displayed price.
#[derive(Debug, Clone)]
pub struct PriceSelector {
    css: String,
    selector: Selector,
}

impl PriceSelector {
    pub fn parse(css: &str) -> Result<Self, SelectorError> {
        let selector = Selector::parse(css).map_err(|e| SelectorError {
            selector: css.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            css: css.to_string(),
            selector,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.css
    }

    /// Text content of the first matching element, untrimmed.
    pub fn extract(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        document
            .select(&self.selector)
            .next()
            .map(|el| el.text().collect::<String>())
    }
}

/// Loads a product page and returns the raw price text shown on it.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_price_text(&self, product: &Product) -> Result<String, FetchError>;
}

const DEFAULT_DOM_TIMEOUT: Duration = Duration::from_secs(30);
const DOM_POLL_INTERVAL: Duration = Duration::from_millis(100);

// Set on the outgoing page; a fresh document never carries it, so a page
// that still reports it is the previous product's.
const MARK_STALE_DOCUMENT: &str = "window.__priceTrackerStale = true";
const DOCUMENT_STATE: &str =
    "window.__priceTrackerStale === true ? 'stale' : document.readyState";

/// `document.readyState` leaves `loading` once DOMContentLoaded has fired.
fn dom_content_loaded(state: &str) -> bool {
    matches!(state, "interactive" | "complete")
}

/// A single headless Chrome instance with one tab, reused for every product.
pub struct ChromeFetcher {
    // keeps the browser process alive for as long as the tab is used
    _browser: Browser,
    tab: Arc<Tab>,
    selector: PriceSelector,
    dom_timeout: Duration,
}

impl ChromeFetcher {
    #[instrument(skip(settings, selector), fields(selector = selector.as_str()))]
    pub fn launch(
        settings: &BrowserSettings,
        selector: PriceSelector,
        sandbox: bool,
    ) -> Result<Self, FetchError> {
        tracing::info!(headless = settings.headless, sandbox, "Launching browser");

        let mut args = Vec::new();
        if !sandbox {
            args.push(OsStr::new("--disable-setuid-sandbox"));
        }

        let options = LaunchOptions::default_builder()
            .headless(settings.headless)
            .sandbox(sandbox)
            .args(args)
            .idle_browser_timeout(Duration::from_secs(settings.idle_timeout_secs))
            .build()
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        let browser = Browser::new(options).map_err(|e| FetchError::Launch(format!("{:#}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| FetchError::Launch(format!("{:#}", e)))?;

        let dom_timeout = match settings.navigation_timeout_secs {
            Some(secs) => {
                let timeout = Duration::from_secs(secs);
                tab.set_default_timeout(timeout);
                timeout
            }
            None => DEFAULT_DOM_TIMEOUT,
        };

        Ok(Self {
            _browser: browser,
            tab,
            selector,
            dom_timeout,
        })
    }

    fn document_state(&self) -> Option<String> {
        // evaluation fails while the old execution context is torn down
        let result = self.tab.evaluate(DOCUMENT_STATE, false).ok()?;
        result.value?.as_str().map(str::to_string)
    }

    /// Blocks until the new document has been parsed, without waiting for
    /// images, scripts or network traffic to settle.
    fn wait_for_dom_content(&self, product: &Product) -> Result<(), FetchError> {
        let deadline = Instant::now() + self.dom_timeout;
        loop {
            if let Some(state) = self.document_state() {
                if dom_content_loaded(&state) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(FetchError::Navigation {
                    url: product.url.clone(),
                    reason: format!("DOMContentLoaded not reached within {:?}", self.dom_timeout),
                });
            }
            thread::sleep(DOM_POLL_INTERVAL);
        }
    }

    fn load_price_text(&self, product: &Product) -> Result<String, FetchError> {
        let navigation_failed = |e: anyhow::Error| FetchError::Navigation {
            url: product.url.clone(),
            reason: format!("{:#}", e),
        };

        self.tab
            .evaluate(MARK_STALE_DOCUMENT, false)
            .map_err(navigation_failed)?;
        self.tab
            .navigate_to(&product.url)
            .map_err(navigation_failed)?;
        self.wait_for_dom_content(product)?;

        let html = self
            .tab
            .get_content()
            .map_err(|e| FetchError::Content(format!("{:#}", e)))?;

        self.selector
            .extract(&html)
            .ok_or_else(|| FetchError::PriceNotFound(self.selector.as_str().to_string()))
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    #[instrument(skip(self, product), fields(product = %product.name))]
    async fn fetch_price_text(&self, product: &Product) -> Result<String, FetchError> {
        // headless_chrome is synchronous; keep the worker thread usable meanwhile
        tokio::task::block_in_place(|| self.load_price_text(product))
    }
}
