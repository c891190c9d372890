pub mod browser;
pub mod robots;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::FetchError;
use crate::extractor::PriceExtractor;
use crate::models::{PortalId, PortalResult};
use crate::traits::{CrawlPolicy, PageRenderer};

/// Final markup of a page after client side scripts ran.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub url: String,
    pub html: String,
}

/// Loads portal pages: crawl permission first, then a bounded browser render.
pub struct PageFetcher {
    policy: Arc<dyn CrawlPolicy>,
    renderer: Arc<dyn PageRenderer>,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(
        policy: Arc<dyn CrawlPolicy>,
        renderer: Arc<dyn PageRenderer>,
        timeout: Duration,
    ) -> Self {
        Self {
            policy,
            renderer,
            timeout,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<RenderedDocument, FetchError> {
        if !self.policy.allows(url).await {
            return Err(FetchError::RobotsDisallowed);
        }

        // Never hand back a half rendered page
        let html = tokio::time::timeout(self.timeout, self.renderer.render(url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        Ok(RenderedDocument {
            url: url.to_string(),
            html,
        })
    }
}

/// Fetch + extract for one portal page.
pub struct PortalScraper {
    fetcher: PageFetcher,
    extractor: PriceExtractor,
}

impl PortalScraper {
    pub fn new(fetcher: PageFetcher, extractor: PriceExtractor) -> Self {
        Self { fetcher, extractor }
    }

    /// Scrape one page. Every fault ends up in `PortalResult::Failed`.
    pub async fn scrape(&self, event: &str, portal: &PortalId, url: &str) -> PortalResult {
        info!("[{} ({})] Checking robots.txt -> {}", event, portal, url);

        let document = match self.fetcher.fetch(url).await {
            Ok(document) => document,
            Err(e) => {
                warn!("[{} ({})] {}", event, portal, e);
                return PortalResult::Failed(e.into());
            }
        };

        debug!(
            "[{} ({})] Rendered {} ({} bytes)",
            event,
            portal,
            document.url,
            document.html.len()
        );

        let samples = self.extractor.extract_from_html(&document.html, portal);
        if samples.is_empty() {
            info!("[{} ({})] No prices found in rendered page", event, portal);
            PortalResult::Empty
        } else {
            let amounts: Vec<String> = samples.iter().map(|s| s.amount.to_string()).collect();
            info!(
                "[{} ({})] Prices found: {}",
                event,
                portal,
                amounts.join(", ")
            );
            PortalResult::Ok(samples)
        }
    }
}
