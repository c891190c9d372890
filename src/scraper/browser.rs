//! Headless Chromium rendering through the DevTools protocol

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use crate::errors::FetchError;
use crate::traits::PageRenderer;

const SCROLL_SETTLE: Duration = Duration::from_millis(1_000);

/// Upper bound on `Browser::close` after the page deadline has passed.
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Owns the CDP handler task and aborts it when dropped, so a cancelled
/// render does not leave the loop running. Dropping `Browser` kills the
/// Chromium child in the same situation.
struct EventLoop(JoinHandle<()>);

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Renders each page in a fresh headless Chromium instance, so no cookies or
/// session state carry over between portals.
pub struct ChromiumRenderer {
    user_agent: String,
    /// Wait after navigation for asynchronously injected prices
    settle: Duration,
    page_timeout: Duration,
}

impl ChromiumRenderer {
    pub fn new(user_agent: impl Into<String>, settle: Duration, page_timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            settle,
            page_timeout,
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, FetchError> {
        BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={}", self.user_agent))
            .window_size(1280, 900)
            .request_timeout(self.page_timeout)
            .build()
            .map_err(FetchError::Browser)
    }

    async fn load(&self, page: &Page, url: &str) -> Result<String, FetchError> {
        page.goto(url).await?;
        page.wait_for_navigation().await?;

        tokio::time::sleep(self.settle).await;
        page.evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await?;
        tokio::time::sleep(SCROLL_SETTLE).await;

        Ok(page.content().await?)
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &str) -> Result<String, FetchError> {
        // Launch, navigation and capture share one deadline
        let deadline = Instant::now() + self.page_timeout;

        let (mut browser, mut handler) =
            match timeout_at(deadline, Browser::launch(self.browser_config()?)).await {
                Ok(launched) => launched?,
                Err(_) => return Err(FetchError::Timeout),
            };

        let _events = EventLoop(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        }));

        let rendered = match timeout_at(deadline, async {
            let page = browser.new_page("about:blank").await?;
            self.load(&page, url).await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };

        match timeout(CLOSE_GRACE, browser.close()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Failed to close browser cleanly: {}", e),
            Err(_) => warn!("Browser did not close within {:?}, killing it", CLOSE_GRACE),
        }

        debug!(url, ok = rendered.is_ok(), "Render finished");
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropping_the_event_loop_stops_its_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let events = EventLoop(tokio::spawn(async move {
            let _held = tx;
            std::future::pending::<()>().await;
        }));

        drop(events);

        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn cancelled_owner_still_stops_the_event_loop() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let owner = async move {
            let _events = EventLoop(tokio::spawn(async move {
                let _held = tx;
                std::future::pending::<()>().await;
            }));
            std::future::pending::<()>().await;
        };

        assert!(timeout(Duration::from_millis(50), owner).await.is_err());
        assert!(rx.await.is_err());
    }
}
