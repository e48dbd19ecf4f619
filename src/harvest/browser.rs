//! Chromium lifecycle management for a harvest run.
//!
//! Wraps a headful [`Browser`] plus the background task that drains its
//! CDP event stream. The feed site profiles visitors aggressively, so
//! the launch configuration pins a desktop user agent and disables the
//! automation fingerprint before the first byte of page JS runs.

use std::time::{Duration, Instant};

use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::error::HarvestError;

/// Desktop user agent presented to the feed site. Shared with the image
/// fetcher so every outbound surface tells the same story.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const WINDOW_WIDTH: u32 = 1400;
const WINDOW_HEIGHT: u32 = 1000;

/// A live Chromium instance and its event pump.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    closed: bool,
}

impl BrowserSession {
    /// Launch a visible Chromium with the anti-profiling configuration.
    #[instrument(level = "info", skip_all)]
    pub async fn launch() -> Result<Self, HarvestError> {
        let config = BrowserConfig::builder()
            .with_head()
            .window_size(WINDOW_WIDTH, WINDOW_HEIGHT)
            .args(launch_args())
            .build()
            .map_err(HarvestError::Launch)?;

        let (browser, mut handler) = Browser::launch(config).await?;

        // The handler stream must be polled for the CDP connection to
        // make progress; it ends when the browser goes away.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!("Browser launched");
        Ok(Self {
            browser,
            handler_task,
            closed: false,
        })
    }

    /// Open `url` in a fresh tab and wait until `ready_selector` is
    /// present. Both navigation and readiness share the same deadline
    /// semantics: missing either one is a [`HarvestError::Navigation`].
    #[instrument(level = "info", skip(self))]
    pub async fn open(
        &self,
        url: &str,
        ready_selector: &str,
        wait: Duration,
    ) -> Result<Page, HarvestError> {
        let page = self.browser.new_page("about:blank").await?;

        match timeout(wait, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Navigation failed");
                return Err(HarvestError::Navigation {
                    url: url.to_string(),
                    waited: wait,
                });
            }
            Err(_) => {
                warn!("Navigation timed out");
                return Err(HarvestError::Navigation {
                    url: url.to_string(),
                    waited: wait,
                });
            }
        }

        wait_for_selector(&page, ready_selector, wait)
            .await
            .map_err(|_| HarvestError::Navigation {
                url: url.to_string(),
                waited: wait,
            })?;

        info!("Page ready");
        Ok(page)
    }

    /// Whether the browser still has any open page. A user closing the
    /// window mid-run shows up here as false.
    pub async fn is_alive(&self) -> bool {
        match self.browser.pages().await {
            Ok(pages) => !pages.is_empty(),
            Err(e) => {
                debug!(error = %e, "Liveness probe failed");
                false
            }
        }
    }

    /// Shut the browser down and stop the event pump. Errors here are
    /// logged and swallowed; teardown must not mask a run's real result.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.browser.close().await {
            debug!(error = %e, "Browser close request failed");
        }
        if let Err(e) = self.browser.wait().await {
            debug!(error = %e, "Browser did not exit cleanly");
        }
        self.handler_task.abort();
        info!("Browser closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

/// Poll until `selector` matches an element or the deadline passes.
pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    wait: Duration,
) -> Result<Element, HarvestError> {
    let deadline = Instant::now() + wait;
    loop {
        match page.find_element(selector).await {
            Ok(element) => return Ok(element),
            Err(_) if Instant::now() < deadline => sleep(POLL_INTERVAL).await,
            Err(_) => {
                return Err(HarvestError::ElementNotFound {
                    selector: selector.to_string(),
                    waited: wait,
                });
            }
        }
    }
}

fn launch_args() -> Vec<String> {
    vec![
        format!("--user-agent={USER_AGENT}"),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--start-maximized".to_string(),
        "--disable-infobars".to_string(),
        "--no-first-run".to_string(),
        "--lang=en-US".to_string(),
    ]
}
