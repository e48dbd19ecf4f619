//! The harvesting loop: load the feed, scrape until a stop condition,
//! flush whatever was captured.
//!
//! The loop itself is written against the [`FeedDriver`] trait so its
//! stop conditions, capacity handling, and dedup behavior are testable
//! with a scripted feed. [`BrowserFeed`] is the production impl backed
//! by a live page.
//!
//! Flush discipline: once the feed has loaded, every exit path writes
//! the sheet, including a zero-record run and a browser that vanished
//! mid-loop. Only failures before any content was reachable abort
//! without a sheet.

use std::time::Duration;

use chromiumoxide::Page;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::browser::{wait_for_selector, BrowserSession};
use super::error::HarvestError;
use super::extract::{self, ITEM_SELECTOR};
use super::feed::{self, Advance, ScrollTarget};
use super::session::{HarvestOutcome, HarvestSession, Phase, StopReason};
use super::HarvestConfig;
use crate::models::TweetRecord;
use crate::outputs::sheet;
use crate::utils::truncate_for_log;

/// The trending grid that hosts the feed.
const READY_SELECTOR: &str = "div.jf-element.grid";
/// Tile that switches the grid to the news column.
const NEWS_TILE_SELECTOR: &str = r#"img[src*="news_image"]"#;

const GRID_SETTLE: Duration = Duration::from_secs(2);
const NEWS_TILE_WAIT: Duration = Duration::from_secs(10);
const FIRST_ITEM_WAIT: Duration = Duration::from_secs(15);

/// One pass of feed interaction, abstracted away from the live browser.
pub trait FeedDriver {
    /// Whether the feed surface still exists.
    async fn is_alive(&self) -> bool;
    /// Extract everything currently rendered.
    async fn harvest_pass(&mut self) -> Result<Vec<TweetRecord>, HarvestError>;
    /// Move the feed so new content mounts.
    async fn advance(&mut self, motion: Advance) -> Result<(), HarvestError>;
}

/// Live driver over an open page and its located scroll target.
struct BrowserFeed<'a> {
    browser: &'a BrowserSession,
    page: &'a Page,
    target: &'a ScrollTarget,
}

impl FeedDriver for BrowserFeed<'_> {
    async fn is_alive(&self) -> bool {
        self.browser.is_alive().await
    }

    async fn harvest_pass(&mut self) -> Result<Vec<TweetRecord>, HarvestError> {
        extract::visible_records(self.page).await
    }

    async fn advance(&mut self, motion: Advance) -> Result<(), HarvestError> {
        feed::advance(self.page, Some(self.target), motion).await
    }
}

/// Runs one end-to-end harvest per [`HarvestConfig`].
pub struct Harvester {
    config: HarvestConfig,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> Self {
        Self { config }
    }

    /// Execute the full lifecycle and leave a CSV sheet under `out_dir`.
    #[instrument(level = "info", skip_all, fields(target = self.config.target_count))]
    pub async fn run(&self, out_dir: &str) -> Result<HarvestOutcome, HarvestError> {
        let mut session = HarvestSession::new(self.config.target_count);
        session.set_phase(Phase::Loading);

        let mut browser = BrowserSession::launch().await?;

        let (page, target) = match self.load_feed(&browser).await {
            Ok(loaded) => loaded,
            Err(e) => {
                browser.close().await;
                return Err(e);
            }
        };

        session.set_phase(Phase::Scraping);
        let step = feed::step_for(&target, self.config.scroll_step_fraction);
        let mut feed_driver = BrowserFeed {
            browser: &browser,
            page: &page,
            target: &target,
        };

        let stop = drive(
            &mut feed_driver,
            &mut session,
            step,
            self.config.settle_delay,
            self.config.max_idle_passes,
        )
        .await;
        drop(feed_driver);

        session.set_phase(match stop {
            StopReason::TargetReached => Phase::TargetReached,
            StopReason::Terminated(_) => Phase::Terminated,
            StopReason::Exhausted => Phase::Exhausted,
        });

        session.set_phase(Phase::Flushing);
        let flushed = sheet::write_records(session.records(), out_dir);
        browser.close().await;
        let sheet_path = flushed?;

        session.set_phase(Phase::Done);
        info!(
            records = session.len(),
            stop = %stop,
            sheet = %sheet_path.display(),
            "Harvest complete"
        );
        Ok(HarvestOutcome {
            sheet_path,
            record_count: session.len(),
            stop,
        })
    }

    /// Navigate to the feed and prepare it for scraping: wait for the
    /// grid, switch to the news column, confirm posts render, then jump
    /// to the bottom once so the virtualizer starts mounting content.
    async fn load_feed(
        &self,
        browser: &BrowserSession,
    ) -> Result<(Page, ScrollTarget), HarvestError> {
        let page = browser
            .open(&self.config.feed_url, READY_SELECTOR, self.config.nav_timeout)
            .await?;
        sleep(GRID_SETTLE).await;

        self.click_news_tile(&page).await;

        wait_for_selector(&page, ITEM_SELECTOR, FIRST_ITEM_WAIT)
            .await
            .map_err(|_| {
                warn!("No posts rendered after load");
                HarvestError::NoContent
            })?;

        feed::advance(&page, None, Advance::ToBottom).await?;
        sleep(self.config.settle_delay).await;

        let target = feed::locate(&page).await?;
        info!(target = ?target, "Feed loaded");
        Ok((page, target))
    }

    /// Best effort: the default grid still carries posts, so a missing
    /// or unclickable tile downgrades to a warning.
    async fn click_news_tile(&self, page: &Page) {
        let tile = match wait_for_selector(page, NEWS_TILE_SELECTOR, NEWS_TILE_WAIT).await {
            Ok(tile) => tile,
            Err(_) => {
                warn!("News tile not found, continuing with the default grid");
                return;
            }
        };

        let js = r#"function() {
            const btn = this.closest('button');
            if (btn) {
                btn.click();
                return true;
            }
            return false;
        }"#;
        match tile.call_js_fn(js, false).await {
            Ok(ret) if ret.result.value.as_ref().and_then(|v| v.as_bool()) == Some(true) => {
                info!("Switched to the news column");
                sleep(self.config.settle_delay).await;
            }
            _ => warn!("News tile not clickable, continuing with the default grid"),
        }
    }
}

/// The scraping loop proper. Absorbs mid-loop failures into a
/// [`StopReason::Terminated`] so the caller can still flush.
async fn drive<F: FeedDriver>(
    feed: &mut F,
    session: &mut HarvestSession,
    step: i64,
    settle: Duration,
    max_idle_passes: u32,
) -> StopReason {
    loop {
        if !feed.is_alive().await {
            info!("Feed surface went away");
            return StopReason::Terminated("browser window closed".to_string());
        }

        let batch = match feed.harvest_pass().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Extraction pass failed");
                return StopReason::Terminated(e.to_string());
            }
        };

        let mut admitted = 0;
        for record in batch {
            let preview = truncate_for_log(&record.body, 60);
            if session.admit(record) {
                admitted += 1;
                info!(
                    captured = session.len(),
                    target = session.target(),
                    %preview,
                    "Captured post"
                );
            }
            if session.is_full() {
                break;
            }
        }
        debug!(admitted, total = session.len(), "Pass complete");

        if session.is_full() {
            info!("Target met");
            return StopReason::TargetReached;
        }

        let idle = session.note_pass(admitted);
        if idle >= max_idle_passes {
            warn!(idle_passes = idle, "Feed stopped yielding new posts");
            return StopReason::Exhausted;
        }

        if let Err(e) = feed.advance(Advance::By(step)).await {
            warn!(error = %e, "Scroll failed");
            return StopReason::Terminated(e.to_string());
        }
        sleep(settle).await;
    }
}
