//! Bounded, deduplicating harvest of a virtualized social feed.
//!
//! The target feed mounts and unmounts items as it scrolls, re-presents
//! already-seen items on re-render, and actively fingerprints automation.
//! The modules here turn that surface into an ordered, capped collection
//! of structured records that is always persisted, even when the operator
//! closes the window mid-run.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`browser`] | Own the browser process; navigation and readiness waits |
//! | [`feed`] | Resolve the scrollable region; issue scroll commands |
//! | [`extract`] | Pull structured fields out of mounted feed items |
//! | [`dedup`] | At-most-once admission per body fingerprint |
//! | [`session`] | Lifecycle phases and the admitted record list |
//! | [`harvester`] | The capture state machine and its guaranteed flush |
//!
//! # Lifecycle
//!
//! ```text
//! Init -> Loading -> Scraping -> {TargetReached | Terminated | Exhausted}
//!      -> Flushing -> Done
//! ```
//!
//! Failures before any feed content exists abort the session with an
//! error and nothing is written. Every later stopping condition flushes
//! whatever was captured before the browser is released.

use std::time::Duration;

pub mod browser;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod feed;
pub mod harvester;
pub mod session;

pub use error::HarvestError;
pub use harvester::Harvester;
pub use session::{HarvestOutcome, StopReason};

/// Tuning knobs for one harvest session.
///
/// The defaults match the observed timing behavior of the target feed:
/// lazy content settles within a couple of seconds of a scroll, and the
/// initial page can take minutes on a cold session.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// The feed view to harvest.
    pub feed_url: String,
    /// Number of unique records to capture before stopping.
    pub target_count: usize,
    /// Pause after each scroll advance for lazy content to mount.
    pub settle_delay: Duration,
    /// Steady-state scroll step as a fraction of the viewport height.
    pub scroll_step_fraction: f64,
    /// Bounded wait for initial page readiness.
    pub nav_timeout: Duration,
    /// Consecutive zero-admission passes before the feed counts as
    /// exhausted.
    pub max_idle_passes: u32,
}

impl HarvestConfig {
    pub fn new(feed_url: impl Into<String>, target_count: usize) -> Self {
        Self {
            feed_url: feed_url.into(),
            target_count,
            settle_delay: Duration::from_millis(2500),
            scroll_step_fraction: 0.7,
            nav_timeout: Duration::from_secs(120),
            max_idle_passes: 8,
        }
    }
}
