//! Error taxonomy for the harvest session.
//!
//! Only failures that pre-date any feed content surface to the caller:
//! navigation and readiness timeouts, and a feed that never mounted an
//! item. Everything later is absorbed into a best-effort partial result
//! by the harvester. Field-level extraction failures never become errors
//! at all; they degrade to empty values inside [`super::extract`].

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// The browser process could not be configured or started.
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// The feed never reached its ready condition. Fatal; no partial
    /// data exists yet.
    #[error("navigation to {url} did not reach readiness within {waited:?}")]
    Navigation { url: String, waited: Duration },

    /// A bounded selector wait expired.
    #[error("no element matched `{selector}` within {waited:?}")]
    ElementNotFound { selector: String, waited: Duration },

    /// No feed item ever mounted, so no scroll target could be resolved.
    #[error("no feed content mounted; nothing to harvest")]
    NoContent,

    /// Browser protocol failure.
    #[error("browser protocol error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    /// An injected script returned something undecodable.
    #[error("script result decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Filesystem failure while persisting results.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The tabular sink rejected the write.
    #[error("sheet write failed: {0}")]
    Sink(#[from] csv::Error),
}
