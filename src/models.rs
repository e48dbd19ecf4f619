//! Data models shared across the pipeline stages.
//!
//! This module defines the core data structures:
//! - [`TweetRecord`] / [`MediaRef`]: one harvested feed post and its media
//! - [`TrendTerm`]: a rising search term from the warehouse
//! - [`NewsArticle`]: a headline from the news coverage search
//! - [`CuratedTrend`]: a distilled design brief for one trend
//! - [`AssetDirective`] / [`AssetDecision`]: machine-readable art direction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A media reference attached to a harvested post.
///
/// Images are plain URLs; video thumbnails are tagged so downstream
/// consumers can tell a poster frame apart from a still image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRef {
    /// An embedded still image URL.
    Image(String),
    /// A video poster (thumbnail) URL.
    Poster(String),
}

impl MediaRef {
    /// The underlying URL regardless of variant.
    pub fn url(&self) -> &str {
        match self {
            MediaRef::Image(u) | MediaRef::Poster(u) => u,
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaRef::Image(u) => write!(f, "{u}"),
            MediaRef::Poster(u) => write!(f, "Poster: {u}"),
        }
    }
}

/// One harvested feed post.
///
/// `body` is the deduplication identity (trimmed, exact match) and is
/// guaranteed non-empty for every admitted record. All other fields may
/// be empty when the source UI omitted the element; the engagement counts
/// stay raw strings (`"1.2K"`) exactly as presented.
#[derive(Debug, Clone)]
pub struct TweetRecord {
    /// Author handle, `@`-prefixed, possibly empty if unresolved.
    pub account: String,
    /// Canonical URL to the post, possibly empty.
    pub permalink: String,
    /// Normalized text content; never empty for admitted records.
    pub body: String,
    /// Ordered media references; empty means text-only.
    pub media: Vec<MediaRef>,
    /// Raw like count as presented (e.g. `"1,234"`, `"12.5K"`), or empty.
    pub likes: String,
    /// Raw repost count as presented, or empty.
    pub retweets: String,
    /// Timestamp of extraction.
    pub captured_at: DateTime<Utc>,
}

impl TweetRecord {
    /// Render the media list for the tabular sink: entries joined with
    /// `" | "`, or the literal `text-only` marker when there are none.
    pub fn media_cell(&self) -> String {
        if self.media.is_empty() {
            "text-only".to_string()
        } else {
            self.media
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join(" | ")
        }
    }
}

/// A rising search term with its momentum score from the trends warehouse.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrendTerm {
    /// The search term as it appears in the warehouse.
    pub term: String,
    /// Peak rising score across the most recent refresh.
    pub momentum: f64,
}

/// A news article headline from the coverage search.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewsArticle {
    /// The article headline.
    #[serde(default)]
    pub title: String,
    /// The publishing outlet (the wire format calls this `domain`).
    #[serde(default, alias = "domain")]
    pub source: String,
}

/// A distilled design brief for one trend, parsed from the model's reply.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CuratedTrend {
    /// The trend term this brief is about.
    pub term: String,
    /// The concrete visual subject to depict.
    pub subject: String,
    /// One-line narrative explaining why the trend is moving.
    #[serde(default)]
    pub context: String,
}

/// What to do with a trend's reference visuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetDecision {
    /// The reference image is usable as-is after background removal.
    Clean,
    /// Usable, but overlay the caption text from the directive.
    Meme,
    /// No reference is usable; generate a new image from the action text.
    Regen,
}

impl AssetDecision {
    /// Parse the uppercase token used in strategy reports.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CLEAN" => Some(AssetDecision::Clean),
            "MEME" => Some(AssetDecision::Meme),
            "REGEN" => Some(AssetDecision::Regen),
            _ => None,
        }
    }
}

impl fmt::Display for AssetDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetDecision::Clean => "CLEAN",
            AssetDecision::Meme => "MEME",
            AssetDecision::Regen => "REGEN",
        };
        f.write_str(s)
    }
}

/// One machine-readable instruction from the visual strategy report.
#[derive(Debug, Clone)]
pub struct AssetDirective {
    /// The trend term the directive applies to.
    pub trend: String,
    /// The manufacturing decision.
    pub decision: AssetDecision,
    /// Caption text (MEME) or generation prompt (REGEN); free text for CLEAN.
    pub action: String,
    /// Index of the chosen reference visual, when one was chosen.
    pub source_index: Option<usize>,
}
