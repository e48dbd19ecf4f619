//! Command-line interface definitions for trendsmith.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Credentials can be provided via flags or environment variables; a `.env`
//! file is loaded before parsing.

use clap::Parser;

/// Command-line arguments for the trendsmith pipeline.
///
/// # Examples
///
/// ```sh
/// # Harvest 50 posts into ./data/raw and run the full pipeline
/// trendsmith --target-tweets 50 --output-dir ./data/raw
///
/// # Harvest only, skipping the asset manufacturing stage
/// trendsmith -t 25 --skip-assets
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Number of unique posts to harvest from the feed
    #[arg(short = 't', long, default_value_t = 50, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub target_tweets: usize,

    /// Output directory for the harvest sheet, snapshots, and assets
    #[arg(short, long, default_value = "data/raw")]
    pub output_dir: String,

    /// Feed view to harvest
    #[arg(long, default_value = "https://x.com/i/jf/global-trending/home")]
    pub feed_url: String,

    /// How many rising terms to pull from the warehouse
    #[arg(long, default_value_t = 5)]
    pub trend_limit: usize,

    /// News coverage lookback window, in hours
    #[arg(long, default_value_t = 24)]
    pub news_lookback_hours: i64,

    /// Consecutive zero-admission scroll passes before the harvest is
    /// considered exhausted
    #[arg(long, default_value_t = 8)]
    pub max_idle_passes: u32,

    /// Stop after the visual strategy report; skip asset manufacturing
    #[arg(long, default_value_t = false)]
    pub skip_assets: bool,

    /// Gemini API key for distillation and visual strategy
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// SerpApi key for reference image search
    #[arg(long, env = "SERPAPI_KEY", hide_env_values = true)]
    pub serpapi_key: Option<String>,

    /// OAuth bearer token for the trends warehouse and image generation
    #[arg(long, env = "GCP_ACCESS_TOKEN", hide_env_values = true)]
    pub gcp_access_token: Option<String>,

    /// Cloud project id that owns the warehouse job and Imagen endpoint
    #[arg(long, env = "GCP_PROJECT_ID")]
    pub gcp_project_id: Option<String>,

    /// TTF font used for meme captions (overlay is skipped when unset)
    #[arg(long, env = "MEME_FONT_PATH")]
    pub meme_font_path: Option<String>,
}
