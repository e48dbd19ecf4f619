//! # Trendsmith
//!
//! A trend-to-asset pipeline that gathers demand signals (rising search
//! terms, news coverage, trending social posts), distills them into
//! curated design trends with a generative model, and manufactures a
//! print-ready design asset for each one.
//!
//! ## Features
//!
//! - Harvests trending posts from a social feed with a real Chromium
//!   browser, deduplicated and flushed to a CSV sheet
//! - Pulls rising search terms from the Google Trends public dataset
//! - Attaches recent news coverage per term from the GDELT Doc API
//! - Distills raw signals into curated trends through Gemini
//! - Collects and validates reference imagery through SerpApi
//! - Manufactures final assets: background removal, meme captions, or
//!   Imagen generation
//!
//! ## Usage
//!
//! ```sh
//! trendsmith -t 50 -o ./data/raw
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Signals**: harvest posts + rising terms + coverage
//! 2. **Distillation**: one model conversation yields the curated trends
//! 3. **Reference visuals**: image search per curated trend
//! 4. **Strategy**: one model conversation yields per-trend directives
//! 5. **Manufacturing**: produce the final PNG assets

use clap::Parser;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod assets;
mod cli;
mod distill;
mod fetchers;
mod harvest;
mod imagen;
mod models;
mod outputs;
mod utils;

use api::{ask_with_backoff, GeminiClient, InlineImage};
use cli::Cli;
use fetchers::{gdelt, serpimages, trends};
use harvest::{HarvestConfig, HarvestOutcome, Harvester};
use imagen::ImagenClient;
use models::{NewsArticle, TrendTerm};
use outputs::sheet;
use utils::{ensure_writable_dir, looks_truncated, truncate_for_log};

/// Articles requested from the coverage API per term.
const COVERAGE_MAX_RECORDS: usize = 20;
/// Reference images kept per curated trend.
const VISUALS_PER_TREND: usize = 10;
/// Reference images shown to the strategy conversation per trend.
const STRATEGY_IMAGES_PER_TREND: usize = 2;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("trendsmith starting up");

    // .env before parsing so env-backed credential args can see it
    let _ = dotenvy::dotenv();
    let args = Cli::parse();
    debug!(?args.output_dir, target = args.target_tweets, "Parsed CLI arguments");

    // Early check: ensure the output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    // ---- Stage 1: gather raw signals ----
    let trend_terms = match (args.gcp_access_token.as_deref(), args.gcp_project_id.as_deref()) {
        (Some(token), Some(project_id)) => {
            trends::rising_terms(&http, project_id, token, args.trend_limit).await?
        }
        _ => {
            warn!("GCP_ACCESS_TOKEN/GCP_PROJECT_ID not configured; skipping the rising-terms warehouse");
            Vec::new()
        }
    };

    let snapshot_dir = Path::new(&args.output_dir);
    let mut coverage: Vec<(String, Vec<NewsArticle>)> = Vec::new();
    for trend in &trend_terms {
        match gdelt::coverage(
            &http,
            &trend.term,
            args.news_lookback_hours,
            COVERAGE_MAX_RECORDS,
            Some(snapshot_dir),
        )
        .await
        {
            Ok(articles) => coverage.push((trend.term.clone(), articles)),
            Err(e) => {
                warn!(term = %trend.term, error = %e, "Coverage fetch failed; continuing without it");
                coverage.push((trend.term.clone(), Vec::new()));
            }
        }
    }

    let harvest_config = HarvestConfig {
        max_idle_passes: args.max_idle_passes,
        ..HarvestConfig::new(args.feed_url.clone(), args.target_tweets)
    };
    let outcome = Harvester::new(harvest_config).run(&args.output_dir).await?;

    print!("{}", format_signal_report(&trend_terms, &coverage, &outcome));

    // ---- Stage 2: distill signals into curated trends ----
    let Some(gemini_key) = args.gemini_api_key.clone() else {
        info!("No GEMINI_API_KEY configured; stopping after signal gathering");
        return Ok(());
    };
    let gemini = GeminiClient::new(http.clone(), gemini_key);

    let bodies = sheet::read_bodies(&outcome.sheet_path)?;
    let prompt = distill::distill_prompt(&trend_terms, &coverage, &bodies, args.trend_limit);
    let reply = ask_with_backoff(&gemini, &prompt, Some(distill::DISTILL_SYSTEM), &[]).await?;

    let mut curated = distill::parse_curated(&reply, args.trend_limit);

    // If the parse failed due to EOF (truncation), re-ask ONCE
    if let Err(ref e) = curated {
        if looks_truncated(e) {
            warn!(error = %e, "EOF while parsing the distillation reply; re-asking once");
            match ask_with_backoff(&gemini, &prompt, Some(distill::DISTILL_SYSTEM), &[]).await {
                Ok(r2) => curated = distill::parse_curated(&r2, args.trend_limit),
                Err(e2) => warn!(error = %e2, "Re-ask failed"),
            }
        }
    }

    let curated = match curated {
        Ok(list) => list,
        Err(e) => {
            error!(
                error = %e,
                reply_preview = %truncate_for_log(&reply, 300),
                "Distillation reply was not usable JSON"
            );
            return Err(e.into());
        }
    };
    if curated.is_empty() {
        error!("Distillation produced no usable trends");
        return Err("distillation produced no usable trends".into());
    }

    println!("CURATED TRENDS");
    for trend in &curated {
        println!("  {:<24} {}", trend.term, trend.subject);
    }
    println!();

    // ---- Stage 3: reference visuals per curated trend ----
    use std::collections::BTreeMap;
    let mut visuals: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    match args.serpapi_key.as_deref() {
        Some(serpapi_key) => {
            for trend in &curated {
                match serpimages::fetch_reference_visuals(
                    &http,
                    serpapi_key,
                    &trend.term,
                    &args.output_dir,
                    VISUALS_PER_TREND,
                )
                .await
                {
                    Ok(paths) => {
                        visuals.insert(trend.term.clone(), paths);
                    }
                    Err(e) => {
                        warn!(term = %trend.term, error = %e, "Reference visual fetch failed; continuing without")
                    }
                }
            }
        }
        None => warn!("No SERPAPI_KEY configured; skipping reference visuals"),
    }

    // ---- Stage 4: visual strategy ----
    let mut attached: Vec<(String, usize)> = Vec::new();
    let mut images: Vec<InlineImage> = Vec::new();
    for trend in &curated {
        let paths = visuals.get(&trend.term).map(|v| v.as_slice()).unwrap_or(&[]);
        let mut count = 0usize;
        for path in paths.iter().take(STRATEGY_IMAGES_PER_TREND) {
            match tokio::fs::read(path).await {
                Ok(data) => {
                    images.push(InlineImage {
                        mime: mime_for(path),
                        data,
                    });
                    count += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read a reference image for the strategy prompt")
                }
            }
        }
        attached.push((trend.term.clone(), count));
    }

    let prompt = distill::strategy_prompt(&curated, &attached);
    let report = ask_with_backoff(&gemini, &prompt, Some(distill::STRATEGY_SYSTEM), &images).await?;
    println!("VISUAL STRATEGY");
    println!("{report}");
    println!();

    let directives = distill::parse_directives(&report);
    info!(directives = directives.len(), "Strategy parsed");

    // ---- Stage 5: manufacture assets ----
    if args.skip_assets {
        info!("Skipping asset manufacturing (--skip-assets)");
    } else {
        let imagen = match (args.gcp_access_token.as_deref(), args.gcp_project_id.as_deref()) {
            (Some(token), Some(project_id)) => Some(ImagenClient::new(
                http.clone(),
                token.to_string(),
                project_id.to_string(),
            )),
            _ => None,
        };
        let font = assets::load_font(args.meme_font_path.as_deref());

        let finished = assets::process_directives(
            &directives,
            &visuals,
            imagen.as_ref(),
            font.as_ref(),
            &args.output_dir,
        )
        .await;

        println!("FINISHED ASSETS");
        if finished.is_empty() {
            println!("  (none)");
        }
        for path in &finished {
            println!("  {}", path.display());
        }
        println!();
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}

/// The stage-1 console report: what the signals said, and what the
/// harvest left behind.
fn format_signal_report(
    trends: &[TrendTerm],
    coverage: &[(String, Vec<NewsArticle>)],
    outcome: &HarvestOutcome,
) -> String {
    use std::fmt::Write;

    let mut report = String::new();
    report.push_str("\n================ SIGNAL REPORT ================\n\nRISING TERMS\n");
    if trends.is_empty() {
        report.push_str("  (warehouse skipped or empty)\n");
    }
    for trend in trends {
        writeln!(report, "  {:<28} momentum {:>8.0}", trend.term, trend.momentum).unwrap();
    }

    report.push_str("\nNEWS COVERAGE\n");
    if coverage.is_empty() {
        report.push_str("  (no terms to search)\n");
    }
    for (term, articles) in coverage {
        writeln!(report, "  {term}").unwrap();
        if articles.is_empty() {
            report.push_str("    (no coverage in the window)\n");
        }
        for article in articles.iter().take(3) {
            writeln!(report, "    - {} [{}]", article.title, article.source).unwrap();
        }
    }

    report.push_str("\nHARVEST\n");
    writeln!(
        report,
        "  {} posts -> {} ({})",
        outcome.record_count,
        outcome.sheet_path.display(),
        outcome.stop
    )
    .unwrap();
    report.push_str("===============================================\n\n");
    report
}

/// MIME type for an image path, by extension. Anything unknown is sent
/// as JPEG, which matches how the reference fetcher names its fallback.
fn mime_for(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png".to_string(),
        Some("webp") => "image/webp".to_string(),
        Some("gif") => "image/gif".to_string(),
        _ => "image/jpeg".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::StopReason;

    #[test]
    fn test_signal_report_carries_every_section() {
        let trends = vec![TrendTerm {
            term: "capybara".to_string(),
            momentum: 1200.0,
        }];
        let coverage = vec![
            (
                "capybara".to_string(),
                vec![NewsArticle {
                    title: "Capybara cafe opens".to_string(),
                    source: "example.com".to_string(),
                }],
            ),
            ("quiet term".to_string(), vec![]),
        ];
        let outcome = HarvestOutcome {
            sheet_path: PathBuf::from("data/raw/x_tweets_20260214_091500.csv"),
            record_count: 37,
            stop: StopReason::Exhausted,
        };

        let report = format_signal_report(&trends, &coverage, &outcome);

        assert!(report.contains("RISING TERMS"));
        assert!(report.contains("capybara"));
        assert!(report.contains("momentum"));
        assert!(report.contains("Capybara cafe opens [example.com]"));
        assert!(report.contains("(no coverage in the window)"));
        assert!(report.contains("37 posts -> data/raw/x_tweets_20260214_091500.csv (feed exhausted)"));
    }

    #[test]
    fn test_signal_report_names_empty_signals() {
        let outcome = HarvestOutcome {
            sheet_path: PathBuf::from("out.csv"),
            record_count: 0,
            stop: StopReason::TargetReached,
        };

        let report = format_signal_report(&[], &[], &outcome);

        assert!(report.contains("(warehouse skipped or empty)"));
        assert!(report.contains("(no terms to search)"));
        assert!(report.contains("0 posts -> out.csv (target reached)"));
    }

    #[test]
    fn test_mime_guess_follows_the_extension() {
        assert_eq!(mime_for(Path::new("a/raw_0.png")), "image/png");
        assert_eq!(mime_for(Path::new("a/raw_1.webp")), "image/webp");
        assert_eq!(mime_for(Path::new("a/raw_2.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a/raw_3")), "image/jpeg");
    }
}
