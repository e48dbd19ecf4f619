//! News coverage per term from the GDELT Doc 2.0 API.
//!
//! One `ArtList` query per term over a bounded lookback window. The raw
//! response body is snapshotted to disk before decoding so a drifting
//! upstream format can be diagnosed after the fact.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::models::NewsArticle;
use crate::utils::{term_slug, truncate_for_log};

const GDELT_DOC_API: &str = "https://api.gdeltproject.org/api/v2/doc/doc";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ArtListResponse {
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

/// GDELT wants bare UTC timestamps, `YYYYMMDDHHMMSS`.
fn fmt_gdelt_dt(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Fetch recent coverage of `term`, most relevant first.
///
/// When `snapshot_dir` is set the raw body is written there as
/// `gdelt_<term>.json`; snapshot failures only warn.
#[instrument(level = "info", skip(http, snapshot_dir))]
pub async fn coverage(
    http: &reqwest::Client,
    term: &str,
    lookback_hours: i64,
    max_records: usize,
    snapshot_dir: Option<&Path>,
) -> Result<Vec<NewsArticle>, Box<dyn Error>> {
    let end = Utc::now();
    let start = end - chrono::Duration::hours(lookback_hours);
    let query = format!("\"{term}\"");
    let max = max_records.to_string();
    let start_s = fmt_gdelt_dt(start);
    let end_s = fmt_gdelt_dt(end);

    let response = http
        .get(GDELT_DOC_API)
        .query(&[
            ("query", query.as_str()),
            ("mode", "ArtList"),
            ("format", "json"),
            ("maxrecords", max.as_str()),
            ("startdatetime", start_s.as_str()),
            ("enddatetime", end_s.as_str()),
            ("sort", "HybridRel"),
        ])
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(format!(
            "GDELT error ({status}): {}",
            truncate_for_log(&error_text, 500)
        )
        .into());
    }

    let raw = response.text().await?;

    if let Some(dir) = snapshot_dir {
        let path = dir.join(format!("gdelt_{}.json", term_slug(term)));
        if let Err(e) = tokio::fs::write(&path, &raw).await {
            warn!(error = %e, path = %path.display(), "Coverage snapshot write failed");
        }
    }

    // GDELT answers rate limiting with plain text, not an error status.
    let reply: ArtListResponse = serde_json::from_str(&raw).map_err(|e| {
        format!(
            "GDELT response not decodable: {e}; body starts {}",
            truncate_for_log(&raw, 200)
        )
    })?;

    info!(articles = reply.articles.len(), "Coverage fetched");
    Ok(reply.articles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_compact_utc() {
        let at = Utc.with_ymd_and_hms(2026, 2, 14, 9, 30, 5).unwrap();
        assert_eq!(fmt_gdelt_dt(at), "20260214093005");
    }

    #[test]
    fn test_response_decode_maps_domain_to_source() {
        let raw = r#"{
            "articles": [
                {"title": "Capybara cafe opens", "domain": "example.com", "url": "https://example.com/a"},
                {"domain": "notitle.example"}
            ]
        }"#;
        let reply: ArtListResponse = serde_json::from_str(raw).unwrap();

        assert_eq!(reply.articles.len(), 2);
        assert_eq!(reply.articles[0].title, "Capybara cafe opens");
        assert_eq!(reply.articles[0].source, "example.com");
        assert_eq!(reply.articles[1].title, "");
    }

    #[test]
    fn test_response_decode_tolerates_empty_body() {
        let reply: ArtListResponse = serde_json::from_str("{}").unwrap();
        assert!(reply.articles.is_empty());
    }
}
