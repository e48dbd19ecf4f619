//! Reference images from Google Images through SerpApi.
//!
//! One search per curated term. Each candidate is downloaded with the
//! same desktop user agent the harvester browses with, checked for a
//! minimum printable size, and saved as `raw_<i>.<ext>` under the term's
//! visuals directory. Failed or undersized candidates are logged and
//! skipped without failing the batch.

use futures::stream::{self, StreamExt};
use image::GenericImageView;
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::harvest::browser::USER_AGENT;
use crate::utils::{term_slug, truncate_for_log};

const SERPAPI_URL: &str = "https://serpapi.com/search.json";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);
/// Smallest edge an image may have and still print acceptably.
const MIN_EDGE_PX: u32 = 300;

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    images_results: Vec<ImageResult>,
}

#[derive(Deserialize)]
struct ImageResult {
    original: Option<String>,
}

/// Search for `term`, download up to `limit` usable originals, and
/// return the saved paths in result order.
#[instrument(level = "info", skip(http, api_key))]
pub async fn fetch_reference_visuals(
    http: &reqwest::Client,
    api_key: &str,
    term: &str,
    out_dir: &str,
    limit: usize,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let response = http
        .get(SERPAPI_URL)
        .query(&[
            ("engine", "google_images"),
            ("q", term),
            ("num", "10"),
            ("safe", "off"),
            ("api_key", api_key),
        ])
        .timeout(SEARCH_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(format!(
            "SerpApi error ({status}): {}",
            truncate_for_log(&error_text, 500)
        )
        .into());
    }

    let reply: ImagesResponse = response.json().await?;
    let originals: Vec<String> = reply
        .images_results
        .into_iter()
        .filter_map(|r| r.original)
        .take(limit)
        .collect();
    debug!(candidates = originals.len(), "Image candidates found");

    let dir = Path::new(out_dir).join("visuals").join(term_slug(term));
    tokio::fs::create_dir_all(&dir).await?;

    let saved: Vec<PathBuf> = stream::iter(originals.into_iter().enumerate())
        .then(|(i, url)| {
            let http = http.clone();
            let dir = dir.clone();
            async move {
                match fetch_one(&http, &url, &dir, i).await {
                    Ok(Some(path)) => {
                        debug!(%url, "Saved reference image");
                        Some(path)
                    }
                    Ok(None) => {
                        warn!(%url, "Reference image rejected as too small or undecodable");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, %url, "Reference image fetch failed");
                        None
                    }
                }
            }
        })
        .filter(|opt| std::future::ready(opt.is_some()))
        .map(|opt| opt.unwrap())
        .collect()
        .await;

    info!(saved = saved.len(), "Reference visuals ready");
    Ok(saved)
}

async fn fetch_one(
    http: &reqwest::Client,
    url: &str,
    dir: &Path,
    index: usize,
) -> Result<Option<PathBuf>, Box<dyn Error>> {
    let response = http
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(format!("download status {}", response.status()).into());
    }
    let bytes = response.bytes().await?;

    if !validate_min_dims(&bytes, MIN_EDGE_PX) {
        return Ok(None);
    }

    let path = dir.join(format!("raw_{index}{}", extension_for(url)));
    tokio::fs::write(&path, &bytes).await?;
    Ok(Some(path))
}

/// True when the bytes decode as an image at least `min_edge` on both
/// sides. Hosts answering image URLs with HTML error pages fail the
/// decode and land here as false.
fn validate_min_dims(bytes: &[u8], min_edge: u32) -> bool {
    match image::load_from_memory(bytes) {
        Ok(img) => {
            let (w, h) = img.dimensions();
            w >= min_edge && h >= min_edge
        }
        Err(e) => {
            debug!(error = %e, "Bytes are not a decodable image");
            false
        }
    }
}

/// File extension for a saved image, guessed from the URL path.
fn extension_for(url: &str) -> String {
    let known = ["jpg", "jpeg", "png", "gif", "webp"];
    let ext = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()?
                .last()?
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_lowercase())
        })
        .filter(|ext| known.contains(&ext.as_str()));
    match ext {
        Some(ext) => format!(".{ext}"),
        None => ".jpg".to_string(),
    }
}
