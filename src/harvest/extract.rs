//! DOM extraction of rendered posts into [`TweetRecord`]s.
//!
//! One pass reads every post currently mounted in the timeline. The body
//! is the only field allowed to veto a record: a post with no readable
//! text is skipped outright, while author, permalink, media, and
//! engagement failures degrade to empty values so a markup drift in one
//! corner of the card never costs the whole record.

use chromiumoxide::{Element, Page};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument};

use super::error::HarvestError;
use crate::models::{MediaRef, TweetRecord};

/// A rendered post card in the timeline.
pub const ITEM_SELECTOR: &str = r#"article[data-testid="tweet"]"#;

const BODY_SELECTOR: &str = r#"div[data-testid="tweetText"]"#;
const AUTHOR_BLOCK_SELECTOR: &str = r#"div[data-testid="User-Name"]"#;
const PHOTO_SELECTOR: &str = r#"div[data-testid="tweetPhoto"] img"#;
const VIDEO_SELECTOR: &str = r#"div[data-testid="videoPlayer"] video"#;
const LIKE_SELECTOR: &str = r#"[data-testid="like"]"#;
const RETWEET_SELECTOR: &str = r#"[data-testid="retweet"]"#;

/// First count-like token in an engagement label, e.g. "1,234" or "12.5K".
static MAGNITUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d[\d,\.]*[KMB]?)").unwrap()
});

/// Path segments that are routing, not account handles.
const RESERVED_SEGMENTS: [&str; 4] = ["com", "x", "i", "intent"];

/// Extract every post currently rendered on the page.
#[instrument(level = "debug", skip_all)]
pub async fn visible_records(page: &Page) -> Result<Vec<TweetRecord>, HarvestError> {
    let items = page.find_elements(ITEM_SELECTOR).await?;
    debug!(rendered = items.len(), "Scanning rendered posts");

    let mut records = Vec::new();
    for item in &items {
        if let Some(record) = extract_one(item).await {
            records.push(record);
        }
    }
    Ok(records)
}

async fn extract_one(item: &Element) -> Option<TweetRecord> {
    let body = body_text(item).await?;

    Some(TweetRecord {
        account: author_handle(item).await,
        permalink: permalink(item).await,
        body,
        media: media_refs(item).await,
        likes: engagement(item, LIKE_SELECTOR).await,
        retweets: engagement(item, RETWEET_SELECTOR).await,
        captured_at: Utc::now(),
    })
}

/// Trimmed body text, or None when the card has no readable text. These
/// are usually image-only or ad cards and carry nothing worth keeping.
async fn body_text(item: &Element) -> Option<String> {
    let node = match item.find_element(BODY_SELECTOR).await {
        Ok(node) => node,
        Err(_) => {
            debug!("Post card has no text node, skipping");
            return None;
        }
    };
    let text = node.inner_text().await.ok().flatten().unwrap_or_default();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        debug!("Post card text is blank, skipping");
        return None;
    }
    Some(trimmed.to_string())
}

async fn author_handle(item: &Element) -> String {
    let Ok(block) = item.find_element(AUTHOR_BLOCK_SELECTOR).await else {
        debug!("No author block on card");
        return String::new();
    };
    let Ok(links) = block.find_elements("a").await else {
        return String::new();
    };

    let mut hrefs = Vec::new();
    for link in &links {
        if let Ok(Some(href)) = link.attribute("href").await {
            hrefs.push(href);
        }
    }
    handle_from_hrefs(&hrefs)
}

/// Pick the account handle out of the author block's link targets.
///
/// Status permalinks and routing paths are rejected; the first remaining
/// profile path wins.
fn handle_from_hrefs(hrefs: &[String]) -> String {
    for href in hrefs {
        if href.contains("/status/") {
            continue;
        }
        let segment = href
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if segment.is_empty() {
            continue;
        }
        if RESERVED_SEGMENTS.contains(&segment.to_lowercase().as_str()) {
            continue;
        }
        return format!("@{segment}");
    }
    String::new()
}

/// The post's canonical URL, read off the timestamp's enclosing link.
/// The DOM href property is already absolute.
async fn permalink(item: &Element) -> String {
    let Ok(time) = item.find_element("time").await else {
        debug!("No timestamp on card");
        return String::new();
    };
    let js = r#"function() {
        const a = this.closest('a');
        return a ? a.href : null;
    }"#;
    match time.call_js_fn(js, false).await {
        Ok(ret) => ret
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        Err(_) => {
            debug!("Permalink lookup failed on card");
            String::new()
        }
    }
}

async fn media_refs(item: &Element) -> Vec<MediaRef> {
    let mut refs = Vec::new();

    if let Ok(images) = item.find_elements(PHOTO_SELECTOR).await {
        for img in &images {
            if let Ok(Some(src)) = img.attribute("src").await {
                if !src.is_empty() {
                    refs.push(MediaRef::Image(src));
                }
            }
        }
    }
    if let Ok(videos) = item.find_elements(VIDEO_SELECTOR).await {
        for video in &videos {
            if let Ok(Some(poster)) = video.attribute("poster").await {
                if !poster.is_empty() {
                    refs.push(MediaRef::Poster(poster));
                }
            }
        }
    }
    refs
}

/// Engagement count from a button's accessibility label, "" when the
/// button or a parsable count is missing.
async fn engagement(item: &Element, selector: &str) -> String {
    let Ok(button) = item.find_element(selector).await else {
        return String::new();
    };
    let label = match button.attribute("aria-label").await {
        Ok(Some(label)) => label,
        _ => return String::new(),
    };
    first_magnitude(&label)
}

fn first_magnitude(label: &str) -> String {
    MAGNITUDE_RE
        .captures(label)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_skips_status_links() {
        let hrefs = vec![
            "https://x.com/someuser/status/123".to_string(),
            "https://x.com/someuser".to_string(),
        ];
        assert_eq!(handle_from_hrefs(&hrefs), "@someuser");
    }

    #[test]
    fn test_handle_rejects_routing_segments() {
        let hrefs = vec![
            "https://x.com/i".to_string(),
            "https://x.com/intent".to_string(),
            "/realaccount".to_string(),
        ];
        assert_eq!(handle_from_hrefs(&hrefs), "@realaccount");
    }

    #[test]
    fn test_handle_tolerates_trailing_slash() {
        let hrefs = vec!["https://x.com/handle/".to_string()];
        assert_eq!(handle_from_hrefs(&hrefs), "@handle");
    }

    #[test]
    fn test_handle_empty_when_nothing_qualifies() {
        let hrefs = vec![
            "https://x.com/a/status/9".to_string(),
            "https://x.com/i".to_string(),
        ];
        assert_eq!(handle_from_hrefs(&hrefs), "");
        assert_eq!(handle_from_hrefs(&[]), "");
    }

    #[test]
    fn test_magnitude_plain_and_separated_counts() {
        assert_eq!(first_magnitude("1,234 Likes. Like"), "1,234");
        assert_eq!(first_magnitude("7 reposts. Repost"), "7");
    }

    #[test]
    fn test_magnitude_suffixed_counts() {
        assert_eq!(first_magnitude("12.5K reposts. Repost"), "12.5K");
        assert_eq!(first_magnitude("1.1M Likes"), "1.1M");
    }

    #[test]
    fn test_magnitude_requires_a_digit() {
        assert_eq!(first_magnitude("Like. React"), "");
        assert_eq!(first_magnitude(""), "");
        assert_eq!(first_magnitude(". , ."), "");
    }
}
