//! Scroll-target discovery and scrolling for the virtualized feed.
//!
//! Timelines on the target site render inside a nested overflow container
//! rather than the document itself, so scrolling the window often moves
//! nothing. [`locate`] walks up from the first rendered post looking for
//! the nearest scrollable ancestor, tags it with a marker attribute, and
//! reports which strategy later scrolls should use. [`advance`] then
//! drives that strategy without re-walking the tree each pass.

use chromiumoxide::Page;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::error::HarvestError;
use super::extract::ITEM_SELECTOR;

/// Attribute stamped on the discovered scroll container so later passes
/// can address it with a cheap query instead of repeating the walk.
pub const SCROLL_MARKER: &str = "data-harvest-scroll";

/// Which element receives scroll commands for the rest of the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrollTarget {
    /// A dedicated overflow container wrapping the timeline.
    Feed { viewport_px: f64 },
    /// No scrollable ancestor found; fall back to the window.
    Window { viewport_px: f64 },
}

impl ScrollTarget {
    /// Height in pixels of the scrolling viewport, used to size steps.
    pub fn viewport_px(&self) -> f64 {
        match self {
            ScrollTarget::Feed { viewport_px } => *viewport_px,
            ScrollTarget::Window { viewport_px } => *viewport_px,
        }
    }
}

/// How far to move on one scroll command.
#[derive(Debug, Clone, Copy)]
pub enum Advance {
    /// Scroll down by a fixed pixel amount.
    By(i64),
    /// Jump straight to the bottom of the scroll range.
    ToBottom,
}

#[derive(Debug, Deserialize)]
struct LocateReply {
    kind: String,
    height: f64,
}

/// Find the element that actually scrolls the timeline.
///
/// Walks ancestors of the first rendered post until one both overflows
/// and allows vertical scrolling. Returns [`HarvestError::NoContent`]
/// when no post is rendered at all, since there is nothing to anchor
/// the walk to.
#[instrument(level = "debug", skip_all)]
pub async fn locate(page: &Page) -> Result<ScrollTarget, HarvestError> {
    let reply: Option<LocateReply> = page.evaluate(locate_script()).await?.into_value()?;

    let Some(reply) = reply else {
        warn!("No rendered posts to anchor the scroll-container walk");
        return Err(HarvestError::NoContent);
    };

    let target = if reply.kind == "feed" {
        ScrollTarget::Feed {
            viewport_px: reply.height,
        }
    } else {
        ScrollTarget::Window {
            viewport_px: reply.height,
        }
    };
    debug!(target = ?target, "Scroll target located");
    Ok(target)
}

/// Issue one scroll command against the located target.
///
/// When the marked container has been unmounted by the virtualizer the
/// script quietly falls back to window scrolling rather than failing
/// the pass.
pub async fn advance(
    page: &Page,
    target: Option<&ScrollTarget>,
    motion: Advance,
) -> Result<(), HarvestError> {
    page.evaluate(scroll_script(target, motion)).await?;
    Ok(())
}

/// Pixel step for one scroll: a fraction of the target's viewport,
/// with a floor so a zero-height viewport still makes progress.
pub fn step_for(target: &ScrollTarget, fraction: f64) -> i64 {
    let step = (target.viewport_px() * fraction) as i64;
    if step <= 0 { 500 } else { step }
}

fn locate_script() -> String {
    format!(
        r#"(() => {{
            const item = document.querySelector('{ITEM_SELECTOR}');
            if (!item) {{
                return null;
            }}
            let el = item.parentElement;
            while (el && el !== document.body) {{
                const style = window.getComputedStyle(el);
                const overflow = style.overflowY;
                const scrollable = overflow === 'auto' || overflow === 'scroll' || overflow === 'overlay';
                if (scrollable && el.scrollHeight > el.clientHeight) {{
                    for (const old of document.querySelectorAll('[{SCROLL_MARKER}]')) {{
                        old.removeAttribute('{SCROLL_MARKER}');
                    }}
                    el.setAttribute('{SCROLL_MARKER}', '1');
                    return {{ kind: 'feed', height: el.clientHeight }};
                }}
                el = el.parentElement;
            }}
            const height = window.innerHeight || document.documentElement.clientHeight;
            return {{ kind: 'window', height: height }};
        }})()"#
    )
}

fn scroll_script(target: Option<&ScrollTarget>, motion: Advance) -> String {
    match target {
        Some(ScrollTarget::Feed { .. }) => match motion {
            Advance::By(px) => format!(
                r#"(() => {{
                    const el = document.querySelector('[{SCROLL_MARKER}]');
                    if (el) {{
                        el.scrollTop += {px};
                    }} else {{
                        window.scrollBy(0, {px});
                    }}
                    return true;
                }})()"#
            ),
            Advance::ToBottom => format!(
                r#"(() => {{
                    const el = document.querySelector('[{SCROLL_MARKER}]');
                    if (el) {{
                        el.scrollTop = el.scrollHeight;
                    }} else {{
                        window.scrollTo(0, document.body.scrollHeight);
                    }}
                    return true;
                }})()"#
            ),
        },
        _ => match motion {
            Advance::By(px) => format!(
                r#"(() => {{ window.scrollBy(0, {px}); return true; }})()"#
            ),
            Advance::ToBottom => {
                r#"(() => { window.scrollTo(0, document.body.scrollHeight); return true; })()"#
                    .to_string()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_script_anchors_on_posts_and_stamps_marker() {
        let script = locate_script();
        assert!(script.contains(ITEM_SELECTOR));
        assert!(script.contains(SCROLL_MARKER));
        assert!(script.contains("return null"));
    }

    #[test]
    fn test_feed_scroll_addresses_marked_container() {
        let target = ScrollTarget::Feed { viewport_px: 900.0 };
        let script = scroll_script(Some(&target), Advance::By(630));
        assert!(script.contains(SCROLL_MARKER));
        assert!(script.contains("el.scrollTop += 630"));
        assert!(script.contains("window.scrollBy(0, 630)"));
    }

    #[test]
    fn test_feed_bottom_jump_uses_scroll_height() {
        let target = ScrollTarget::Feed { viewport_px: 900.0 };
        let script = scroll_script(Some(&target), Advance::ToBottom);
        assert!(script.contains("el.scrollTop = el.scrollHeight"));
    }

    #[test]
    fn test_window_scroll_skips_marker_lookup() {
        let target = ScrollTarget::Window { viewport_px: 700.0 };
        let script = scroll_script(Some(&target), Advance::By(490));
        assert!(!script.contains(SCROLL_MARKER));
        assert!(script.contains("window.scrollBy(0, 490)"));
    }

    #[test]
    fn test_step_is_a_fraction_of_the_viewport() {
        let target = ScrollTarget::Feed { viewport_px: 800.0 };
        assert_eq!(step_for(&target, 0.7), 560);
    }

    #[test]
    fn test_step_floor_protects_degenerate_viewports() {
        let target = ScrollTarget::Window { viewport_px: 0.0 };
        assert_eq!(step_for(&target, 0.7), 500);
    }
}
