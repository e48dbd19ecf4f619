//! Prompt construction and reply parsing for the two model conversations.
//!
//! The first conversation distills raw signals (rising search terms, news
//! coverage, harvested posts) into a short curated trend list. The second
//! turns curated trends plus their reference imagery into one
//! manufacturing directive per trend. Model replies are free text, so
//! every parser here tolerates the code fences and stray prose models
//! wrap around structured output.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write;
use tracing::warn;

use crate::models::{AssetDecision, AssetDirective, CuratedTrend, NewsArticle, TrendTerm};

/// System instruction for the distillation conversation.
pub const DISTILL_SYSTEM: &str = "You are a trend analyst for a print-on-demand design studio. \
You receive raw signals: rising search terms, news coverage, and trending social posts. \
Your job is to distill them into concrete subjects that work as a single printed visual. \
Follow the output contract exactly and reply with nothing beyond what is asked for.";

/// System instruction for the visual strategy conversation.
pub const STRATEGY_SYSTEM: &str = "You are the art director of a print-on-demand design studio. \
You look at curated trends and their reference images and decide, per trend, the cheapest \
path to a finished design asset. Follow the output contract exactly and reply with nothing \
beyond what is asked for.";

/// One manufacturing directive per line of the strategy reply.
static DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*TREND:\s*(.+?)\s*\|\s*DECISION:\s*([A-Za-z]+)\s*\|\s*ACTION:\s*(.*?)\s*\|\s*SOURCE:\s*([^\s|]+)[ \t]*$",
    )
    .unwrap()
});

/// Build the distillation prompt from every gathered signal.
pub fn distill_prompt(
    trends: &[TrendTerm],
    coverage: &[(String, Vec<NewsArticle>)],
    posts: &[String],
    want: usize,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("Below are today's raw trend signals.\n\n## Rising search terms\n");
    if trends.is_empty() {
        prompt.push_str("(none available)\n");
    }
    for trend in trends {
        writeln!(prompt, "- {} (momentum {:.0})", trend.term, trend.momentum).unwrap();
    }

    prompt.push_str("\n## News coverage\n");
    if coverage.is_empty() {
        prompt.push_str("(none available)\n");
    }
    for (term, articles) in coverage {
        writeln!(prompt, "### {term}").unwrap();
        if articles.is_empty() {
            prompt.push_str("(no coverage found)\n");
        }
        for article in articles.iter().take(5) {
            writeln!(prompt, "- {} ({})", article.title, article.source).unwrap();
        }
    }

    prompt.push_str("\n## Trending social posts\n");
    if posts.is_empty() {
        prompt.push_str("(none available)\n");
    }
    for post in posts.iter().take(40) {
        writeln!(prompt, "- {}", post.replace('\n', " ")).unwrap();
    }

    writeln!(
        prompt,
        "\nPick the {want} strongest trends for printed designs. Prefer subjects that are \
         concrete, recognizable, and legally safe to depict. Reply with a JSON array and \
         nothing else, one object per trend:\n\
         [{{\"term\": \"...\", \"subject\": \"what to depict\", \"context\": \"one line of why it trends\"}}]"
    )
    .unwrap();
    prompt
}

/// Parse the distillation reply into curated trends.
///
/// Duplicate terms (case-insensitive) collapse to the first occurrence
/// and the list is cut at `cap`. JSON errors propagate so the caller can
/// distinguish a truncated reply from a malformed one.
pub fn parse_curated(reply: &str, cap: usize) -> Result<Vec<CuratedTrend>, serde_json::Error> {
    let body = strip_code_fence(reply);
    let parsed: Vec<CuratedTrend> = serde_json::from_str(body)?;
    Ok(parsed
        .into_iter()
        .filter(|t| !t.term.trim().is_empty())
        .unique_by(|t| t.term.trim().to_lowercase())
        .take(cap)
        .collect())
}

/// Build the strategy prompt. `attached` lists, per trend and in
/// attachment order, how many reference images follow the text.
pub fn strategy_prompt(trends: &[CuratedTrend], attached: &[(String, usize)]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Decide how each trend's design asset gets made.\n\n## Curated trends\n");
    for trend in trends {
        writeln!(prompt, "- {}: {}", trend.term, trend.subject).unwrap();
        if !trend.context.is_empty() {
            writeln!(prompt, "  context: {}", trend.context).unwrap();
        }
    }

    let with_images: Vec<_> = attached.iter().filter(|(_, count)| *count > 0).collect();
    if with_images.is_empty() {
        prompt.push_str("\nNo reference images are attached.\n");
    } else {
        prompt.push_str("\n## Attached reference images, grouped by trend in order\n");
        for (term, count) in with_images {
            writeln!(
                prompt,
                "- {term}: {count} images, numbered 1 through {count} within the trend"
            )
            .unwrap();
        }
    }

    prompt.push_str(
        "\n## Decisions\n\
         - CLEAN: a reference image works as-is once its background is stripped\n\
         - MEME: a reference image works once a short caption is added; ACTION is the caption\n\
         - REGEN: no reference fits; ACTION is a prompt describing the image to generate\n\
         \nReply with exactly one line per trend and no other text:\n\
         TREND: <term> | DECISION: <CLEAN|MEME|REGEN> | ACTION: <caption or image prompt> | SOURCE: <image number within the trend, or NONE>\n",
    );
    prompt
}

/// Parse the strategy reply into directives, one per well-formed line.
///
/// Lines with an unknown decision are dropped with a warning, as are
/// lines that mention a trend but miss the contract shape. `SOURCE`
/// keeps its 1-based number; anything non-numeric becomes `None`.
pub fn parse_directives(report: &str) -> Vec<AssetDirective> {
    let mut directives = Vec::new();
    for caps in DIRECTIVE_RE.captures_iter(report) {
        let raw = &caps[0];
        let Some(decision) = AssetDecision::parse(&caps[2]) else {
            warn!(line = raw, "Unknown decision in strategy line, skipping");
            continue;
        };
        directives.push(AssetDirective {
            trend: caps[1].trim().to_string(),
            decision,
            action: caps[3].trim().to_string(),
            source_index: caps[4].parse::<usize>().ok(),
        });
    }

    for line in report.lines() {
        if line.contains("TREND:") && !DIRECTIVE_RE.is_match(line) {
            warn!(line, "Malformed strategy line ignored");
        }
    }
    directives
}

/// Strip a surrounding markdown code fence, if any, from a model reply.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    inner.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_stripping_variants() {
        assert_eq!(strip_code_fence("[1, 2]"), "[1, 2]");
        assert_eq!(strip_code_fence("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fence("```\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fence("  [1, 2]  "), "[1, 2]");
    }

    #[test]
    fn test_fence_stripping_leaves_interior_backticks() {
        assert_eq!(
            strip_code_fence("```json\n[\"a ``` b\"]\n```"),
            "[\"a ``` b\"]"
        );
    }

    #[test]
    fn test_curated_parse_dedupes_and_caps() {
        let reply = r#"```json
        [
            {"term": "Solar Eclipse", "subject": "eclipse over a city"},
            {"term": "solar eclipse", "subject": "duplicate"},
            {"term": "", "subject": "no term"},
            {"term": "Capybara", "subject": "capybara in a hot spring", "context": "viral video"},
            {"term": "Leap Day", "subject": "calendar page"}
        ]
        ```"#;

        let curated = parse_curated(reply, 2).unwrap();

        assert_eq!(curated.len(), 2);
        assert_eq!(curated[0].term, "Solar Eclipse");
        assert_eq!(curated[1].term, "Capybara");
        assert_eq!(curated[1].context, "viral video");
    }

    #[test]
    fn test_curated_parse_rejects_truncated_json() {
        let reply = r#"[{"term": "Solar Eclipse", "sub"#;
        assert!(parse_curated(reply, 5).is_err());
    }

    #[test]
    fn test_distill_prompt_carries_all_signal_sections() {
        let trends = vec![TrendTerm {
            term: "capybara".to_string(),
            momentum: 900.0,
        }];
        let coverage = vec![(
            "capybara".to_string(),
            vec![NewsArticle {
                title: "Capybara cafe opens".to_string(),
                source: "example.com".to_string(),
            }],
        )];
        let posts = vec!["capybaras are\neverywhere".to_string()];

        let prompt = distill_prompt(&trends, &coverage, &posts, 5);

        assert!(prompt.contains("capybara (momentum 900)"));
        assert!(prompt.contains("Capybara cafe opens (example.com)"));
        assert!(prompt.contains("- capybaras are everywhere"));
        assert!(prompt.contains("Pick the 5 strongest trends"));
    }

    #[test]
    fn test_strategy_prompt_numbers_images_per_trend() {
        let trends = vec![CuratedTrend {
            term: "capybara".to_string(),
            subject: "capybara in a hot spring".to_string(),
            context: String::new(),
        }];
        let attached = vec![("capybara".to_string(), 2), ("eclipse".to_string(), 0)];

        let prompt = strategy_prompt(&trends, &attached);

        assert!(prompt.contains("capybara: 2 images, numbered 1 through 2"));
        assert!(!prompt.contains("eclipse: 0 images"));
        assert!(prompt.contains("TREND: <term> | DECISION:"));
    }

    #[test]
    fn test_directives_parse_well_formed_lines() {
        let report = "Here is my plan.\n\
            TREND: capybara | DECISION: MEME | ACTION: SOAK IT ALL IN | SOURCE: 2\n\
            TREND: eclipse | DECISION: regen | ACTION: stylized eclipse over mountains | SOURCE: NONE\n\
            Thanks!";

        let directives = parse_directives(report);

        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].trend, "capybara");
        assert_eq!(directives[0].decision, AssetDecision::Meme);
        assert_eq!(directives[0].action, "SOAK IT ALL IN");
        assert_eq!(directives[0].source_index, Some(2));
        assert_eq!(directives[1].decision, AssetDecision::Regen);
        assert_eq!(directives[1].source_index, None);
    }

    #[test]
    fn test_directives_skip_unknown_decisions_and_malformed_lines() {
        let report = "TREND: a | DECISION: MAYBE | ACTION: x | SOURCE: 1\n\
            TREND: b | DECISION: CLEAN | SOURCE: 1\n\
            TREND: c | DECISION: CLEAN | ACTION: | SOURCE: 1";

        let directives = parse_directives(report);

        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].trend, "c");
        assert_eq!(directives[0].action, "");
    }
}
