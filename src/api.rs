//! Gemini API interaction with exponential backoff retry logic.
//!
//! This module holds the REST client for Google's generative language API
//! plus the retry machinery every model call goes through. Requests carry
//! an optional system instruction and inline images, and fall back to an
//! older model generation when the preferred one errors.
//!
//! # Architecture
//!
//! The module uses a trait-based design for flexibility:
//! - [`AskAsync`]: Core trait defining async model interaction
//! - [`GeminiAsk`]: Binds a [`GeminiClient`] to a system instruction and images
//! - [`RetryAsk`]: Decorator that adds retry logic to any `AskAsync` implementation
//!
//! # Retry Strategy
//!
//! - Maximum 5 attempts
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//! - A server-suggested "retry in Ns" delay overrides the schedule
//! - Daily quota exhaustion aborts immediately instead of burning retries

use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use rand::{rng, Rng};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::utils::truncate_for_log;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Models tried in order for each text request. The older generation is
/// kept as a fallback for quota and availability gaps in the newer one.
const MODEL_FALLBACK: [&str; 2] = ["gemini-2.5-flash", "gemini-2.0-flash"];

/// Server hint of the form "retry in 32.5s" embedded in 429 bodies.
static RETRY_DELAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[Rr]etry in ([\d.]+)s").unwrap()
});

/// An image attached to a prompt, sent inline as base64.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime: String,
    pub data: Vec<u8>,
}

/// REST client for the generative language API.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self { http, api_key }
    }

    /// Send one prompt, walking the model fallback chain until a model
    /// answers. Returns the last model's error when all of them fail.
    pub async fn ask_text(
        &self,
        prompt: &str,
        system: Option<&str>,
        images: &[InlineImage],
    ) -> Result<String, Box<dyn Error>> {
        let mut last_err: Option<Box<dyn Error>> = None;
        for model in MODEL_FALLBACK {
            match self.generate_with(model, prompt, system, images).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    warn!(model, error = %e, "Model call failed, trying next fallback");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| "no generation models configured".into()))
    }

    #[instrument(level = "debug", skip_all, fields(model = model))]
    async fn generate_with(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
        images: &[InlineImage],
    ) -> Result<String, Box<dyn Error>> {
        let mut parts = vec![Part::Text { text: prompt }];
        for image in images {
            parts.push(Part::Inline {
                inline_data: InlineData {
                    mime_type: image.mime.clone(),
                    data: STANDARD.encode(&image.data),
                },
            });
        }
        let request = GenerateRequest {
            system_instruction: system.map(|text| Content {
                parts: vec![Part::Text { text }],
            }),
            contents: vec![Content { parts }],
        };

        let response = self
            .http
            .post(format!("{GEMINI_API_BASE}/models/{model}:generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!(
                "Gemini API error ({status}): {}",
                truncate_for_log(&error_text, 500)
            )
            .into());
        }

        let reply: GenerateResponse = response.json().await?;
        let text = reply_text(&reply);
        if text.trim().is_empty() {
            return Err("Gemini returned an empty reply".into());
        }
        Ok(text)
    }
}

/// Concatenated text parts of the first candidate.
fn reply_text(reply: &GenerateResponse) -> String {
    reply
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

/// Trait for async model interaction.
///
/// Implementors of this trait can send text to a model and receive a
/// response. The abstraction allows different backends or decorators
/// (like retry logic) to compose.
pub trait AskAsync {
    /// The type of response returned by the model.
    type Response;

    /// Send text to the model and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Retry schedule shared by every decorated caller.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub max_attempts: usize,
    /// Initial delay between attempts (doubles each time).
    pub base_delay: StdDuration,
    /// Cap on the exponential delay, before jitter.
    pub max_delay: StdDuration,
}

impl RetryPolicy {
    pub fn standard() -> Self {
        Self {
            max_attempts: 5,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(30),
        }
    }

    /// Delay before the next attempt. A server hint wins outright;
    /// otherwise exponential backoff with jitter.
    fn backoff(&self, attempt: usize, error: &str) -> StdDuration {
        if let Some(hint) = delay_hint(error) {
            return hint;
        }
        let exp = attempt.saturating_sub(1).min(16) as u32;
        let mut delay = self.base_delay.saturating_mul(1u32 << exp);
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

/// Server-suggested wait parsed out of an error body, padded by a
/// second so the quota window has actually rolled over.
fn delay_hint(error: &str) -> Option<StdDuration> {
    let caps = RETRY_DELAY_RE.captures(error)?;
    let seconds: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(StdDuration::from_secs_f64(seconds.min(3600.0) + 1.0))
}

/// Whether an error names a per-day quota. Waiting seconds will not fix
/// a cap that resets at midnight. "limit: 20" is the free tier's daily
/// request cap as quota errors spell it.
fn is_daily_cap(error: &str) -> bool {
    error.contains("PerDay")
        || error.contains("limit: 20")
        || error.to_lowercase().contains("daily")
}

/// Wrapper that adds retry logic to any [`AskAsync`] implementation.
///
/// The decorator transparently retries transient API failures following
/// its [`RetryPolicy`], honoring server-suggested delays and refusing to
/// retry daily-quota exhaustion.
pub struct RetryAsk<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_attempts", &self.policy.max_attempts)
            .field("base_delay", &self.policy.base_delay)
            .field("max_delay", &self.policy.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();
                    let message = e.to_string();

                    if attempt >= self.policy.max_attempts {
                        error!(
                            attempt,
                            max = self.policy.max_attempts,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                            elapsed_ms_total = total_dt.as_millis() as u128,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }
                    if is_daily_cap(&message) {
                        error!(
                            attempt,
                            error = %e,
                            "Daily quota exhausted; not retrying"
                        );
                        return Err(e);
                    }

                    let delay = self.policy.backoff(attempt, &message);
                    warn!(
                        attempt,
                        max = self.policy.max_attempts,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                        elapsed_ms_total = total_dt.as_millis() as u128,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Binds a [`GeminiClient`] to the context of one conversation so it can
/// be decorated by [`RetryAsk`].
pub struct GeminiAsk<'a> {
    pub client: &'a GeminiClient,
    pub system: Option<&'a str>,
    pub images: &'a [InlineImage],
}

impl AskAsync for GeminiAsk<'_> {
    type Response = String;

    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = self.client.ask_text(text, self.system, self.images).await;
        let dt = t0.elapsed();

        match &res {
            Ok(_) => {}
            Err(e) => warn!(elapsed_ms = dt.as_millis() as u128, error = %e, "API call failed"),
        }
        res
    }
}

/// High-level entry point for one model conversation with retry.
///
/// Wraps the request in the standard [`RetryPolicy`] and logs total
/// timing either way.
#[instrument(level = "info", skip_all)]
pub async fn ask_with_backoff(
    client: &GeminiClient,
    prompt: &str,
    system: Option<&str>,
    images: &[InlineImage],
) -> Result<String, Box<dyn Error>> {
    let t0 = Instant::now();
    let asker = GeminiAsk {
        client,
        system,
        images,
    };
    let api = RetryAsk::new(asker, RetryPolicy::standard());
    let res = api.ask(prompt).await;
    let dt = t0.elapsed();

    match &res {
        Ok(_) => info!(
            elapsed_ms_total = dt.as_millis() as u128,
            "ask_with_backoff succeeded"
        ),
        Err(e) => {
            error!(elapsed_ms_total = dt.as_millis() as u128, error = %e, "ask_with_backoff failed")
        }
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_request_serialization_shape() {
        let request = GenerateRequest {
            system_instruction: Some(Content {
                parts: vec![Part::Text { text: "be terse" }],
            }),
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: "hello" },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: "image/png".to_string(),
                            data: "QUJD".to_string(),
                        },
                    },
                ],
            }],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
    }

    #[test]
    fn test_system_instruction_omitted_when_absent() {
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content {
                parts: vec![Part::Text { text: "hello" }],
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_response_decode_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]}}]}"#;
        let reply: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(reply_text(&reply), "Hello world");
    }

    #[test]
    fn test_response_decode_tolerates_empty_candidates() {
        let reply: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(reply_text(&reply), "");
        let reply: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(reply_text(&reply), "");
    }

    #[test]
    fn test_delay_hint_honors_server_suggestion() {
        let hint = delay_hint("429 RESOURCE_EXHAUSTED. Please retry in 32.5s.").unwrap();
        assert_eq!(hint, StdDuration::from_secs_f64(33.5));
    }

    #[test]
    fn test_delay_hint_absent_without_suggestion() {
        assert!(delay_hint("500 internal error").is_none());
        assert!(delay_hint("").is_none());
    }

    #[test]
    fn test_daily_cap_detection() {
        assert!(is_daily_cap(
            "quota metric GenerateRequestsPerDayPerProjectPerModel exceeded"
        ));
        assert!(is_daily_cap("Daily limit reached"));
        assert!(is_daily_cap("quota_value { limit: 20 }"));
        assert!(!is_daily_cap("rate limited, retry shortly"));
    }

    #[test]
    fn test_backoff_respects_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: StdDuration::from_secs(1),
            max_delay: StdDuration::from_secs(30),
        };
        let delay = policy.backoff(9, "boom");
        assert!(delay <= StdDuration::from_secs(30) + StdDuration::from_millis(250));
    }

    struct CountingAsk {
        calls: AtomicUsize,
        fail_first: usize,
        error: &'static str,
    }

    impl AskAsync for CountingAsk {
        type Response = String;

        async fn ask(&self, _text: &str) -> Result<String, Box<dyn Error>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(self.error.into())
            } else {
                Ok("ok".to_string())
            }
        }
    }

    fn instant_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: StdDuration::ZERO,
            max_delay: StdDuration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let inner = CountingAsk {
            calls: AtomicUsize::new(0),
            fail_first: 2,
            error: "503 overloaded",
        };
        let api = RetryAsk::new(inner, instant_policy(5));

        let reply = api.ask("hello").await.unwrap();

        assert_eq!(reply, "ok");
        assert_eq!(api.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhaust_after_max_attempts() {
        let inner = CountingAsk {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
            error: "503 overloaded",
        };
        let api = RetryAsk::new(inner, instant_policy(3));

        assert!(api.ask("hello").await.is_err());
        assert_eq!(api.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_daily_cap_aborts_without_retrying() {
        let inner = CountingAsk {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
            error: "GenerateRequestsPerDayPerProject exceeded",
        };
        let api = RetryAsk::new(inner, instant_policy(5));

        assert!(api.ask("hello").await.is_err());
        assert_eq!(api.inner.calls.load(Ordering::SeqCst), 1);
    }
}
