//! Image generation through the Vertex AI Imagen predict endpoint.
//!
//! Used for trends where no harvested reference image is worth keeping.
//! Generation can be refused by the safety filter; that is a normal
//! outcome here, surfaced as `Ok(None)` so callers skip the trend
//! instead of retrying a request that will be refused again.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::error::Error;
use tracing::{info, instrument, warn};

use crate::api::{AskAsync, RetryAsk, RetryPolicy};
use crate::utils::truncate_for_log;

const IMAGEN_MODEL: &str = "imagen-3.0-generate-002";
const LOCATION: &str = "us-central1";

/// Kept out of every generated design: apparel mockups and baked-in
/// text ruin a print source.
const NEGATIVE_PROMPT: &str =
    "t-shirt, hoodie, mockup, apparel, clothing, watermark, text overlay";

/// REST client for the Imagen predict endpoint.
pub struct ImagenClient {
    http: reqwest::Client,
    token: String,
    project_id: String,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
    parameters: Parameters<'a>,
}

#[derive(Serialize)]
struct Instance<'a> {
    prompt: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters<'a> {
    sample_count: u32,
    aspect_ratio: &'a str,
    person_generation: &'a str,
    safety_setting: &'a str,
    negative_prompt: &'a str,
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    rai_filtered_reason: Option<String>,
}

impl ImagenClient {
    pub fn new(http: reqwest::Client, token: String, project_id: String) -> Self {
        Self {
            http,
            token,
            project_id,
        }
    }

    /// Generate one square image for `prompt`. `Ok(None)` means the
    /// request went through but the safety filter kept the image.
    #[instrument(level = "info", skip_all)]
    pub async fn generate(&self, prompt: &str) -> Result<Option<Vec<u8>>, Box<dyn Error>> {
        let endpoint = format!(
            "https://{LOCATION}-aiplatform.googleapis.com/v1/projects/{}/locations/{LOCATION}/publishers/google/models/{IMAGEN_MODEL}:predict",
            self.project_id
        );
        let request = PredictRequest {
            instances: vec![Instance { prompt }],
            parameters: Parameters {
                sample_count: 1,
                aspect_ratio: "1:1",
                person_generation: "dont_allow",
                safety_setting: "block_medium_and_above",
                negative_prompt: NEGATIVE_PROMPT,
            },
        };

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!(
                "Imagen API error ({status}): {}",
                truncate_for_log(&error_text, 500)
            )
            .into());
        }

        let reply: PredictResponse = response.json().await?;
        if let Some(bytes) = first_image(&reply)? {
            info!(bytes = bytes.len(), "Image generated");
            return Ok(Some(bytes));
        }

        let reason = reply
            .predictions
            .first()
            .and_then(|p| p.rai_filtered_reason.clone())
            .unwrap_or_else(|| "no image bytes in response".to_string());
        warn!(%reason, "Generation returned no image");
        Ok(None)
    }
}

fn first_image(reply: &PredictResponse) -> Result<Option<Vec<u8>>, base64::DecodeError> {
    let Some(prediction) = reply.predictions.first() else {
        return Ok(None);
    };
    match &prediction.bytes_base64_encoded {
        Some(b64) if !b64.is_empty() => Ok(Some(STANDARD.decode(b64)?)),
        _ => Ok(None),
    }
}

/// Binds an [`ImagenClient`] for use with [`RetryAsk`].
pub struct ImagenAsk<'a> {
    pub client: &'a ImagenClient,
}

impl AskAsync for ImagenAsk<'_> {
    type Response = Option<Vec<u8>>;

    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        self.client.generate(text).await
    }
}

/// Generate with the standard retry policy. Safety refusals are not
/// errors and come back on the first attempt.
pub async fn generate_with_backoff(
    client: &ImagenClient,
    prompt: &str,
) -> Result<Option<Vec<u8>>, Box<dyn Error>> {
    let api = RetryAsk::new(ImagenAsk { client }, RetryPolicy::standard());
    api.ask(prompt).await
}
