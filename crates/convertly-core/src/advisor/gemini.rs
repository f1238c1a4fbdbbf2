use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{error_message, Advisor, AdvisorConfig, AdvisorRequest, AdvisorResponse};
use crate::error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Asks a hosted Gemini model for adjusted settings through `generateContent`.
pub struct GeminiAdvisor {
    client: reqwest::Client,
    config: AdvisorConfig,
}

impl GeminiAdvisor {
    pub fn new(config: AdvisorConfig) -> Result<Self> {
        if config.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Validation(
                "an API key is required for the hosted advisor".to_string(),
            ));
        }
        Ok(Self {
            client: config.client()?,
            config,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// The fixed prompt sent for every request.
pub fn render_prompt(request: &AdvisorRequest) -> String {
    format!(
        "You tune image compression settings. The user wants to convert an image with the \
         settings below and keep the output under a size limit.\n\
         \n\
         Target format: {format}\n\
         Lossless: {lossless}\n\
         Compression speed (1 = slowest, best quality; 10 = fastest): {speed}\n\
         Maximum file size (KB): {max_kb}\n\
         \n\
         Return the lossless flag and compression speed to use, and a short explanation of \
         the choice. If the current settings should already fit the limit, return them \
         unchanged. Otherwise adjust them, giving up as little image quality as possible.\n\
         Answer with JSON only.",
        format = request.target_format,
        lossless = request.lossless,
        speed = request.compression_speed,
        max_kb = request.max_file_size_kb,
    )
}

fn response_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "adjustedLossless": { "type": "BOOLEAN" },
            "adjustedCompressionSpeed": { "type": "INTEGER", "minimum": 1, "maximum": 10 },
            "optimizationRationale": { "type": "STRING" }
        },
        "required": ["adjustedLossless", "adjustedCompressionSpeed", "optimizationRationale"]
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: serde_json::Value,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map_or(trimmed, str::trim)
}

/// Extract the advisor answer from a raw `generateContent` response body.
pub fn parse_generate_response(body: &str) -> Result<AdvisorResponse> {
    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| Error::Validation(format!("malformed model response: {e}")))?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .map(|c| c.content.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(Error::Validation("model returned no output".to_string()));
    }
    AdvisorResponse::from_json(strip_code_fence(&text))
}

#[async_trait]
impl Advisor for GeminiAdvisor {
    async fn advise(&self, request: &AdvisorRequest) -> Result<AdvisorResponse> {
        request.validate()?;

        let body = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: render_prompt(request),
                }],
            }],
            generation_config: json!({
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            }),
        };

        debug!(model = %self.config.model, format = %request.target_format, "requesting advice");
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.config.api_key.as_deref().unwrap_or_default())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        match status {
            s if s.is_success() => {
                let advice = parse_generate_response(&text)?;
                info!(
                    lossless = advice.adjusted_lossless,
                    speed = advice.adjusted_compression_speed,
                    "model advice received"
                );
                Ok(advice)
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => Err(
                Error::ServiceUnavailable(format!("{} - {}", status, error_message(&text))),
            ),
            _ => Err(Error::Advisor(format!("{} - {}", status, error_message(&text)))),
        }
    }
}
