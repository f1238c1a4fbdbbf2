//! Settings advisor: the one piece of "smart" behaviour, delegated to a
//! hosted model. Callers only see a request in, and a response or a typed
//! error out.

pub mod gemini;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::settings::{self, ConversionSettings, TargetFormat};

pub use gemini::GeminiAdvisor;
pub use http::HttpAdvisor;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What the advisor is asked to tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorRequest {
    pub target_format: TargetFormat,
    pub lossless: bool,
    pub compression_speed: u8,
    #[serde(rename = "maxFileSizeKB")]
    pub max_file_size_kb: u32,
}

impl AdvisorRequest {
    pub fn validate(&self) -> Result<()> {
        settings::validate_compression_speed("compressionSpeed", self.compression_speed)?;
        settings::validate_max_file_size(self.max_file_size_kb)
    }
}

impl From<&ConversionSettings> for AdvisorRequest {
    fn from(s: &ConversionSettings) -> Self {
        Self {
            target_format: s.target_format,
            lossless: s.lossless,
            compression_speed: s.compression_speed,
            max_file_size_kb: s.max_file_size_kb,
        }
    }
}

/// Adjusted settings plus the model's explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorResponse {
    pub adjusted_lossless: bool,
    #[serde(deserialize_with = "integral_speed")]
    pub adjusted_compression_speed: u8,
    pub optimization_rationale: String,
}

impl AdvisorResponse {
    pub fn validate(&self) -> Result<()> {
        settings::validate_compression_speed(
            "adjustedCompressionSpeed",
            self.adjusted_compression_speed,
        )
    }

    /// Parse and range-check a JSON payload. Any mismatch is a validation error.
    pub fn from_json(text: &str) -> Result<Self> {
        let response: AdvisorResponse = serde_json::from_str(text)
            .map_err(|e| Error::Validation(format!("unexpected advisor response: {e}")))?;
        response.validate()?;
        Ok(response)
    }
}

// Models tend to emit `4.0` where an integer was asked for.
fn integral_speed<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u8, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "adjustedCompressionSpeed must be a small integer (got {value})"
        )));
    }
    Ok(value as u8)
}

/// Anything that can turn a settings request into adjusted settings.
///
/// Implementations fail with [`Error::ServiceUnavailable`] on transient
/// overload and [`Error::Validation`] when the answer has the wrong shape.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, request: &AdvisorRequest) -> Result<AdvisorResponse>;
}

/// Connection settings shared by the advisor clients.
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            endpoint: gemini::DEFAULT_ENDPOINT.to_string(),
            model: gemini::DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl AdvisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn client_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder().timeout(self.timeout)
    }

    pub(crate) fn client(&self) -> Result<reqwest::Client> {
        Ok(self.client_builder().build()?)
    }
}

/// Pull the message out of an `{"error": "..."}` body, falling back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match &v["error"] {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(o) => o.get("message").and_then(|m| m.as_str()).map(String::from),
            _ => None,
        })
        .unwrap_or_else(|| body.trim().to_string())
}
