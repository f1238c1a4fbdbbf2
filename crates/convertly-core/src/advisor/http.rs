use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{error_message, Advisor, AdvisorConfig, AdvisorRequest, AdvisorResponse};
use crate::error::{Error, Result};

/// Client for a `POST /api/optimize` route such as the one `convertly-server` hosts.
pub struct HttpAdvisor {
    client: reqwest::Client,
    url: String,
}

impl HttpAdvisor {
    pub fn new(url: impl Into<String>, config: &AdvisorConfig) -> Result<Self> {
        let url = url.into();
        let mut builder = config.client_builder();
        if is_loopback(&url) {
            builder = builder.no_proxy();
        }
        Ok(Self {
            client: builder.build()?,
            url,
        })
    }
}

fn is_loopback(url: &str) -> bool {
    let host = url.split("://").nth(1).unwrap_or(url);
    ["localhost", "127.0.0.1", "[::1]"]
        .iter()
        .any(|h| host.starts_with(h))
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn advise(&self, request: &AdvisorRequest) -> Result<AdvisorResponse> {
        request.validate()?;

        debug!(url = %self.url, "posting settings to advisor route");
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        let text = response.text().await?;

        match status {
            s if s.is_success() => AdvisorResponse::from_json(&text),
            StatusCode::SERVICE_UNAVAILABLE => Err(Error::ServiceUnavailable(format!(
                "{} - {}",
                status,
                error_message(&text)
            ))),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(Error::Validation(error_message(&text)))
            }
            _ => Err(Error::Advisor(format!("{} - {}", status, error_message(&text)))),
        }
    }
}
