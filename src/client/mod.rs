//! Client for the `/correct` endpoint that retries while the model loads

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{info, warn};

use crate::server::CorrectionResponse;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response {status}: {body}")]
    UnexpectedResponse { status: u16, body: String },

    #[error("Service not ready after {attempts} attempts")]
    NotReady { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 100 attempts, 3 s apart: five minutes for a cold model download.
        Self {
            max_attempts: 100,
            delay: Duration::from_secs(3),
        }
    }
}

/// Status code and parsed body of one `/correct` call
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionReply {
    pub status: StatusCode,
    pub body: CorrectionResponse,
}

impl CorrectionReply {
    pub fn is_loading(&self) -> bool {
        self.status == StatusCode::SERVICE_UNAVAILABLE || self.body == CorrectionResponse::Loading
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionClient {
    http: reqwest::Client,
    base_url: String,
}

impl CorrectionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One request, no retries
    pub async fn correct(&self, sentence: &str) -> Result<CorrectionReply, ClientError> {
        let response = self
            .http
            .post(format!("{}/correct", self.base_url))
            .json(&serde_json::json!({ "sentence": sentence }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = serde_json::from_str::<CorrectionResponse>(&text).map_err(|_| {
            ClientError::UnexpectedResponse {
                status: status.as_u16(),
                body: text.clone(),
            }
        })?;

        Ok(CorrectionReply { status, body })
    }

    /// Retry on refused connections and loading responses; any other outcome is returned as-is
    pub async fn correct_with_retry(
        &self,
        sentence: &str,
        policy: RetryPolicy,
    ) -> Result<CorrectionReply, ClientError> {
        for attempt in 1..=policy.max_attempts {
            match self.correct(sentence).await {
                Ok(reply) if reply.is_loading() => {
                    info!(
                        "⏳ Attempt {}/{}: model still loading, waiting...",
                        attempt, policy.max_attempts
                    );
                }
                Ok(reply) => return Ok(reply),
                Err(ClientError::Http(e)) if e.is_connect() => {
                    warn!(
                        "Attempt {}/{}: service not reachable, retrying...",
                        attempt, policy.max_attempts
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        Err(ClientError::NotReady {
            attempts: policy.max_attempts,
        })
    }
}
