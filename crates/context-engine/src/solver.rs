use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as Base64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("solver request failed: {0}")]
    Http(String),
    #[error("solver rejected the challenge: {0}")]
    Rejected(String),
    #[error("solver timed out after {0:?}")]
    Timeout(Duration),
}

/// Opaque interactive-challenge solver: image bytes in, recognized text out.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<String, SolverError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub endpoint: String,
    #[serde(with = "formpilot_core_types::duration_str")]
    pub timeout: Duration,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9901/solve".to_string(),
            timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Serialize)]
struct SolveRequest {
    image_base64: String,
}

#[derive(Deserialize)]
struct SolveResponse {
    text: Option<String>,
    error: Option<String>,
}

/// Forwards the challenge image to an external recognition endpoint.
pub struct HttpChallengeSolver {
    client: reqwest::Client,
    config: SolverConfig,
}

impl HttpChallengeSolver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChallengeSolver for HttpChallengeSolver {
    async fn solve(&self, image: &[u8]) -> Result<String, SolverError> {
        let body = SolveRequest {
            image_base64: Base64.encode(image),
        };
        let send = self
            .client
            .post(&self.config.endpoint)
            .json(&body)
            .timeout(self.config.timeout)
            .send();
        let response = send.await.map_err(|err| {
            if err.is_timeout() {
                SolverError::Timeout(self.config.timeout)
            } else {
                SolverError::Http(err.to_string())
            }
        })?;
        let parsed: SolveResponse = response
            .json()
            .await
            .map_err(|err| SolverError::Http(err.to_string()))?;
        match (parsed.text, parsed.error) {
            (Some(text), _) if !text.trim().is_empty() => {
                debug!(target: "solver", chars = text.len(), "challenge solved");
                Ok(text.trim().to_string())
            }
            (_, Some(error)) => Err(SolverError::Rejected(error)),
            _ => Err(SolverError::Rejected("empty recognition result".into())),
        }
    }
}
