use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("NLP service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("NLP service timed out after {0}s")]
    Timeout(u64),

    #[error("NLP service returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("NLP service returned invalid JSON: {0}")]
    InvalidBody(String),
}

/// Converts plain resume text into a structured JSON value.
#[async_trait]
pub trait StructuredParser: Send + Sync {
    async fn parse(&self, text: &str) -> Result<Value, ParseError>;

    async fn healthy(&self) -> bool;
}

#[derive(Serialize)]
struct ParseRequest<'a> {
    text: &'a str,
}

/// HTTP client for the external NLP service (`POST /parse`, `GET /health`).
#[derive(Clone)]
pub struct NlpClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl NlpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build NLP HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn classify(&self, error: reqwest::Error) -> ParseError {
        if error.is_timeout() {
            ParseError::Timeout(self.timeout.as_secs())
        } else {
            ParseError::Http(error)
        }
    }
}

#[async_trait]
impl StructuredParser for NlpClient {
    async fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let response = self
            .client
            .post(format!("{}/parse", self.base_url))
            .json(&ParseRequest { text })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.classify(e))?;
        if !status.is_success() {
            return Err(ParseError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| ParseError::InvalidBody(e.to_string()))?;
        debug!("NLP service parsed {} chars of text", text.len());
        Ok(value)
    }

    async fn healthy(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => r
                .text()
                .await
                .map(|body| body.contains("healthy"))
                .unwrap_or(false),
            _ => false,
        }
    }
}
