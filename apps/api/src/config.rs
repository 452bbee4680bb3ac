use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::enhancement::{PipelineSettings, ReusePolicy};
use crate::llm_client::{LlmSettings, DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_RETRY_BASE_DELAY};
use crate::quota::QuotaLimits;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or any value is malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub port: u16,
    pub rust_log: String,

    /// Shared key-value backend for cache and quota. Both are disabled without it.
    pub redis_url: Option<String>,
    pub cache_enabled: bool,
    pub quota_enabled: bool,
    pub cache_ttl: Duration,
    pub quota_limits: QuotaLimits,

    pub llm: LlmSettings,

    pub nlp_service_url: String,
    pub nlp_timeout: Duration,

    pub stage_concurrency: usize,
    pub pipeline: PipelineSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let cache_ttl_hours: u64 = env.parse_or("CACHE_TTL_HOURS", 24)?;
        let cache_ttl_secs = cache_ttl_hours
            .checked_mul(3600)
            .with_context(|| format!("CACHE_TTL_HOURS is too large: {cache_ttl_hours}"))?;

        Ok(Config {
            database_url: env.require("DATABASE_URL")?,
            s3_bucket: env.require("S3_BUCKET")?,
            s3_endpoint: env.require("S3_ENDPOINT")?,
            aws_access_key_id: env.require("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: env.require("AWS_SECRET_ACCESS_KEY")?,
            port: env.parse_or("PORT", 8080)?,
            rust_log: env.get("RUST_LOG").unwrap_or_else(|| "info".to_string()),

            redis_url: env.get("REDIS_URL"),
            cache_enabled: env.flag("CACHE_ENABLED", true)?,
            quota_enabled: env.flag("QUOTA_ENABLED", true)?,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            quota_limits: QuotaLimits {
                daily_generative: env.parse_or("DAILY_GPT_LIMIT", 10)?,
                daily_any_transform: env.parse_or("DAILY_TRANSFORM_LIMIT", 20)?,
            },

            llm: LlmSettings {
                api_base: env
                    .get("OPENAI_API_BASE")
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                api_key: env.get("OPENAI_API_KEY"),
                model: env
                    .get("OPENAI_MODEL")
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                max_tokens: env.parse_or("OPENAI_MAX_TOKENS", 2000)?,
                temperature: env.parse_or("OPENAI_TEMPERATURE", 0.3)?,
                timeout: Duration::from_secs(env.parse_or("GENERATION_TIMEOUT_SECS", 60)?),
                retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            },

            nlp_service_url: env
                .get("NLP_SERVICE_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            nlp_timeout: Duration::from_secs(env.parse_or("NLP_TIMEOUT_SECS", 30)?),

            stage_concurrency: env.parse_or("STAGE_CONCURRENCY", 4)?,
            pipeline: PipelineSettings {
                max_upload_bytes: env.parse_or("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,
                reuse_policy: env.parse_or("REUSE_POLICY", ReusePolicy::default())?,
            },
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// The trimmed value, with blank values treated as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.get(key)
            .with_context(|| format!("Required environment variable '{key}' is not set"))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("{key} has invalid value '{raw}': {e}")),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => anyhow::bail!("{key} must be a boolean, got '{v}'"),
            },
        }
    }
}
