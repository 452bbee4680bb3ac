mod cache;
mod config;
mod db;
mod enhancement;
mod errors;
mod llm_client;
mod models;
mod quota;
mod repository;
mod routes;
mod state;
mod store;
mod submission;
#[cfg(test)]
mod testing;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::db::create_pool;
use crate::enhancement::EnhancementPipeline;
use crate::llm_client::{Generator, LlmClient};
use crate::quota::QuotaTracker;
use crate::repository::{PgRepository, Repository};
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::redis::RedisStore;
use crate::store::SharedStore;
use crate::submission::blob::{BlobStore, S3BlobStore};
use crate::submission::extraction::DocumentTextExtractor;
use crate::submission::parser::{NlpClient, StructuredParser};
use crate::submission::stages::{StagePool, StageRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Resume Enhancer API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    let repository: Arc<dyn Repository> = Arc::new(PgRepository::new(db));

    // Initialize Redis. Cache and quota run disabled when it is missing or unreachable.
    let shared_store = connect_shared_store(&config).await;
    let cache = match &shared_store {
        Some(store) if config.cache_enabled => ResponseCache::shared(store.clone(), config.cache_ttl),
        _ => ResponseCache::disabled(),
    };
    let quota = match &shared_store {
        Some(store) if config.quota_enabled => QuotaTracker::shared(store.clone(), config.quota_limits),
        _ => QuotaTracker::disabled(config.quota_limits),
    };
    info!(
        "Response cache {}, usage quota {}",
        if cache.is_enabled() { "enabled" } else { "disabled" },
        if quota.is_enabled() { "enabled" } else { "disabled" }
    );

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let blobs: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(s3, config.s3_bucket.clone()));
    info!("S3 client initialized");

    // Initialize generator client
    let llm = LlmClient::new(config.llm.clone())?;
    if llm.available() {
        info!("Generator client initialized (model: {})", llm.model());
    } else {
        warn!("OPENAI_API_KEY not set, transforms will use the local fallback");
    }
    let generator: Arc<dyn Generator> = Arc::new(llm);

    // Initialize NLP parser client
    let parser: Arc<dyn StructuredParser> =
        Arc::new(NlpClient::new(&config.nlp_service_url, config.nlp_timeout)?);
    info!("NLP service client initialized ({})", config.nlp_service_url);

    // Background stages share one bounded pool
    let stages = StageRunner::new(
        repository.clone(),
        blobs.clone(),
        Arc::new(DocumentTextExtractor),
        parser.clone(),
        StagePool::new(config.stage_concurrency),
    );

    let pipeline = EnhancementPipeline::new(
        repository,
        blobs,
        stages,
        generator,
        cache.clone(),
        quota.clone(),
        config.pipeline,
    );

    // Build app state
    let state = AppState {
        pipeline: Arc::new(pipeline),
        cache,
        quota,
        parser,
    };

    // Build router
    let app = build_router(state, config.pipeline.max_upload_bytes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn connect_shared_store(config: &Config) -> Option<Arc<dyn SharedStore>> {
    if !config.cache_enabled && !config.quota_enabled {
        return None;
    }
    let Some(url) = config.redis_url.as_deref() else {
        warn!("REDIS_URL not set, cache and usage tracking are disabled");
        return None;
    };
    match RedisStore::connect(url).await {
        Ok(store) => {
            info!("Redis connection established");
            Some(Arc::new(store))
        }
        Err(e) => {
            warn!("Redis unavailable, cache and usage tracking are disabled: {e}");
            None
        }
    }
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "enhancer-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
