//! Application state: shared stores, queue, limiter, verifier, metrics and
//! the upstream HTTP client.

use std::sync::Arc;
use std::time::Duration;

use mongodb::options::ClientOptions;
use mongodb::bson::doc;
use reqwest::Client as HttpClient;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::handlers::proxy::PROXY_USER_AGENT;
use crate::repositories::{
    CallLogMongoRepository, CallLogRepository, ClientMongoRepository, ClientRepository,
    TaskMongoRepository, TaskRepository,
};
use crate::services::metrics::MetricsService;
use crate::services::queue::{RedisTaskQueue, TaskQueue};
use crate::services::rate_limiter::RateLimiterService;
use crate::services::signature::HmacSignatureVerifier;

/// Shared application state, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Handle kept for clean shutdown of the document store; absent when
    /// the state is assembled over external store implementations.
    pub db_client: Option<mongodb::Client>,
    pub client_repo: Arc<dyn ClientRepository>,
    pub call_log_repo: Arc<dyn CallLogRepository>,
    pub task_repo: Arc<dyn TaskRepository>,
    /// Present only when the async pipeline is enabled.
    pub task_queue: Option<Arc<dyn TaskQueue>>,
    pub rate_limiter: Arc<RateLimiterService>,
    pub signature_verifier: Arc<HmacSignatureVerifier>,
    pub metrics: Arc<MetricsService>,
    pub http_client: HttpClient,
}

impl AppState {
    /// Connect every dependency and bootstrap store indexes.
    pub async fn new(config: Config) -> Result<Self> {
        info!("initializing application state");

        let client_options = ClientOptions::parse(&config.database.url).await?;
        let mongo = mongodb::Client::with_options(client_options)?;
        let db = mongo.database(&config.database.db);
        db.run_command(doc! { "ping": 1 }, None).await?;
        info!(db = %config.database.db, "document store connected");

        let client_repo = ClientMongoRepository::new(&db);
        client_repo.ensure_indexes().await;
        let call_log_repo = CallLogMongoRepository::new(&db);
        call_log_repo.ensure_indexes().await;
        let task_repo = TaskMongoRepository::new(&db);
        task_repo.ensure_indexes().await;

        let task_queue: Option<Arc<dyn TaskQueue>> = if config.async_tasks.enabled {
            let queue = RedisTaskQueue::connect(&config.async_tasks.redis).await?;
            Some(Arc::new(queue))
        } else {
            None
        };

        let signature_verifier = Arc::new(HmacSignatureVerifier::new(Duration::from_secs(
            config.auth.signature_time_window,
        )));

        Ok(Self {
            config: Arc::new(config),
            db_client: Some(mongo),
            client_repo: Arc::new(client_repo),
            call_log_repo: Arc::new(call_log_repo),
            task_repo: Arc::new(task_repo),
            task_queue,
            rate_limiter: Arc::new(RateLimiterService::new()),
            signature_verifier,
            metrics: Arc::new(MetricsService::new()?),
            http_client: create_http_client()?,
        })
    }
}

/// Upstream HTTP client: no total timeout (per-request deadlines come from
/// the target config and streaming responses are long-lived), tuned for
/// many idle keep-alives.
pub fn create_http_client() -> Result<HttpClient> {
    Ok(HttpClient::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(100)
        .user_agent(PROXY_USER_AGENT)
        .build()?)
}
