//! Shardwork partition scheduler runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shardwork_application::{
    CursorDocument, DocumentProcessor, DocumentStore, ProcessingContext, SchedulerConfig,
    SchedulerDriver,
};
use shardwork_core::{AppError, AppResult, HolderId};
use shardwork_infrastructure::PostgresDocumentStore;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Logs every streamed document.
struct LoggingProcessor;

#[async_trait]
impl DocumentProcessor for LoggingProcessor {
    async fn process(
        &self,
        context: &ProcessingContext,
        document: &CursorDocument,
    ) -> AppResult<()> {
        debug!(
            job_id = %context.job_id,
            task_id = %context.task_id,
            partition_id = %context.partition_id,
            collection = %context.collection,
            key = %document.key,
            "document processed"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let database_url = required_env("SHARDWORK_DATABASE_URL")?;
    let config = load_config()?;
    let pool = connect_pool(database_url.as_str()).await?;
    let store = PostgresDocumentStore::new(pool);
    store.migrate().await?;

    info!(
        holder_id = %config.holder_id,
        ambits = ?config.ambits,
        tick_interval = ?config.tick_interval,
        batch_size = config.batch_size,
        commit_every = config.commit_every,
        lease_seconds = config.lease_duration_seconds,
        "shardwork-worker started"
    );

    let store: Arc<dyn DocumentStore> = Arc::new(store);
    let driver = SchedulerDriver::new(config, store, Arc::new(LoggingProcessor))?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(error) => warn!(error = %error, "failed to listen for ctrl-c"),
        }
        signal_token.cancel();
    });

    let stats = driver.run(shutdown).await?;
    info!(
        iterations = stats.iterations,
        tasks_dispatched = stats.tasks_dispatched,
        tasks_done = stats.tasks_done,
        tasks_failed = stats.tasks_failed,
        jobs_done = stats.jobs_done,
        documents = stats.workers.documents,
        errors = stats.workers.errors,
        "shardwork-worker stopped"
    );
    Ok(())
}

fn load_config() -> AppResult<SchedulerConfig> {
    let defaults = SchedulerConfig::default();
    let ambits = env::var("SHARDWORK_AMBITS")
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|ambit| !ambit.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    let holder_id = match env::var("SHARDWORK_HOLDER_ID") {
        Ok(value) if !value.trim().is_empty() => HolderId::new(value.trim())?,
        _ => HolderId::generate("shardwork-worker"),
    };
    let max_iterations = match env::var("SHARDWORK_MAX_ITERATIONS") {
        Ok(_) => Some(parse_env_u64("SHARDWORK_MAX_ITERATIONS", 0)?),
        Err(_) => None,
    };

    SchedulerConfig {
        ambits,
        tick_interval: Duration::from_millis(parse_env_u64(
            "SHARDWORK_TICK_INTERVAL_MS",
            u64::try_from(defaults.tick_interval.as_millis()).unwrap_or(u64::MAX),
        )?),
        exit_on_idle: parse_env_bool("SHARDWORK_EXIT_ON_IDLE", defaults.exit_on_idle)?,
        max_iterations,
        batch_size: parse_env_usize("SHARDWORK_BATCH_SIZE", defaults.batch_size)?,
        commit_every: parse_env_usize("SHARDWORK_COMMIT_EVERY", defaults.commit_every)?,
        lease_duration_seconds: parse_env_u32(
            "SHARDWORK_LEASE_SECONDS",
            defaults.lease_duration_seconds,
        )?,
        max_restarts: parse_env_u32("SHARDWORK_MAX_RESTARTS", defaults.max_restarts)?,
        holder_id,
        ..defaults
    }
    .validate()
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Store(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_bool(name: &str, default: bool) -> AppResult<bool> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Validation(format!(
                "invalid {name} value '{value}': expected true or false"
            ))),
        },
        Err(_) => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
