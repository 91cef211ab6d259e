use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunefeed::actions::Actions;
use tunefeed::config::{self, AppConfig};
use tunefeed::feed::FeedEngine;
use tunefeed::queue::{run_consumer, ConsumerSettings, MemoryTriggerQueue, TriggerQueue};
use tunefeed::server::{make_router, ServerState};
use tunefeed::store::{FeedDataStore, SqliteFeedDataStore};

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Path to the sqlite database file (created if missing).
    #[clap(long, default_value = "tunefeed.db")]
    pub db_path: PathBuf,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// Maximum trigger deliveries pulled per consumer poll.
    #[clap(long, default_value_t = 10)]
    pub batch_size: usize,

    /// Milliseconds between consumer polls when the queue is empty.
    #[clap(long, default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Wall-clock budget in seconds for one user's recompute.
    #[clap(long, default_value_t = 60)]
    pub recompute_timeout_sec: u64,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            port: args.port,
            batch_size: args.batch_size,
            poll_interval_ms: args.poll_interval_ms,
            recompute_timeout_sec: args.recompute_timeout_sec,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_path: {:?}", app_config.db_path);
    info!("  port: {}", app_config.port);

    let store: Arc<dyn FeedDataStore> = Arc::new(SqliteFeedDataStore::new(&app_config.db_path)?);
    let queue: Arc<dyn TriggerQueue> = Arc::new(MemoryTriggerQueue::new());
    let engine = Arc::new(FeedEngine::new(store.clone()));
    let actions = Arc::new(Actions::new(store.clone(), queue.clone()));

    let router = make_router(ServerState {
        store: store.clone(),
        actions,
    });

    let shutdown_token = CancellationToken::new();
    let consumer_settings = ConsumerSettings {
        batch_size: app_config.batch_size,
        poll_interval: app_config.poll_interval,
        recompute_timeout: app_config.recompute_timeout,
    };
    let consumer = run_consumer(
        engine,
        queue,
        consumer_settings,
        shutdown_token.child_token(),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", app_config.port)).await?;
    info!("Ready to serve at port {}!", app_config.port);

    tokio::select! {
        result = axum::serve(listener, router) => {
            info!("HTTP server stopped: {:?}", result);
            shutdown_token.cancel();
            result.map_err(Into::into)
        },
        _ = consumer => {
            info!("Consumer stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            Ok(())
        }
    }
}
