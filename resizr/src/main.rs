//! Entry point: loads configuration, wires the engine's components together,
//! and runs the HTTP server until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use resizr_api::server::ApiServer;
use resizr_api::AppState;
use resizr_model::auth::AuthGate;
use resizr_model::codec::ImageRsCodec;
use resizr_model::deduper::Deduper;
use resizr_model::hash_index::HashIndex;
use resizr_model::health::HealthProbe;
use resizr_model::metadata_repo::MetadataRepo;
use resizr_model::metadata_store::RedisMetadataStore;
use resizr_model::object_store::S3ObjectStore;
use resizr_model::rate_limit::RateGate;
use resizr_model::service::ImageService;
use resizr_model::variant_engine::VariantEngine;
use resizr_util::config::Config;

#[derive(Parser)]
#[command(name = "resizr", about = "Content-addressed image resizing and serving")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default if no subcommand is given).
    Server {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print a fresh API key and exit without starting the server.
    GenerateKey,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Server { config: None }) {
        Command::GenerateKey => {
            println!("{}", AuthGate::generate_key());
            Ok(())
        }
        Command::Server { config } => run_server(config).await,
    }
}

async fn run_server(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load(config_path.as_deref())?;
    init_logging(&config.log_format, &config.log_level);

    let object_store: Arc<dyn resizr_model::object_store::ObjectStore> =
        Arc::new(S3ObjectStore::new(&config.object_store)?);
    let metadata_store: Arc<dyn resizr_model::metadata_store::MetadataStore> =
        Arc::new(RedisMetadataStore::connect(&config.metadata_store_url).await?);
    let codec: Arc<dyn resizr_model::codec::ImageCodec> = Arc::new(ImageRsCodec);

    let metadata_repo = Arc::new(MetadataRepo::new(metadata_store.clone()));
    let hash_index = Arc::new(HashIndex::new(metadata_store.clone()));

    let deduper = Deduper::new(
        object_store.clone(),
        codec.clone(),
        metadata_repo.clone(),
        hash_index.clone(),
        config.max_file_size,
    );
    let variant_engine = VariantEngine::new(
        object_store.clone(),
        codec.clone(),
        metadata_repo.clone(),
        hash_index.clone(),
        config.thumbnail_size,
        config.quality,
    );
    let image_service = Arc::new(ImageService::new(
        object_store.clone(),
        metadata_repo.clone(),
        hash_index.clone(),
        deduper,
        variant_engine,
        config.thumbnail_size,
        config.max_width,
        config.max_height,
    ));

    let auth_gate = Arc::new(AuthGate::new(
        config.auth_enabled,
        config.read_write_keys.clone(),
        config.read_only_keys.clone(),
    ));
    let rate_gate = Arc::new(RateGate::new(&config.rate_limit));
    let health_probe = Arc::new(HealthProbe::new(metadata_store, object_store));

    let bind_addr = config.bind_addr.parse()?;
    let config = Arc::new(config);

    spawn_health_refresh(health_probe.clone());
    spawn_orphan_sweep(image_service.clone());

    let state = Arc::new(AppState {
        image_service,
        auth_gate,
        rate_gate,
        health_probe,
        config,
    });

    let server = ApiServer::new(bind_addr, state);
    server.run(shutdown_signal()).await?;
    Ok(())
}

/// Logs the readiness rollup every 30s so steady-state health is visible in
/// the logs without depending on someone polling `/health`.
fn spawn_health_refresh(probe: Arc<HealthProbe>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let report = probe.check().await;
            tracing::info!(status = ?report.status, "background health refresh");
        }
    });
}

/// Reclaims `DedupRecord`s left behind by a crash between claiming a hash
/// and persisting its `ImageRecord`, or between unlinking a master and
/// promoting the next referencer (spec.md §4.3, §11).
fn spawn_orphan_sweep(service: Arc<ImageService>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            match service.sweep_orphans(100).await {
                Ok(reclaimed) if reclaimed > 0 => {
                    tracing::info!(reclaimed, "orphan sweep reclaimed dedup records");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "orphan sweep pass failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn init_logging(format: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
