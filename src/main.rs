//! Image import server - main entry point.
//!
//! Starts the Actix-web server with the import pipeline, event stream and
//! stats routes.

use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use image_import_lib::config::Config;
use image_import_lib::db::DbPool;
use image_import_lib::services::{
    self, CleanupConfig, EventBus, HttpRepositoryConnector, ImportPipeline, PassthroughConverter,
};
use image_import_lib::{api, middleware};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - IMPORT_ENV must be set to 'development' or 'production'");
            error!("  - In production, DATABASE_URL and REPOSITORY_URL must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Image Import Server");
    info!("  Environment: {}", config.environment);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
        info!("Using development defaults for DATABASE_URL and REPOSITORY_URL");
    }

    tokio::fs::create_dir_all(&config.import.upload_dir)
        .await
        .expect("Failed to create upload directory");

    let pool = DbPool::new(&config)
        .await
        .expect("Failed to initialize database");
    info!("Database connection established");

    pool.run_migrations()
        .await
        .expect("Failed to run migrations");
    info!("Database migrations complete");

    let cleanup_config = CleanupConfig {
        upload_dir: config.import.upload_dir.clone(),
        retention_hours: config.import.stale_upload_hours,
        interval_secs: if config.is_development() { 60 } else { 3600 }, // 1 min dev, 1 hour prod
    };
    services::start_cleanup_task(cleanup_config);
    info!(
        "Cleanup service started (staging retention: {} hours)",
        config.import.stale_upload_hours
    );

    let connector = match HttpRepositoryConnector::new(&config.repository_url) {
        Ok(connector) => connector,
        Err(e) => {
            error!("Invalid REPOSITORY_URL '{}': {}", config.repository_url, e);
            std::process::exit(1);
        }
    };

    let bus = EventBus::new(config.import.event_retention);
    let pipeline = ImportPipeline::new(
        &config.import,
        Arc::new(PassthroughConverter::new(
            config.import.default_instrument.clone(),
        )),
        Arc::new(connector),
        Arc::new(pool.clone()),
        bus,
    );
    let pipeline = web::Data::new(pipeline);

    info!(
        "Import pipeline: {} workers, {} attempts, {} byte blocks, {} checksums",
        config.import.workers,
        config.import.max_attempts,
        config.import.block_size,
        config.import.checksum.as_str()
    );
    info!("Repository gateway: {}", config.repository_url);

    let bind_address = config.bind_address();
    let worker_count = if config.is_development() {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };

    let running = pipeline.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::RequestLogger)
            .app_data(web::Data::new(pool.clone()))
            .app_data(pipeline.clone())
            .service(
                web::scope("/api/v1")
                    .configure(api::configure_health_routes)
                    .configure(api::configure_import_routes)
                    .configure(api::configure_event_routes)
                    .configure(api::configure_stats_routes),
            )
    });

    let result = server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await;

    running.pool().close();
    info!(
        busy_workers = running.pool().busy(),
        "Server stopped, import pipeline no longer accepts jobs"
    );
    result
}
