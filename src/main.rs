use actix_web::{web, App, HttpServer, middleware::Logger};
use actix_cors::Cors;
use dotenv::dotenv;
use std::net::TcpListener;

mod clients;
mod config;
mod db;
mod error;
mod handlers;
mod routes;
mod services;

use crate::clients::gemini_client::GeminiClient;
use crate::config::AppSettings;
use crate::db::connection::{create_pool, verify_connection};
use crate::db::repositories::MenuItemRepository;
use crate::handlers::menu_handlers::AppPipeline;
use crate::routes::configure_routes;
use crate::services::menu_pipeline::MenuPipeline;
use crate::services::staging_store::StagingStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    // Database connection setup
    let db_pool = match create_pool(&app_settings.database).await {
        Ok(pool) => {
            // Verify the database connection
            if let Err(e) = verify_connection(&pool).await {
                log::error!("Database connection verification failed: {}", e);
                log::error!("Cannot start server without a working database connection");
                std::process::exit(1);
            }
            log::info!("Database connection established successfully");
            pool
        }
        Err(e) => {
            log::error!("Failed to create database connection pool: {}", e);
            log::error!("Cannot start server without a working database connection");
            std::process::exit(1);
        }
    };

    if app_settings.api_keys.gemini_api_key.is_none() {
        log::warn!("GEMINI_API_KEY is not set; menu processing will fail preflight until it is configured");
    }

    // One staging slot per restaurant, shared across all workers
    let staging = StagingStore::new(chrono::Duration::seconds(
        app_settings.staging.freshness_window_secs,
    ));

    // Get server host and port from settings
    let host = &app_settings.server.host;
    let port = app_settings.server.port;

    log::info!("Starting server at http://{}:{}", host, port);

    let server_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(server_addr)?;

    HttpServer::new(move || {
        // Clone the data for the factory closure
        let db_pool = db_pool.clone();
        let app_settings = app_settings.clone();
        let staging = staging.clone();

        // Wire the pipeline: extractor is absent when no API key is
        // configured, which the pipeline reports as a preflight failure
        let extractor = GeminiClient::from_settings(&app_settings).ok();
        let repository = MenuItemRepository::new(db_pool.clone());
        let pipeline: AppPipeline = MenuPipeline::new(staging.clone(), extractor, repository);

        // Configure CORS using actix-cors
        let mut cors = Cors::default().supports_credentials();

        // Add allowed origins based on configuration
        if app_settings.server.cors_origins.contains(&"*".to_string()) {
            cors = cors.allow_any_origin();
        } else {
            for origin in &app_settings.server.cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }

        // Common CORS settings for all origins
        cors = cors.allow_any_method().allow_any_header();

        // Create the App with common middleware and data
        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(app_settings.clone()))
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(staging.clone()))
            .app_data(web::Data::new(pipeline))
            // Register health check endpoint
            .service(
                web::resource("/health")
                    .route(web::get().to(handlers::health::health_check)),
            )
            // Menu ingestion API
            .service(web::scope("/api").configure(configure_routes))
    })
    .listen(listener)?
    .run()
    .await
}
