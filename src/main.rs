// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use log::{error, info, warn};
use std::sync::Arc;

mod config;
mod errors;
mod handlers;
mod models;
mod prompts;
mod services;

use crate::config::AppConfig;
use crate::handlers::{capabilities, restyle};
use crate::services::RestyleService;

#[derive(Clone)]
pub struct AppState {
    restyle_service: Arc<RestyleService>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting restyle service...");

    let config = AppConfig::from_env();

    let restyle_service = match RestyleService::new(&config) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("failed to initialize generation providers: {e}");
            std::process::exit(1);
        }
    };

    if restyle_service.is_intelligent_mode_available() {
        info!("intelligent mode available (OPENAI_API_KEY configured)");
    } else {
        warn!("OPENAI_API_KEY not set, intelligent mode disabled");
    }

    let app_state = AppState { restyle_service };

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/restyle", web::post().to(restyle))
                    .route("/restyle/health", web::get().to(capabilities)),
            )
            .route("/health", web::get().to(health_check))
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "restyle",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
