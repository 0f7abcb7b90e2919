//! WAF ML Service - Main Entry Point
//!
//! Model lifecycle for the WAF request classifier: registry sync, scheduled
//! retraining with an accept/reject gate, hot model swap, and the `/analyze`
//! serving shell.

mod api;
mod logic;
pub mod constants;

use anyhow::Context;

use logic::config::ServiceConfig;
use logic::service::MlService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}...", constants::APP_NAME, constants::APP_VERSION);

    let config = ServiceConfig::from_env();
    log::info!("   Control plane: {}", config.control_plane_url);
    log::info!("   Data dir: {}", config.data_dir.display());
    log::info!("   Models dir: {}", config.models_dir.display());

    let bind_addr = config.bind_addr.clone();
    let service = MlService::build(config).context("failed to initialize service")?;

    match service.bootstrap().await {
        logic::service::ReloadOutcome::NoModel => {
            log::warn!("No model loaded yet - /analyze answers 503 until one is selected")
        }
        outcome => log::info!("Initial model: {:?}", outcome),
    }

    let background = service.start_background();

    let app = api::create_router(service.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    log::info!("🚀 Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    log::info!("Shutting down...");
    service.shutdown();
    for handle in background {
        if let Err(e) = handle.await {
            log::warn!("Background task ended abnormally: {}", e);
        }
    }
    log::info!("Bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
