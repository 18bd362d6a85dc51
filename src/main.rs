mod api;
mod app;
mod config;
mod dates;
mod db;
mod error;
mod models;
mod reviews;
mod srs;
mod stats;

use anyhow::Context;
use std::sync::Arc;

use api::{app_router, ApiState};
use app::App;
use config::Config;
use db::Db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let db = Db::new(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_url))?;
    log::info!("Database ready at {}", config.database_url);

    let state = ApiState { app: Arc::new(App::new(db)) };
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    log::info!("MedMetrics API listening on {}", config.bind_addr);

    axum::serve(listener, router).await?;
    Ok(())
}
