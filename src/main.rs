// src/main.rs
use env_logger::Builder;
use finance::config::Config;
use finance::oracle::AlphaVantageOracle;
use finance::{api, AppState, Database};
use log::{error, info, LevelFilter};
use reqwest::Client;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return;
        }
    };
    info!("Connected to database {:?}", db.path());

    let oracle = AlphaVantageOracle::new(Client::new(), config.quote_url.clone(), config.api_key.clone());
    let state = AppState::new(db, Arc::new(oracle), config.session.clone());

    info!("Starting the finance application...");
    let app = api::routes(state);

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(app).run(config.bind_addr).await;
}
