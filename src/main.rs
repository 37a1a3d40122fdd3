mod app;
mod capture;
mod clock;
mod config;
mod correction;
mod error;
mod images;
mod inference;
mod ledger;
mod meals;
mod state;
mod stats;
mod storage;
mod widget;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::state::AppState;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "nutrilog=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    // the host offset can only be read while the process is single-threaded
    let clock = AppState::clock_for(&config);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config, clock))
}

async fn run(config: AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<()> {
    tracing::info!(
        ledger = %config.ledger_path.display(),
        inference = %config.inference_endpoint,
        today = %clock.today(),
        "starting"
    );
    let addr = config.listen_addr();
    let (app_state, tasks) = AppState::init(config, clock).await?;

    let result = app::serve(app::build_app(app_state), addr).await;
    tasks.shutdown().await;
    result
}
