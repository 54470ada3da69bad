mod export;
mod invoice;
mod payroll;
mod problem;
mod retry;
mod roster;
mod router;
mod scope_lock;
mod telemetry;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;

use tracing::info;

use payroll_storage::Database;
use payroll_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    let documents = export::DocumentSettings::from_settings(&config.payroll)?;
    let state = router::AppState::new(metrics, database, &config.payroll, documents);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
