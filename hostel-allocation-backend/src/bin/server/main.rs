use alloc::sync::Arc;

use hostel_allocation_backend::error::AppError;
use hostel_allocation_backend::{run_server, AppState};
use hostel_allocation_config::get_config;
use hostel_allocation_database::{get_database_connection, PgRoster};
use tracing::info;
use tracing_subscriber::EnvFilter;

extern crate alloc;

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    setup_tracing();

    let config = get_config()?;
    info!(?config, "loaded configuration");

    let pool = get_database_connection(&config.database_url)?;
    let state = Arc::new(AppState::from_config(PgRoster::new(pool), &config));

    run_server(state, &config.listen_address).await?.await
}
