use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use donation_payments::config::{Config, LoggingConfig};
use donation_payments::{build_service, create_app};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "donation_payments={},tower_http=info",
            logging.level
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = Config::load()?;
    init_tracing(&config.logging);

    info!("Starting donation payments service");

    let service = Arc::new(build_service(&config).await?);
    info!(
        gateway = service.gateway_name(),
        presets = ?service.resolver().presets(),
        "Donation service initialized"
    );

    let app = create_app(service);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Server running on {}", address);

    axum::serve(listener, app).await?;

    Ok(())
}
