use ldap_provisioner::config::Configuration;
use ldap_provisioner::{app, initialize_state, telemetry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Export logs only when a collector is configured.
    let otlp = match std::env::var(OTLP_ENDPOINT) {
        Ok(endpoint) => Some(telemetry::setup_logging(&endpoint)?),
        Err(_) => None,
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(fmt::layer())
        .with(otlp)
        .init();

    let config = Configuration::default().env_path().read();
    let state = initialize_state(config.clone()).await?;

    let listener = tokio::net::TcpListener::bind(&config.address).await?;
    tracing::info!(address = %config.address, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
