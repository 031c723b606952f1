use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fleet_control::config::{Args, Settings};
use fleet_control::services::SystemResolver;
use fleet_control::{build_app, tls};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::try_from(args)?;
    info!(
        "Starting fleet control plane (panel_url={}, secured={})",
        settings.panel_url,
        settings.is_secured()
    );

    let app = build_app(&settings, Arc::new(SystemResolver))?;

    match &settings.tls {
        Some(files) => {
            let config = tls::rustls_config(&files.cert, &files.key)?;
            info!("Listening on https://{}", settings.bind);
            axum_server::bind_rustls(settings.bind, config)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            info!("Listening on http://{}", settings.bind);
            let listener = tokio::net::TcpListener::bind(settings.bind).await?;
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
