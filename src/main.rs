use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use inbox_panels::auth::token_source;
use inbox_panels::backend::{GmailBackend, MailBackend};
use inbox_panels::config::{Config, CredentialConfig};
use inbox_panels::panels::{PanelRouteState, panel_routes};

/// Initialize tracing: stderr always, plus a daily file when a log dir is set.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-panels.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _log_guard = init_tracing(&config);

    eprintln!("📬 Inbox Panels v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Listen: http://{}:{}", config.bind, config.port);
    eprintln!("   Gmail API: {}", config.gmail.api_base);
    eprintln!("   Label: {}", config.gmail.label);
    eprintln!(
        "   Credentials: {}",
        match &config.credentials {
            CredentialConfig::None => "none (requests will be rejected)",
            CredentialConfig::Static(_) => "static access token",
            CredentialConfig::Refresh(_) => "OAuth refresh token",
        }
    );
    if let Some(dir) = &config.log_dir {
        eprintln!("   Logs: {}", dir.display());
    }

    let http = reqwest::Client::builder()
        .timeout(config.gmail.request_timeout)
        .build()?;
    let backend: Arc<dyn MailBackend> = Arc::new(GmailBackend::new(config.gmail.clone())?);
    let tokens = token_source(config.credentials.clone(), http);

    let app = panel_routes(PanelRouteState { backend, tokens }).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind((config.bind.as_str(), config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "Panel count server started");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
