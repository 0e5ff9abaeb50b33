use loggate::runtime::Runtime;
use loggate::{server, Config};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first; it decides the log format.
    let config = Config::load().await?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    if config.logging.format == "pretty" {
        fmt().with_env_filter(filter).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    }

    info!("Starting LogGate v{}", loggate::VERSION);
    info!(
        bind_addr = %config.bind_addr(),
        wal_root = %config.wal.wal_root_path.display(),
        downstream = %config.downstream.push_url(),
        "Configuration loaded"
    );

    let runtime = Runtime::build(config)?;
    runtime.start();

    let server_runtime = runtime.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run(server_runtime).await {
            error!(error = %e, "HTTP server error");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = server_handle => {
            error!("HTTP server task completed unexpectedly");
        }
    }

    info!("Shutting down LogGate...");
    runtime.shutdown().await;

    Ok(())
}
