mod args;
mod logger;

use args::Args;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(&args);

    let config = config::load(&args.config)?;
    log::info!("loaded {} served model(s) from {}", config.served_models.len(), args.config.display());

    let app = gateway::router(config, gateway::default_gateway());

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    log::info!("listening on {}", args.listen_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    log::info!("shutdown signal received");
}
