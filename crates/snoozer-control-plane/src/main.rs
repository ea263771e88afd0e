use snoozer_control_plane::config::ControlPlaneConfig;
use snoozer_control_plane::ControlPlane;
use snoozer_providers::ProviderRegistry;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snoozer_control_plane=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ControlPlaneConfig::from_env()?;
    let http_addr = config.http_addr();
    let agent_addr = config.agent_addr();
    info!(%http_addr, %agent_addr, notifiers = ?config.notifiers, "Starting snoozer control plane");

    let control_plane = ControlPlane::from_config(&config, &ProviderRegistry::with_builtin()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let agent_service = control_plane.agent_service();
    let agent_shutdown = shutdown_rx.clone();
    let mut agent_server = tokio::spawn(async move {
        Server::builder()
            .add_service(agent_service)
            .serve_with_shutdown(agent_addr, wait_for_shutdown(agent_shutdown))
            .await
            .map_err(|e| e.to_string())
    });

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    let router = control_plane.router();
    let http_shutdown = shutdown_rx.clone();
    let mut http_server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_shutdown(http_shutdown))
            .await
            .map_err(|e| e.to_string())
    });

    info!("Control plane initialized successfully");

    let mut failed = false;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
        result = &mut agent_server => {
            error!(result = ?result, "Agent protocol server stopped");
            failed = true;
        }
        result = &mut http_server => {
            error!(result = ?result, "Operator HTTP server stopped");
            failed = true;
        }
    }

    let _ = shutdown_tx.send(true);
    if !agent_server.is_finished() {
        if let Err(e) = agent_server.await {
            warn!(error = %e, "Agent protocol server task failed");
        }
    }
    if !http_server.is_finished() {
        if let Err(e) = http_server.await {
            warn!(error = %e, "Operator HTTP server task failed");
        }
    }

    if let Err(e) = control_plane.close().await {
        warn!(error = %e, "Failed to close notification providers");
    }
    info!("Control plane stopped");

    if failed {
        return Err("a server stopped unexpectedly".into());
    }
    Ok(())
}
