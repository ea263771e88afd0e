use snoozer_agent::config::AgentConfig;
use snoozer_agent::Agent;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snoozer_agent=info,snoozer_plugins=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AgentConfig::from_env()?;
    info!(
        control_plane_addr = %config.control_plane_addr,
        plugins_dir = %config.plugins_dir.display(),
        plugin_auth = config.plugin_auth,
        "Starting snoozer agent"
    );

    let agent = Agent::start(&config).await?;
    info!(plugin_id = %agent.plugin_id(), "Agent initialized successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporting = agent
        .controller()
        .clone()
        .spawn_periodic_reporting(shutdown_rx);

    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    if let Err(error) = reporting.await {
        warn!(error = %error, "Reporting task failed");
    }
    agent.shutdown().await;

    Ok(())
}
