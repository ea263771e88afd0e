//! In-memory provider plugin used by tests and local development.
//!
//! Pretends to manage a single instance whose metadata comes from `MOCK_*`
//! environment variables. Stop and start only flip the reported state.

use std::io::Write;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use snoozer_plugins::handshake::{Capability, Handshake, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE};
use snoozer_proto::v1::provider_plugin_server::{ProviderPlugin, ProviderPluginServer};
use snoozer_proto::v1::{Empty, InstanceInfo, ProviderName, ProviderVersion};
use snoozer_proto::PLUGIN_PROTOCOL_VERSION;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

struct MockProvider {
    name: String,
    info: InstanceInfo,
    state: Mutex<String>,
    shutdown: Arc<Notify>,
}

#[tonic::async_trait]
impl ProviderPlugin for MockProvider {
    async fn get_instance_info(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<InstanceInfo>, Status> {
        let mut info = self.info.clone();
        info.state = self.state.lock().await.clone();
        Ok(Response::new(info))
    }

    async fn stop_instance(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        info!(instance_id = %self.info.id, "Stopping instance");
        *self.state.lock().await = "stopped".to_string();
        Ok(Response::new(Empty {}))
    }

    async fn start_instance(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        info!(instance_id = %self.info.id, "Starting instance");
        *self.state.lock().await = "running".to_string();
        Ok(Response::new(Empty {}))
    }

    async fn get_provider_name(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ProviderName>, Status> {
        Ok(Response::new(ProviderName {
            name: self.name.clone(),
        }))
    }

    async fn get_provider_version(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ProviderVersion>, Status> {
        Ok(Response::new(ProviderVersion {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }

    async fn shutdown(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        info!("Shutdown requested");
        self.shutdown.notify_one();
        Ok(Response::new(Empty {}))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the handshake, logs go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if std::env::var(MAGIC_COOKIE_KEY).as_deref() != Ok(MAGIC_COOKIE_VALUE) {
        eprintln!(
            "This binary is a snoozer provider plugin and is meant to be launched by the snoozer agent."
        );
        std::process::exit(1);
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?;

    let shutdown = Arc::new(Notify::new());
    let provider = MockProvider {
        name: env_or("MOCK_PROVIDER_NAME", "mock"),
        info: InstanceInfo {
            id: env_or("MOCK_INSTANCE_ID", "mock-instance-1"),
            name: env_or("MOCK_INSTANCE_NAME", "mock-instance"),
            r#type: env_or("MOCK_INSTANCE_TYPE", "mock.small"),
            region: env_or("MOCK_REGION", "local-1"),
            zone: env_or("MOCK_ZONE", "local-1a"),
            state: String::new(),
            launch_time: chrono::Utc::now().timestamp(),
        },
        state: Mutex::new("running".to_string()),
        shutdown: shutdown.clone(),
    };

    let handshake = Handshake {
        protocol_version: PLUGIN_PROTOCOL_VERSION,
        address,
        capabilities: Capability::ALL.to_vec(),
    };
    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", handshake.to_line())?;
    stdout.flush()?;

    info!(%address, "Mock provider plugin serving");
    Server::builder()
        .add_service(ProviderPluginServer::new(provider))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown.notified())
        .await?;

    info!("Mock provider plugin exiting");
    Ok(())
}
