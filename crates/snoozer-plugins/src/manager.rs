use snoozer_proto::v1::provider_plugin_client::ProviderPluginClient;
use snoozer_proto::PLUGIN_PROTOCOL_VERSION;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{oneshot, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tonic::transport::Endpoint;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::discovery::{discover, PluginCandidate};
use crate::handshake::{Capability, Handshake, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE};
use crate::provider::{CloudProvider, PluginProvider, ProviderKind};
use crate::PluginError;

#[derive(Debug, Clone)]
pub struct PluginManagerConfig {
    pub plugins_dir: PathBuf,
    /// Upper bound for the handshake line, the dial and the name probe.
    pub handshake_timeout: Duration,
    /// Applied to every RPC issued through a [`PluginProvider`].
    pub rpc_timeout: Duration,
    /// How long a plugin gets to exit after its Shutdown RPC before it is killed.
    pub shutdown_grace: Duration,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("./plugins"),
            handshake_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Discovered,
    Verifying,
    Launched,
    Ready,
    Failed,
    ShutDown,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Discovered => "discovered",
            PluginState::Verifying => "verifying",
            PluginState::Launched => "launched",
            PluginState::Ready => "ready",
            PluginState::Failed => "failed",
            PluginState::ShutDown => "shut_down",
        }
    }

    /// Failed and shut down plugins may be picked up again by a later
    /// discovery cycle.
    fn is_replaceable(&self) -> bool {
        matches!(self, PluginState::Failed | PluginState::ShutDown)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type PluginTable = RwLock<HashMap<String, PluginHandle>>;

/// Owns the process of a Ready plugin and reports when it exits on its own.
struct Supervisor {
    release: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct PluginHandle {
    /// Distinguishes this launch attempt from later ones under the same id.
    generation: u64,
    path: PathBuf,
    digest: Option<String>,
    pid: Option<u32>,
    supervisor: Option<Supervisor>,
    protocol_version: Option<u32>,
    capabilities: Vec<Capability>,
    state: PluginState,
    provider: Option<PluginProvider>,
    last_error: Option<String>,
}

impl PluginHandle {
    fn discovered(candidate: &PluginCandidate, generation: u64) -> Self {
        Self {
            generation,
            path: candidate.path.clone(),
            digest: None,
            pid: None,
            supervisor: None,
            protocol_version: None,
            capabilities: Vec::new(),
            state: PluginState::Discovered,
            provider: None,
            last_error: None,
        }
    }

    fn is_current(&self, generation: u64, state: PluginState) -> bool {
        self.generation == generation && self.state == state
    }

    fn summary(&self, id: &str) -> PluginSummary {
        PluginSummary {
            id: id.to_string(),
            path: self.path.clone(),
            digest: self.digest.clone(),
            pid: self.pid,
            state: self.state,
            protocol_version: self.protocol_version,
            capabilities: self.capabilities.clone(),
            kind: self.provider.as_ref().map(|provider| provider.kind()),
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view of a managed plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginSummary {
    pub id: String,
    pub path: PathBuf,
    pub digest: Option<String>,
    /// Process id of the most recent launch.
    pub pid: Option<u32>,
    pub state: PluginState,
    pub protocol_version: Option<u32>,
    pub capabilities: Vec<Capability>,
    pub kind: Option<ProviderKind>,
    pub last_error: Option<String>,
}

/// Outcome of one discovery cycle. A failing plugin never aborts the cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub ready: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Candidates left alone because they were already live.
    pub skipped: Vec<String>,
}

/// Established plugin connection, produced by a successful handshake.
struct Connection {
    handshake: Handshake,
    provider: PluginProvider,
    stdout: Lines<BufReader<ChildStdout>>,
}

#[derive(Clone)]
pub struct PluginManager {
    config: Arc<PluginManagerConfig>,
    authenticator: Arc<Authenticator>,
    plugins: Arc<PluginTable>,
    generations: Arc<AtomicU64>,
}

impl PluginManager {
    pub fn new(config: PluginManagerConfig, authenticator: Authenticator) -> Self {
        Self {
            config: Arc::new(config),
            authenticator: Arc::new(authenticator),
            plugins: Arc::new(RwLock::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &PluginManagerConfig {
        &self.config
    }

    /// Scans the plugins directory and brings every new candidate up to Ready
    /// or Failed. Candidates are initialized concurrently; plugins that are
    /// already live are left untouched.
    pub async fn discover_and_initialize(&self) -> Result<DiscoveryReport, PluginError> {
        let candidates = discover(&self.config.plugins_dir)?;
        info!(
            dir = %self.config.plugins_dir.display(),
            candidates = candidates.len(),
            authentication = self.authenticator.is_enabled(),
            "Discovered plugin candidates"
        );

        let mut report = DiscoveryReport::default();
        let mut pending = Vec::new();
        {
            let mut plugins = self.plugins.write().await;
            for candidate in candidates {
                match plugins.get(&candidate.id) {
                    Some(existing) if !existing.state.is_replaceable() => {
                        debug!(plugin = %candidate.id, state = %existing.state, "Plugin already managed");
                        report.skipped.push(candidate.id);
                    }
                    _ => {
                        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                        plugins.insert(
                            candidate.id.clone(),
                            PluginHandle::discovered(&candidate, generation),
                        );
                        pending.push((candidate, generation));
                    }
                }
            }
        }

        let mut tasks = JoinSet::new();
        for (candidate, generation) in pending {
            let manager = self.clone();
            tasks.spawn(async move {
                let id = candidate.id.clone();
                (id, manager.initialize(candidate, generation).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.ready.push(id),
                Ok((id, Err(e))) => report.failed.push((id, e.to_string())),
                Err(e) => error!(error = %e, "Plugin initialization task panicked"),
            }
        }

        report.ready.sort();
        report.failed.sort();
        info!(
            ready = report.ready.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Plugin discovery finished"
        );
        Ok(report)
    }

    /// Walks one launch attempt through Verifying, Launched and Ready. Every
    /// step only applies if the handle still belongs to this attempt and is in
    /// the preceding state, so a concurrent shutdown always wins.
    async fn initialize(&self, candidate: PluginCandidate, generation: u64) -> Result<(), PluginError> {
        let id = candidate.id.clone();
        let cancelled = || PluginError::Cancelled { plugin: id.clone() };

        if !self
            .transition(&id, generation, PluginState::Discovered, PluginState::Verifying)
            .await
        {
            return Err(cancelled());
        }

        let authenticator = self.authenticator.clone();
        let verified = candidate.clone();
        let digest = tokio::task::spawn_blocking(move || authenticator.authenticate(&verified))
            .await
            .unwrap_or_else(|e| Err(PluginError::Io(format!("digest task failed: {e}"))));
        let digest = match digest {
            Ok(digest) => digest,
            Err(e) => {
                self.mark_failed(&id, generation, &e).await;
                return Err(e);
            }
        };

        let mut child = match spawn_plugin(&candidate) {
            Ok(child) => child,
            Err(e) => {
                self.mark_failed(&id, generation, &e).await;
                return Err(e);
            }
        };
        let launched = {
            let mut plugins = self.plugins.write().await;
            match plugins
                .get_mut(&id)
                .filter(|handle| handle.is_current(generation, PluginState::Verifying))
            {
                Some(handle) => {
                    handle.digest = digest;
                    handle.pid = child.id();
                    handle.state = PluginState::Launched;
                    true
                }
                None => false,
            }
        };
        if !launched {
            terminate(&id, &mut child).await;
            return Err(cancelled());
        }
        info!(plugin = %id, pid = ?child.id(), "Launched plugin");

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(id.clone(), "stderr", BufReader::new(stderr).lines()));
        }

        let connection = match child.stdout.take() {
            Some(stdout) => {
                let lines = BufReader::new(stdout).lines();
                match tokio::time::timeout(
                    self.config.handshake_timeout,
                    self.establish(&id, lines),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(PluginError::HandshakeTimeout {
                        plugin: id.clone(),
                        timeout: self.config.handshake_timeout,
                    }),
                }
            }
            None => Err(PluginError::Handshake {
                plugin: id.clone(),
                reason: "stdout not captured".to_string(),
            }),
        };

        let connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                terminate(&id, &mut child).await;
                self.mark_failed(&id, generation, &e).await;
                return Err(e);
            }
        };

        tokio::spawn(forward_output(id.clone(), "stdout", connection.stdout));

        let mut plugins = self.plugins.write().await;
        if let Some(handle) = plugins
            .get_mut(&id)
            .filter(|handle| handle.is_current(generation, PluginState::Launched))
        {
            info!(
                plugin = %id,
                kind = %connection.provider.kind(),
                version = connection.handshake.protocol_version,
                address = %connection.handshake.address,
                "Plugin ready"
            );
            let (release, released) = oneshot::channel();
            let task = tokio::spawn(supervise(
                Arc::downgrade(&self.plugins),
                id.clone(),
                generation,
                child,
                released,
                self.config.shutdown_grace,
            ));
            handle.supervisor = Some(Supervisor { release, task });
            handle.protocol_version = Some(connection.handshake.protocol_version);
            handle.capabilities = connection.handshake.capabilities;
            handle.provider = Some(connection.provider);
            handle.state = PluginState::Ready;
            handle.last_error = None;
            return Ok(());
        }
        drop(plugins);

        terminate(&id, &mut child).await;
        Err(cancelled())
    }

    /// Reads the handshake line, dials the announced address and confirms
    /// the plugin answers GetProviderName.
    async fn establish(
        &self,
        id: &str,
        mut stdout: Lines<BufReader<ChildStdout>>,
    ) -> Result<Connection, PluginError> {
        let handshake_error = |reason: String| PluginError::Handshake {
            plugin: id.to_string(),
            reason,
        };

        let line = stdout
            .next_line()
            .await
            .map_err(|e| handshake_error(e.to_string()))?
            .ok_or_else(|| handshake_error("plugin exited before handshake".to_string()))?;

        let handshake = Handshake::parse(&line).map_err(handshake_error)?;
        handshake
            .negotiate(PLUGIN_PROTOCOL_VERSION)
            .map_err(handshake_error)?;

        let channel = Endpoint::from_shared(format!("http://{}", handshake.address))
            .map_err(|e| handshake_error(e.to_string()))?
            .connect_timeout(self.config.handshake_timeout)
            .connect()
            .await
            .map_err(|e| handshake_error(format!("dial {}: {}", handshake.address, e)))?;

        let client = ProviderPluginClient::new(channel);
        let probe = PluginProvider::new(
            id,
            ProviderKind::Other(String::new()),
            client.clone(),
            self.config.rpc_timeout,
        );
        let name = probe
            .provider_name()
            .await
            .map_err(|e| handshake_error(format!("name probe: {e}")))?;

        let provider = PluginProvider::new(
            id,
            ProviderKind::from_name(&name),
            client,
            self.config.rpc_timeout,
        );

        Ok(Connection {
            handshake,
            provider,
            stdout,
        })
    }

    async fn transition(
        &self,
        id: &str,
        generation: u64,
        from: PluginState,
        to: PluginState,
    ) -> bool {
        match self.plugins.write().await.get_mut(id) {
            Some(handle) if handle.is_current(generation, from) => {
                handle.state = to;
                true
            }
            _ => false,
        }
    }

    async fn mark_failed(&self, id: &str, generation: u64, error: &PluginError) {
        warn!(plugin = %id, error = %error, "Plugin failed");
        if let Some(handle) = self
            .plugins
            .write()
            .await
            .get_mut(id)
            .filter(|handle| handle.generation == generation)
            .filter(|handle| handle.state != PluginState::ShutDown)
        {
            handle.state = PluginState::Failed;
            handle.provider = None;
            handle.last_error = Some(error.to_string());
        }
    }

    pub async fn list_plugins(&self) -> Vec<PluginSummary> {
        let plugins = self.plugins.read().await;
        let mut summaries: Vec<PluginSummary> = plugins
            .iter()
            .map(|(id, handle)| handle.summary(id))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub async fn get(&self, id: &str) -> Result<PluginSummary, PluginError> {
        self.plugins
            .read()
            .await
            .get(id)
            .map(|handle| handle.summary(id))
            .ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    /// Capability interface of a Ready plugin.
    pub async fn provider(&self, id: &str) -> Result<PluginProvider, PluginError> {
        let plugins = self.plugins.read().await;
        let handle = plugins
            .get(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        match (&handle.state, &handle.provider) {
            (PluginState::Ready, Some(provider)) => Ok(provider.clone()),
            (state, _) => Err(PluginError::NotReady {
                plugin: id.to_string(),
                state: *state,
            }),
        }
    }

    pub async fn ready_ids(&self) -> Vec<String> {
        let plugins = self.plugins.read().await;
        let mut ids: Vec<String> = plugins
            .iter()
            .filter(|(_, handle)| handle.state == PluginState::Ready)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Asks the plugin to exit, then kills it if it outlives the grace
    /// period. Shutting down an already shut down plugin is a no-op.
    pub async fn shutdown(&self, id: &str) -> Result<(), PluginError> {
        let (provider, supervisor) = {
            let mut plugins = self.plugins.write().await;
            let handle = plugins
                .get_mut(id)
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
            if handle.state == PluginState::ShutDown {
                return Ok(());
            }
            handle.state = PluginState::ShutDown;
            (handle.provider.take(), handle.supervisor.take())
        };

        if let Some(provider) = provider {
            match tokio::time::timeout(self.config.shutdown_grace, provider.shutdown()).await {
                Ok(Ok(())) => debug!(plugin = %id, "Plugin acknowledged shutdown"),
                Ok(Err(e)) => warn!(plugin = %id, error = %e, "Plugin shutdown RPC failed"),
                Err(_) => warn!(plugin = %id, "Plugin shutdown RPC timed out"),
            }
        }

        if let Some(supervisor) = supervisor {
            // The supervisor may already have seen the exit.
            let _ = supervisor.release.send(());
            if let Err(e) = supervisor.task.await {
                warn!(plugin = %id, error = %e, "Plugin supervisor failed");
            }
        }

        info!(plugin = %id, "Plugin shut down");
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.plugins.read().await.keys().cloned().collect();

        let mut tasks = JoinSet::new();
        for id in ids {
            let manager = self.clone();
            tasks.spawn(async move {
                if let Err(e) = manager.shutdown(&id).await {
                    warn!(plugin = %id, error = %e, "Failed to shut down plugin");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

/// Waits on a Ready plugin's process. An exit nobody asked for moves the
/// plugin to Failed; a release lets it wind down for the grace period and
/// then kills it. Dropping the manager counts as a release.
async fn supervise(
    plugins: Weak<PluginTable>,
    id: String,
    generation: u64,
    mut child: Child,
    mut released: oneshot::Receiver<()>,
    grace: Duration,
) {
    tokio::select! {
        status = child.wait() => {
            let reason = match status {
                Ok(status) => format!("plugin exited unexpectedly ({status})"),
                Err(e) => format!("lost track of plugin process: {e}"),
            };
            let Some(plugins) = plugins.upgrade() else {
                return;
            };
            let mut plugins = plugins.write().await;
            match plugins
                .get_mut(&id)
                .filter(|handle| handle.is_current(generation, PluginState::Ready))
            {
                Some(handle) => {
                    error!(plugin = %id, %reason, "Plugin left the active set");
                    handle.state = PluginState::Failed;
                    handle.provider = None;
                    handle.supervisor = None;
                    handle.last_error = Some(reason);
                }
                None => debug!(plugin = %id, %reason, "Plugin process exited"),
            }
        }
        _ = &mut released => {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => debug!(plugin = %id, %status, "Plugin exited"),
                Ok(Err(e)) => warn!(plugin = %id, error = %e, "Failed to wait for plugin"),
                Err(_) => {
                    warn!(plugin = %id, "Plugin did not exit within grace period, killing");
                    terminate(&id, &mut child).await;
                }
            }
        }
    }
}

fn spawn_plugin(candidate: &PluginCandidate) -> Result<Child, PluginError> {
    Command::new(&candidate.path)
        .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PluginError::Spawn {
            plugin: candidate.id.clone(),
            reason: e.to_string(),
        })
}

async fn terminate(id: &str, child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(plugin = %id, error = %e, "Kill failed, plugin likely exited already");
    }
}

async fn forward_output<R>(id: String, stream: &'static str, mut lines: Lines<BufReader<R>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(plugin = %id, stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(plugin = %id, stream, error = %e, "Stopped reading plugin output");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_for(dir: &std::path::Path) -> PluginManager {
        PluginManager::new(
            PluginManagerConfig {
                plugins_dir: dir.to_path_buf(),
                handshake_timeout: Duration::from_secs(2),
                ..Default::default()
            },
            Authenticator::disabled(),
        )
    }

    #[test]
    fn test_only_failed_and_shut_down_are_replaceable() {
        assert!(PluginState::Failed.is_replaceable());
        assert!(PluginState::ShutDown.is_replaceable());
        assert!(!PluginState::Ready.is_replaceable());
        assert!(!PluginState::Launched.is_replaceable());
        assert_eq!(PluginState::ShutDown.to_string(), "shut_down");
    }

    #[tokio::test]
    async fn test_empty_directory_yields_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(dir.path());

        let report = manager.discover_and_initialize().await.unwrap();
        assert_eq!(report, DiscoveryReport::default());
        assert!(manager.list_plugins().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(&dir.path().join("nope"));
        assert!(matches!(
            manager.discover_and_initialize().await,
            Err(PluginError::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_plugin_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(dir.path());

        assert_eq!(
            manager.get("aws").await,
            Err(PluginError::NotFound("aws".to_string()))
        );
        assert!(matches!(
            manager.provider("aws").await,
            Err(PluginError::NotFound(_))
        ));
        assert!(matches!(
            manager.shutdown("aws").await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plugin_exiting_before_handshake_fails() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snoozer-provider-quiet");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let manager = manager_for(dir.path());
        let report = manager.discover_and_initialize().await.unwrap();
        assert!(report.ready.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("exited before handshake"));

        let summary = manager.get("quiet").await.unwrap();
        assert_eq!(summary.state, PluginState::Failed);
        assert!(matches!(
            manager.provider("quiet").await,
            Err(PluginError::NotReady {
                state: PluginState::Failed,
                ..
            })
        ));
    }

    fn candidate_in(dir: &std::path::Path, id: &str) -> PluginCandidate {
        let file_name = format!("snoozer-provider-{id}");
        PluginCandidate {
            id: id.to_string(),
            path: dir.join(&file_name),
            file_name,
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_verification_cancels_launch() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(dir.path());
        let candidate = candidate_in(dir.path(), "aws");
        manager
            .plugins
            .write()
            .await
            .insert("aws".to_string(), PluginHandle::discovered(&candidate, 7));

        manager.shutdown("aws").await.unwrap();
        assert_eq!(
            manager.initialize(candidate, 7).await,
            Err(PluginError::Cancelled {
                plugin: "aws".to_string()
            })
        );

        let summary = manager.get("aws").await.unwrap();
        assert_eq!(summary.state, PluginState::ShutDown);
        assert_eq!(summary.pid, None);
        assert!(manager.ready_ids().await.is_empty());
        manager.shutdown("aws").await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_attempt_leaves_newer_handle_alone() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_for(dir.path());
        let candidate = candidate_in(dir.path(), "gcp");
        manager
            .plugins
            .write()
            .await
            .insert("gcp".to_string(), PluginHandle::discovered(&candidate, 2));

        let error = PluginError::Spawn {
            plugin: "gcp".to_string(),
            reason: "no such file".to_string(),
        };
        manager.mark_failed("gcp", 1, &error).await;
        assert!(
            !manager
                .transition("gcp", 1, PluginState::Discovered, PluginState::Verifying)
                .await
        );
        assert_eq!(manager.get("gcp").await.unwrap().state, PluginState::Discovered);

        manager.mark_failed("gcp", 2, &error).await;
        let summary = manager.get("gcp").await.unwrap();
        assert_eq!(summary.state, PluginState::Failed);
        assert!(summary.last_error.unwrap().contains("no such file"));
    }
}
