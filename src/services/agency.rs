//! Test agency
//!
//! Launches agent processes and keeps track of every agent connected to
//! the engine. Agents connect back over TCP on `127.0.0.1`, register with
//! their id and are then handed out to process runners one at a time.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Service, ServiceStatus};
use crate::agents::{
    channel_pair, decode, pump, AgentConnection, AgentMessage, AgentRequest, Registration,
    WorkerChannels,
};
use crate::error::EngineError;
use crate::package::{keys, TestPackage};

/// Time an agent has to send its registration after connecting
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a stopped agent gets to exit before it is killed
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one agent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AgentStatus {
    /// Launched, not registered yet
    Starting,
    Ready,
    Busy,
    Stopping,
}

/// Snapshot of one agent record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub pid: Option<u32>,
    pub status: AgentStatus,
    /// Started by this agency rather than connecting on its own
    pub launched: bool,
}

struct AgentRecord {
    info: AgentInfo,
    connection: Option<Arc<AgentConnection>>,
    kill: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct AgencyState {
    status: ServiceStatus,
    endpoint: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    agents: BTreeMap<String, AgentRecord>,
}

struct AgencyInner {
    agent_path: PathBuf,
    port: u16,
    state: Mutex<AgencyState>,
    /// Signalled whenever an agent becomes ready
    ready: Notify,
}

/// Agent launcher and registry
pub struct TestAgency {
    inner: Arc<AgencyInner>,
}

impl TestAgency {
    pub fn new(agent_path: Option<PathBuf>, port: u16) -> Self {
        Self {
            inner: Arc::new(AgencyInner {
                agent_path: agent_path.unwrap_or_else(default_agent_path),
                port,
                state: Mutex::new(AgencyState::default()),
                ready: Notify::new(),
            }),
        }
    }

    pub fn agent_path(&self) -> &Path {
        &self.inner.agent_path
    }

    /// Address agents connect to, once started
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.inner.lock().endpoint
    }

    /// Start listening for agents. Starting twice is a no-op.
    pub async fn start(&self) -> Result<SocketAddr, EngineError> {
        if let Some(endpoint) = self.endpoint() {
            return Ok(endpoint);
        }

        let listener = TcpListener::bind(("127.0.0.1", self.inner.port)).await?;
        let endpoint = listener.local_addr()?;
        let task = tokio::spawn(accept_loop(self.inner.clone(), listener));

        let mut state = self.inner.lock();
        state.endpoint = Some(endpoint);
        state.accept_task = Some(task);
        state.status = ServiceStatus::Started;
        info!("Test agency listening on {}", endpoint);
        Ok(endpoint)
    }

    /// Stop every agent and the listener
    pub async fn stop(&self) {
        let (agents, accept_task) = {
            let mut state = self.inner.lock();
            state.status = ServiceStatus::Stopped;
            state.endpoint = None;
            (std::mem::take(&mut state.agents), state.accept_task.take())
        };

        if let Some(task) = accept_task {
            task.abort();
        }

        for (id, mut record) in agents {
            debug!("Stopping agent {}", id);
            record.info.status = AgentStatus::Stopping;
            if let Some(connection) = &record.connection {
                let _ = connection.send(AgentRequest::Stop);
            }
            if let Some(kill) = record.kill.take() {
                let _ = kill.send(());
            }
            if let Some(monitor) = record.monitor.take() {
                let _ = monitor.await;
            }
        }
        info!("Test agency stopped");
    }

    /// Obtain a ready agent, launching one if none is idle. Waits until an
    /// agent registers or `timeout` elapses.
    pub async fn get_agent(
        &self,
        package: &TestPackage,
        timeout: Duration,
    ) -> Result<(String, Arc<AgentConnection>), EngineError> {
        if self.endpoint().is_none() {
            return Err(EngineError::AgencyNotRunning);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut launched = false;
        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(agent) = self.inner.take_ready() {
                return Ok(agent);
            }
            if !launched {
                self.launch(package)?;
                launched = true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(EngineError::AgentUnavailable(timeout));
            }
        }
    }

    /// Return a busy agent to the pool
    pub fn release_agent(&self, id: &str) {
        {
            let mut state = self.inner.lock();
            if let Some(record) = state.agents.get_mut(id) {
                if record.info.status == AgentStatus::Busy {
                    record.info.status = AgentStatus::Ready;
                }
            }
        }
        debug!("Agent {} released", id);
        self.inner.ready.notify_waiters();
    }

    /// Forget an agent, asking a launched process to exit
    pub fn remove_agent(&self, id: &str) {
        self.inner.remove_agent(id);
    }

    /// Records of all known agents
    pub fn agents(&self) -> Vec<AgentInfo> {
        self.inner
            .lock()
            .agents
            .values()
            .map(|record| record.info.clone())
            .collect()
    }

    fn launch(&self, package: &TestPackage) -> Result<String, EngineError> {
        let endpoint = self.endpoint().ok_or(EngineError::AgencyNotRunning)?;
        let id = new_agent_id();

        let mut command = Command::new(&self.inner.agent_path);
        command.arg(&id).arg(endpoint.to_string());
        if package.settings().get_bool(keys::AGENT_DEBUG, false) {
            command.arg("--pause");
        }
        if package.settings().get_bool(keys::VERBOSE, false) {
            command.arg("--verbose");
        }
        command.stdin(Stdio::null()).kill_on_drop(true);

        // Registered under the lock so the agent cannot register first
        let mut state = self.inner.lock();
        let child = command.spawn().map_err(|source| EngineError::AgentLaunch {
            path: self.inner.agent_path.clone(),
            source,
        })?;
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(self.inner.clone(), id.clone(), child, kill_rx));

        state.agents.insert(
            id.clone(),
            AgentRecord {
                info: AgentInfo {
                    id: id.clone(),
                    pid,
                    status: AgentStatus::Starting,
                    launched: true,
                },
                connection: None,
                kill: Some(kill_tx),
                monitor: Some(monitor),
            },
        );
        info!(
            "Launched agent {} (pid {}) for {}",
            id,
            pid.map(|p| p.to_string()).unwrap_or_default(),
            package
        );
        Ok(id)
    }
}

impl AgencyInner {
    fn lock(&self) -> MutexGuard<'_, AgencyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark the first ready agent busy and hand out its connection
    fn take_ready(&self) -> Option<(String, Arc<AgentConnection>)> {
        let mut state = self.lock();
        state.agents.values_mut().find_map(|record| {
            let connection = record.connection.as_ref()?;
            if record.info.status != AgentStatus::Ready {
                return None;
            }
            record.info.status = AgentStatus::Busy;
            Some((record.info.id.clone(), connection.clone()))
        })
    }

    fn remove_agent(&self, id: &str) {
        let removed = self.lock().agents.remove(id);
        if removed.is_some() {
            debug!("Agent {} removed", id);
        }
    }
}

async fn accept_loop(inner: Arc<AgencyInner>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Agent connection from {}", peer);
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_agent(inner, stream).await {
                        warn!("Agent connection from {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                warn!("Failed to accept agent connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Read the registration, publish the agent and pump its frames until it
/// disconnects
async fn serve_agent(inner: Arc<AgencyInner>, stream: TcpStream) -> Result<(), EngineError> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let line = tokio::time::timeout(REGISTRATION_TIMEOUT, lines.next_line())
        .await
        .map_err(|_| EngineError::Protocol("registration timed out".to_string()))??
        .ok_or_else(|| EngineError::Protocol("closed before registering".to_string()))?;
    let Registration { agent_id, pid } = decode(&line)?;

    let label = format!("agent-{agent_id}");
    let (connection, channels) = channel_pair(label.clone());
    let WorkerChannels { requests, messages } = channels;

    {
        let mut state = inner.lock();
        let record = state
            .agents
            .entry(agent_id.clone())
            .or_insert_with(|| AgentRecord {
                info: AgentInfo {
                    id: agent_id.clone(),
                    pid: Some(pid),
                    status: AgentStatus::Starting,
                    launched: false,
                },
                connection: None,
                kill: None,
                monitor: None,
            });
        record.info.pid = Some(pid);
        record.info.status = AgentStatus::Ready;
        record.connection = Some(Arc::new(connection));
    }
    info!("Agent {} registered (pid {})", agent_id, pid);
    inner.ready.notify_waiters();

    pump::<AgentMessage, AgentRequest>(lines, writer, messages, requests, label).await;
    inner.remove_agent(&agent_id);
    Ok(())
}

/// Wait for a launched agent to exit, killing it if asked to stop and it
/// does not exit on its own
async fn monitor(
    inner: Arc<AgencyInner>,
    id: String,
    mut child: Child,
    kill: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => debug!("Agent {} exited with {}", id, status),
            Err(e) => warn!("Failed to wait for agent {}: {}", id, e),
        },
        _ = kill => {
            if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
                warn!("Agent {} did not exit, killing it", id);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill agent {}: {}", id, e);
                }
            }
        }
    }
    inner.remove_agent(&id);
}

fn new_agent_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// `test-agent` next to the running executable
fn default_agent_path() -> PathBuf {
    let name = format!("test-agent{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}

impl Service for TestAgency {
    fn name(&self) -> &'static str {
        "TestAgency"
    }

    fn status(&self) -> ServiceStatus {
        self.inner.lock().status
    }

    fn start_service(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        async move {
            if let Err(e) = self.start().await {
                self.inner.lock().status = ServiceStatus::Error;
                return Err(e);
            }
            Ok(())
        }
        .boxed()
    }

    fn stop_service(&self) -> BoxFuture<'_, ()> {
        self.stop().boxed()
    }
}
