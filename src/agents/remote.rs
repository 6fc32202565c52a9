//! Agent process side
//!
//! Connects back to the agency, registers, then serves requests until the
//! agency stops it or the connection drops.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

use super::connection::WorkerChannels;
use super::protocol::{encode, AgentMessage, AgentRequest, Registration};
use super::worker::AgentWorker;
use super::pump;
use crate::error::EngineError;
use crate::runners::TestRunnerFactory;

/// Delay before connecting when started with `--pause`, leaving time to
/// attach a debugger
const DEBUG_PAUSE: Duration = Duration::from_secs(10);

/// An agent running in its own process
pub struct RemoteTestAgent {
    agent_id: String,
    endpoint: String,
    factory: Arc<TestRunnerFactory>,
    pause: bool,
}

impl RemoteTestAgent {
    pub fn new(
        agent_id: impl Into<String>,
        endpoint: impl Into<String>,
        factory: Arc<TestRunnerFactory>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            endpoint: endpoint.into(),
            factory,
            pause: false,
        }
    }

    pub fn with_pause(mut self, pause: bool) -> Self {
        self.pause = pause;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Register with the agency and serve until stopped
    pub async fn run(self) -> Result<(), EngineError> {
        if self.pause {
            info!("Agent {} paused for {:?}", self.agent_id, DEBUG_PAUSE);
            tokio::time::sleep(DEBUG_PAUSE).await;
        }

        let stream = TcpStream::connect(&self.endpoint).await.map_err(|e| {
            EngineError::AgentCommunication {
                agent: self.agent_id.clone(),
                reason: format!("cannot reach agency at {}: {e}", self.endpoint),
            }
        })?;
        let (reader, mut writer) = stream.into_split();

        let registration = Registration {
            agent_id: self.agent_id.clone(),
            pid: std::process::id(),
        };
        writer.write_all(encode(&registration)?.as_bytes()).await?;
        info!("Agent {} registered with {}", self.agent_id, self.endpoint);

        let (request_tx, request_rx) = tokio::sync::mpsc::unbounded_channel::<AgentRequest>();
        let (message_tx, message_rx) = tokio::sync::mpsc::unbounded_channel::<AgentMessage>();
        let lines = BufReader::new(reader).lines();
        let label = format!("agency@{}", self.endpoint);
        let transport = tokio::spawn(pump(lines, writer, request_tx, message_rx, label));

        let worker = AgentWorker::new(self.factory);
        let channels = WorkerChannels {
            requests: request_rx,
            messages: message_tx,
        };

        tokio::select! {
            _ = worker.serve(channels) => {}
            _ = tokio::signal::ctrl_c() => warn!("Agent {} interrupted", self.agent_id),
        }

        // The worker has dropped its sender; let the writer flush the last reply
        if tokio::time::timeout(Duration::from_secs(5), transport).await.is_err() {
            warn!("Agent {} did not shut its connection down cleanly", self.agent_id);
        }
        info!("Agent {} exiting", self.agent_id);
        Ok(())
    }
}
