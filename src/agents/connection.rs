//! Runner side of an agent channel
//!
//! An `AgentConnection` is a pair of unbounded channels. For an isolated
//! domain the worker sits directly on the other end; for an agent process
//! `pump` bridges the channels to a TCP stream.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::protocol::{decode, encode, AgentMessage, AgentRequest};
use crate::error::EngineError;
use crate::events::TestEventListener;

/// Client handle for one agent
pub struct AgentConnection {
    requests: mpsc::UnboundedSender<AgentRequest>,
    messages: Mutex<mpsc::UnboundedReceiver<AgentMessage>>,
    label: String,
}

/// Agent end of a channel pair
pub struct WorkerChannels {
    pub requests: mpsc::UnboundedReceiver<AgentRequest>,
    pub messages: mpsc::UnboundedSender<AgentMessage>,
}

/// Create a connected pair of runner and worker ends
pub fn channel_pair(label: impl Into<String>) -> (AgentConnection, WorkerChannels) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();

    let connection = AgentConnection {
        requests: request_tx,
        messages: Mutex::new(message_rx),
        label: label.into(),
    };
    let channels = WorkerChannels {
        requests: request_rx,
        messages: message_tx,
    };
    (connection, channels)
}

impl AgentConnection {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send a request without waiting for its answer
    pub fn send(&self, request: AgentRequest) -> Result<(), EngineError> {
        self.requests
            .send(request)
            .map_err(|_| self.failure("channel closed"))
    }

    /// Sender usable while a `call` is in progress, e.g. for `StopRun`
    pub fn sender(&self) -> mpsc::UnboundedSender<AgentRequest> {
        self.requests.clone()
    }

    /// Send a request and wait for its answer, forwarding any events to
    /// `listener`. Calls are serialized per connection.
    pub async fn call(
        &self,
        request: AgentRequest,
        listener: Option<&dyn TestEventListener>,
    ) -> Result<AgentMessage, EngineError> {
        self.call_then(request, listener, || ()).await
    }

    /// Like `call`, running `on_sent` once the request is queued and
    /// before waiting for the answer
    pub async fn call_then<F: FnOnce()>(
        &self,
        request: AgentRequest,
        listener: Option<&dyn TestEventListener>,
        on_sent: F,
    ) -> Result<AgentMessage, EngineError> {
        let mut messages = self.messages.lock().await;
        debug!("-> {} {}", self.label, request.name());
        self.send(request)?;
        on_sent();

        loop {
            match messages.recv().await {
                Some(AgentMessage::Event { event }) => {
                    if let Some(listener) = listener {
                        listener.on_test_event(&event);
                    }
                }
                Some(AgentMessage::Failed { message }) => return Err(EngineError::Remote(message)),
                Some(reply) => return Ok(reply),
                None => return Err(self.failure("connection lost")),
            }
        }
    }

    fn failure(&self, reason: &str) -> EngineError {
        EngineError::AgentCommunication {
            agent: self.label.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Bridge a TCP stream to a channel pair until either side closes.
///
/// Lines read from the socket are decoded and pushed to `inbound`; frames
/// received on `outbound` are written to the socket.
pub async fn pump<In, Out>(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut writer: OwnedWriteHalf,
    inbound: mpsc::UnboundedSender<In>,
    mut outbound: mpsc::UnboundedReceiver<Out>,
    label: String,
) where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    let write_label = label.clone();
    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let line = match encode(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Dropping frame for {}: {}", write_label, e);
                    continue;
                }
            };
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                warn!("Write to {} failed: {}", write_label, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match decode::<In>(&line) {
                Ok(frame) => {
                    if inbound.send(frame).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring frame from {}: {}", label, e),
            },
            Ok(None) => {
                debug!("{} closed the connection", label);
                break;
            }
            Err(e) => {
                warn!("Read from {} failed: {}", label, e);
                break;
            }
        }
    }

    write_task.abort();
}
