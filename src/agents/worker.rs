//! Agent request loop
//!
//! Services the requests of one connection against a runner created by
//! the local factory. Used by agent processes and by isolated domains.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::WorkerChannels;
use super::protocol::{AgentMessage, AgentRequest};
use crate::error::EngineError;
use crate::events::{TestEvent, TestEventListener};
use crate::filter::TestFilter;
use crate::runners::{TestRunner, TestRunnerFactory};

/// Request servicing loop for one agent or domain
pub struct AgentWorker {
    factory: Arc<TestRunnerFactory>,
    runner: Option<Arc<TestRunner>>,
}

/// Forwards progress events back over the channel
struct ForwardingListener {
    messages: mpsc::UnboundedSender<AgentMessage>,
}

impl TestEventListener for ForwardingListener {
    fn on_test_event(&self, event: &TestEvent) {
        let _ = self.messages.send(AgentMessage::Event {
            event: event.clone(),
        });
    }
}

impl AgentWorker {
    pub fn new(factory: Arc<TestRunnerFactory>) -> Self {
        Self {
            factory,
            runner: None,
        }
    }

    /// Serve requests until `Stop` arrives or the channel closes
    pub async fn serve(mut self, channels: WorkerChannels) {
        let WorkerChannels {
            mut requests,
            messages,
        } = channels;

        while let Some(request) = requests.recv().await {
            debug!("Agent request: {}", request.name());
            let keep_serving = match request {
                AgentRequest::Stop => false,
                AgentRequest::StopRun { .. } => {
                    debug!("No run in progress, ignoring stop request");
                    true
                }
                AgentRequest::Run { filter } => self.run(filter, &mut requests, &messages).await,
                other => {
                    let reply = match self.handle(other).await {
                        Ok(reply) => reply,
                        Err(e) => AgentMessage::Failed {
                            message: e.to_string(),
                        },
                    };
                    messages.send(reply).is_ok()
                }
            };
            if !keep_serving {
                break;
            }
        }

        self.unload_runner().await;
        info!("Agent worker stopped");
    }

    async fn handle(&mut self, request: AgentRequest) -> Result<AgentMessage, EngineError> {
        match request {
            AgentRequest::Load { package } => {
                self.unload_runner().await;
                let runner = Arc::new(self.factory.make_test_runner(package));
                let result = runner.load().await;
                self.runner = Some(runner);
                Ok(AgentMessage::Result { result: result? })
            }
            AgentRequest::Explore { filter } => {
                let result = self.loaded()?.explore(&filter).await?;
                Ok(AgentMessage::Result { result })
            }
            AgentRequest::CountTestCases { filter } => {
                let count = self.loaded()?.count_test_cases(&filter).await?;
                Ok(AgentMessage::Count { count })
            }
            AgentRequest::Unload => {
                self.unload_runner().await;
                Ok(AgentMessage::Unloaded)
            }
            other => Err(EngineError::Protocol(format!(
                "unexpected request '{}'",
                other.name()
            ))),
        }
    }

    /// Execute a run while still listening for stop requests. Returns
    /// false when the worker should exit afterwards.
    async fn run(
        &mut self,
        filter: TestFilter,
        requests: &mut mpsc::UnboundedReceiver<AgentRequest>,
        messages: &mpsc::UnboundedSender<AgentMessage>,
    ) -> bool {
        let runner = match self.loaded() {
            Ok(runner) => runner,
            Err(e) => {
                return messages
                    .send(AgentMessage::Failed {
                        message: e.to_string(),
                    })
                    .is_ok()
            }
        };

        let listener = Arc::new(ForwardingListener {
            messages: messages.clone(),
        });
        let run = runner.run(listener, &filter);
        tokio::pin!(run);

        let mut open = true;
        let mut exit_after = false;
        let outcome = loop {
            tokio::select! {
                // the run is polled first so it has begun before a stop is applied
                biased;
                outcome = &mut run => break outcome,
                request = requests.recv(), if open => match request {
                    Some(AgentRequest::StopRun { force }) => runner.stop_run(force),
                    Some(AgentRequest::Stop) => {
                        runner.stop_run(true);
                        exit_after = true;
                    }
                    Some(other) => warn!("Ignoring '{}' during a run", other.name()),
                    None => {
                        runner.stop_run(true);
                        open = false;
                        exit_after = true;
                    }
                },
            }
        };

        let reply = match outcome {
            Ok(result) => AgentMessage::Result { result },
            Err(e) => AgentMessage::Failed {
                message: e.to_string(),
            },
        };
        messages.send(reply).is_ok() && !exit_after
    }

    fn loaded(&self) -> Result<Arc<TestRunner>, EngineError> {
        self.runner.clone().ok_or(EngineError::NotLoaded)
    }

    async fn unload_runner(&mut self) {
        if let Some(runner) = self.runner.take() {
            if let Err(e) = runner.unload().await {
                warn!("Failed to unload {}: {}", runner.package(), e);
            }
        }
    }
}
