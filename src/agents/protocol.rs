//! Agent wire protocol
//!
//! Requests and replies exchanged between a runner and an agent, framed
//! as newline-delimited JSON. The same frames travel over in-process
//! channels to an isolated domain.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::EngineError;
use crate::events::TestEvent;
use crate::filter::TestFilter;
use crate::package::TestPackage;
use crate::results::EngineResult;

/// Request sent to an agent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum AgentRequest {
    Load { package: TestPackage },
    Explore { filter: TestFilter },
    CountTestCases { filter: TestFilter },
    Run { filter: TestFilter },
    StopRun { force: bool },
    Unload,
    /// Shut the agent down
    Stop,
}

impl AgentRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AgentRequest::Load { .. } => "load",
            AgentRequest::Explore { .. } => "explore",
            AgentRequest::CountTestCases { .. } => "count-test-cases",
            AgentRequest::Run { .. } => "run",
            AgentRequest::StopRun { .. } => "stop-run",
            AgentRequest::Unload => "unload",
            AgentRequest::Stop => "stop",
        }
    }
}

/// Message sent by an agent. A request is answered by exactly one
/// `Result`, `Count`, `Unloaded` or `Failed`; `Event` frames may precede
/// the answer to `Run`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AgentMessage {
    Event { event: TestEvent },
    Result { result: EngineResult },
    Count { count: usize },
    Unloaded,
    Failed { message: String },
}

/// First frame an agent writes after connecting to the agency
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub agent_id: String,
    pub pid: u32,
}

/// Encode one frame as a JSON line
pub fn encode<T: Serialize>(frame: &T) -> Result<String, EngineError> {
    let mut line =
        serde_json::to_string(frame).map_err(|e| EngineError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode one JSON line
pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, EngineError> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| EngineError::Protocol(format!("invalid frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frames() {
        let request = AgentRequest::Run {
            filter: TestFilter::categories(["Fast"]),
        };
        let line = encode(&request).unwrap();

        assert!(line.ends_with('\n'));
        assert!(line.contains("\"op\":\"run\""));
        assert!(line.contains("<cat>Fast</cat>"));
        assert_eq!(decode::<AgentRequest>(&line).unwrap(), request);
    }

    #[test]
    fn test_stop_run_frame() {
        let request: AgentRequest = decode(r#"{"op":"stop-run","force":true}"#).unwrap();
        assert_eq!(request, AgentRequest::StopRun { force: true });
        assert_eq!(request.name(), "stop-run");
    }

    #[test]
    fn test_invalid_frame() {
        let err = decode::<AgentMessage>("{\"kind\":\"bogus\"}").unwrap_err();
        assert!(err.is_communication_failure());
    }
}
