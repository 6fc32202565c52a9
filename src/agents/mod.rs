//! Agents
//!
//! Everything needed to run a package outside the controlling runner:
//! the wire protocol, the client connection, the request servicing
//! worker and the agent process entry point.

mod connection;
mod protocol;
mod remote;
mod worker;

pub use connection::{channel_pair, pump, AgentConnection, WorkerChannels};
pub use protocol::{decode, encode, AgentMessage, AgentRequest, Registration};
pub use remote::RemoteTestAgent;
pub use worker::AgentWorker;
