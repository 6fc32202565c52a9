//! test-agent - agent process
//!
//! Launched by the agency with an agent id and the agency endpoint. The
//! agent connects back, registers and then loads and runs packages on
//! request until it is told to stop.

use anyhow::{Context, Result};
use clap::Parser;

use test_engine::agents::RemoteTestAgent;
use test_engine::config::{EngineConfig, EnvConfig};
use test_engine::services::ServiceContext;
use test_engine::utils::logger::{init_logger, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "test-agent")]
#[command(version)]
#[command(about = "Agent process serving test-engine load and run requests")]
struct AgentArgs {
    /// Identity token assigned by the agency
    agent_id: String,

    /// Agency endpoint (host:port)
    agency_endpoint: String,

    /// Wait before connecting so a debugger can attach
    #[arg(long)]
    pause: bool,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse();

    let env = EnvConfig::load();
    let config = EngineConfig::default().with_env(&env);
    init_logger(LogLevel::resolve(&config.log_level, args.verbose));

    let context = ServiceContext::in_process(config);
    context
        .start()
        .await
        .context("Failed to start agent services")?;

    let factory = context.factory().clone();
    let served = RemoteTestAgent::new(args.agent_id, args.agency_endpoint, factory)
        .with_pause(args.pause)
        .run()
        .await;
    context.stop().await;
    served.context("Agent failed")
}
