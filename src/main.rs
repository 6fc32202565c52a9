//! test-engine - console runner
//!
//! Explores and runs manifest-described test packages. Packages run
//! in-process, in an isolated domain thread, or in `test-agent` processes
//! launched through the agency.
//!
//! ## Usage
//!
//! ```bash
//! # Run every test in a file
//! test-engine run calculator.yaml
//!
//! # Run selected tests in a separate agent process
//! test-engine run calculator.yaml --test:Calculator.Add --process-model Separate
//!
//! # List the tests selected by a category expression
//! test-engine explore calculator.yaml --where "cat == Fast"
//! ```

use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};

use test_engine::cli::{self, Args, Command};
use test_engine::config::{print_env_help, EngineConfig, EnvConfig};
use test_engine::engine::TestEngine;
use test_engine::events::{NullListener, TestEventListener};
use test_engine::output::{write_result_file, ConsoleListener, OutputFormat, ResultFormatter};
use test_engine::results::TestStatus;
use test_engine::utils::logger::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse_normalized();

    match dispatch(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("✗ {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether the command succeeded
async fn dispatch(args: Args) -> Result<bool> {
    let (config, overridden) = load_config(&args)?;
    init_logger(LogLevel::resolve(&config.log_level, args.verbose));
    if overridden {
        debug!("Applied TEST_ENGINE_* overrides");
    }

    match args.command {
        Command::Run(run_args) => run_tests(config, run_args, args.verbose).await,
        Command::Explore(run_args) => explore_tests(config, run_args, args.verbose).await,
        Command::Config(config_args) => {
            manage_config(config, config_args)?;
            Ok(true)
        }
    }
}

/// Configuration with environment overrides applied, and whether any applied
fn load_config(args: &Args) -> Result<(EngineConfig, bool)> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    let env = EnvConfig::load();
    Ok((config.with_env(&env), env.has_any()))
}

fn formatter(args: &cli::RunArgs) -> Result<(OutputFormat, ResultFormatter)> {
    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;
    let formatter = ResultFormatter::new(format);
    let formatter = if args.no_color {
        formatter.no_color()
    } else {
        formatter
    };
    Ok((format, formatter))
}

async fn run_tests(config: EngineConfig, args: cli::RunArgs, verbose: bool) -> Result<bool> {
    let filter = args.filter().context("Invalid test selection")?;
    let (format, formatter) = formatter(&args)?;

    let engine = TestEngine::new(config);
    engine.start().await.context("Failed to start engine services")?;

    let runner = engine.get_runner(args.package(verbose));
    info!("Using {} runner for {}", runner.kind(), runner.package());

    let listener: Arc<dyn TestEventListener> = if format == OutputFormat::Summary {
        let console = ConsoleListener::new().verbose(verbose);
        Arc::new(if args.no_color { console.no_color() } else { console })
    } else {
        // Progress lines would corrupt an XML or JSON document on stdout
        Arc::new(NullListener)
    };

    let outcome = {
        let run = engine.run_with(&runner, listener, &filter);
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping the run");
                runner.stop_run(false);
                run.await
            }
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            engine.stop().await;
            return Err(e).context("Test run failed");
        }
    };

    println!("{}", formatter.format_result(&result));

    if let Some(path) = &args.result {
        write_result_file(path, &result, OutputFormat::for_path(path))?;
        info!("Results saved to {}", path.display());
    }

    engine.stop().await;
    Ok(result.status() != Some(TestStatus::Failed))
}

async fn explore_tests(config: EngineConfig, args: cli::RunArgs, verbose: bool) -> Result<bool> {
    let filter = args.filter().context("Invalid test selection")?;
    let (_, formatter) = formatter(&args)?;

    let engine = TestEngine::new(config);
    engine.start().await.context("Failed to start engine services")?;

    let outcome = engine.explore(args.package(verbose), &filter).await;
    engine.stop().await;
    let result = outcome.context("Explore failed")?;

    println!("{}", formatter.format_explore(&result));

    if let Some(path) = &args.result {
        write_result_file(path, &result, OutputFormat::for_path(path))?;
        info!("Results saved to {}", path.display());
    }

    Ok(!result.is_error())
}

fn manage_config(config: EngineConfig, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }
            EngineConfig::default().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
        }

        cli::ConfigAction::Show { env, format } => {
            if env {
                print_env_help();
            } else {
                let output = if format == "json" {
                    serde_json::to_string_pretty(&config)?
                } else {
                    serde_yaml::to_string(&config)?
                };
                println!("{output}");
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(EngineConfig::find)
                .ok_or_else(|| anyhow::anyhow!("No configuration file found"))?;

            match EngineConfig::load(&path) {
                Ok(_) => println!("✓ Configuration file is valid: {}", path.display()),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    anyhow::bail!("Invalid configuration");
                }
            }
        }
    }

    Ok(())
}
