//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::filter::{FilterOptions, FilterParseError, TestFilter};
use crate::package::{keys, TestPackage};

/// Console runner for manifest-described test packages
#[derive(Parser, Debug)]
#[command(name = "test-engine")]
#[command(version)]
#[command(about = "Explore and run test packages in-process, in isolated domains or in agent processes")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Parse after normalising `--opt:value` arguments
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_args(std::env::args()))
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the tests in one or more files
    Run(RunArgs),

    /// List the tests in one or more files without running them
    Explore(RunArgs),

    /// Inspect engine configuration
    Config(ConfigArgs),
}

/// Arguments shared by run and explore
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test files or .testproj projects
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Select a test or suite by full name (repeatable)
    #[arg(long = "test")]
    pub tests: Vec<String>,

    /// Categories to include (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Categories to exclude (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Selection expression, e.g. "cat == Fast && test != Calc.Slow"
    #[arg(long = "where")]
    pub where_clause: Option<String>,

    /// Process model (Default, Single, Separate, Multiple)
    #[arg(long)]
    pub process_model: Option<String>,

    /// Domain usage (Default, None, Single, Multiple)
    #[arg(long)]
    pub domain_usage: Option<String>,

    /// Project configuration to load
    #[arg(long)]
    pub active_config: Option<String>,

    /// Default per-test timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Start agents paused so a debugger can attach
    #[arg(long)]
    pub agent_debug: bool,

    /// Save the result document to this file
    #[arg(long)]
    pub result: Option<PathBuf>,

    /// Output format (summary, xml, json)
    #[arg(short, long, default_value = "summary")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl RunArgs {
    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            tests: self.tests.clone(),
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            where_clause: self.where_clause.clone(),
        }
    }

    pub fn filter(&self) -> Result<TestFilter, FilterParseError> {
        self.filter_options().build()
    }

    /// Package for the named files, carrying the settings given on the
    /// command line
    pub fn package(&self, verbose: bool) -> TestPackage {
        let mut package = TestPackage::new(&self.files);

        let settings = package.settings_mut();
        if let Some(model) = &self.process_model {
            settings.set(keys::PROCESS_MODEL, model.clone());
        }
        if let Some(usage) = &self.domain_usage {
            settings.set(keys::DOMAIN_USAGE, usage.clone());
        }
        if let Some(config) = &self.active_config {
            settings.set(keys::ACTIVE_CONFIG, config.clone());
        }
        if let Some(timeout) = self.timeout {
            settings.set(keys::DEFAULT_TIMEOUT, timeout);
        }
        if self.agent_debug {
            settings.set(keys::AGENT_DEBUG, true);
        }
        if verbose {
            settings.set(keys::VERBOSE, true);
        }
        package
    }
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Output file path
        #[arg(short, long, default_value = "./test-engine.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// List the environment variables instead
        #[arg(long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to check; the discovered file when omitted
        file: Option<PathBuf>,
    },
}

/// Rewrite `--opt:value` as `--opt=value` so colon-style arguments parse
pub fn normalize_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter()
        .map(|arg| {
            let arg = arg.into();
            match arg.strip_prefix("--") {
                Some(body) => match (body.find(':'), body.find('=')) {
                    (Some(colon), None) => format!("--{}={}", &body[..colon], &body[colon + 1..]),
                    (Some(colon), Some(eq)) if colon < eq => {
                        format!("--{}={}", &body[..colon], &body[colon + 1..])
                    }
                    _ => arg,
                },
                None => arg,
            }
        })
        .collect()
}
