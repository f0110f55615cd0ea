//! OBI command-line client
//!
//! Creates, inspects and deletes OBI infrastructures on a Kubernetes cluster
//! and submits jobs to their masters.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{infrastructure, job};
use obi_core::KubePlatform;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// OBI infrastructure control plane
#[derive(Parser)]
#[command(name = "obi")]
#[command(author, version, about = "Control plane for OBI infrastructures", long_about = None)]
pub struct Cli {
    /// Namespace to operate in (overrides settings and descriptor)
    #[arg(long, short = 'n', global = true, env = "OBI_NAMESPACE")]
    pub namespace: Option<String>,

    /// Path to kubeconfig file (uses the default discovery chain if not specified)
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Settings file (defaults to ~/.config/obi/config.{yaml,json,toml})
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an infrastructure or submit a job
    #[command(subcommand)]
    Create(CreateCommands),

    /// Delete an infrastructure
    #[command(subcommand)]
    Delete(DeleteCommands),

    /// Show details of an infrastructure or a job
    #[command(subcommand)]
    Describe(DescribeCommands),

    /// List infrastructures or jobs
    #[command(subcommand)]
    Get(GetCommands),
}

#[derive(Subcommand)]
pub enum CreateCommands {
    /// Create an infrastructure from a descriptor file
    Infrastructure {
        /// Descriptor file (YAML, JSON or TOML)
        #[arg(long, short = 'f')]
        file: PathBuf,
    },

    /// Submit a job to an infrastructure's master
    Job {
        /// Executable: a local file (uploaded) or a remote URI
        #[arg(long = "file", short = 'f')]
        executable: String,

        /// Job type (PySpark)
        #[arg(long = "type", short = 't')]
        job_type: String,

        /// Target infrastructure
        #[arg(long, short = 'i')]
        infrastructure: String,

        /// Job priority
        #[arg(long, short = 'p', default_value_t = 0)]
        priority: i32,

        /// Wait until the job completes or fails
        #[arg(long, short = 'w')]
        wait: bool,

        /// Arguments passed to the job
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum DeleteCommands {
    /// Delete an infrastructure and every object it references
    Infrastructure {
        /// Infrastructure name
        name: String,
    },
}

#[derive(Subcommand)]
pub enum DescribeCommands {
    /// Show an infrastructure's objects and addresses
    Infrastructure {
        /// Infrastructure name
        name: String,
    },

    /// Show one job of an infrastructure
    Job {
        /// Job ID
        id: i32,

        /// Infrastructure the job ran on
        #[arg(long, short = 'i')]
        infrastructure: String,
    },
}

#[derive(Subcommand)]
pub enum GetCommands {
    /// List infrastructures in the namespace
    #[command(alias = "infrastructure")]
    Infrastructures,

    /// List jobs of an infrastructure
    #[command(alias = "job")]
    Jobs {
        /// Infrastructure to list jobs of
        #[arg(long, short = 'i')]
        infrastructure: String,

        /// Only jobs whose status starts with this
        #[arg(long, short = 's')]
        status: Option<String>,
    },
}

impl Commands {
    /// Command path used in log events
    fn name(&self) -> &'static str {
        match self {
            Commands::Create(CreateCommands::Infrastructure { .. }) => "create infrastructure",
            Commands::Create(CreateCommands::Job { .. }) => "create job",
            Commands::Delete(DeleteCommands::Infrastructure { .. }) => "delete infrastructure",
            Commands::Describe(DescribeCommands::Infrastructure { .. }) => {
                "describe infrastructure"
            }
            Commands::Describe(DescribeCommands::Job { .. }) => "describe job",
            Commands::Get(GetCommands::Infrastructures) => "get infrastructures",
            Commands::Get(GetCommands::Jobs { .. }) => "get jobs",
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "obi=debug,obi_core=debug" } else { "obi=info,obi_core=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = config::load_settings(cli.config.as_deref(), cli.namespace.as_deref())?;
    debug!(kubeconfig = ?cli.kubeconfig, namespace = %settings.namespace, "Connecting to cluster");
    let platform = KubePlatform::connect(cli.kubeconfig.as_deref())
        .await
        .context("Failed to connect to the cluster")?;
    info!(command = cli.command.name(), namespace = %settings.namespace, "Running command");

    match cli.command {
        Commands::Create(CreateCommands::Infrastructure { file }) => {
            let namespace = cli.namespace.as_deref();
            infrastructure::create(&platform, &settings, &file, namespace, cli.format).await
        }
        Commands::Create(CreateCommands::Job {
            executable,
            job_type,
            infrastructure,
            priority,
            wait,
            args,
        }) => {
            let args = job::SubmitArgs {
                executable,
                job_type,
                infrastructure,
                priority,
                args,
                wait,
            };
            job::submit(&platform, &settings, args, cli.format).await
        }
        Commands::Delete(DeleteCommands::Infrastructure { name }) => {
            infrastructure::delete(&platform, &settings.namespace, &name, cli.format).await
        }
        Commands::Describe(DescribeCommands::Infrastructure { name }) => {
            infrastructure::describe(&platform, &settings.namespace, &name, cli.format).await
        }
        Commands::Describe(DescribeCommands::Job { id, infrastructure }) => {
            job::describe(&platform, &settings, &infrastructure, id, cli.format).await
        }
        Commands::Get(GetCommands::Infrastructures) => {
            infrastructure::list(&platform, &settings.namespace, cli.format).await
        }
        Commands::Get(GetCommands::Jobs {
            infrastructure,
            status,
        }) => {
            let status = status.as_deref();
            job::list(&platform, &settings, &infrastructure, status, cli.format).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    if let Err(err) = run(cli).await {
        output::print_error(&format!("{:#}", err));
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_job_with_wait_and_args() {
        let cli = Cli::try_parse_from([
            "obi", "create", "job", "-f", "job.py", "-t", "PySpark", "-i", "infra1", "--wait",
            "--", "--epochs", "3",
        ])
        .unwrap();

        assert_eq!(cli.command.name(), "create job");
        match cli.command {
            Commands::Create(CreateCommands::Job { wait, args, .. }) => {
                assert!(wait);
                assert_eq!(args, vec!["--epochs", "3"]);
            }
            _ => panic!("expected create job"),
        }
    }

    #[test]
    fn test_job_status_commands() {
        let cli = Cli::try_parse_from(["obi", "get", "jobs", "-i", "infra1", "-s", "run"]).unwrap();
        assert_eq!(cli.command.name(), "get jobs");
        match cli.command {
            Commands::Get(GetCommands::Jobs {
                infrastructure,
                status,
            }) => {
                assert_eq!(infrastructure, "infra1");
                assert_eq!(status.as_deref(), Some("run"));
            }
            _ => panic!("expected get jobs"),
        }

        let cli = Cli::try_parse_from(["obi", "describe", "job", "12", "-i", "infra1"]).unwrap();
        assert_eq!(cli.command.name(), "describe job");
        assert!(matches!(
            cli.command,
            Commands::Describe(DescribeCommands::Job { id: 12, .. })
        ));
    }
}
