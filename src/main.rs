use anyhow::Result;
use clap::{Parser, Subcommand};
use monwatch::commands::{install_image, list_policies, run};
use monwatch::config::{Mode, Settings};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "monwatch")]
#[command(about = "Check system test logs against MFOTL policies with MonPoly", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory with the signature file and one directory per policy
    #[arg(long, global = true)]
    policies_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor groups saved by an earlier run in raw mode
    Run {
        /// Raw log file(s) (`<group>[--<generation>].raw.log`)
        #[arg(short, long = "read", required = true, num_args = 1..)]
        read: Vec<PathBuf>,

        /// Which mode(s) should be activated
        #[arg(short, long, num_args = 1..)]
        mode: Vec<Mode>,

        /// Which policies should be monitored
        #[arg(short, long, num_args = 1..)]
        policy: Vec<String>,

        /// Global infra snapshot (.yml, .yaml or .json) used for every group
        #[arg(long)]
        global_infra: Option<PathBuf>,

        /// Return errors instead of alerting them
        #[arg(short, long)]
        fail: bool,

        /// Run MonPoly directly rather than inside a Docker container
        #[arg(long)]
        without_docker: bool,

        /// Directory in which the pipeline artifacts should be stored
        #[arg(short, long)]
        artifacts: Option<PathBuf>,

        /// Git revision of the policies, linked from alerts
        #[arg(long)]
        git_revision: Option<String>,

        /// Webhook service ID of the alerts channel
        #[arg(short, long)]
        slack_service_id: Option<String>,

        /// Webhook service ID of the liveness channel
        #[arg(long)]
        slack_liveness_service_id: Option<String>,
    },

    /// List all supported policies
    ListPolicies,

    /// Ensure that the MonPoly Docker image is installed
    InstallImage,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = cli.policies_dir {
        settings.policies_dir = dir;
    }

    match cli.command {
        Commands::Run {
            read,
            mode,
            policy,
            global_infra,
            fail,
            without_docker,
            artifacts,
            git_revision,
            slack_service_id,
            slack_liveness_service_id,
        } => {
            if !mode.is_empty() {
                settings.modes = mode.into_iter().collect();
            }
            if !policy.is_empty() {
                settings.formulas = Some(policy.into_iter().collect::<BTreeSet<_>>());
            }
            settings.fail_hard |= fail;
            if without_docker {
                settings.engine.docker = false;
            }
            if let Some(dir) = artifacts {
                settings.artifacts_dir = dir;
            }
            if let Some(revision) = git_revision {
                settings.git_revision = revision;
            }
            if slack_service_id.is_some() {
                settings.slack.alerts_service = slack_service_id;
            }
            if slack_liveness_service_id.is_some() {
                settings.slack.liveness_service = slack_liveness_service_id;
            }

            run::execute(
                settings,
                run::RunInputs {
                    raw_logs: read,
                    global_infra,
                },
            )
        }
        Commands::ListPolicies => list_policies::execute(&settings),
        Commands::InstallImage => install_image::execute(&settings),
    }
}
