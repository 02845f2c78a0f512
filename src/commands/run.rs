//! `monwatch run`: monitor previously saved groups

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::alert::{AlertLevel, AlertSink, LogSink, SlackSink};
use crate::artifacts::{ArtifactStore, FsArtifactManager};
use crate::config::{generate_signature, Settings};
use crate::models::{GlobalInfra, Group, StatsTree};
use crate::pipeline::Pipeline;
use crate::preprocess::{EventLogPreProcessorFactory, FormulaCatalog};
use crate::utils::code_block;

/// Inputs of one run that do not come from [`Settings`]
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    /// Raw log files saved by an earlier run in `raw` mode
    pub raw_logs: Vec<PathBuf>,
    /// Global infra snapshot applied to every group
    pub global_infra: Option<PathBuf>,
}

pub fn execute(settings: Settings, inputs: RunInputs) -> Result<()> {
    let signature = generate_signature();
    info!(signature = signature.as_str(), "Starting run");

    let alerts = alert_sink(
        settings.slack.alerts_service.as_deref(),
        "alerts",
        "--slack-service-id",
        &signature,
        &settings.git_revision,
    )?;
    let liveness = alert_sink(
        settings.slack.liveness_service.as_deref(),
        "liveness",
        "--slack-liveness-service-id",
        &signature,
        &settings.git_revision,
    )?;

    match run_pipeline(&settings, &inputs, &signature, alerts.clone(), liveness) {
        Ok(stats) => {
            print_summary(&stats, &signature);
            Ok(())
        }
        Err(e) if settings.fail_hard => Err(e),
        Err(e) => {
            error!("Pipeline stopped: {e:#}");
            let text = format!(
                "Policy monitoring pipeline stopped due to unhandled error:\n{}",
                code_block(&format!("{e:?}"))
            );
            if let Err(alert_err) = alerts.alert(
                AlertLevel::PipelineFailure,
                &text,
                "Policy monitoring pipeline stopped",
            ) {
                warn!("Failed to deliver failure alert: {alert_err:#}");
            }
            Ok(())
        }
    }
}

fn run_pipeline(
    settings: &Settings,
    inputs: &RunInputs,
    signature: &str,
    alerts: Arc<dyn AlertSink>,
    liveness: Arc<dyn AlertSink>,
) -> Result<StatsTree> {
    let groups = load_groups(inputs)?;

    let catalog =
        FormulaCatalog::discover(&settings.policies_dir, &settings.requires_global_infra)?;
    let policies_dir = settings.policies_dir.canonicalize().with_context(|| {
        format!(
            "Failed to resolve policies directory: {}",
            settings.policies_dir.display()
        )
    })?;

    let artifacts = Arc::new(FsArtifactManager::new(&settings.artifacts_dir, signature)?);
    info!("Artifacts: {}", artifacts.artifacts_prefix().display());

    let mut config = settings.pipeline_config(signature);
    config.policies_dir = policies_dir;
    if config.engine.docker && is_inside_docker() {
        info!("Running inside a container; starting the engine directly");
        config.engine.docker = false;
    }

    let mut pipeline = Pipeline::new(
        config,
        artifacts,
        Arc::new(EventLogPreProcessorFactory::new(catalog)),
        alerts,
        liveness,
    );

    pipeline.run(groups)?;
    pipeline.save_repros()?;
    pipeline.save_statistics()?;
    Ok(pipeline.stats().clone())
}

fn load_groups(inputs: &RunInputs) -> Result<Vec<Group>> {
    let infra = inputs
        .global_infra
        .as_deref()
        .map(|path| {
            info!("Setting global infra for all groups based on {}", path.display());
            GlobalInfra::from_file(path)
        })
        .transpose()?;

    inputs
        .raw_logs
        .iter()
        .map(|path| -> Result<Group> {
            let group = Group::from_raw_log_file(path)?;
            Ok(match &infra {
                Some(infra) => group.with_global_infra(infra.clone()),
                None => group,
            })
        })
        .collect()
}

fn alert_sink(
    service_id: Option<&str>,
    channel: &str,
    option: &str,
    signature: &str,
    git_revision: &str,
) -> Result<Arc<dyn AlertSink>> {
    match service_id {
        Some(id) => Ok(Arc::new(SlackSink::new(id, signature, git_revision)?)),
        None => {
            warn!("Slack {channel} channel is disabled; pass a webhook service ID via {option} to enable it");
            Ok(Arc::new(LogSink::new(channel, signature, git_revision)))
        }
    }
}

fn is_inside_docker() -> bool {
    Path::new("/.dockerenv").exists()
}

fn print_summary(stats: &StatsTree, signature: &str) {
    println!();
    println!("{} {}", "Run".bold(), signature.cyan());

    for (group, group_stats) in stats {
        let violated: Vec<&str> = group_stats
            .monpoly
            .iter()
            .filter(|(_, s)| s.violations > 0)
            .map(|(formula, _)| formula.as_str())
            .collect();
        let faulty = group_stats
            .monpoly
            .values()
            .filter(|s| s.errors > 0 || s.timed_out || s.exit_code.is_some_and(|c| c != 0))
            .count();

        let status = if !violated.is_empty() {
            format!("{} violated: {}", "✗".red(), violated.join(", "))
        } else if faulty > 0 {
            format!("{} {faulty} engine problems", "!".yellow())
        } else {
            format!("{} {} policies checked", "✓".green(), group_stats.monpoly.len())
        };
        println!("  {group}: {status}");
    }
}
