//! Pipeline struct and the per-group state machine

use std::sync::Arc;
use tracing::{info, warn};

use crate::alert::{AlertLevel, AlertSink};
use crate::artifacts::ArtifactStore;
use crate::config::{Mode, PipelineConfig};
use crate::engine::VariableCache;
use crate::models::{GlobalInfra, Group, GroupStats, StatsTree};
use crate::preprocess::PreProcessorFactory;
use crate::repro::ReproRecorder;

use super::error::PipelineError;
use super::messages;

/// Runs the configured steps for every group of a run.
///
/// Holds all run-wide state: statistics, repros, variable sequences and the
/// liveness flag. A new pipeline starts from scratch.
pub struct Pipeline {
    pub(super) config: PipelineConfig,
    pub(super) artifacts: Arc<dyn ArtifactStore>,
    pub(super) pre_processors: Arc<dyn PreProcessorFactory>,
    pub(super) alerts: Arc<dyn AlertSink>,
    pub(super) liveness_channel: Arc<dyn AlertSink>,
    pub(super) stats: StatsTree,
    pub(super) repros: ReproRecorder,
    pub(super) variables: VariableCache,
    pub(super) liveness_checked: bool,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        artifacts: Arc<dyn ArtifactStore>,
        pre_processors: Arc<dyn PreProcessorFactory>,
        alerts: Arc<dyn AlertSink>,
        liveness_channel: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config,
            artifacts,
            pre_processors,
            alerts,
            liveness_channel,
            stats: StatsTree::new(),
            repros: ReproRecorder::new(),
            variables: VariableCache::new(),
            liveness_checked: false,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Statistics of every group completed so far
    pub fn stats(&self) -> &StatsTree {
        &self.stats
    }

    pub fn repros(&self) -> &ReproRecorder {
        &self.repros
    }

    /// Variable sequence of `formula`, if it was fetched during this run
    pub fn variables(&self, formula: &str) -> Option<&[String]> {
        self.variables.get(formula)
    }

    pub fn liveness_checked(&self) -> bool {
        self.liveness_checked
    }

    /// Process `groups` in lexicographic order of their names, then run the
    /// liveness check if it is enabled and has not run yet.
    pub fn run(&mut self, mut groups: Vec<Group>) -> Result<(), PipelineError> {
        if groups.is_empty() {
            return Err(PipelineError::NoGroups);
        }

        groups.sort_by(|a, b| a.name().cmp(b.name()));
        if let Some(pair) = groups.windows(2).find(|w| w[0].name() == w[1].name()) {
            return Err(PipelineError::DuplicateGroup(pair[0].name().to_string()));
        }

        info!("Starting policy monitoring of {} groups", groups.len());

        for group in &groups {
            match self.run_single_group(group) {
                Ok(()) => {}
                Err(e) if e.is_group_scoped() && !self.config.fail_hard => {
                    warn!(group = group.name(), "{e}");
                    self.notify(
                        AlertLevel::PipelineFailure,
                        &messages::precondition_failure(&e.to_string()),
                        &format!("Skipped group {}", group.name()),
                    )?;
                }
                Err(e) => return Err(e),
            }
        }

        if self.config.has_mode(Mode::CheckPipelineLiveness) && !self.liveness_checked {
            self.liveness_checked = true;
            self.run_liveness_check(&groups[0])?;
        }

        info!("Policy monitoring completed");
        Ok(())
    }

    pub(super) fn run_single_group(&mut self, group: &Group) -> Result<(), PipelineError> {
        if group.global_infra().is_none()
            && self
                .pre_processors
                .is_global_infra_required(self.config.formulas.as_ref())
        {
            return Err(PipelineError::Precondition {
                group: group.name().to_string(),
                message: format!("global infra is required but not available for {group}"),
            });
        }

        info!(group = group.name(), "Processing group");
        let mut stats = GroupStats::new(group.global_infra().map(GlobalInfra::to_value));

        if self.config.has_mode(Mode::Raw) {
            self.artifacts.save_raw_logs(group)?;
        }

        if self.config.is_raw_only() {
            self.stats.insert(group.name().to_string(), stats);
            return Ok(());
        }

        let formulas = if self.config.has_mode(Mode::PreProcessorTest) {
            None
        } else {
            self.config.formulas.as_ref()
        };
        let mut pproc = self.pre_processors.create(group.global_infra(), formulas);
        let pproc_name = pproc.name().to_string();

        if self.config.has_mode(Mode::SaveEventStream) {
            let mut events = pproc.run(group.logs());
            self.artifacts
                .save_event_stream(group, &pproc_name, &mut events)?;
        }

        if self.config.has_mode(Mode::UniversalPolicy) {
            self.check_formulas(group, pproc.as_mut(), &mut stats)?;
        }

        // Early-stopped or faulted sessions leave their pass unfinished
        if !pproc.has_complete_stat() {
            let count = pproc.run(group.logs()).count();
            info!(group = group.name(), "Preprocessed {count} events");
        }

        stats.pre_processor = pproc.stat();
        self.stats.insert(group.name().to_string(), stats);
        Ok(())
    }

    /// Deliver to the policy channel
    pub(super) fn notify(
        &self,
        level: AlertLevel,
        text: &str,
        short_text: &str,
    ) -> Result<(), PipelineError> {
        deliver(self.alerts.as_ref(), self.config.fail_hard, level, text, short_text)
    }

    /// Deliver to the liveness channel
    pub(super) fn notify_liveness(
        &self,
        level: AlertLevel,
        text: &str,
        short_text: &str,
    ) -> Result<(), PipelineError> {
        deliver(
            self.liveness_channel.as_ref(),
            self.config.fail_hard,
            level,
            text,
            short_text,
        )
    }

    pub fn save_statistics(&self) -> Result<(), PipelineError> {
        self.artifacts.save_stat(&self.stats)?;
        Ok(())
    }

    pub fn save_repros(&self) -> Result<(), PipelineError> {
        self.artifacts.save_repros(&self.repros)?;
        Ok(())
    }
}

/// Sink failures only stop the pipeline when it fails hard
fn deliver(
    sink: &dyn AlertSink,
    fail_hard: bool,
    level: AlertLevel,
    text: &str,
    short_text: &str,
) -> Result<(), PipelineError> {
    match sink.alert(level, text, short_text) {
        Ok(()) => Ok(()),
        Err(e) if fail_hard => Err(e.context(format!("Failed to deliver {level} alert")).into()),
        Err(e) => {
            warn!("Failed to deliver {level} alert: {e:#}");
            Ok(())
        }
    }
}
