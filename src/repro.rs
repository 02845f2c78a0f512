//! Reproduction commands for violating sessions
//!
//! A repro is the engine command of a session without its RSS wrapper, plus a
//! `-log` flag that replays the saved event stream of the group. Repros are
//! collected per (group, formula) so they can be persisted after a run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::warn;

use crate::engine::{render_command, EngineCommand};
use crate::models::constants::REPRO_MOUNT;

/// Replay instructions for one session
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReproCommand {
    /// The command as the pipeline would run it
    pub command: String,
    /// Launcher snippet followed by a container-internal command, for
    /// replaying on a developer host
    pub host_variant: Option<String>,
}

impl ReproCommand {
    /// Build the repro for `command` replaying `log_file`.
    ///
    /// Inside a container, artifacts are mounted at `/repro`, so the log is
    /// referenced there whenever Docker is involved; both variants use the
    /// same log path.
    pub fn build(command: &EngineCommand, log_file: &Path, docker_starter: Option<&str>) -> Self {
        let log_path = if command.uses_docker() || docker_starter.is_some() {
            let name = log_file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            format!("{REPRO_MOUNT}/{name}")
        } else {
            log_file.display().to_string()
        };
        let log_flag = ["-log".to_string(), log_path];

        let mut argv = command.argv_without_rss(false);
        argv.extend(log_flag.iter().cloned());

        let host_variant = docker_starter.map(|starter| {
            let mut host_argv = command.argv_without_rss(true);
            host_argv.extend(log_flag.iter().cloned());
            format!("{starter}\n{}", render_command(&host_argv))
        });

        Self {
            command: render_command(&argv),
            host_variant,
        }
    }

    /// What a human should run: the host variant when one exists
    pub fn display(&self) -> &str {
        self.host_variant.as_deref().unwrap_or(&self.command)
    }
}

/// Outcome of recording a repro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReproStatus {
    /// First repro for this (group, formula)
    New,
    /// The exact command was already recorded
    Duplicate,
    /// A different command for an already recorded (group, formula).
    /// Stored alongside the others.
    Anomaly,
}

/// Grow-only store of repros, keyed by group and then formula
#[derive(Debug, Default)]
pub struct ReproRecorder {
    entries: BTreeMap<String, BTreeMap<String, BTreeSet<ReproCommand>>>,
    anomalies: usize,
}

impl ReproRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, group: &str, formula: &str, repro: &ReproCommand) -> ReproStatus {
        let formulas = self.entries.entry(group.to_string()).or_default();
        let existing = formulas.entry(formula.to_string()).or_default();

        let status = if existing.is_empty() {
            ReproStatus::New
        } else if existing.contains(repro) {
            ReproStatus::Duplicate
        } else {
            ReproStatus::Anomaly
        };

        if status == ReproStatus::Anomaly {
            self.anomalies += 1;
            warn!(group, formula, "Multiple distinct repros recorded for one policy");
        }

        existing.insert(repro.clone());
        status
    }

    /// Repros recorded for one (group, formula)
    pub fn get(&self, group: &str, formula: &str) -> Option<&BTreeSet<ReproCommand>> {
        self.entries.get(group)?.get(formula)
    }

    /// All repros in (group, formula) order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &BTreeSet<ReproCommand>)> {
        self.entries.iter().flat_map(|(group, formulas)| {
            formulas
                .iter()
                .map(move |(formula, repros)| (group.as_str(), formula.as_str(), repros))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct commands recorded for keys that already had one
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }
}

/// Shell script replaying every recorded repro of one (group, formula)
pub fn render_repro_script(group: &str, formula: &str, repros: &BTreeSet<ReproCommand>) -> String {
    let mut script = format!("#!/bin/sh\n# Repro of policy {formula} for group {group}\n");
    for repro in repros {
        script.push('\n');
        script.push_str(repro.display());
        script.push('\n');
    }
    script
}
