//! Shared helpers: a scriptable fake engine, recording alert sinks and
//! pipeline wiring over temporary directories

use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use monwatch::alert::{AlertLevel, AlertSink};
use monwatch::artifacts::FsArtifactManager;
use monwatch::config::{Mode, PipelineConfig};
use monwatch::engine::{EngineCommand, EngineConfig};
use monwatch::models::{GlobalInfra, Group, LogDoc};
use monwatch::pipeline::Pipeline;
use monwatch::preprocess::{EventLogPreProcessorFactory, FormulaCatalog};

/// Fake MonPoly.
///
/// Each event line is `<formula>|<command> <argument>`, where `<formula>` is
/// `*` for every formula. Commands:
/// - `V <text>`: report `<text>` as a violation (and stop if asked to)
/// - `E <text>`: print `<text>` on stderr
/// - `X <code>`: exit with `<code>`
/// - `H`: hang without reading further input
///
/// `-check` prints the content of `<formula>/vars` as the free variables,
/// or fails if `<formula>/check_error` exists. Every `-check` call is
/// appended to `<formula>/check_calls`.
const FAKE_ENGINE: &str = r#"#!/bin/sh
formula=""
stop=0
check=0
while [ $# -gt 0 ]; do
  case "$1" in
    -formula) formula="${2%/formula.mfotl}"; shift ;;
    -stop_at_first_viol) stop=1 ;;
    -check) check=1 ;;
  esac
  shift
done

if [ "$check" = 1 ]; then
  echo check >> "$formula/check_calls"
  if [ -f "$formula/check_error" ]; then
    echo "Error: cannot type-check $formula" >&2
    exit 2
  fi
  vars=""
  if [ -f "$formula/vars" ]; then
    read -r vars < "$formula/vars"
  fi
  echo "The analyzed formula is: $formula"
  echo "The sequence of free variables is: ($vars)"
  exit 0
fi

while IFS= read -r line; do
  target="${line%%|*}"
  rest="${line#*|}"
  if [ "$target" != "*" ] && [ "$target" != "$formula" ]; then
    continue
  fi
  cmd="${rest%% *}"
  arg="${rest#* }"
  case "$cmd" in
    V)
      echo "$arg"
      if [ "$stop" = 1 ]; then
        exit 0
      fi
      ;;
    E) echo "$arg" >&2 ;;
    X) exit "$arg" ;;
    H) exec sleep 30 ;;
  esac
done
exit 0
"#;

/// A policies directory with a fake engine
pub struct TestEnv {
    pub dir: TempDir,
    pub policies: PathBuf,
    pub artifacts: PathBuf,
    pub engine: EngineConfig,
}

impl TestEnv {
    /// `formulas` are (name, comma separated variables)
    pub fn new(formulas: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let policies = dir.path().join("policies");
        let artifacts = dir.path().join("artifacts");
        fs::create_dir_all(&policies).expect("Failed to create policies dir");
        fs::write(policies.join("predicates.sig"), "event(string)\n")
            .expect("Failed to write signature");

        let binary = dir.path().join("fake-monpoly");
        fs::write(&binary, FAKE_ENGINE).expect("Failed to write fake engine");
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake engine executable");

        let env = Self {
            policies,
            artifacts,
            engine: EngineConfig {
                binary: binary.display().to_string(),
                docker: false,
                report_rss: false,
                stop_at_first_violation: true,
                session_timeout_secs: 10,
                variables_timeout_secs: 10,
                ..Default::default()
            },
            dir,
        };

        env.add_formula("dummy", "");
        for (name, vars) in formulas {
            env.add_formula(name, vars);
        }
        env
    }

    pub fn add_formula(&self, name: &str, vars: &str) {
        let formula_dir = self.policies.join(name);
        fs::create_dir_all(&formula_dir).expect("Failed to create formula dir");
        fs::write(formula_dir.join("formula.mfotl"), "TRUE\n").expect("Failed to write formula");
        fs::write(formula_dir.join("vars"), format!("{vars}\n")).expect("Failed to write vars");
    }

    /// Make `-check` fail for `formula`
    pub fn break_formula(&self, formula: &str) {
        fs::write(self.policies.join(formula).join("check_error"), "")
            .expect("Failed to mark formula as broken");
    }

    /// How many times the engine was asked for the variables of `formula`
    pub fn check_calls(&self, formula: &str) -> usize {
        fs::read_to_string(self.policies.join(formula).join("check_calls"))
            .map(|calls| calls.lines().count())
            .unwrap_or(0)
    }

    pub fn command(&self, formula: &str) -> EngineCommand {
        EngineCommand::new(&self.engine, &self.policies, &self.artifacts, formula)
    }

    pub fn config(&self, modes: &[Mode]) -> PipelineConfig {
        PipelineConfig {
            policies_dir: self.policies.clone(),
            modes: modes.iter().copied().collect(),
            engine: self.engine.clone(),
            docker_starter: None,
            git_revision: "test-revision".to_string(),
            formulas: None,
            fail_hard: false,
        }
    }

    pub fn artifacts_manager(&self) -> Arc<FsArtifactManager> {
        Arc::new(
            FsArtifactManager::new(&self.artifacts, "run").expect("Failed to create artifacts"),
        )
    }

    pub fn factory(&self, requires_global_infra: &[&str]) -> Arc<EventLogPreProcessorFactory> {
        let requires: Vec<String> = requires_global_infra.iter().map(|s| s.to_string()).collect();
        let catalog =
            FormulaCatalog::discover(&self.policies, &requires).expect("Failed to discover");
        Arc::new(EventLogPreProcessorFactory::new(catalog))
    }

    pub fn pipeline(&self, config: PipelineConfig) -> TestPipeline {
        self.pipeline_with(config, &[], RecordingSink::new(), RecordingSink::new())
    }

    pub fn pipeline_with(
        &self,
        config: PipelineConfig,
        requires_global_infra: &[&str],
        alerts: Arc<RecordingSink>,
        liveness: Arc<RecordingSink>,
    ) -> TestPipeline {
        let pipeline = Pipeline::new(
            config,
            self.artifacts_manager(),
            self.factory(requires_global_infra),
            alerts.clone(),
            liveness.clone(),
        );
        TestPipeline {
            pipeline,
            alerts,
            liveness,
        }
    }
}

pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub alerts: Arc<RecordingSink>,
    pub liveness: Arc<RecordingSink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAlert {
    pub level: AlertLevel,
    pub text: String,
    pub short_text: String,
}

/// Keeps every alert; optionally fails each delivery after recording it
#[derive(Debug, Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<RecordedAlert>>,
    failing: bool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            alerts: Mutex::default(),
            failing: true,
        })
    }

    pub fn all(&self) -> Vec<RecordedAlert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn with_level(&self, level: AlertLevel) -> Vec<RecordedAlert> {
        self.all().into_iter().filter(|a| a.level == level).collect()
    }

    pub fn levels(&self) -> Vec<AlertLevel> {
        self.all().into_iter().map(|a| a.level).collect()
    }
}

impl AlertSink for RecordingSink {
    fn alert(&self, level: AlertLevel, text: &str, short_text: &str) -> Result<()> {
        self.alerts.lock().unwrap().push(RecordedAlert {
            level,
            text: text.to_string(),
            short_text: short_text.to_string(),
        });
        if self.failing {
            return Err(anyhow!("webhook unavailable"));
        }
        Ok(())
    }
}

/// A group whose log documents are the given event lines
pub fn group(name: &str, events: &[&str]) -> Group {
    let logs: Vec<LogDoc> = events.iter().map(|e| json!(e)).collect();
    Group::new(name, logs)
}

pub fn group_with_infra(name: &str, events: &[&str]) -> Group {
    group(name, events).with_global_infra(GlobalInfra::new(json!({"subnets": ["s1"]})))
}

pub fn formulas(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}
