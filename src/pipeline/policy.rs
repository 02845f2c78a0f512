//! Policy sessions: one engine run per formula of a group

use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::alert::AlertLevel;
use crate::decoder::ViolationDecoder;
use crate::engine::{
    fetch_variables, EngineCommand, MonitorSession, SessionError, SessionEvent, Submission,
};
use crate::models::{EngineStats, Group, GroupStats};
use crate::preprocess::PreProcessor;
use crate::repro::ReproCommand;

use super::error::PipelineError;
use super::messages;
use super::orchestrator::Pipeline;

/// What the handlers of one policy session need to know
struct PolicyContext<'a> {
    group: &'a Group,
    formula: &'a str,
    formula_link: String,
    repro: ReproCommand,
    decoder: ViolationDecoder<'a>,
}

impl Pipeline {
    /// Check every formula of `pproc` against the events of `group`.
    ///
    /// Engine faults are alerted and the next formula proceeds, unless the
    /// pipeline fails hard.
    pub(super) fn check_formulas(
        &mut self,
        group: &Group,
        pproc: &mut dyn PreProcessor,
        stats: &mut GroupStats,
    ) -> Result<(), PipelineError> {
        let log_file = self.artifacts.event_stream_file(group, pproc.name());
        let reprodir = self.artifacts.artifacts_prefix();

        info!(
            group = group.name(),
            "Checking policies from {}",
            self.config.policies_dir.display()
        );

        for formula in pproc.formulas() {
            let command = EngineCommand::new(
                &self.config.engine,
                &self.config.policies_dir,
                &reprodir,
                &formula,
            );
            let mut engine_stats = EngineStats::default();
            let started = Instant::now();

            let outcome = self.check_formula(group, pproc, &command, &log_file, &mut engine_stats);
            engine_stats.wall_clock_secs = started.elapsed().as_secs_f64();
            stats.monpoly.insert(formula.clone(), engine_stats);

            match outcome {
                Ok(()) => {}
                Err(PipelineError::Session(e)) if !self.config.fail_hard => {
                    error!(group = group.name(), formula = formula.as_str(), "{e}");
                    self.notify(
                        AlertLevel::EngineFault,
                        &messages::engine_fault(&e),
                        &format!("Exception from Monpoly: {}", e.message()),
                    )?;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn check_formula(
        &mut self,
        group: &Group,
        pproc: &mut dyn PreProcessor,
        command: &EngineCommand,
        log_file: &Path,
        stats: &mut EngineStats,
    ) -> Result<(), PipelineError> {
        let formula = command.formula();
        let timeout = self.config.engine.variables_timeout();
        let variables = self
            .variables
            .get_or_fetch(formula, || fetch_variables(command, timeout))?
            .to_vec();

        let ctx = PolicyContext {
            group,
            formula,
            formula_link: messages::formula_link(&self.config.git_revision, formula),
            repro: ReproCommand::build(command, log_file, self.config.docker_starter.as_deref()),
            decoder: ViolationDecoder::new(&variables),
        };

        let session_name = session_name(log_file, formula);
        let (mut session, events) =
            MonitorSession::spawn(&session_name, command, self.config.engine.session_timeout())?;

        let mut fault: Option<SessionError> = None;
        for event in pproc.run(group.logs()) {
            match session.submit(&event) {
                Ok(Submission::Accepted) => stats.events_submitted += 1,
                Ok(Submission::Closed) => {
                    // The engine stops reading after its first violation
                    debug!(session = session_name.as_str(), "Engine closed its input");
                    stats.early_stop = true;
                    break;
                }
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            }
            self.drain_events(&ctx, &events, stats, false)?;
        }

        let fault = match fault {
            Some(e) => {
                let summary = session.abort();
                stats.exit_code = summary.exit_code;
                stats.timed_out = summary.timed_out || matches!(e, SessionError::Timeout { .. });
                Some(e)
            }
            None => match session.close() {
                Ok(summary) => {
                    stats.exit_code = summary.exit_code;
                    stats.peak_rss_kb = summary.peak_rss_kb;
                    None
                }
                Err(e) => {
                    stats.timed_out = true;
                    Some(e)
                }
            },
        };

        self.drain_events(&ctx, &events, stats, fault.is_some())?;

        match fault {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn drain_events(
        &mut self,
        ctx: &PolicyContext<'_>,
        events: &Receiver<SessionEvent>,
        stats: &mut EngineStats,
        faulted: bool,
    ) -> Result<(), PipelineError> {
        for event in events.try_iter() {
            self.handle_policy_event(ctx, event, stats, faulted)?;
        }
        Ok(())
    }

    fn handle_policy_event(
        &mut self,
        ctx: &PolicyContext<'_>,
        event: SessionEvent,
        stats: &mut EngineStats,
        faulted: bool,
    ) -> Result<(), PipelineError> {
        let source = self.config.engine.binary.clone();

        match event {
            SessionEvent::Violation(message) => {
                stats.violations += 1;
                let record = ctx.decoder.decode(&message);
                if !record.is_decoded() {
                    stats.decode_fallbacks += 1;
                }
                self.repros
                    .record(ctx.group.name(), ctx.formula, &ctx.repro);
                self.notify(
                    AlertLevel::Violation,
                    &messages::violation(
                        &source,
                        ctx.group,
                        &ctx.formula_link,
                        &record.to_string(),
                        ctx.repro.display(),
                    ),
                    &format!("Violation in {}", ctx.formula),
                )
            }
            SessionEvent::Error(message) => {
                stats.errors += 1;
                self.repros
                    .record(ctx.group.name(), ctx.formula, &ctx.repro);
                self.notify(
                    AlertLevel::EngineError,
                    &messages::engine_error(
                        &source,
                        ctx.group,
                        ctx.formula,
                        &message,
                        ctx.repro.display(),
                    ),
                    &format!("Error from {source}"),
                )
            }
            SessionEvent::Exit { code, stderr } => {
                stats.exit_code = code;
                // A faulted session is reported as a fault; its forced exit is not news
                if code == Some(0) || faulted {
                    return Ok(());
                }
                self.repros
                    .record(ctx.group.name(), ctx.formula, &ctx.repro);
                self.notify(
                    AlertLevel::AbnormalExit,
                    &messages::abnormal_exit(
                        ctx.group,
                        ctx.formula,
                        code,
                        &stderr,
                        ctx.repro.display(),
                    ),
                    &format!(
                        "Monpoly exited with code {}",
                        messages::exit_code_label(code)
                    ),
                )
            }
        }
    }
}

/// `<event stream file stem>.<formula>`
pub(super) fn session_name(log_file: &Path, formula: &str) -> String {
    let stem = log_file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{stem}.{formula}")
}
