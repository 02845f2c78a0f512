//! Liveness self-check
//!
//! Replays a group's events against a formula that any event violates. If the
//! engine stays silent, the pipeline itself is broken.

use tracing::{debug, info, warn};

use crate::alert::AlertLevel;
use crate::engine::{EngineCommand, MonitorSession, SessionEvent, Submission};
use crate::models::constants::LIVENESS_FORMULA;
use crate::models::Group;
use crate::repro::ReproCommand;

use super::error::PipelineError;
use super::messages;
use super::orchestrator::Pipeline;
use super::policy::session_name;

impl Pipeline {
    pub(super) fn run_liveness_check(&mut self, group: &Group) -> Result<(), PipelineError> {
        info!(group = group.name(), "Starting liveness check");

        let formulas = self.pre_processors.formulas_without_global_infra();
        let mut pproc = self.pre_processors.create(None, Some(&formulas));

        let log_file = self.artifacts.event_stream_file(group, pproc.name());
        let command = EngineCommand::new(
            &self.config.engine,
            &self.config.policies_dir,
            &self.artifacts.artifacts_prefix(),
            LIVENESS_FORMULA,
        );
        let repro = ReproCommand::build(&command, &log_file, self.config.docker_starter.as_deref());
        let name = session_name(&log_file, LIVENESS_FORMULA);

        let observed_violation = match MonitorSession::spawn(
            &name,
            &command,
            self.config.engine.session_timeout(),
        ) {
            Ok((mut session, events)) => {
                let mut observed = false;
                for event in pproc.run(group.logs()) {
                    match session.submit(&event) {
                        Ok(Submission::Accepted) => {}
                        Ok(Submission::Closed) => break,
                        Err(e) => {
                            debug!(session = name.as_str(), "Liveness session failed: {e}");
                            break;
                        }
                    }
                    observed |= events.try_iter().any(is_violation);
                }
                if let Err(e) = session.close() {
                    debug!(session = name.as_str(), "Liveness session failed: {e}");
                }
                observed || events.try_iter().any(is_violation)
            }
            Err(e) => {
                warn!("Could not start liveness session: {e}");
                false
            }
        };

        if observed_violation {
            info!("Liveness check passed");
            self.notify_liveness(
                AlertLevel::LivenessOk,
                &messages::liveness_ok(repro.display()),
                "Policy monitoring pipeline status: 🍏",
            )
        } else {
            warn!("Liveness check did not observe the expected violation");
            self.notify_liveness(
                AlertLevel::LivenessBroken,
                &messages::liveness_broken(group, LIVENESS_FORMULA, repro.display()),
                "💀 Policy monitoring pipeline broken 💀",
            )
        }
    }
}

fn is_violation(event: SessionEvent) -> bool {
    matches!(event, SessionEvent::Violation(_))
}
