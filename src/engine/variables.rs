//! Free-variable sequences of formulas

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::command::{render_command, EngineCommand};
use super::error::SessionError;
use crate::decoder::parse_tuple;
use crate::process::run_with_timeout;

static FREE_VARIABLES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^The sequence of free variables is: (\(.*\))\s*$")
        .expect("Invalid regex pattern")
});

/// Ask the engine for the ordered free variables of `command`'s formula.
///
/// Violation tuples list values in exactly this order.
pub fn fetch_variables(
    command: &EngineCommand,
    timeout: Duration,
) -> Result<Vec<String>, SessionError> {
    let argv = command.check_argv();
    let cmd = render_command(&argv);

    let output = run_with_timeout(&argv, command.workdir(), timeout).map_err(|source| {
        SessionError::Spawn {
            cmd: cmd.clone(),
            source,
        }
    })?;

    if output.timed_out {
        return Err(SessionError::Timeout { cmd, timeout });
    }

    match parse_free_variables(&output.stdout) {
        Some(variables) => {
            debug!(
                formula = command.formula(),
                "Free variables: {}",
                variables.join(", ")
            );
            Ok(variables)
        }
        None => Err(SessionError::Engine {
            cmd,
            message: format!(
                "could not determine free variables (exit code {:?}): {}",
                output.exit_code,
                output.stderr.trim()
            ),
        }),
    }
}

/// Extract the variable sequence from the engine's `-check` output
pub fn parse_free_variables(output: &str) -> Option<Vec<String>> {
    let captures = FREE_VARIABLES.captures(output)?;
    parse_tuple(captures.get(1)?.as_str())
}

/// A `-check` query that failed, kept so the formula is not queried again
#[derive(Debug, Clone)]
struct FetchFailure {
    cmd: String,
    message: String,
}

impl FetchFailure {
    fn to_error(&self) -> SessionError {
        SessionError::Engine {
            cmd: self.cmd.clone(),
            message: self.message.clone(),
        }
    }
}

/// Variable sequences fetched during one pipeline run.
///
/// Each formula is queried at most once, whatever the outcome; the cache
/// lives and dies with its pipeline.
#[derive(Debug, Default)]
pub struct VariableCache {
    outcomes: HashMap<String, Result<Vec<String>, FetchFailure>>,
}

impl VariableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, formula: &str) -> Option<&[String]> {
        match self.outcomes.get(formula)? {
            Ok(variables) => Some(variables.as_slice()),
            Err(_) => None,
        }
    }

    /// Cached sequence for `formula`, fetching it with `fetch` on first use.
    ///
    /// A failed fetch is returned as is, remembered, and reported again as
    /// [`SessionError::Engine`] on later calls.
    pub fn get_or_fetch<F>(&mut self, formula: &str, fetch: F) -> Result<&[String], SessionError>
    where
        F: FnOnce() -> Result<Vec<String>, SessionError>,
    {
        if !self.outcomes.contains_key(formula) {
            let outcome = fetch();
            let cached = match &outcome {
                Ok(variables) => Ok(variables.clone()),
                Err(e) => Err(FetchFailure {
                    cmd: e.cmd().to_string(),
                    message: e.message(),
                }),
            };
            self.outcomes.insert(formula.to_string(), cached);
            outcome?;
        }

        match &self.outcomes[formula] {
            Ok(variables) => Ok(variables.as_slice()),
            Err(failure) => Err(failure.to_error()),
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
