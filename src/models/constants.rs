//! Fixed names and defaults shared across the pipeline.

use std::time::Duration;

/// Signature file every formula is checked against, relative to the policies directory.
pub const SIGNATURE_FILE: &str = "predicates.sig";

/// File name of a formula's source inside its directory.
pub const FORMULA_FILE: &str = "formula.mfotl";

/// Formula that is violated by any non-empty event stream.
/// Used by the liveness check.
pub const LIVENESS_FORMULA: &str = "dummy";

/// Default MonPoly executable name.
pub const DEFAULT_ENGINE_BINARY: &str = "monpoly";

/// Docker image shipping MonPoly and the policy files.
pub const DEFAULT_DOCKER_IMAGE: &str = "dfinity/monpoly_pipeline:latest";

/// Wrapper used to report peak resident memory of the engine.
pub const DEFAULT_TIME_BINARY: &str = "/usr/bin/time";

/// Hard wall-clock ceiling for one monitoring session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Hard wall-clock ceiling for fetching a formula's free variables.
pub const DEFAULT_VARIABLES_TIMEOUT: Duration = Duration::from_secs(10);

/// Mount point of the artifacts directory inside the engine container.
pub const REPRO_MOUNT: &str = "/repro";

/// Mount point of the policies directory inside the engine container.
pub const WORK_MOUNT: &str = "/work";

/// Base URL of CI job pages, used to link groups back to their test run.
pub const CI_JOB_URL_BASE: &str = "https://gitlab.com/dfinity-lab/public/ic/-/jobs";

/// Relative path of a formula's source file inside the policies directory.
pub fn formula_local_path(formula: &str) -> String {
    format!("{formula}/{FORMULA_FILE}")
}
