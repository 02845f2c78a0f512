//! Engine command lines

use shell_escape::escape;
use std::borrow::Cow;
use std::path::{Path, PathBuf};

use super::config::EngineConfig;
use crate::models::constants::{formula_local_path, REPRO_MOUNT, WORK_MOUNT};

/// Prefix of the line the RSS wrapper prints on stderr
pub const RSS_REPORT_PREFIX: &str = "rss_kb=";

/// Invocation of the engine for one formula.
///
/// Knows how to render the command with and without the Docker wrapper and
/// the resource reporting wrapper, so the same session can be replayed on a
/// different host.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    config: EngineConfig,
    workdir: PathBuf,
    reprodir: PathBuf,
    formula: String,
}

impl EngineCommand {
    /// `workdir` holds the signature file and the formula directories;
    /// `reprodir` is the artifacts directory mounted at `/repro`.
    pub fn new(config: &EngineConfig, workdir: &Path, reprodir: &Path, formula: &str) -> Self {
        Self {
            config: config.clone(),
            workdir: workdir.to_path_buf(),
            reprodir: reprodir.to_path_buf(),
            formula: formula.to_string(),
        }
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn uses_docker(&self) -> bool {
        self.config.docker
    }

    pub fn reports_rss(&self) -> bool {
        self.config.report_rss
    }

    /// The command line that is actually spawned
    pub fn argv(&self) -> Vec<String> {
        self.build(self.config.report_rss, false)
    }

    /// The command line without the RSS wrapper.
    ///
    /// With `enforce_no_docker`, the Docker wrapper is dropped as well, for
    /// running inside an already started container.
    pub fn argv_without_rss(&self, enforce_no_docker: bool) -> Vec<String> {
        self.build(false, enforce_no_docker)
    }

    /// Type-check the formula and print its free variables
    pub fn check_argv(&self) -> Vec<String> {
        let mut argv = self.argv_without_rss(false);
        argv.push("-check".to_string());
        argv
    }

    fn build(&self, with_rss: bool, enforce_no_docker: bool) -> Vec<String> {
        let mut argv = Vec::new();

        if self.config.docker && !enforce_no_docker {
            argv.extend([
                "docker".to_string(),
                "run".to_string(),
                "-i".to_string(),
                "--rm".to_string(),
                "-v".to_string(),
                format!("{}:{WORK_MOUNT}", self.workdir.display()),
                "-v".to_string(),
                format!("{}:{REPRO_MOUNT}", self.reprodir.display()),
                "--workdir".to_string(),
                WORK_MOUNT.to_string(),
                self.config.docker_image.clone(),
            ]);
        }

        if with_rss {
            argv.extend([
                self.config.time_binary.clone(),
                "-f".to_string(),
                format!("{RSS_REPORT_PREFIX}%M"),
            ]);
        }

        argv.extend([
            self.config.binary.clone(),
            "-sig".to_string(),
            self.config.signature_file.clone(),
            "-formula".to_string(),
            formula_local_path(&self.formula),
        ]);

        if self.config.stop_at_first_violation {
            argv.push("-stop_at_first_viol".to_string());
        }

        argv
    }
}

/// Join a command line into a single shell-safe string
pub fn render_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| escape(Cow::from(arg.as_str())).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
