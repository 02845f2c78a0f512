//! Pipeline artifacts: raw logs, event streams, statistics and repros
//!
//! Everything a run produces lives under `<artifacts>/<signature>/`, which is
//! also the directory mounted at `/repro` when replaying a violation.

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{Group, StatsTree};
use crate::repro::{render_repro_script, ReproRecorder};

/// Storage of run artifacts
pub trait ArtifactStore {
    /// Where the event stream of `group`, as produced by `pre_processor`, is saved
    fn event_stream_file(&self, group: &Group, pre_processor: &str) -> PathBuf;

    fn save_raw_logs(&self, group: &Group) -> Result<()>;

    fn save_event_stream(
        &self,
        group: &Group,
        pre_processor: &str,
        events: &mut dyn Iterator<Item = String>,
    ) -> Result<()>;

    fn save_stat(&self, stats: &StatsTree) -> Result<()>;

    /// Persist every recorded repro as a shell script
    fn save_repros(&self, repros: &ReproRecorder) -> Result<()>;

    /// Root of this run's artifacts
    fn artifacts_prefix(&self) -> PathBuf;
}

/// Artifacts on the local filesystem
#[derive(Debug, Clone)]
pub struct FsArtifactManager {
    prefix: PathBuf,
}

impl FsArtifactManager {
    /// Artifacts of run `signature` are stored in `<artifacts_dir>/<signature>/`
    pub fn new(artifacts_dir: &Path, signature: &str) -> Result<Self> {
        let prefix = artifacts_dir.join(signature);
        fs::create_dir_all(&prefix).with_context(|| {
            format!("Failed to create artifacts directory: {}", prefix.display())
        })?;
        let prefix = prefix.canonicalize().with_context(|| {
            format!("Failed to resolve artifacts directory: {}", prefix.display())
        })?;
        Ok(Self { prefix })
    }

    pub fn raw_logs_file(&self, group: &Group) -> PathBuf {
        self.prefix.join(format!("{}.raw.log", group.safe_name()))
    }

    pub fn stat_file(&self) -> PathBuf {
        self.prefix.join("stat.json")
    }

    pub fn repro_file(&self, group: &str, formula: &str) -> PathBuf {
        self.prefix
            .join("repros")
            .join(group)
            .join(format!("{formula}.sh"))
    }
}

impl ArtifactStore for FsArtifactManager {
    fn event_stream_file(&self, group: &Group, pre_processor: &str) -> PathBuf {
        self.prefix
            .join(format!("{}.{pre_processor}.log", group.safe_name()))
    }

    fn save_raw_logs(&self, group: &Group) -> Result<()> {
        let path = self.raw_logs_file(group);
        let content =
            serde_json::to_string(group.logs()).context("Failed to serialize raw logs")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write raw logs: {}", path.display()))?;
        info!(group = group.name(), "Saved raw logs to {}", path.display());
        Ok(())
    }

    fn save_event_stream(
        &self,
        group: &Group,
        pre_processor: &str,
        events: &mut dyn Iterator<Item = String>,
    ) -> Result<()> {
        let path = self.event_stream_file(group, pre_processor);
        let file = fs::File::create(&path)
            .with_context(|| format!("Failed to create event stream file: {}", path.display()))?;
        let count = write_event_lines(BufWriter::new(file), events, &path)?;

        info!(
            group = group.name(),
            "Saved {count} events to {}",
            path.display()
        );
        Ok(())
    }

    fn save_stat(&self, stats: &StatsTree) -> Result<()> {
        let path = self.stat_file();
        let content =
            serde_json::to_string_pretty(stats).context("Failed to serialize statistics")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write statistics: {}", path.display()))?;
        info!("Saved statistics to {}", path.display());
        Ok(())
    }

    fn save_repros(&self, repros: &ReproRecorder) -> Result<()> {
        for (group, formula, commands) in repros.iter() {
            let path = self.repro_file(group, formula);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create repro directory: {}", parent.display())
                })?;
            }
            fs::write(&path, render_repro_script(group, formula, commands))
                .with_context(|| format!("Failed to write repro: {}", path.display()))?;
        }
        Ok(())
    }

    fn artifacts_prefix(&self) -> PathBuf {
        self.prefix.clone()
    }
}

/// Write one event per line; returns the number of events written
fn write_event_lines<W: Write>(
    mut writer: W,
    events: &mut dyn Iterator<Item = String>,
    path: &Path,
) -> Result<usize> {
    let mut count = 0usize;
    for event in events {
        let line_end: &[u8] = if event.ends_with('\n') { b"" } else { b"\n" };
        writer
            .write_all(event.as_bytes())
            .and_then(|()| writer.write_all(line_end))
            .with_context(|| format!("Failed to write event stream: {}", path.display()))?;
        count += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write event stream: {}", path.display()))?;
    Ok(count)
}
