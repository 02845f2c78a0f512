//! `monwatch install-image`

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::process::Command;

use crate::config::Settings;

/// Pull the engine image so that the first session does not pay for it
pub fn execute(settings: &Settings) -> Result<()> {
    let docker = which::which("docker").context("docker not found in PATH")?;
    let image = &settings.engine.docker_image;

    println!("Pulling {} ...", image.cyan());
    let status = Command::new(docker)
        .args(["image", "pull", image])
        .status()
        .context("Failed to run docker")?;

    if !status.success() {
        bail!("docker image pull {image} failed with {status}");
    }

    println!("{} {image}", "Installed".green().bold());
    Ok(())
}
