//! `monwatch list-policies`

use anyhow::Result;
use colored::Colorize;

use crate::config::Settings;
use crate::preprocess::FormulaCatalog;

pub fn execute(settings: &Settings) -> Result<()> {
    let catalog =
        FormulaCatalog::discover(&settings.policies_dir, &settings.requires_global_infra)?;

    println!(
        "{} {}",
        "Supported policies in".bold(),
        settings.policies_dir.display().to_string().bold()
    );

    if catalog.formulas().is_empty() {
        println!("  {}", "(none found)".dimmed());
        return Ok(());
    }

    for formula in catalog.formulas() {
        if catalog.requires_global_infra(formula) {
            println!("  {formula} {}", "(requires global infra)".yellow());
        } else {
            println!("  {formula}");
        }
    }
    Ok(())
}
