//! Formulas available in a policies directory

use anyhow::{anyhow, Result};
use glob::glob;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::constants::{FORMULA_FILE, LIVENESS_FORMULA};

/// Formulas found under `<policies>/<formula>/formula.mfotl`.
///
/// The liveness formula is not a policy and is never listed.
#[derive(Debug, Clone, Default)]
pub struct FormulaCatalog {
    policies_dir: PathBuf,
    formulas: BTreeSet<String>,
    requires_global_infra: BTreeSet<String>,
}

impl FormulaCatalog {
    pub fn discover(policies_dir: &Path, requires_global_infra: &[String]) -> Result<Self> {
        let pattern = policies_dir.join("*").join(FORMULA_FILE);
        let pattern_str = pattern.to_string_lossy();

        let formulas: BTreeSet<String> = glob(&pattern_str)
            .map_err(|e| anyhow!("Invalid glob pattern '{pattern_str}': {e}"))?
            .filter_map(|r| r.ok())
            .filter_map(|path| {
                let name = path.parent()?.file_name()?.to_str()?.to_string();
                (name != LIVENESS_FORMULA).then_some(name)
            })
            .collect();

        debug!(
            "Discovered {} formulas in {}",
            formulas.len(),
            policies_dir.display()
        );

        Ok(Self::new(policies_dir, formulas, requires_global_infra))
    }

    pub fn new(
        policies_dir: &Path,
        formulas: BTreeSet<String>,
        requires_global_infra: &[String],
    ) -> Self {
        let requires_global_infra: BTreeSet<String> =
            requires_global_infra.iter().cloned().collect();
        for formula in requires_global_infra.difference(&formulas) {
            warn!(formula, "Formula marked as requiring global infra does not exist");
        }
        Self {
            policies_dir: policies_dir.to_path_buf(),
            formulas,
            requires_global_infra,
        }
    }

    pub fn policies_dir(&self) -> &Path {
        &self.policies_dir
    }

    pub fn formulas(&self) -> &BTreeSet<String> {
        &self.formulas
    }

    pub fn contains(&self, formula: &str) -> bool {
        self.formulas.contains(formula)
    }

    pub fn requires_global_infra(&self, formula: &str) -> bool {
        self.requires_global_infra.contains(formula)
    }

    pub fn without_global_infra(&self) -> BTreeSet<String> {
        self.formulas
            .iter()
            .filter(|f| !self.requires_global_infra(f))
            .cloned()
            .collect()
    }
}
