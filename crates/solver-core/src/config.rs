//! TOML config loading for the solver CLI.
//!
//! Deserializes `configs/search.toml` with `[search]`, `[oracle]`, and
//! optional `[scoring]` sections, then merges with CLI overrides
//! (defaults < TOML < CLI).

use std::path::Path;

use oracle::OracleConfig;
use scoring::ScoringConfig;
use search::SearchConfig;
use serde::Deserialize;

/// Top-level structure matching `configs/search.toml`.
#[derive(Debug, Deserialize)]
pub struct SolverToml {
    /// Search algorithm parameters.
    #[serde(default)]
    pub search: SearchConfig,
    /// Oracle client parameters.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Scoring model parameters. Optional here because the model path
    /// usually comes from `--model-path`.
    pub scoring: Option<ScoringConfig>,
}

impl Default for SolverToml {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            oracle: OracleConfig::default(),
            scoring: None,
        }
    }
}

/// Load a `SolverToml`, falling back to defaults when the file does not
/// exist (all knobs then come from CLI flags).
pub fn load_solver_toml(path: &Path) -> anyhow::Result<SolverToml> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(SolverToml::default());
    }
    let contents = std::fs::read_to_string(path)?;
    let config: SolverToml = toml::from_str(&contents)?;
    tracing::info!(path = %path.display(), "Loaded solver config");
    Ok(config)
}
