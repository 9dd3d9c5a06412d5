use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::estimate::EstimationConfig;
use crate::graph::Limits;

/// Engine-wide defaults applied to every call unless overridden per call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub estimation: EstimationConfig,
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from a .env file (if present) first.
    /// Looks for the config file in this order:
    /// 1. Path specified in RELGRAPH_CONFIG environment variable
    /// 2. ./relgraph.toml in current directory
    pub fn load() -> Result<Self> {
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RELGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("relgraph.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse relgraph config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate numeric ranges
    fn validate(&self) -> Result<()> {
        let l = &self.limits;
        if l.max_depth_ceiling == 0 {
            anyhow::bail!("limits.max_depth_ceiling must be greater than 0");
        }
        if l.max_nodes == 0 {
            anyhow::bail!("limits.max_nodes must be greater than 0");
        }
        if l.max_results == 0 {
            anyhow::bail!("limits.max_results must be greater than 0");
        }
        if l.timeout_secs == 0 {
            anyhow::bail!("limits.timeout_secs must be greater than 0");
        }

        let e = &self.estimation;
        if e.probe_depth == 0 {
            anyhow::bail!("estimation.probe_depth must be greater than 0");
        }
        if e.hub_threshold <= 1.0 {
            anyhow::bail!("estimation.hub_threshold must be greater than 1.0");
        }
        if e.damping <= 0.0 || e.damping > 1.0 {
            anyhow::bail!("estimation.damping must be in (0.0, 1.0]");
        }
        if e.min_safety_margin < 1.05 {
            anyhow::bail!("estimation.min_safety_margin must be at least 1.05");
        }
        if e.safety_margin < e.min_safety_margin {
            anyhow::bail!("estimation.safety_margin must not be below min_safety_margin");
        }
        if e.warn_tolerance < 1.0 {
            anyhow::bail!("estimation.warn_tolerance must be at least 1.0");
        }
        if !(0.0..=1.0).contains(&e.min_convergence_multiplier) {
            anyhow::bail!("estimation.min_convergence_multiplier must be between 0.0 and 1.0");
        }

        Ok(())
    }
}
