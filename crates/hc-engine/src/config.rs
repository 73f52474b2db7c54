//! Run configuration for `hc-calibrate`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use hc_data::ObservationLayout;
use hc_optimizer::SearchConfig;
use hc_types::{config_error, CalibError, CalibResult};

use crate::simulation::ShellCommands;

/// Everything one calibration run needs, loaded from a JSON file.
///
/// Relative input paths resolve against `working_dir`, the directory the
/// model scripts run in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub search: SearchConfig,
    pub working_dir: PathBuf,
    /// Decision-variable table (`x_names,x_min,x_max,x_ini,x_flag,x_type`).
    pub variables_file: PathBuf,
    /// Monitoring-site table (`FID,USGS_ID`).
    pub sites_file: PathBuf,
    /// Where the trial log is written.
    pub output_dir: PathBuf,
    pub observations: ObservationLayout,
    pub commands: ShellCommands,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            working_dir: PathBuf::from("."),
            variables_file: PathBuf::from("dvars.csv"),
            sites_file: PathBuf::from("frxt_pts.csv"),
            output_dir: PathBuf::from("calibration"),
            observations: ObservationLayout::default(),
            commands: ShellCommands::default(),
            log_level: "info".to_string(),
        }
    }
}

impl CalibrationConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CalibResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            config_error!("cannot read configuration {}: {}", path.display(), e)
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.search = self.search.with_seed(seed);
        self
    }

    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_commands(mut self, commands: ShellCommands) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_observations(mut self, layout: ObservationLayout) -> Self {
        self.observations = layout;
        self
    }

    pub fn validate(&self) -> CalibResult<()> {
        self.search.validate()?;
        self.commands.validate()?;
        if !self.observations.modeled_pattern.contains("{tag}") {
            return Err(CalibError::invalid_parameter(
                "observations.modeled_pattern",
                "must contain the {tag} placeholder",
            ));
        }
        if !self.observations.observed_pattern.contains("{gauge}") {
            return Err(CalibError::invalid_parameter(
                "observations.observed_pattern",
                "must contain the {gauge} placeholder",
            ));
        }
        Ok(())
    }

    pub fn variables_path(&self) -> PathBuf {
        self.resolve(&self.variables_file)
    }

    pub fn sites_path(&self) -> PathBuf {
        self.resolve(&self.sites_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}
