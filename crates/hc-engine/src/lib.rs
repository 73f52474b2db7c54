//! # hc-engine
//!
//! Assembles a calibration run from a [`CalibrationConfig`]: loads the
//! decision-variable and site tables, wires the shell simulation, the CSV
//! observation source and the on-disk trial log into a
//! [`SearchController`], and resumes from the trial log when asked to.

pub mod config;
pub mod simulation;

pub use config::CalibrationConfig;
pub use simulation::{ShellCommands, ShellSimulation};

use tracing::{info, warn};

use hc_data::{load_checkpoint, load_decision_variables, load_sites, CsvObservationSource, TrialLog};
use hc_optimizer::{CalibrationOutcome, SearchController};
use hc_types::{config_error, CalibResult};

/// One calibration run, ready to be built and driven.
#[derive(Debug, Clone)]
pub struct Calibration {
    config: CalibrationConfig,
    resume: bool,
}

impl Calibration {
    pub fn new(config: CalibrationConfig) -> Self {
        Self {
            config,
            resume: false,
        }
    }

    /// Continue from the trial log already in the output directory.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Load the inputs and build the controller.
    ///
    /// A fresh run refuses an output directory that already holds trials;
    /// a resumed run with no trials yet starts from the beginning.
    pub fn build(&self) -> CalibResult<SearchController> {
        let config = &self.config;
        config.validate()?;

        let variables = load_decision_variables(config.variables_path())?;
        let sites = load_sites(config.sites_path())?;
        info!("Calibrating against {} monitoring sites", sites.len());

        let output = config.output_path();
        let checkpoint = load_checkpoint(&output)?;
        if checkpoint.is_some() && !self.resume {
            return Err(config_error!(
                "{} already holds a trial log; resume it or choose another output_dir",
                output.display()
            ));
        }

        let simulation = ShellSimulation::new(&config.working_dir, config.commands.clone())?;
        let observations =
            CsvObservationSource::new(&config.working_dir, config.observations.clone());
        let log = TrialLog::create(&output)?;

        let controller = SearchController::new(
            config.search.clone(),
            variables,
            sites,
            Box::new(simulation),
            Box::new(observations),
            Box::new(log),
        )?;

        match checkpoint {
            Some(checkpoint) => controller.resume(checkpoint),
            None => {
                if self.resume {
                    warn!(
                        "No trial log in {}; starting a fresh run",
                        output.display()
                    );
                }
                Ok(controller)
            }
        }
    }

    pub async fn run(self) -> CalibResult<CalibrationOutcome> {
        let mut controller = self.build()?;
        controller.run().await
    }
}
