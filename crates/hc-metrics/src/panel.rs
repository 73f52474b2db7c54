//! The full set of metrics recorded for one site in one iteration.

use serde::{Deserialize, Serialize};

use hc_types::{CalibError, CalibResult, TimeSeriesPair};

use crate::objective::{kge, nse, nse_log, pbias, pearson, rmse, KgeScaling};

/// Settings of the per-site objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSettings {
    /// Weight of plain NSE against log NSE in the site objective.
    pub nse_weight: f64,
    pub kge_scaling: KgeScaling,
}

impl Default for ObjectiveSettings {
    fn default() -> Self {
        Self {
            nse_weight: 0.5,
            kge_scaling: KgeScaling::default(),
        }
    }
}

impl ObjectiveSettings {
    pub fn validate(&self) -> CalibResult<()> {
        if !(0.0..=1.0).contains(&self.nse_weight) {
            return Err(CalibError::invalid_parameter(
                "nse_weight",
                format!("{} is outside [0, 1]", self.nse_weight),
            ));
        }
        Ok(())
    }
}

/// Goodness-of-fit scores of one modeled/observed pair.
///
/// `nse_weighted` is the value fed to the multi-site aggregator; the rest
/// are recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPanel {
    pub n: usize,
    pub nse: f64,
    pub nse_log: f64,
    pub nse_weighted: f64,
    pub pearson: f64,
    pub rmse: f64,
    pub pbias: f64,
    pub kge: f64,
}

impl MetricPanel {
    /// Compute every metric. Any failing metric fails the whole panel.
    pub fn evaluate(pair: &TimeSeriesPair, settings: &ObjectiveSettings) -> CalibResult<Self> {
        settings.validate()?;
        let (m, o) = (pair.modeled(), pair.observed());

        let nse = nse(m, o)?;
        let nse_log = nse_log(m, o)?;
        let w = settings.nse_weight;

        let panel = Self {
            n: pair.len(),
            nse,
            nse_log,
            nse_weighted: w * nse + (1.0 - w) * nse_log,
            pearson: pearson(m, o)?,
            rmse: rmse(m, o)?,
            pbias: pbias(m, o)?,
            kge: kge(m, o, settings.kge_scaling)?,
        };
        panel.check_finite()?;
        Ok(panel)
    }

    fn check_finite(&self) -> CalibResult<()> {
        let scores = [
            ("nse", self.nse),
            ("nselog", self.nse_log),
            ("nsewt", self.nse_weighted),
            ("pearson", self.pearson),
            ("rmse", self.rmse),
            ("pbias", self.pbias),
            ("kge", self.kge),
        ];
        match scores.iter().find(|(_, v)| !v.is_finite()) {
            Some((name, value)) => Err(CalibError::DegenerateSeries(format!(
                "{name} is not finite ({value})"
            ))),
            None => Ok(()),
        }
    }
}
