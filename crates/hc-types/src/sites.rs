//! Monitoring sites and iteration tags.

use serde::{Deserialize, Serialize};

/// A streamflow gauge used to score the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitoringSite {
    /// Channel feature id in the model output.
    pub feature_id: String,
    /// Gauge identifier of the observed record.
    pub gauge_id: String,
}

impl MonitoringSite {
    /// Numeric gauge ids are zero-padded to the 8-digit USGS form.
    pub fn new(feature_id: impl Into<String>, gauge_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            gauge_id: normalize_gauge_id(&gauge_id.into()),
        }
    }
}

impl std::fmt::Display for MonitoringSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (feature {})", self.gauge_id, self.feature_id)
    }
}

fn normalize_gauge_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.len() < 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        format!("{trimmed:0>8}")
    } else {
        trimmed.to_string()
    }
}

/// Label of one iteration, zero-padded to the width of the evaluation budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationTag {
    pub iteration: usize,
    width: usize,
}

impl IterationTag {
    pub fn new(iteration: usize, budget: usize) -> Self {
        Self {
            iteration,
            width: budget.to_string().len(),
        }
    }

    /// Directory the simulation outputs of this iteration are collected into.
    pub fn sim_dir(&self) -> String {
        format!("sim_{self}")
    }
}

impl std::fmt::Display for IterationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0width$}", self.iteration, width = self.width)
    }
}
