//! Modeled/observed time-series pairs.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{invalid_input, CalibResult, MonitoringSite};

/// A modeled and an observed sequence of the same positive length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPair {
    timestamps: Vec<NaiveDateTime>,
    modeled: Vec<f64>,
    observed: Vec<f64>,
}

impl TimeSeriesPair {
    /// Build a pair from bare sequences (no timestamps).
    pub fn new(modeled: Vec<f64>, observed: Vec<f64>) -> CalibResult<Self> {
        check_lengths(&modeled, &observed)?;
        check_finite("modeled", &modeled)?;
        check_finite("observed", &observed)?;
        Ok(Self {
            timestamps: Vec::new(),
            modeled,
            observed,
        })
    }

    /// Keep only timestamps present in both sources, in chronological order.
    pub fn align(
        modeled: &BTreeMap<NaiveDateTime, f64>,
        observed: &BTreeMap<NaiveDateTime, f64>,
    ) -> CalibResult<Self> {
        let mut timestamps = Vec::new();
        let mut mod_values = Vec::new();
        let mut obs_values = Vec::new();

        for (timestamp, value) in modeled {
            if let Some(obs) = observed.get(timestamp) {
                timestamps.push(*timestamp);
                mod_values.push(*value);
                obs_values.push(*obs);
            }
        }

        if timestamps.is_empty() {
            return Err(invalid_input!(
                "modeled ({} steps) and observed ({} steps) series share no timestamps",
                modeled.len(),
                observed.len()
            ));
        }

        let mut pair = Self::new(mod_values, obs_values)?;
        pair.timestamps = timestamps;
        Ok(pair)
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn modeled(&self) -> &[f64] {
        &self.modeled
    }

    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    /// Empty when the pair was built without timestamps.
    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }
}

/// Check the equal, positive length required by every metric.
pub fn check_lengths(modeled: &[f64], observed: &[f64]) -> CalibResult<()> {
    if modeled.len() != observed.len() {
        return Err(invalid_input!(
            "modeled has {} values but observed has {}",
            modeled.len(),
            observed.len()
        ));
    }
    if observed.is_empty() {
        return Err(invalid_input!("series are empty"));
    }
    Ok(())
}

fn check_finite(label: &str, values: &[f64]) -> CalibResult<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(invalid_input!(
            "{label} value at position {index} is not finite ({})",
            values[index]
        )),
        None => Ok(()),
    }
}

/// The aligned series of one monitoring site for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSeries {
    pub site: MonitoringSite,
    pub pair: TimeSeriesPair,
}
