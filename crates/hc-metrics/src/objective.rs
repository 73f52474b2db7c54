//! Goodness-of-fit metrics for a modeled/observed series pair.
//!
//! All functions take `(modeled, observed)` slices of equal, positive length.

use serde::{Deserialize, Serialize};

use hc_types::{check_lengths, degenerate_series, invalid_input, CalibError, CalibResult};

/// Scaling weights of the three KGE components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KgeScaling {
    /// Correlation weight.
    pub sr: f64,
    /// Variability-ratio weight.
    pub sa: f64,
    /// Bias-ratio weight.
    pub sb: f64,
}

impl Default for KgeScaling {
    fn default() -> Self {
        Self {
            sr: 1.0,
            sa: 1.0,
            sb: 1.0,
        }
    }
}

/// Nash-Sutcliffe Efficiency. Range: (-inf, 1], 1 = perfect.
pub fn nse(modeled: &[f64], observed: &[f64]) -> CalibResult<f64> {
    check_lengths(modeled, observed)?;
    efficiency(modeled, observed, "NSE")
}

/// NSE of the base-10 logarithms. Every value must be strictly positive.
pub fn nse_log(modeled: &[f64], observed: &[f64]) -> CalibResult<f64> {
    check_lengths(modeled, observed)?;
    let log_mod = log10_all(modeled, "modeled")?;
    let log_obs = log10_all(observed, "observed")?;
    efficiency(&log_mod, &log_obs, "log NSE")
}

/// `w * NSE + (1 - w) * NSElog` with `w` in [0, 1].
pub fn nse_weighted(modeled: &[f64], observed: &[f64], weight: f64) -> CalibResult<f64> {
    if !(0.0..=1.0).contains(&weight) {
        return Err(CalibError::invalid_parameter(
            "nse_weight",
            format!("{weight} is outside [0, 1]"),
        ));
    }
    let plain = nse(modeled, observed)?;
    let log = nse_log(modeled, observed)?;
    Ok(weight * plain + (1.0 - weight) * log)
}

/// Pearson correlation coefficient. Range: [-1, 1].
pub fn pearson(modeled: &[f64], observed: &[f64]) -> CalibResult<f64> {
    check_lengths(modeled, observed)?;
    if is_constant(modeled) || is_constant(observed) {
        return Err(degenerate_series!(
            "Pearson correlation undefined for a constant series"
        ));
    }

    let n = observed.len() as f64;
    let sum_x: f64 = observed.iter().sum();
    let sum_y: f64 = modeled.iter().sum();
    let sum_xy: f64 = observed.iter().zip(modeled).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = observed.iter().map(|x| x * x).sum();
    let sum_y2: f64 = modeled.iter().map(|y| y * y).sum();

    let spread = (n * sum_x2 - sum_x * sum_x) * (n * sum_y2 - sum_y * sum_y);
    if !spread.is_finite() || spread <= 0.0 {
        return Err(degenerate_series!(
            "Pearson denominator is not a positive finite number ({spread})"
        ));
    }
    finite("Pearson correlation", (n * sum_xy - sum_x * sum_y) / spread.sqrt())
}

/// Root Mean Square Error. Range: [0, inf), 0 = perfect.
pub fn rmse(modeled: &[f64], observed: &[f64]) -> CalibResult<f64> {
    check_lengths(modeled, observed)?;
    let n = observed.len() as f64;
    finite("RMSE", (squared_error(modeled, observed) / n).sqrt())
}

/// Percent Bias. Optimal = 0. Positive = overestimation.
pub fn pbias(modeled: &[f64], observed: &[f64]) -> CalibResult<f64> {
    check_lengths(modeled, observed)?;
    let sum_obs: f64 = observed.iter().sum();
    if sum_obs == 0.0 {
        return Err(degenerate_series!("PBIAS undefined: observed values sum to zero"));
    }
    let diff_sum: f64 = modeled.iter().zip(observed).map(|(m, o)| m - o).sum();
    finite("PBIAS", 100.0 * diff_sum / sum_obs)
}

/// Kling-Gupta Efficiency. Range: (-inf, 1], 1 = perfect.
///
/// Variability uses the population standard deviation.
pub fn kge(modeled: &[f64], observed: &[f64], scaling: KgeScaling) -> CalibResult<f64> {
    let r = pearson(modeled, observed)?;

    let mean_m = mean(modeled);
    let mean_o = mean(observed);
    if mean_o == 0.0 {
        return Err(degenerate_series!("KGE bias ratio undefined: observed mean is zero"));
    }
    let std_o = population_std(observed, mean_o);
    if std_o == 0.0 {
        return Err(degenerate_series!(
            "KGE variability ratio undefined: observed series is constant"
        ));
    }

    let alpha = population_std(modeled, mean_m) / std_o;
    let beta = mean_m / mean_o;

    let distance = ((scaling.sr * (r - 1.0)).powi(2)
        + (scaling.sa * (alpha - 1.0)).powi(2)
        + (scaling.sb * (beta - 1.0)).powi(2))
    .sqrt();
    finite("KGE", 1.0 - distance)
}

fn efficiency(modeled: &[f64], observed: &[f64], label: &str) -> CalibResult<f64> {
    let mean_obs = mean(observed);
    let denominator: f64 = observed.iter().map(|o| (o - mean_obs).powi(2)).sum();
    if denominator == 0.0 || is_constant(observed) {
        return Err(degenerate_series!(
            "{label} undefined: observed series has zero variance"
        ));
    }
    if !denominator.is_finite() {
        return Err(degenerate_series!(
            "{label} undefined: observed variance overflows"
        ));
    }
    finite(label, 1.0 - squared_error(modeled, observed) / denominator)
}

/// Values too large for `f64` arithmetic overflow to inf/NaN; report them.
fn finite(label: &str, value: f64) -> CalibResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(degenerate_series!(
            "{label} is not finite ({value}); series magnitudes overflow"
        ))
    }
}

fn squared_error(modeled: &[f64], observed: &[f64]) -> f64 {
    modeled
        .iter()
        .zip(observed)
        .map(|(m, o)| (m - o).powi(2))
        .sum()
}

fn log10_all(values: &[f64], label: &str) -> CalibResult<Vec<f64>> {
    if let Some(index) = values.iter().position(|v| *v <= 0.0) {
        return Err(invalid_input!(
            "log metric requires positive values, {label}[{index}] = {}",
            values[index]
        ));
    }
    Ok(values.iter().map(|v| v.log10()).collect())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[0] == pair[1])
}
