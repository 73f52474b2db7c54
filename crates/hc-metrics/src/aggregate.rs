//! Multi-site objective aggregation.

use hc_types::{config_error, invalid_input, CalibResult};

/// Combine per-site weighted-NSE scores into `1 - mean(scores)`.
///
/// The result is minimized by the search: a perfect fit at every site
/// gives 0.
pub fn aggregate_sites(site_scores: &[f64]) -> CalibResult<f64> {
    if site_scores.is_empty() {
        return Err(config_error!("objective aggregation needs at least one site"));
    }
    if let Some(index) = site_scores.iter().position(|s| !s.is_finite()) {
        return Err(invalid_input!(
            "site score {index} is not finite ({})",
            site_scores[index]
        ));
    }
    let mean = site_scores.iter().sum::<f64>() / site_scores.len() as f64;
    Ok(1.0 - mean)
}
