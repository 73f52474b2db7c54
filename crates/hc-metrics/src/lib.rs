//! # hc-metrics
//!
//! Goodness-of-fit scores for modeled vs. observed streamflow and the
//! aggregation of per-site scores into the single objective the search
//! minimizes.
//!
//! Every metric is a pure function of its inputs. Zero denominators are
//! reported as [`hc_types::CalibError::DegenerateSeries`], never as NaN or
//! infinity.

mod aggregate;
mod objective;
mod panel;

pub use aggregate::aggregate_sites;
pub use objective::{kge, nse, nse_log, nse_weighted, pbias, pearson, rmse, KgeScaling};
pub use panel::{MetricPanel, ObjectiveSettings};
