//! # hc-optimizer
//!
//! Calibration search for hydrologic models.
//!
//! Provides the Dynamically Dimensioned Search (DDS) neighborhood
//! perturbation with bound reflection, trial and incumbent tracking, and the
//! sequential search controller that drives simulation, scoring and greedy
//! acceptance.

mod controller;
mod dds;
mod sink;
mod trial;

pub use controller::{
    CalibrationOutcome, ObservationSource, SearchConfig, SearchController, SimulationRequest,
    SimulationRunner, VariableAssignment,
};
pub use dds::{inclusion_probability, reflect, DynamicallyDimensionedSearch, Perturbation};
pub use sink::{MemoryTrialSink, TrialSink};
pub use trial::{
    Acceptance, Checkpoint, IncumbentState, SearchPhase, SiteScore, TrialLogEntry, TrialRecord,
};
