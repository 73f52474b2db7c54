//! Sequential calibration search controller.
//!
//! One iteration: perturb the incumbent, hand the candidate to the
//! simulation collaborator, extract modeled/observed pairs, score them, apply
//! greedy acceptance, persist. Iteration `i + 1` never starts before
//! iteration `i` has been persisted.

use async_trait::async_trait;
use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hc_metrics::{aggregate_sites, MetricPanel, ObjectiveSettings};
use hc_types::{
    config_error, invalid_input, CalibError, CalibResult, DecisionVariableSet, IterationTag,
    MonitoringSite, ParameterVector, SiteSeries, Stage, VariableKind,
};

use crate::dds::DynamicallyDimensionedSearch;
use crate::sink::TrialSink;
use crate::trial::{
    Acceptance, Checkpoint, IncumbentState, SearchPhase, SiteScore, TrialLogEntry, TrialRecord,
};

/// Settings of one calibration search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Total number of function evaluations `m` the DDS schedule is built on.
    pub budget: usize,
    /// First iteration of a fresh run.
    pub start_iteration: usize,
    /// Last iteration to run (inclusive).
    pub stop_iteration: usize,
    /// Neighborhood perturbation size `r`, as a fraction of each variable's range.
    pub perturbation_ratio: f64,
    /// Seed of the random stream. Drawn at startup when absent.
    pub seed: Option<u64>,
    pub objective: ObjectiveSettings,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            budget: 50,
            start_iteration: 1,
            stop_iteration: 50,
            perturbation_ratio: 0.2,
            seed: None,
            objective: ObjectiveSettings::default(),
        }
    }
}

impl SearchConfig {
    /// Set the budget and run it to completion.
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self.stop_iteration = budget;
        self
    }

    pub fn with_window(mut self, start: usize, stop: usize) -> Self {
        self.start_iteration = start;
        self.stop_iteration = stop;
        self
    }

    pub fn with_perturbation_ratio(mut self, ratio: f64) -> Self {
        self.perturbation_ratio = ratio;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_nse_weight(mut self, weight: f64) -> Self {
        self.objective.nse_weight = weight;
        self
    }

    pub fn validate(&self) -> CalibResult<()> {
        DynamicallyDimensionedSearch::new(self.budget, self.perturbation_ratio)?;
        self.objective.validate()?;
        if self.start_iteration == 0 {
            return Err(CalibError::invalid_parameter(
                "start_iteration",
                "iterations are numbered from 1",
            ));
        }
        if self.start_iteration > self.stop_iteration {
            return Err(CalibError::invalid_parameter(
                "start_iteration",
                format!(
                    "{} is after stop_iteration {}",
                    self.start_iteration, self.stop_iteration
                ),
            ));
        }
        if self.stop_iteration > self.budget {
            return Err(CalibError::invalid_parameter(
                "stop_iteration",
                format!("{} exceeds the budget {}", self.stop_iteration, self.budget),
            ));
        }
        Ok(())
    }
}

/// A decision variable's value for one trial and the value to restore after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableAssignment {
    pub name: String,
    pub kind: VariableKind,
    pub value: f64,
    pub reset_value: f64,
}

/// Everything the simulation collaborator needs to run one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub tag: IterationTag,
    /// The baseline trial runs the model with its configuration untouched.
    pub baseline: bool,
    pub assignments: Vec<VariableAssignment>,
}

impl SimulationRequest {
    pub fn parameters(&self) -> ParameterVector {
        ParameterVector::from_pairs(self.assignments.iter().map(|a| (a.name.clone(), a.value)))
    }
}

/// Applies a parameter vector to the model and runs the simulation.
///
/// Treated as an opaque blocking step: the controller awaits it before
/// doing anything else.
#[async_trait]
pub trait SimulationRunner: Send + Sync {
    async fn run(&mut self, request: &SimulationRequest) -> CalibResult<()>;
}

/// Produces aligned modeled/observed pairs for a finished simulation.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// One series per site, in the order of `sites`.
    async fn extract(
        &self,
        tag: &IterationTag,
        sites: &[MonitoringSite],
    ) -> CalibResult<Vec<SiteSeries>>;
}

/// Final result of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub run_id: Uuid,
    pub seed: u64,
    pub incumbent: IncumbentState,
    /// Iterations evaluated by this process (excludes those before a resume).
    pub trials_run: usize,
    /// Trials that replaced the incumbent (the baseline is not counted).
    pub improvements: usize,
    pub last_iteration: usize,
}

/// Drives the DDS search loop.
///
/// Owns the incumbent, the trial history and the random stream; none of
/// them are shared.
pub struct SearchController {
    run_id: Uuid,
    config: SearchConfig,
    seed: u64,
    dds: DynamicallyDimensionedSearch,
    variables: DecisionVariableSet,
    sites: Vec<MonitoringSite>,
    simulation: Box<dyn SimulationRunner>,
    observations: Box<dyn ObservationSource>,
    sink: Box<dyn TrialSink>,
    incumbent: Option<IncumbentState>,
    trials: Vec<TrialRecord>,
    phase: SearchPhase,
    next_iteration: usize,
}

impl std::fmt::Debug for SearchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchController")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .field("seed", &self.seed)
            .field("phase", &self.phase)
            .field("next_iteration", &self.next_iteration)
            .finish_non_exhaustive()
    }
}

impl SearchController {
    pub fn new(
        config: SearchConfig,
        variables: DecisionVariableSet,
        sites: Vec<MonitoringSite>,
        simulation: Box<dyn SimulationRunner>,
        observations: Box<dyn ObservationSource>,
        sink: Box<dyn TrialSink>,
    ) -> CalibResult<Self> {
        config.validate()?;
        if sites.is_empty() {
            return Err(config_error!("no monitoring sites selected for calibration"));
        }
        let dds = DynamicallyDimensionedSearch::new(config.budget, config.perturbation_ratio)?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let run_id = Uuid::new_v4();

        info!(
            "Calibration run {} configured: {} variables, {} sites, budget {}, seed {}",
            run_id,
            variables.len(),
            sites.len(),
            config.budget,
            seed
        );

        Ok(Self {
            run_id,
            next_iteration: config.start_iteration,
            config,
            seed,
            dds,
            variables,
            sites,
            simulation,
            observations,
            sink,
            incumbent: None,
            trials: Vec::new(),
            phase: SearchPhase::Initializing,
        })
    }

    /// Continue after the iteration recorded in `checkpoint`.
    ///
    /// The persisted incumbent is trusted as-is; earlier trials are not
    /// re-evaluated. The checkpoint's seed replaces the configured one so
    /// the random stream continues where the original run left off.
    pub fn resume(mut self, checkpoint: Checkpoint) -> CalibResult<Self> {
        let Checkpoint {
            last_iteration,
            seed,
            incumbent,
        } = checkpoint;

        if last_iteration == 0 || last_iteration > self.config.budget {
            return Err(CalibError::invalid_parameter(
                "last_iteration",
                format!("{last_iteration} is outside [1, {}]", self.config.budget),
            ));
        }
        self.variables.check_shape(&incumbent.best)?;
        if !self.variables.contains(&incumbent.best) {
            return Err(invalid_input!("persisted incumbent lies outside the variable bounds"));
        }
        if let Some(configured) = self.config.seed {
            if configured != seed {
                warn!(
                    "Ignoring configured seed {} on resume; continuing the stream of seed {}",
                    configured, seed
                );
            }
        }

        info!(
            "Resuming after iteration {} with incumbent {:.6} from iteration {}",
            last_iteration, incumbent.score, incumbent.iteration
        );

        self.seed = seed;
        self.incumbent = Some(incumbent);
        self.next_iteration = last_iteration + 1;
        self.phase = SearchPhase::Iterating;
        Ok(self)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn phase(&self) -> SearchPhase {
        self.phase
    }

    pub fn incumbent(&self) -> Option<&IncumbentState> {
        self.incumbent.as_ref()
    }

    /// Trials evaluated by this controller, in iteration order.
    pub fn trials(&self) -> &[TrialRecord] {
        &self.trials
    }

    pub fn next_iteration(&self) -> usize {
        self.next_iteration
    }

    /// Run iterations until the stop iteration has been evaluated.
    pub async fn run(&mut self) -> CalibResult<CalibrationOutcome> {
        info!(
            "Starting calibration at iteration {} (stop {})",
            self.next_iteration, self.config.stop_iteration
        );

        while self.phase != SearchPhase::Terminated {
            if let Err(e) = self.step().await {
                error!("Calibration aborted: {}", e);
                return Err(e);
            }
        }

        let outcome = self.outcome()?;
        info!(
            "Calibration finished: best objective {:.6} at iteration {} ({} trials, {} improvements)",
            outcome.incumbent.score,
            outcome.incumbent.iteration,
            outcome.trials_run,
            outcome.improvements
        );
        Ok(outcome)
    }

    /// Evaluate one iteration and return whether its candidate was accepted.
    ///
    /// Returns [`SearchPhase::Terminated`] once the stop iteration is behind.
    pub async fn step(&mut self) -> CalibResult<SearchPhase> {
        if self.phase == SearchPhase::Terminated {
            return Ok(SearchPhase::Terminated);
        }
        let iteration = self.next_iteration;
        if iteration > self.config.stop_iteration {
            self.phase = SearchPhase::Terminated;
            return Ok(SearchPhase::Terminated);
        }

        let started = Instant::now();
        let tag = IterationTag::new(iteration, self.config.budget);

        // Perturbation
        let (candidate, neighborhood) = match &self.incumbent {
            None if iteration == 1 => {
                self.phase = SearchPhase::Initializing;
                (self.variables.initial_vector(), Vec::new())
            }
            None => {
                return Err(config_error!(
                    "iteration {iteration} needs a persisted incumbent; resume from a checkpoint"
                ));
            }
            Some(incumbent) => {
                self.phase = SearchPhase::Iterating;
                let mut rng = self.stream_for(iteration);
                let step = self
                    .dds
                    .propose(iteration, &self.variables, &incumbent.best, &mut rng)
                    .map_err(|e| e.at(iteration, Stage::Perturbation))?;
                (step.candidate, step.neighborhood)
            }
        };
        debug!(
            "Iteration {}: perturbing {} of {} variables",
            tag,
            neighborhood.len(),
            self.variables.len()
        );

        // Simulation
        let request = self
            .build_request(tag, &candidate)
            .map_err(|e| e.at(iteration, Stage::Simulation))?;
        self.simulation.run(&request).await.map_err(|e| {
            let failure = match e {
                failure @ CalibError::SimulationFailure { .. } => failure,
                other => CalibError::SimulationFailure {
                    iteration,
                    message: other.to_string(),
                },
            };
            failure.at(iteration, Stage::Simulation)
        })?;

        // Extraction and scoring
        let series = self
            .observations
            .extract(&tag, &self.sites)
            .await
            .and_then(|series| self.check_sites(series))
            .map_err(|e| e.at(iteration, Stage::Extraction))?;
        let (site_scores, objective) = self
            .evaluate(&series)
            .map_err(|e| e.at(iteration, Stage::Evaluation))?;

        // Acceptance
        let (incumbent, acceptance) = match self.incumbent.clone() {
            None => (
                IncumbentState::baseline(iteration, candidate.clone(), objective),
                Acceptance::Baseline,
            ),
            Some(current) => current.consider(iteration, &candidate, objective),
        };

        let trial = TrialRecord {
            run_id: self.run_id,
            iteration,
            candidate,
            neighborhood: neighborhood
                .iter()
                .filter_map(|&j| self.variables.get(j).map(|v| v.name.clone()))
                .collect(),
            site_scores,
            objective,
            acceptance,
            recorded_at: Utc::now(),
        };
        let entry = TrialLogEntry {
            seed: self.seed,
            trial,
            incumbent,
        };
        self.sink
            .record(&entry)
            .map_err(|e| e.at(iteration, Stage::Persistence))?;

        info!(
            "Iteration {}: f = {:.6} {} (best {:.6} from iteration {}, {:.1?})",
            tag,
            objective,
            match acceptance {
                Acceptance::Baseline => "baseline",
                Acceptance::Accepted => "accepted",
                Acceptance::Rejected => "rejected",
            },
            entry.incumbent.score,
            entry.incumbent.iteration,
            started.elapsed()
        );

        let TrialLogEntry {
            trial, incumbent, ..
        } = entry;
        self.incumbent = Some(incumbent);
        self.trials.push(trial);
        self.next_iteration = iteration + 1;

        let outcome = if acceptance.is_accepted() {
            SearchPhase::Accepted
        } else {
            SearchPhase::Rejected
        };
        self.phase = if iteration >= self.config.stop_iteration {
            SearchPhase::Terminated
        } else {
            outcome
        };
        Ok(outcome)
    }

    fn outcome(&self) -> CalibResult<CalibrationOutcome> {
        let incumbent = self
            .incumbent
            .clone()
            .ok_or_else(|| {
                config_error!("calibration terminated without evaluating any iteration")
            })?;
        Ok(CalibrationOutcome {
            run_id: self.run_id,
            seed: self.seed,
            incumbent,
            trials_run: self.trials.len(),
            improvements: self
                .trials
                .iter()
                .filter(|t| t.acceptance == Acceptance::Accepted)
                .count(),
            last_iteration: self.next_iteration.saturating_sub(1),
        })
    }

    /// Random stream of one iteration, derived from the run seed.
    fn stream_for(&self, iteration: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(iteration as u64);
        rng
    }

    fn build_request(
        &self,
        tag: IterationTag,
        candidate: &ParameterVector,
    ) -> CalibResult<SimulationRequest> {
        let reset = self.variables.reset_vector(candidate)?;
        let assignments = self
            .variables
            .iter()
            .zip(candidate.iter().zip(reset.iter()))
            .map(|(variable, ((_, value), (_, reset_value)))| VariableAssignment {
                name: variable.name.clone(),
                kind: variable.kind,
                value,
                reset_value,
            })
            .collect();
        Ok(SimulationRequest {
            tag,
            baseline: tag.iteration == 1,
            assignments,
        })
    }

    fn check_sites(&self, series: Vec<SiteSeries>) -> CalibResult<Vec<SiteSeries>> {
        if series.len() != self.sites.len() {
            return Err(invalid_input!(
                "expected series for {} sites, got {}",
                self.sites.len(),
                series.len()
            ));
        }
        for (expected, got) in self.sites.iter().zip(&series) {
            if *expected != got.site {
                return Err(invalid_input!(
                    "series for site {} returned where {} was expected",
                    got.site,
                    expected
                ));
            }
        }
        Ok(series)
    }

    fn evaluate(&self, series: &[SiteSeries]) -> CalibResult<(Vec<SiteScore>, f64)> {
        let mut scores = Vec::with_capacity(series.len());
        for site_series in series {
            let metrics = MetricPanel::evaluate(&site_series.pair, &self.config.objective)?;
            debug!(
                "Site {}: n = {}, NSE = {:.4}, NSElog = {:.4}, KGE = {:.4}",
                site_series.site, metrics.n, metrics.nse, metrics.nse_log, metrics.kge
            );
            scores.push(SiteScore {
                site: site_series.site.clone(),
                metrics,
            });
        }
        let weighted: Vec<f64> = scores.iter().map(|s| s.metrics.nse_weighted).collect();
        let objective = aggregate_sites(&weighted)?;
        Ok((scores, objective))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemoryTrialSink;
    use hc_types::{DecisionVariable, TimeSeriesPair};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const OBS: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

    fn variables() -> DecisionVariableSet {
        DecisionVariableSet::new(vec![
            DecisionVariable::new("bexp", 2.0, 12.0, 5.0, VariableKind::Reset).unwrap(),
            DecisionVariable::new("refkdt", 0.5, 5.0, 3.0, VariableKind::Persist).unwrap(),
        ])
        .unwrap()
    }

    fn sites() -> Vec<MonitoringSite> {
        vec![
            MonitoringSite::new("1", "02322500"),
            MonitoringSite::new("4", "02323500"),
        ]
    }

    /// Simulation that records its requests.
    #[derive(Clone, Default)]
    struct RecordingSimulation {
        requests: Arc<Mutex<Vec<SimulationRequest>>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl SimulationRunner for RecordingSimulation {
        async fn run(&mut self, request: &SimulationRequest) -> CalibResult<()> {
            if self.fail_at == Some(request.tag.iteration) {
                return Err(CalibError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "run_WH.sh not found",
                )));
            }
            self.requests.lock().push(request.clone());
            Ok(())
        }
    }

    /// Observations whose aggregated objective is scripted per iteration.
    ///
    /// With `nse_weight = 1` and observed `[1, 2, 3, 4, 5]` (SS = 10), adding
    /// `sqrt(10 f)` to the last modeled value gives NSE = 1 - f at every
    /// site, so the aggregated objective is `f`.
    struct ScriptedObservations {
        objectives: Vec<f64>,
    }

    #[async_trait]
    impl ObservationSource for ScriptedObservations {
        async fn extract(
            &self,
            tag: &IterationTag,
            sites: &[MonitoringSite],
        ) -> CalibResult<Vec<SiteSeries>> {
            let f = self.objectives[tag.iteration - 1];
            let mut modeled = OBS.to_vec();
            modeled[4] += (10.0 * f).sqrt();
            sites
                .iter()
                .map(|site| {
                    Ok(SiteSeries {
                        site: site.clone(),
                        pair: TimeSeriesPair::new(modeled.clone(), OBS.to_vec())?,
                    })
                })
                .collect()
        }
    }

    fn controller(
        objectives: Vec<f64>,
        simulation: RecordingSimulation,
        sink: MemoryTrialSink,
    ) -> SearchController {
        let stop = objectives.len();
        let config = SearchConfig::default()
            .with_budget(10)
            .with_window(1, stop)
            .with_seed(5)
            .with_nse_weight(1.0);
        SearchController::new(
            config,
            variables(),
            sites(),
            Box::new(simulation),
            Box::new(ScriptedObservations { objectives }),
            Box::new(sink),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn greedy_incumbent_trajectory() {
        let sink = MemoryTrialSink::new();
        let mut search = controller(
            vec![0.9, 0.5, 0.95, 0.3],
            RecordingSimulation::default(),
            sink.clone(),
        );

        let outcome = search.run().await.unwrap();

        let incumbents: Vec<f64> = sink.entries().iter().map(|e| e.incumbent.score).collect();
        let expected = [0.9, 0.5, 0.5, 0.3];
        for (got, want) in incumbents.iter().zip(expected) {
            approx::assert_relative_eq!(*got, want, epsilon = 1e-12);
        }
        let decisions: Vec<Acceptance> = search.trials().iter().map(|t| t.acceptance).collect();
        assert_eq!(
            decisions,
            vec![
                Acceptance::Baseline,
                Acceptance::Accepted,
                Acceptance::Rejected,
                Acceptance::Accepted
            ]
        );

        // Rejected trial is still recorded with its own score
        approx::assert_relative_eq!(search.trials()[2].objective, 0.95, epsilon = 1e-12);
        assert_eq!(outcome.incumbent.iteration, 4);
        assert_eq!(outcome.incumbent.best, search.trials()[3].candidate);
        assert_eq!(outcome.trials_run, 4);
        assert_eq!(outcome.improvements, 2);
        assert_eq!(outcome.last_iteration, 4);
        assert_eq!(search.phase(), SearchPhase::Terminated);
    }

    #[tokio::test]
    async fn baseline_uses_initial_values_unperturbed() {
        let simulation = RecordingSimulation::default();
        let mut search = controller(vec![0.4, 0.6], simulation.clone(), MemoryTrialSink::new());

        assert_eq!(search.step().await.unwrap(), SearchPhase::Accepted);
        let requests = simulation.requests.lock().clone();
        assert!(requests[0].baseline);
        assert_eq!(requests[0].parameters(), variables().initial_vector());
        assert!(search.trials()[0].neighborhood.is_empty());

        assert_eq!(search.step().await.unwrap(), SearchPhase::Rejected);
        let requests = simulation.requests.lock().clone();
        assert!(!requests[1].baseline);
        assert_eq!(requests[1].parameters(), search.trials()[1].candidate);
        // bexp resets to its initial value, refkdt keeps the trial value
        assert_eq!(requests[1].assignments[0].reset_value, 5.0);
        assert_eq!(
            requests[1].assignments[1].reset_value,
            requests[1].assignments[1].value
        );
        assert_eq!(search.phase(), SearchPhase::Terminated);
        assert_eq!(search.step().await.unwrap(), SearchPhase::Terminated);
    }

    #[tokio::test]
    async fn simulation_error_aborts_run() {
        let sink = MemoryTrialSink::new();
        let simulation = RecordingSimulation {
            fail_at: Some(3),
            ..RecordingSimulation::default()
        };
        let mut search = controller(vec![0.4, 0.3, 0.2, 0.1], simulation, sink.clone());

        let err = search.run().await.unwrap_err();
        match &err {
            CalibError::IterationFailed {
                iteration, stage, ..
            } => {
                assert_eq!(*iteration, 3);
                assert_eq!(*stage, Stage::Simulation);
            }
            other => panic!("Expected IterationFailed, got {other:?}"),
        }
        assert!(matches!(
            err.root(),
            CalibError::SimulationFailure { iteration: 3, .. }
        ));
        // Iterations before the failure stay persisted and resumable
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.checkpoint().unwrap().last_iteration, 2);
    }

    #[tokio::test]
    async fn degenerate_observations_abort_with_evaluation_stage() {
        struct ConstantObservations;

        #[async_trait]
        impl ObservationSource for ConstantObservations {
            async fn extract(
                &self,
                _tag: &IterationTag,
                sites: &[MonitoringSite],
            ) -> CalibResult<Vec<SiteSeries>> {
                sites
                    .iter()
                    .map(|site| {
                        Ok(SiteSeries {
                            site: site.clone(),
                            pair: TimeSeriesPair::new(vec![1.0, 2.0, 3.0], vec![2.0; 3])?,
                        })
                    })
                    .collect()
            }
        }

        let mut search = SearchController::new(
            SearchConfig::default().with_seed(1),
            variables(),
            sites(),
            Box::new(RecordingSimulation::default()),
            Box::new(ConstantObservations),
            Box::new(MemoryTrialSink::new()),
        )
        .unwrap();

        let err = search.run().await.unwrap_err();
        assert!(matches!(
            err,
            CalibError::IterationFailed {
                iteration: 1,
                stage: Stage::Evaluation,
                ..
            }
        ));
        assert!(matches!(err.root(), CalibError::DegenerateSeries(_)));
        assert!(search.incumbent().is_none());
    }

    #[tokio::test]
    async fn missing_site_series_is_rejected() {
        struct OneSite;

        #[async_trait]
        impl ObservationSource for OneSite {
            async fn extract(
                &self,
                _tag: &IterationTag,
                sites: &[MonitoringSite],
            ) -> CalibResult<Vec<SiteSeries>> {
                Ok(vec![SiteSeries {
                    site: sites[0].clone(),
                    pair: TimeSeriesPair::new(OBS.to_vec(), OBS.to_vec())?,
                }])
            }
        }

        let mut search = SearchController::new(
            SearchConfig::default().with_seed(1),
            variables(),
            sites(),
            Box::new(RecordingSimulation::default()),
            Box::new(OneSite),
            Box::new(MemoryTrialSink::new()),
        )
        .unwrap();

        let err = search.step().await.unwrap_err();
        assert!(matches!(
            err,
            CalibError::IterationFailed {
                stage: Stage::Extraction,
                ..
            }
        ));
    }

    #[test]
    fn no_sites_is_configuration_error() {
        let result = SearchController::new(
            SearchConfig::default(),
            variables(),
            Vec::new(),
            Box::new(RecordingSimulation::default()),
            Box::new(ScriptedObservations { objectives: vec![] }),
            Box::new(MemoryTrialSink::new()),
        );
        assert!(matches!(result, Err(CalibError::Configuration(_))));
    }

    #[tokio::test]
    async fn fresh_run_past_first_iteration_needs_checkpoint() {
        let config = SearchConfig::default().with_window(3, 5).with_seed(2);
        let mut search = SearchController::new(
            config,
            variables(),
            sites(),
            Box::new(RecordingSimulation::default()),
            Box::new(ScriptedObservations {
                objectives: vec![0.5; 5],
            }),
            Box::new(MemoryTrialSink::new()),
        )
        .unwrap();
        assert!(matches!(
            search.run().await,
            Err(CalibError::Configuration(_))
        ));
    }

    #[test]
    fn config_validation() {
        assert!(SearchConfig::default().validate().is_ok());
        assert!(SearchConfig::default().with_budget(1).validate().is_err());
        assert!(SearchConfig::default()
            .with_window(0, 10)
            .validate()
            .is_err());
        assert!(SearchConfig::default()
            .with_window(10, 5)
            .validate()
            .is_err());
        assert!(SearchConfig::default()
            .with_window(1, 60)
            .validate()
            .is_err());
        assert!(SearchConfig::default()
            .with_perturbation_ratio(0.0)
            .validate()
            .is_err());
        assert!(SearchConfig::default()
            .with_nse_weight(1.2)
            .validate()
            .is_err());
    }

    #[test]
    fn resume_rejects_out_of_bounds_incumbent() {
        let search = controller(
            vec![0.5; 4],
            RecordingSimulation::default(),
            MemoryTrialSink::new(),
        );
        let checkpoint = Checkpoint {
            last_iteration: 2,
            seed: 5,
            incumbent: IncumbentState::baseline(
                2,
                ParameterVector::from_pairs([("bexp", 50.0), ("refkdt", 1.0)]),
                0.5,
            ),
        };
        assert!(search.resume(checkpoint).is_err());
    }
}
