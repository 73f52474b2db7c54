//! Trial records and incumbent tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hc_metrics::MetricPanel;
use hc_types::{MonitoringSite, ParameterVector};

/// Lifecycle state of the search controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchPhase {
    Initializing,
    Iterating,
    Accepted,
    Rejected,
    Terminated,
}

/// How a trial affected the incumbent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Acceptance {
    /// First evaluated point, taken unconditionally.
    Baseline,
    Accepted,
    Rejected,
}

impl Acceptance {
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Best point found so far. The only state that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncumbentState {
    /// Aggregated objective (minimized).
    pub score: f64,
    /// Iteration that produced the incumbent.
    pub iteration: usize,
    pub best: ParameterVector,
}

impl IncumbentState {
    pub fn baseline(iteration: usize, best: ParameterVector, score: f64) -> Self {
        Self {
            score,
            iteration,
            best,
        }
    }

    /// Greedy acceptance: a candidate scoring no worse replaces the incumbent.
    pub fn consider(
        self,
        iteration: usize,
        candidate: &ParameterVector,
        score: f64,
    ) -> (Self, Acceptance) {
        if score <= self.score {
            (
                Self {
                    score,
                    iteration,
                    best: candidate.clone(),
                },
                Acceptance::Accepted,
            )
        } else {
            (self, Acceptance::Rejected)
        }
    }
}

/// Objective scores of one monitoring site in one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteScore {
    pub site: MonitoringSite,
    pub metrics: MetricPanel,
}

/// One evaluated iteration. Created once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub run_id: Uuid,
    pub iteration: usize,
    pub candidate: ParameterVector,
    /// Names of the perturbed variables (empty for the baseline).
    pub neighborhood: Vec<String>,
    pub site_scores: Vec<SiteScore>,
    /// Aggregated objective of the candidate.
    pub objective: f64,
    pub acceptance: Acceptance,
    pub recorded_at: DateTime<Utc>,
}

impl TrialRecord {
    pub fn accepted(&self) -> bool {
        self.acceptance.is_accepted()
    }
}

/// The persisted form of an iteration: its trial plus the incumbent after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialLogEntry {
    pub seed: u64,
    pub trial: TrialRecord,
    pub incumbent: IncumbentState,
}

impl TrialLogEntry {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            last_iteration: self.trial.iteration,
            seed: self.seed,
            incumbent: self.incumbent.clone(),
        }
    }
}

/// What a restarted run needs to continue forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_iteration: usize,
    /// Seed of the random stream the run was started with.
    pub seed: u64,
    pub incumbent: IncumbentState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64) -> ParameterVector {
        ParameterVector::from_pairs([("x", x)])
    }

    #[test]
    fn greedy_acceptance_sequence() {
        let scores = [0.9, 0.5, 0.95, 0.3];
        let mut incumbent = IncumbentState::baseline(1, point(0.0), scores[0]);
        let mut history = vec![incumbent.score];
        let mut decisions = Vec::new();

        for (k, &score) in scores.iter().enumerate().skip(1) {
            let (next, acceptance) = incumbent.consider(k + 1, &point(k as f64), score);
            incumbent = next;
            history.push(incumbent.score);
            decisions.push(acceptance);
        }

        assert_eq!(history, vec![0.9, 0.5, 0.5, 0.3]);
        assert_eq!(
            decisions,
            vec![Acceptance::Accepted, Acceptance::Rejected, Acceptance::Accepted]
        );
        assert_eq!(incumbent.iteration, 4);
        assert_eq!(incumbent.best, point(3.0));
    }

    #[test]
    fn ties_are_accepted() {
        let incumbent = IncumbentState::baseline(1, point(0.0), 0.4);
        let (next, acceptance) = incumbent.consider(2, &point(1.0), 0.4);
        assert_eq!(acceptance, Acceptance::Accepted);
        assert_eq!(next.iteration, 2);
    }

    #[test]
    fn rejection_keeps_incumbent() {
        let incumbent = IncumbentState::baseline(3, point(0.5), 0.2);
        let (next, acceptance) = incumbent.clone().consider(4, &point(0.9), 0.7);
        assert_eq!(acceptance, Acceptance::Rejected);
        assert!(!acceptance.is_accepted());
        assert_eq!(next, incumbent);
    }

    #[test]
    fn checkpoint_from_entry() {
        let incumbent = IncumbentState::baseline(2, point(0.5), 0.2);
        let entry = TrialLogEntry {
            seed: 11,
            trial: TrialRecord {
                run_id: Uuid::new_v4(),
                iteration: 5,
                candidate: point(0.7),
                neighborhood: vec!["x".into()],
                site_scores: Vec::new(),
                objective: 0.6,
                acceptance: Acceptance::Rejected,
                recorded_at: Utc::now(),
            },
            incumbent: incumbent.clone(),
        };

        let checkpoint = entry.checkpoint();
        assert_eq!(checkpoint.last_iteration, 5);
        assert_eq!(checkpoint.seed, 11);
        assert_eq!(checkpoint.incumbent, incumbent);

        let json = serde_json::to_string(&entry).unwrap();
        let back: TrialLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
