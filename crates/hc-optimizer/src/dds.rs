//! Dynamically Dimensioned Search (Tolson & Shoemaker, 2007).
//!
//! Each iteration perturbs a random subset of the decision variables around
//! the incumbent. The subset shrinks as the search consumes its evaluation
//! budget, moving the search from global to local.

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use hc_types::{CalibError, CalibResult, DecisionVariableSet, ParameterVector};

/// Probability that a variable joins the neighborhood at `iteration`:
/// `1 - ln(i) / ln(m)`.
pub fn inclusion_probability(iteration: usize, budget: usize) -> CalibResult<f64> {
    if budget <= 1 {
        return Err(CalibError::invalid_parameter(
            "budget",
            format!("must exceed 1, got {budget}"),
        ));
    }
    if iteration == 0 || iteration > budget {
        return Err(CalibError::invalid_parameter(
            "iteration",
            format!("{iteration} is outside [1, {budget}]"),
        ));
    }
    let p = 1.0 - (iteration as f64).ln() / (budget as f64).ln();
    Ok(p.clamp(0.0, 1.0))
}

/// Mirror `value` back across the violated bound.
///
/// A single reflection is attempted; if it overshoots the opposite bound the
/// value collapses onto the bound that was originally violated.
pub fn reflect(value: f64, lower: f64, upper: f64) -> f64 {
    if value < lower {
        let reflected = lower + (lower - value);
        if reflected > upper {
            lower
        } else {
            reflected
        }
    } else if value > upper {
        let reflected = upper - (value - upper);
        if reflected < lower {
            upper
        } else {
            reflected
        }
    } else {
        value
    }
}

/// A proposed trial point and the variables that were moved to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct Perturbation {
    pub candidate: ParameterVector,
    /// Indices (declaration order) of the perturbed variables. Never empty.
    pub neighborhood: Vec<usize>,
}

/// DDS neighborhood perturbation over a fixed evaluation budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicallyDimensionedSearch {
    budget: usize,
    perturbation_ratio: f64,
}

impl DynamicallyDimensionedSearch {
    pub fn new(budget: usize, perturbation_ratio: f64) -> CalibResult<Self> {
        if budget <= 1 {
            return Err(CalibError::invalid_parameter(
                "budget",
                format!("must exceed 1, got {budget}"),
            ));
        }
        if !(perturbation_ratio > 0.0 && perturbation_ratio <= 1.0) {
            return Err(CalibError::invalid_parameter(
                "perturbation_ratio",
                format!("{perturbation_ratio} is outside (0, 1]"),
            ));
        }
        Ok(Self {
            budget,
            perturbation_ratio,
        })
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn perturbation_ratio(&self) -> f64 {
        self.perturbation_ratio
    }

    /// Propose the candidate for `iteration` by perturbing `best`.
    ///
    /// Random draws happen in a fixed order (one Bernoulli trial per
    /// variable, the fallback pick if needed, then one unit-normal draw per
    /// neighbor) so a given stream always yields the same candidate.
    pub fn propose<R: Rng + ?Sized>(
        &self,
        iteration: usize,
        variables: &DecisionVariableSet,
        best: &ParameterVector,
        rng: &mut R,
    ) -> CalibResult<Perturbation> {
        variables.check_shape(best)?;
        let p = inclusion_probability(iteration, self.budget)?;

        let mut neighborhood: Vec<usize> = (0..variables.len())
            .filter(|_| rng.gen_bool(p))
            .collect();
        if neighborhood.is_empty() {
            neighborhood.push(rng.gen_range(0..variables.len()));
        }

        let mut candidate = best.clone();
        for &j in &neighborhood {
            let Some(variable) = variables.get(j) else {
                continue;
            };
            let current = best.value_at(j).unwrap_or(variable.initial);
            let sigma = self.perturbation_ratio * variable.range();
            let draw: f64 = rng.sample(StandardNormal);
            let value = reflect(current + sigma * draw, variable.lower, variable.upper);
            candidate.set_at(j, value)?;
        }

        Ok(Perturbation {
            candidate,
            neighborhood,
        })
    }
}
