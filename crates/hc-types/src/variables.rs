//! Decision variables and the parameter vectors built from them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{config_error, invalid_input, CalibError, CalibResult};

/// What happens to a model input after a trial has been simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// Restored to the initial value once the trial finishes.
    Reset,
    /// Left at the trial value.
    Persist,
}

impl VariableKind {
    /// Numeric tag used by the decision-variable table and the model scripts.
    pub fn tag(self) -> u8 {
        match self {
            Self::Reset => 0,
            Self::Persist => 1,
        }
    }

    pub fn from_tag(tag: i64) -> CalibResult<Self> {
        match tag {
            0 => Ok(Self::Reset),
            1 => Ok(Self::Persist),
            other => Err(invalid_input!("unknown variable type tag {other} (expected 0 or 1)")),
        }
    }
}

/// A single calibrated model input with its search bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionVariable {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
    pub initial: f64,
    /// Excluded variables are dropped before the search starts.
    pub included: bool,
    pub kind: VariableKind,
}

impl DecisionVariable {
    /// Create an included variable, enforcing `lower <= initial <= upper`.
    pub fn new(
        name: impl Into<String>,
        lower: f64,
        upper: f64,
        initial: f64,
        kind: VariableKind,
    ) -> CalibResult<Self> {
        let variable = Self {
            name: name.into(),
            lower,
            upper,
            initial,
            included: true,
            kind,
        };
        variable.validate()?;
        Ok(variable)
    }

    pub fn excluded(mut self) -> Self {
        self.included = false;
        self
    }

    pub fn validate(&self) -> CalibResult<()> {
        if self.name.trim().is_empty() {
            return Err(invalid_input!("decision variable with empty name"));
        }
        if !(self.lower.is_finite() && self.upper.is_finite() && self.initial.is_finite()) {
            return Err(CalibError::invalid_parameter(
                &self.name,
                "bounds and initial value must be finite",
            ));
        }
        if self.lower > self.upper {
            return Err(CalibError::invalid_parameter(
                &self.name,
                format!("lower bound {} exceeds upper bound {}", self.lower, self.upper),
            ));
        }
        if self.initial < self.lower || self.initial > self.upper {
            return Err(CalibError::invalid_parameter(
                &self.name,
                format!(
                    "initial value {} outside [{}, {}]",
                    self.initial, self.lower, self.upper
                ),
            ));
        }
        Ok(())
    }

    /// Width of the search range.
    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    /// Value the model input should hold after a trial that used `trial_value`.
    pub fn reset_value(&self, trial_value: f64) -> f64 {
        match self.kind {
            VariableKind::Reset => self.initial,
            VariableKind::Persist => trial_value,
        }
    }
}

/// One named value inside a [`ParameterVector`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    pub value: f64,
}

/// Ordered mapping from decision-variable name to value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector {
    entries: Vec<ParameterEntry>,
}

impl ParameterVector {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(name, value)| ParameterEntry {
                    name: name.into(),
                    value,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.value)
    }

    /// Value at position `index` (declaration order of the variable set).
    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.entries.get(index).map(|entry| entry.value)
    }

    pub fn set_at(&mut self, index: usize, value: f64) -> CalibResult<()> {
        let len = self.entries.len();
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| {
                invalid_input!("parameter index {index} out of range for length {len}")
            })?;
        entry.value = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.value))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|entry| entry.value).collect()
    }
}

/// The active decision variables of a calibration run.
///
/// Built once before the search starts; excluded variables are filtered out
/// here and the set is never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionVariableSet {
    variables: Vec<DecisionVariable>,
}

impl DecisionVariableSet {
    pub fn new(variables: Vec<DecisionVariable>) -> CalibResult<Self> {
        let mut seen = HashSet::new();
        let mut active = Vec::with_capacity(variables.len());

        for variable in variables.into_iter().filter(|v| v.included) {
            variable.validate()?;
            if !seen.insert(variable.name.clone()) {
                return Err(invalid_input!("duplicate decision variable: {}", variable.name));
            }
            active.push(variable);
        }

        if active.is_empty() {
            return Err(config_error!("no decision variables selected for calibration"));
        }

        Ok(Self { variables: active })
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DecisionVariable> {
        self.variables.iter()
    }

    pub fn get(&self, index: usize) -> Option<&DecisionVariable> {
        self.variables.get(index)
    }

    /// The starting point of the search.
    pub fn initial_vector(&self) -> ParameterVector {
        ParameterVector::from_pairs(self.variables.iter().map(|v| (v.name.clone(), v.initial)))
    }

    /// Values to restore in the model configuration after `candidate` ran.
    pub fn reset_vector(&self, candidate: &ParameterVector) -> CalibResult<ParameterVector> {
        self.check_shape(candidate)?;
        Ok(ParameterVector::from_pairs(
            self.variables
                .iter()
                .zip(candidate.iter())
                .map(|(variable, (_, value))| (variable.name.clone(), variable.reset_value(value))),
        ))
    }

    /// Ensure `vector` names the same variables in the same order.
    pub fn check_shape(&self, vector: &ParameterVector) -> CalibResult<()> {
        if vector.len() != self.variables.len() {
            return Err(invalid_input!(
                "parameter vector has {} entries, expected {}",
                vector.len(),
                self.variables.len()
            ));
        }
        for (variable, name) in self.variables.iter().zip(vector.names()) {
            if variable.name != name {
                return Err(invalid_input!(
                    "parameter vector names {name} where {} was expected",
                    variable.name
                ));
            }
        }
        Ok(())
    }

    /// Whether every component of `vector` lies inside its bounds.
    pub fn contains(&self, vector: &ParameterVector) -> bool {
        self.check_shape(vector).is_ok()
            && self
                .variables
                .iter()
                .zip(vector.iter())
                .all(|(variable, (_, value))| variable.contains(value))
    }
}

impl<'a> IntoIterator for &'a DecisionVariableSet {
    type Item = &'a DecisionVariable;
    type IntoIter = std::slice::Iter<'a, DecisionVariable>;

    fn into_iter(self) -> Self::IntoIter {
        self.variables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_variables() -> Vec<DecisionVariable> {
        vec![
            DecisionVariable::new("bexp", 2.0, 12.0, 5.0, VariableKind::Reset).unwrap(),
            DecisionVariable::new("smcmax", 0.3, 0.6, 0.44, VariableKind::Persist).unwrap(),
            DecisionVariable::new("dksat", 1e-7, 1e-4, 1e-5, VariableKind::Reset)
                .unwrap()
                .excluded(),
        ]
    }

    #[test]
    fn excluded_variables_are_dropped() {
        let set = DecisionVariableSet::new(sample_variables()).unwrap();
        assert_eq!(set.len(), 2);
        let names: Vec<&str> = set.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["bexp", "smcmax"]);
    }

    #[test]
    fn initial_outside_bounds_rejected() {
        let err = DecisionVariable::new("refkdt", 0.5, 5.0, 6.0, VariableKind::Reset).unwrap_err();
        assert!(matches!(err, CalibError::InvalidParameter { .. }));
    }

    #[test]
    fn empty_set_is_configuration_error() {
        let only_excluded = vec![DecisionVariable::new("a", 0.0, 1.0, 0.5, VariableKind::Reset)
            .unwrap()
            .excluded()];
        let err = DecisionVariableSet::new(only_excluded).unwrap_err();
        assert!(matches!(err, CalibError::Configuration(_)));
    }

    #[test]
    fn duplicate_names_rejected() {
        let vars = vec![
            DecisionVariable::new("a", 0.0, 1.0, 0.5, VariableKind::Reset).unwrap(),
            DecisionVariable::new("a", 0.0, 2.0, 0.5, VariableKind::Reset).unwrap(),
        ];
        assert!(matches!(
            DecisionVariableSet::new(vars),
            Err(CalibError::InvalidInput(_))
        ));
    }

    #[test]
    fn reset_vector_respects_kind() {
        let set = DecisionVariableSet::new(sample_variables()).unwrap();
        let candidate = ParameterVector::from_pairs([("bexp", 8.0), ("smcmax", 0.5)]);
        let reset = set.reset_vector(&candidate).unwrap();
        assert_eq!(reset.get("bexp"), Some(5.0)); // restored
        assert_eq!(reset.get("smcmax"), Some(0.5)); // kept
    }

    #[test]
    fn shape_check_catches_reordering() {
        let set = DecisionVariableSet::new(sample_variables()).unwrap();
        let swapped = ParameterVector::from_pairs([("smcmax", 0.5), ("bexp", 8.0)]);
        assert!(set.check_shape(&swapped).is_err());
        assert!(!set.contains(&swapped));
        assert!(set.contains(&set.initial_vector()));
    }

    #[test]
    fn parameter_vector_serializes_in_order() {
        let vector = ParameterVector::from_pairs([("z", 1.0), ("a", 2.0)]);
        let json = serde_json::to_string(&vector).unwrap();
        assert_eq!(json, r#"[{"name":"z","value":1.0},{"name":"a","value":2.0}]"#);
    }

    #[test]
    fn kind_tags() {
        assert_eq!(VariableKind::from_tag(0).unwrap(), VariableKind::Reset);
        assert_eq!(VariableKind::Persist.tag(), 1);
        assert!(VariableKind::from_tag(2).is_err());
    }
}
