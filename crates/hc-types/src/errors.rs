use thiserror::Error;

/// Main error type for the calibration system
#[derive(Error, Debug)]
pub enum CalibError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("Degenerate series: {0}")]
    DegenerateSeries(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Simulation failed at iteration {iteration}: {message}")]
    SimulationFailure { iteration: usize, message: String },

    #[error("Iteration {iteration} failed during {stage}: {source}")]
    IterationFailed {
        iteration: usize,
        stage: Stage,
        #[source]
        source: Box<CalibError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(String),
}

/// The computation an iteration was performing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Perturbation,
    Simulation,
    Extraction,
    Evaluation,
    Persistence,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Perturbation => "perturbation",
            Self::Simulation => "simulation",
            Self::Extraction => "observation extraction",
            Self::Evaluation => "objective evaluation",
            Self::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

impl CalibError {
    /// Wrap this error with the iteration and stage it surfaced from.
    ///
    /// Already-wrapped errors are returned unchanged so the innermost
    /// location wins.
    pub fn at(self, iteration: usize, stage: Stage) -> Self {
        match self {
            wrapped @ Self::IterationFailed { .. } => wrapped,
            other => Self::IterationFailed {
                iteration,
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The underlying error, looking through any iteration wrapper.
    pub fn root(&self) -> &CalibError {
        match self {
            Self::IterationFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for calibration operations
pub type CalibResult<T> = Result<T, CalibError>;

/// Macro for creating invalid input errors
#[macro_export]
macro_rules! invalid_input {
    ($($arg:tt)*) => {
        $crate::CalibError::InvalidInput(format!($($arg)*))
    };
}

/// Macro for creating degenerate series errors
#[macro_export]
macro_rules! degenerate_series {
    ($($arg:tt)*) => {
        $crate::CalibError::DegenerateSeries(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::CalibError::Configuration(format!($($arg)*))
    };
}
