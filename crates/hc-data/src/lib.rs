pub mod loaders;
pub mod observations;
pub mod storage;

pub use loaders::*;
pub use observations::*;
pub use storage::*;

use hc_types::CalibError;

pub(crate) fn csv_error(context: impl std::fmt::Display, err: csv::Error) -> CalibError {
    CalibError::Csv(format!("{context}: {err}"))
}
