pub mod errors;
pub mod series;
pub mod sites;
pub mod variables;

pub use errors::*;
pub use series::*;
pub use sites::*;
pub use variables::*;
