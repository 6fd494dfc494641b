mod errors;
pub mod lm;
pub mod module;

pub use errors::{ConfigError, ErrorClass, LmError, OptimizeError, PredictError};
pub use lm::*;
pub use module::*;
