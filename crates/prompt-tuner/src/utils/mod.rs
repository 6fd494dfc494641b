pub mod telemetry;

pub use telemetry::{TelemetryInitError, init_tracing, init_tracing_with_filter, truncate};
