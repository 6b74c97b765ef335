//! Runtime glue that wires configuration, module loading, hook scheduling,
//! runner dispatch, output staging, and cleanup into one driver.

pub mod driver;
pub mod manifest;
pub mod telemetry;

pub use driver::{execute, Interrupted, Pipeline, EXIT_FAILURE, EXIT_INTERRUPT, EXIT_SUCCESS};
pub use manifest::read_samples;
pub use telemetry::{init_logging, Telemetry, TelemetrySnapshot};
