// observability/mod.rs - Logging Setup

mod tracing_setup;

pub use tracing_setup::{TracingConfig, TracingFormat, init_tracing};
