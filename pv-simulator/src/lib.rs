pub mod broker;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod shutdown;
pub mod sinks;
pub mod sources;
pub mod transform;

pub use pipeline::{Disposition, Envelope, PipelineError, PvSimulator};
