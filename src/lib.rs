//! A metric output that pipes serialized batches into a timeboxed external command

pub mod config;
pub mod error;
pub mod metric;
pub mod process;
pub mod serializer;
pub mod sink;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::config::{ExecConfig, LogLevel};
    pub use crate::error::{AgentError, ExecError, Result};
    pub use crate::metric::{Metric, MetricPoint};
    pub use crate::process::{CommandRunner, CommandSpec, ProcessError, ProcessRunner};
    pub use crate::serializer::{DataFormat, Serializer};
    pub use crate::sink::{ExecSink, MetricSink};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
