use crate::error::{AgentError, Result};
use crate::process::CommandSpec;
use crate::serializer::DataFormat;
use log::debug;
use serde::Deserialize;
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `MACREADY_EXEC__TIMEOUT=10s`
pub const ENV_PREFIX: &str = "MACREADY_EXEC";

/// Annotated example of every key `ExecConfig` understands
pub const SAMPLE_CONFIG: &str = r#"
## Command
command = "/usr/bin/mycollector --foo=bar"

## Timeout for each command to complete.
timeout = "5s"

## Data format to output, "influx" or "json".
data_format = "influx"

## Log level: error, warn, info, debug or trace.
# log_level = "info"
"#;

/// Layers configuration sources; later sources override earlier ones
pub struct ConfigBuilder<T: for<'de> Deserialize<'de>> {
    inner: config::ConfigBuilder<config::builder::DefaultState>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: for<'de> Deserialize<'de> + Debug> ConfigBuilder<T> {
    /// Create a new config builder
    pub fn new() -> Self {
        Self {
            inner: config::Config::builder(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Add a TOML file source
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        debug!("Loading TOML configuration from file: {}", path.display());
        self.inner = self
            .inner
            .add_source(config::File::from(path).format(config::FileFormat::Toml));
        self
    }

    /// Add environment variables named `<PREFIX>__<KEY>`
    pub fn add_env(mut self, prefix: &str) -> Self {
        debug!("Loading configuration from environment with prefix: {}", prefix);
        self.inner = self.inner.add_source(
            config::Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        self
    }

    /// Add TOML string
    pub fn add_toml(mut self, toml: &str) -> Self {
        self.inner = self
            .inner
            .add_source(config::File::from_str(toml, config::FileFormat::Toml));
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<T> {
        let config = self
            .inner
            .build()
            .map_err(|e| AgentError::Config(format!("Failed to build configuration: {}", e)))?;

        let result = config.try_deserialize().map_err(|e| {
            AgentError::Config(format!("Failed to deserialize configuration: {}", e))
        })?;

        debug!("Configuration loaded successfully: {:?}", result);
        Ok(result)
    }
}

impl<T: for<'de> Deserialize<'de> + Debug> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    #[default]
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Configuration of the exec output
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ExecConfig {
    /// Command line to run for every batch, e.g. `/usr/bin/mycollector --foo=bar`
    pub command: String,
    /// Timeout for each command to complete, e.g. `"5s"`
    #[serde(default)]
    pub timeout: Option<String>,
    /// Data format written to the command's stdin
    #[serde(default)]
    pub data_format: DataFormat,
    /// Logging level
    #[serde(default)]
    pub log_level: LogLevel,
}

impl ExecConfig {
    /// Load from a TOML file, with environment overrides applied on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AgentError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        ConfigBuilder::new().add_file(path).add_env(ENV_PREFIX).build()
    }

    /// Parse from a TOML string
    pub fn from_toml(toml: &str) -> Result<Self> {
        ConfigBuilder::new().add_toml(toml).build()
    }

    /// Parsed timeout; absent or zero means the default
    pub fn timeout(&self) -> Result<Duration> {
        match self.timeout.as_deref().map(str::trim) {
            None | Some("") => Ok(Duration::ZERO),
            Some(raw) => humantime::parse_duration(raw)
                .map_err(|e| AgentError::Config(format!("Invalid timeout {:?}: {}", raw, e))),
        }
    }

    /// The command and timeout as a validated spec
    pub fn command_spec(&self) -> Result<CommandSpec> {
        Ok(CommandSpec::new(self.command.clone(), self.timeout()?))
    }
}
