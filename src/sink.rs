use async_trait::async_trait;
use log::{debug, trace};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::{ExecConfig, SAMPLE_CONFIG};
use crate::error::{ExecError, Result};
use crate::metric::MetricPoint;
use crate::process::{CommandRunner, CommandSpec, ProcessRunner};
use crate::serializer::Serializer;

/// Generic trait for metric outputs
#[async_trait]
pub trait MetricSink: Send + Sync + 'static {
    /// The type of metrics this output handles
    type MetricType: MetricPoint;

    /// Prepare the output for writing
    async fn connect(&self) -> Result<()>;

    /// Write a batch of metrics
    async fn write(&self, metrics: &[Self::MetricType]) -> Result<()>;

    /// Release anything held by the output
    async fn close(&self) -> Result<()>;

    /// Get a description of this output
    fn description(&self) -> &str;

    /// Example configuration for this output
    fn sample_config(&self) -> &str;
}

/// Sends each batch of metrics to the stdin of a freshly spawned command.
///
/// Every batch is serialized in full before anything is spawned, so a metric
/// that fails to serialize means the command is not run at all for that batch.
pub struct ExecSink<M: MetricPoint> {
    spec: CommandSpec,
    serializer: Box<dyn Serializer<M>>,
    runner: Arc<dyn ProcessRunner>,
    _metric: PhantomData<fn(&M)>,
}

impl<M: MetricPoint> ExecSink<M> {
    /// Create a sink from its collaborators
    pub fn new(
        spec: CommandSpec,
        serializer: Box<dyn Serializer<M>>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            spec,
            serializer,
            runner,
            _metric: PhantomData,
        }
    }

    /// Create a sink that runs real processes, as described by `config`
    pub fn from_config(config: &ExecConfig) -> Result<Self> {
        Ok(Self::new(
            config.command_spec()?,
            config.data_format.serializer(),
            Arc::new(CommandRunner::new()),
        ))
    }

    /// The configured command
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Serialize the whole batch into one buffer, stopping at the first failure
    fn encode(&self, metrics: &[M]) -> std::result::Result<Vec<u8>, ExecError> {
        let mut buffer = Vec::new();

        for (index, metric) in metrics.iter().enumerate() {
            let bytes = self
                .serializer
                .serialize(metric)
                .map_err(|source| ExecError::Serialization { index, source })?;
            buffer.extend_from_slice(&bytes);
        }

        Ok(buffer)
    }

    async fn run(&self, buffer: Vec<u8>) -> std::result::Result<(), ExecError> {
        let command = self.spec.command_line();
        let context = |source| ExecError::Command {
            command: command.to_string(),
            source,
        };

        let argv = self.spec.argv().map_err(context)?;
        self.runner
            .run(&argv, buffer, self.spec.timeout())
            .await
            .map_err(context)
    }
}

#[async_trait]
impl<M: MetricPoint> MetricSink for ExecSink<M> {
    type MetricType = M;

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn write(&self, metrics: &[M]) -> Result<()> {
        if metrics.is_empty() {
            trace!("Empty batch, not running {:?}", self.spec.command_line());
            return Ok(());
        }

        let buffer = self.encode(metrics)?;
        debug!(
            "Writing {} metrics ({} bytes) to {:?}",
            metrics.len(),
            buffer.len(),
            self.spec.command_line()
        );

        self.run(buffer).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> &str {
        "Send metrics to commands that can input from stdin"
    }

    fn sample_config(&self) -> &str {
        SAMPLE_CONFIG
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::metric::Metric;
    use crate::process::{ProcessError, ProcessResult};
    use crate::serializer::{InfluxSerializer, SerializationError};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every invocation instead of spawning anything
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(Vec<String>, Vec<u8>, Duration)>>,
    }

    impl RecordingRunner {
        fn calls(&self) -> Vec<(Vec<String>, Vec<u8>, Duration)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(
            &self,
            argv: &[String],
            stdin: Vec<u8>,
            timeout: Duration,
        ) -> ProcessResult<()> {
            self.calls.lock().unwrap().push((argv.to_vec(), stdin, timeout));
            Ok(())
        }
    }

    /// Fails for any metric with the given name
    struct RejectingSerializer(&'static str);

    impl Serializer<Metric> for RejectingSerializer {
        fn serialize(&self, metric: &Metric) -> std::result::Result<Vec<u8>, SerializationError> {
            if metric.name == self.0 {
                Err(SerializationError::InvalidMetric(metric.name.clone()))
            } else {
                Ok(format!("{}\n", metric.name).into_bytes())
            }
        }
    }

    fn metric(name: &str) -> Metric {
        Metric::new(name)
            .tag("host", "a")
            .field("value", 1)
            .at(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn sink_with(
        command: &str,
        serializer: Box<dyn Serializer<Metric>>,
    ) -> (ExecSink<Metric>, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner::default());
        let sink = ExecSink::new(
            CommandSpec::new(command, Duration::from_secs(5)),
            serializer,
            runner.clone(),
        );
        (sink, runner)
    }

    fn unwrap_exec(err: AgentError) -> ExecError {
        match err {
            AgentError::Exec(err) => err,
            other => panic!("expected exec error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_never_runs() {
        let (sink, runner) = sink_with("cat", Box::new(InfluxSerializer));
        sink.write(&[]).await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_with_empty_command_succeeds() {
        let (sink, runner) = sink_with("", Box::new(InfluxSerializer));
        sink.write(&[]).await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_concatenated_in_order() {
        let (sink, runner) = sink_with(
            "/usr/bin/mycollector --foo=bar",
            Box::new(RejectingSerializer("none")),
        );
        sink.write(&[metric("first"), metric("second"), metric("third")]).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let (argv, stdin, timeout) = &calls[0];
        assert_eq!(argv, &vec!["/usr/bin/mycollector".to_string(), "--foo=bar".to_string()]);
        assert_eq!(stdin, b"first\nsecond\nthird\n");
        assert_eq!(*timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_influx_payload() {
        let (sink, runner) = sink_with("cat", Box::new(InfluxSerializer));
        sink.write(&[metric("cpu")]).await.unwrap();
        assert_eq!(runner.calls()[0].1, b"cpu,host=a value=1i 1700000000000000000\n");
    }

    #[tokio::test]
    async fn test_serialization_failure_runs_nothing() {
        let (sink, runner) = sink_with("cat", Box::new(RejectingSerializer("bad")));
        let err = sink
            .write(&[metric("good"), metric("bad"), metric("good")])
            .await
            .unwrap_err();

        match unwrap_exec(err) {
            ExecError::Serialization { index, .. } => assert_eq!(index, 1),
            other => panic!("expected serialization error, got {:?}", other),
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let (sink, runner) = sink_with("   ", Box::new(InfluxSerializer));
        let err = unwrap_exec(sink.write(&[metric("cpu")]).await.unwrap_err());

        assert!(matches!(err.process_error(), Some(ProcessError::EmptyCommand)));
        assert_eq!(err.command(), Some("   "));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_command_is_rejected() {
        let (sink, runner) = sink_with("echo 'unterminated", Box::new(InfluxSerializer));
        let err = unwrap_exec(sink.write(&[metric("cpu")]).await.unwrap_err());

        assert!(matches!(err.process_error(), Some(ProcessError::Parse(_))));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_hooks_are_noops() {
        let (sink, runner) = sink_with("cat", Box::new(InfluxSerializer));
        sink.connect().await.unwrap();
        sink.close().await.unwrap();
        assert!(runner.calls().is_empty());
        assert!(!sink.description().is_empty());
        assert!(sink.sample_config().contains("command ="));
    }

    #[cfg(unix)]
    mod spawning {
        use super::*;
        use std::time::Instant;

        fn real_sink(command: &str, timeout: Duration) -> ExecSink<Metric> {
            ExecSink::new(
                CommandSpec::new(command, timeout),
                Box::new(InfluxSerializer),
                Arc::new(CommandRunner::new()),
            )
        }

        #[tokio::test]
        async fn test_cat_succeeds() {
            let sink = real_sink("cat", Duration::from_secs(5));
            sink.write(&[metric("cpu")]).await.unwrap();
        }

        #[tokio::test]
        async fn test_sleep_times_out() {
            let sink = real_sink("sleep 10", Duration::from_millis(100));
            let started = Instant::now();
            let err = unwrap_exec(sink.write(&[metric("cpu")]).await.unwrap_err());

            assert!(err.process_error().is_some_and(ProcessError::is_timeout), "{:?}", err);
            assert_eq!(err.command(), Some("sleep 10"));
            assert!(started.elapsed() < Duration::from_secs(2));
        }

        #[tokio::test]
        async fn test_false_reports_exit_status() {
            let sink = real_sink("false", Duration::from_secs(5));
            let err = unwrap_exec(sink.write(&[metric("cpu")]).await.unwrap_err());

            assert_eq!(err.process_error().and_then(ProcessError::exit_code), Some(1));
            assert!(err.to_string().contains(r#"for command "false""#), "{}", err);
        }

        #[tokio::test]
        async fn test_concurrent_writes() {
            let sink = real_sink("cat", Duration::from_secs(5));
            let batch = [metric("cpu"), metric("mem")];
            let (a, b) = tokio::join!(sink.write(&batch), sink.write(&batch));
            a.unwrap();
            b.unwrap();
        }

        #[tokio::test]
        async fn test_from_config() {
            let config = ExecConfig::from_toml(
                r#"
                command = "cat"
                timeout = "2s"
                data_format = "json"
                "#,
            )
            .unwrap();

            let sink = ExecSink::<Metric>::from_config(&config).unwrap();
            assert_eq!(sink.spec().timeout(), Duration::from_secs(2));
            sink.write(&[metric("cpu")]).await.unwrap();
        }
    }
}
