//! Turning metrics into the bytes written to a command's stdin
use influxdb_line_protocol::LineProtocolBuilder;
use serde::Deserialize;
use thiserror::Error;

use crate::metric::MetricPoint;

/// Errors produced while serializing a single metric
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid metric: {0}")]
    InvalidMetric(String),
}

/// Converts one metric into bytes
pub trait Serializer<M>: Send + Sync + 'static {
    /// Serialize a metric, including any trailing line terminator
    fn serialize(&self, metric: &M) -> Result<Vec<u8>, SerializationError>;
}

/// Output data format
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// InfluxDB line protocol
    #[default]
    Influx,
    /// One JSON object per line
    Json,
}

impl DataFormat {
    /// Build the serializer for this format
    pub fn serializer<M: MetricPoint>(self) -> Box<dyn Serializer<M>> {
        match self {
            DataFormat::Influx => Box::new(InfluxSerializer),
            DataFormat::Json => Box::new(JsonSerializer),
        }
    }
}

/// Writes metrics as InfluxDB line protocol, one line per metric
#[derive(Debug, Clone, Copy, Default)]
pub struct InfluxSerializer;

impl<M: MetricPoint> Serializer<M> for InfluxSerializer {
    fn serialize(&self, metric: &M) -> Result<Vec<u8>, SerializationError> {
        if metric.name().is_empty() {
            return Err(SerializationError::InvalidMetric("empty measurement name".to_string()));
        }

        let values = metric.values();
        let mut fields = values.iter();
        let Some((first_key, first_value)) = fields.next() else {
            return Err(SerializationError::InvalidMetric(format!(
                "measurement {} has no fields",
                metric.name()
            )));
        };

        let timestamp = metric.timestamp().timestamp_nanos_opt().ok_or_else(|| {
            SerializationError::InvalidMetric(format!(
                "timestamp of {} is out of range",
                metric.name()
            ))
        })?;

        let mut builder = LineProtocolBuilder::new().measurement(metric.name());
        for (key, value) in &metric.tags() {
            // Empty tag keys or values are not representable
            if key.is_empty() || value.is_empty() {
                continue;
            }
            builder = builder.tag(key, value);
        }

        // The first field moves the builder into its field state
        let mut line = builder.field(first_key, *first_value);
        for (key, value) in fields {
            line = line.field(key, *value);
        }

        Ok(line.timestamp(timestamp).close_line().build())
    }
}

/// Writes each metric as a JSON object followed by a newline
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<M: MetricPoint> Serializer<M> for JsonSerializer {
    fn serialize(&self, metric: &M) -> Result<Vec<u8>, SerializationError> {
        let mut bytes = serde_json::to_vec(&metric.to_json())?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}
