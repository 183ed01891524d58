//! Pipeline configuration
//!
//! Values come from a JSON file (`PipelineConfig::load`) or from `INGEST_*`
//! and `PRESTO_*` environment variables (`PipelineConfig::from_env`). Any
//! variable left unset keeps its default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::ddl::{CompressionType, StorageFormat};
use crate::error::{IngestError, Result};
use crate::ingestion::row_transformer::DEFAULT_SAMPLE_LIMIT;
use crate::ingestion::DEFAULT_WRITE_BATCH_SIZE;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PrestoConfig {
    pub coordinator_url: String,
    pub catalog: String,
    pub schema: String,
    pub user: String,
    /// `X-Presto` or `X-Trino`, depending on the engine build.
    pub header_prefix: String,
    pub timeout_secs: u64,
}

impl Default for PrestoConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8080".to_string(),
            catalog: "hive".to_string(),
            schema: "default".to_string(),
            user: "ingest".to_string(),
            header_prefix: "X-Presto".to_string(),
            timeout_secs: 300,
        }
    }
}

impl PrestoConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            coordinator_url: env_or("PRESTO_COORDINATOR_URL", defaults.coordinator_url),
            catalog: env_or("PRESTO_CATALOG", defaults.catalog),
            schema: env_or("PRESTO_SCHEMA", defaults.schema),
            user: env_or("PRESTO_USER", defaults.user),
            header_prefix: env_or("PRESTO_HEADER_PREFIX", defaults.header_prefix),
            timeout_secs: env_parse("PRESTO_TIMEOUT_SECS", defaults.timeout_secs)?,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    pub bucket_name: String,
    pub storage_format: StorageFormat,
    pub compression: CompressionType,
    /// Root directory of the local object store.
    pub storage_root: PathBuf,
    /// Where Parquet files are staged before upload.
    pub scratch_dir: PathBuf,
    pub workspace_id: String,
    pub project_id: String,
    pub sample_limit: usize,
    pub sample_rate: f64,
    pub channel_capacity: usize,
    pub write_batch_size: usize,
    pub presto: PrestoConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket_name: "ingest-uploads".to_string(),
            storage_format: StorageFormat::Parquet,
            compression: CompressionType::Snappy,
            storage_root: PathBuf::from("./data/objects"),
            scratch_dir: std::env::temp_dir().join("tabular-ingest"),
            workspace_id: "default".to_string(),
            project_id: "default".to_string(),
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            sample_rate: 1.0,
            channel_capacity: 1024,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            presto: PrestoConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            bucket_name: env_or("INGEST_BUCKET_NAME", defaults.bucket_name),
            storage_format: env_parse("INGEST_STORAGE_FORMAT", defaults.storage_format)?,
            compression: env_parse("INGEST_COMPRESSION", defaults.compression)?,
            storage_root: env_or("INGEST_STORAGE_ROOT", defaults.storage_root),
            scratch_dir: env_or("INGEST_SCRATCH_DIR", defaults.scratch_dir),
            workspace_id: env_or("INGEST_WORKSPACE_ID", defaults.workspace_id),
            project_id: env_or("INGEST_PROJECT_ID", defaults.project_id),
            sample_limit: env_parse("INGEST_SAMPLE_LIMIT", defaults.sample_limit)?,
            sample_rate: env_parse("INGEST_SAMPLE_RATE", defaults.sample_rate)?,
            channel_capacity: env_parse("INGEST_CHANNEL_CAPACITY", defaults.channel_capacity)?,
            write_batch_size: env_parse("INGEST_WRITE_BATCH_SIZE", defaults.write_batch_size)?,
            presto: PrestoConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(IngestError::InvalidArgument(format!(
                "sample_rate must be in (0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.sample_limit == 0 {
            return Err(IngestError::InvalidArgument("sample_limit must be positive".to_string()));
        }
        if self.channel_capacity == 0 || self.write_batch_size == 0 {
            return Err(IngestError::InvalidArgument(
                "channel_capacity and write_batch_size must be positive".to_string(),
            ));
        }
        if self.bucket_name.trim().is_empty() {
            return Err(IngestError::InvalidArgument("bucket_name is required".to_string()));
        }
        Ok(())
    }
}

fn env_or<T: From<String>>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => T::from(value),
        _ => default,
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().parse::<T>().map_err(|e| {
            IngestError::InvalidArgument(format!("{}={} is invalid: {}", key, value, e))
        }),
        _ => Ok(default),
    }
}
