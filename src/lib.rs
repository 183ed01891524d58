pub mod clients;
pub mod config;
pub mod date_grouping;
pub mod ddl;
pub mod error;
pub mod ingestion;

pub use config::{PipelineConfig, PrestoConfig};
pub use error::{IngestError, Result};
