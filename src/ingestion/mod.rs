//! Ingestion Module - uploaded tabular files to queryable external tables
//!
//! Handles the path from a raw CSV upload to a view in the query engine:
//! - Column name cleaning
//! - Sampled field type inference
//! - Streaming row transformation with per-cell error reporting
//! - Columnar (Parquet) output
//! - Batch ordering and legality checks
//! - Join discovery across the tables of a batch
//! - DDL execution against the query engine

pub mod batch_validator;
pub mod column_name_cleaner;
pub mod columnar_writer;
pub mod csv_connector;
pub mod field_type_sampler;
pub mod join_discovery;
pub mod orchestrator;
pub mod pipeline;
pub mod row_transformer;
pub mod table_sorter;

pub use batch_validator::{BatchEntry, BatchValidator, ExistingTables};
pub use column_name_cleaner::{
    clean_column_name, clean_file_name, clean_table_name, ColumnNameCleaner,
    ColumnNameCleanerFactory, DefaultColumnNameCleaner,
};
pub use columnar_writer::{parquet_compression, ParquetSink, DEFAULT_WRITE_BATCH_SIZE};
pub use csv_connector::CsvRowSource;
pub use field_type_sampler::{
    DefaultSamplerFactory, FieldType, FieldTypeSampler, FieldTypeSamplerFactory,
};
pub use join_discovery::{JoinColumn, JoinDiscoverer, JoinTableDefinition};
pub use orchestrator::{IngestionOrchestrator, OrchestratorState};
pub use pipeline::{IngestionPipeline, IngestionRequest, IngestionResponse, UploadedFile};
pub use row_transformer::{
    CellValue, CollectingListener, RawRow, RowTransformer, RowTransformerConfig, SchemaColumn,
    SchemaRecord, TransformListener, TransformRecord, TypedRow,
};
pub use table_sorter::sort_tables;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IngestError;

/// Upper bound the query engine accepts for a varchar column.
pub const VARCHAR_CEILING: usize = 65535;

/// What a batch entry does to its table.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOperation {
    Delete = 0,
    Append = 1,
    Add = 2,
    Replace = 3,
}

impl FileOperation {
    /// Operations that rewrite the table definition.
    pub fn rewrites_table(self) -> bool {
        !matches!(self, FileOperation::Append)
    }
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileOperation::Delete => "DELETE",
            FileOperation::Append => "APPEND",
            FileOperation::Add => "ADD",
            FileOperation::Replace => "REPLACE",
        };
        f.write_str(name)
    }
}

impl FromStr for FileOperation {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DELETE" | "0" => Ok(FileOperation::Delete),
            "APPEND" | "1" => Ok(FileOperation::Append),
            "ADD" | "2" => Ok(FileOperation::Add),
            "REPLACE" | "3" => Ok(FileOperation::Replace),
            other => Err(IngestError::InvalidArgument(format!(
                "unknown file operation '{}'",
                other
            ))),
        }
    }
}

/// Column description produced once a file has been streamed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub original_name: String,
    pub field_type: FieldType,
    /// Only set for STRING columns; never above [`VARCHAR_CEILING`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longest_string: Option<usize>,
}

/// Summary of one streamed file. Immutable once emitted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileInformation {
    pub file_name: String,
    pub table_name: String,
    pub parquet_file_name: String,
    pub output_directory: String,
    pub number_of_rows: u64,
    pub number_of_columns: usize,
    pub columns: Vec<ColumnInfo>,
    pub file_size: u64,
    pub file_operation_type: FileOperation,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingErrorType {
    InvalidFieldValue,
}

/// One offending cell. Reported, never fatal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileProcessingError {
    /// 1-based data row number.
    pub row_index: u64,
    pub column_index: usize,
    pub column_name: String,
    pub error_type: ProcessingErrorType,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestionStatus {
    Success,
    Partial,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_operation_codes() {
        assert_eq!(FileOperation::Delete as u8, 0);
        assert_eq!(FileOperation::Append as u8, 1);
        assert_eq!(FileOperation::Add as u8, 2);
        assert_eq!(FileOperation::Replace as u8, 3);
    }

    #[test]
    fn test_file_operation_parse() {
        assert_eq!("append".parse::<FileOperation>().unwrap(), FileOperation::Append);
        assert_eq!("3".parse::<FileOperation>().unwrap(), FileOperation::Replace);
        assert!("merge".parse::<FileOperation>().is_err());
        assert!(!FileOperation::Append.rewrites_table());
        assert!(FileOperation::Delete.rewrites_table());
    }

    #[test]
    fn test_file_information_serializes_camel_case() {
        let info = FileInformation {
            file_name: "sales.csv".to_string(),
            table_name: "sales".to_string(),
            parquet_file_name: "sales.parquet".to_string(),
            output_directory: "out".to_string(),
            number_of_rows: 3,
            number_of_columns: 1,
            columns: vec![ColumnInfo {
                name: "region".to_string(),
                original_name: "Region".to_string(),
                field_type: FieldType::String,
                longest_string: Some(5),
            }],
            file_size: 42,
            file_operation_type: FileOperation::Add,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["numberOfRows"], 3);
        assert_eq!(json["fileOperationType"], "ADD");
        assert_eq!(json["columns"][0]["longestString"], 5);
    }
}
