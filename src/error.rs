use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// A required input is missing or malformed (e.g. a backing storage object).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation failed in a way the caller cannot fix by changing inputs.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid table set: {0}")]
    InvalidTableSet(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("Table does not exist: {0}")]
    TableDoesNotExist(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Duplicate column name '{cleaned}' in {file_name}")]
    DuplicateColumnName { file_name: String, cleaned: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query engine error: {0}")]
    QueryEngine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl IngestError {
    /// Stable code surfaced to callers in ingestion responses.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::InvalidArgument(_) => "INVALID_ARGUMENT",
            IngestError::InvalidOperation(_) => "INVALID_OPERATION",
            IngestError::InvalidTableSet(_) => "INVALID_TABLE_SET",
            IngestError::TableAlreadyExists(_) => "TABLE_ALREADY_EXISTS",
            IngestError::TableDoesNotExist(_) => "TABLE_DOES_NOT_EXIST",
            IngestError::FileAlreadyExists(_) => "FILE_ALREADY_EXISTS",
            IngestError::DuplicateColumnName { .. } => "DUPLICATE_COLUMN_NAME",
            IngestError::Storage(_) => "STORAGE_ERROR",
            IngestError::QueryEngine(_) => "QUERY_ENGINE_ERROR",
            IngestError::Io(_) => "IO_ERROR",
            IngestError::Json(_) => "JSON_ERROR",
            IngestError::Csv(_) => "CSV_ERROR",
            IngestError::Polars(_) => "POLARS_ERROR",
        }
    }

    /// Batch legality violations detected before any file is processed.
    pub fn is_batch_violation(&self) -> bool {
        matches!(
            self,
            IngestError::InvalidTableSet(_)
                | IngestError::TableAlreadyExists(_)
                | IngestError::TableDoesNotExist(_)
                | IngestError::FileAlreadyExists(_)
        )
    }
}

impl From<polars::error::PolarsError> for IngestError {
    fn from(err: polars::error::PolarsError) -> Self {
        IngestError::Polars(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
