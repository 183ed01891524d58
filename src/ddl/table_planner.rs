//! Table DDL Planner - `CREATE EXTERNAL TABLE` over Parquet files in object storage

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ddl::DEFAULT_VARCHAR_LENGTH;
use crate::error::IngestError;
use crate::ingestion::{FieldType, JoinColumn, JoinTableDefinition, VARCHAR_CEILING};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageFormat {
    Parquet,
    Orc,
}

impl fmt::Display for StorageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageFormat::Parquet => f.write_str("PARQUET"),
            StorageFormat::Orc => f.write_str("ORC"),
        }
    }
}

impl FromStr for StorageFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PARQUET" => Ok(StorageFormat::Parquet),
            "ORC" => Ok(StorageFormat::Orc),
            other => Err(IngestError::InvalidArgument(format!(
                "unsupported storage format '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionType {
    Snappy,
    Gzip,
    Zstd,
    Uncompressed,
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionType::Snappy => "SNAPPY",
            CompressionType::Gzip => "GZIP",
            CompressionType::Zstd => "ZSTD",
            CompressionType::Uncompressed => "UNCOMPRESSED",
        };
        f.write_str(name)
    }
}

impl FromStr for CompressionType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SNAPPY" => Ok(CompressionType::Snappy),
            "GZIP" => Ok(CompressionType::Gzip),
            "ZSTD" => Ok(CompressionType::Zstd),
            "UNCOMPRESSED" | "NONE" => Ok(CompressionType::Uncompressed),
            other => Err(IngestError::InvalidArgument(format!(
                "unsupported compression '{}'",
                other
            ))),
        }
    }
}

/// Engine type for a column.
///
/// STRING -> `varchar(n)` with `n = min(length or 100, 65535)`; a zero
/// length (column never held a value) falls back to the default.
pub fn column_sql_type(column: &JoinColumn) -> String {
    match column.column_type {
        FieldType::String => {
            let length = column
                .column_length
                .filter(|l| *l > 0)
                .unwrap_or(DEFAULT_VARCHAR_LENGTH)
                .min(VARCHAR_CEILING);
            format!("varchar({})", length)
        }
        FieldType::Number => "double".to_string(),
        // dates are stored as epoch milliseconds
        FieldType::Integer | FieldType::Date => "bigint".to_string(),
    }
}

pub struct TableDdlPlanner {
    bucket_name: String,
    storage_format: StorageFormat,
    compression: CompressionType,
    last_query: Option<String>,
}

impl TableDdlPlanner {
    pub fn new(
        bucket_name: impl Into<String>,
        storage_format: StorageFormat,
        compression: CompressionType,
    ) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            storage_format,
            compression,
            last_query: None,
        }
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Render the external table statement for `table_def`, located at
    /// `s3://<bucket>/<file_name>`.
    pub fn define_query(
        &mut self,
        file_name: &str,
        table_name: &str,
        table_def: &JoinTableDefinition,
    ) -> String {
        let columns = table_def
            .columns
            .iter()
            .map(|c| format!("`{}` {}", c.column_name, column_sql_type(c)))
            .collect::<Vec<_>>()
            .join(", ");

        let query = format!(
            "CREATE EXTERNAL TABLE {} ({}) STORED AS {} LOCATION 's3://{}/{}' TBLPROPERTIES ('parquet.compression'='{}');",
            table_name,
            columns,
            self.storage_format,
            self.bucket_name,
            file_name.trim_start_matches('/'),
            self.compression,
        );
        self.last_query = Some(query.clone());
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, t: FieldType, length: Option<usize>) -> JoinColumn {
        JoinColumn {
            table_alias: "A".to_string(),
            column_index: 0,
            column_name: name.to_string(),
            column_type: t,
            is_join_column: false,
            is_selected_column: true,
            column_length: length,
        }
    }

    #[test]
    fn test_varchar_default_length() {
        assert_eq!(column_sql_type(&column("a", FieldType::String, None)), "varchar(100)");
        assert_eq!(column_sql_type(&column("a", FieldType::String, Some(0))), "varchar(100)");
    }

    #[test]
    fn test_varchar_is_capped() {
        assert_eq!(
            column_sql_type(&column("a", FieldType::String, Some(66535))),
            "varchar(65535)"
        );
        assert_eq!(column_sql_type(&column("a", FieldType::String, Some(12))), "varchar(12)");
    }

    #[test]
    fn test_numeric_types() {
        assert_eq!(column_sql_type(&column("a", FieldType::Number, None)), "double");
        assert_eq!(column_sql_type(&column("a", FieldType::Integer, None)), "bigint");
        assert_eq!(column_sql_type(&column("a", FieldType::Date, None)), "bigint");
    }

    #[test]
    fn test_define_query() {
        let mut planner =
            TableDdlPlanner::new("uploads", StorageFormat::Parquet, CompressionType::Snappy);
        assert!(planner.last_query().is_none());

        let def = JoinTableDefinition {
            table_name: "sales".to_string(),
            backing_file_name: "sales.parquet".to_string(),
            table_alias: "A".to_string(),
            table_index: 0,
            columns: vec![
                column("region", FieldType::String, None),
                column("amount", FieldType::Number, None),
            ],
        };
        let query = planner.define_query("/client/w/p/tables/sales/", "sales", &def);
        assert_eq!(
            query,
            "CREATE EXTERNAL TABLE sales (`region` varchar(100), `amount` double) STORED AS PARQUET \
             LOCATION 's3://uploads/client/w/p/tables/sales/' TBLPROPERTIES ('parquet.compression'='SNAPPY');"
        );
        assert_eq!(planner.last_query(), Some(query.as_str()));
    }

    #[test]
    fn test_parse_options() {
        assert_eq!("parquet".parse::<StorageFormat>().unwrap(), StorageFormat::Parquet);
        assert_eq!("zstd".parse::<CompressionType>().unwrap(), CompressionType::Zstd);
        assert!("avro".parse::<StorageFormat>().is_err());
    }
}
