//! Columnar Writer - Parquet output for transformed rows
//!
//! Rows are buffered per column and flushed as a row group every
//! `batch_size` rows, so memory stays bounded regardless of file size.

use polars::io::parquet::write::BatchedWriter as ParquetBatchedWriter;
use polars::prelude::*;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

use crate::ddl::CompressionType;
use crate::error::{IngestError, Result};
use crate::ingestion::field_type_sampler::FieldType;
use crate::ingestion::row_transformer::{CellValue, SchemaRecord, TransformRecord};

pub const DEFAULT_WRITE_BATCH_SIZE: usize = 4096;

enum ColumnBuffer {
    Utf8(Vec<Option<String>>),
    Float(Vec<Option<f64>>),
    Int(Vec<Option<i64>>),
}

impl ColumnBuffer {
    fn for_field_type(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String => ColumnBuffer::Utf8(Vec::new()),
            FieldType::Number => ColumnBuffer::Float(Vec::new()),
            FieldType::Integer | FieldType::Date => ColumnBuffer::Int(Vec::new()),
        }
    }

    fn dtype(&self) -> DataType {
        match self {
            ColumnBuffer::Utf8(_) => DataType::String,
            ColumnBuffer::Float(_) => DataType::Float64,
            ColumnBuffer::Int(_) => DataType::Int64,
        }
    }

    fn push(&mut self, cell: CellValue) {
        match (self, cell) {
            (ColumnBuffer::Utf8(v), CellValue::String(s)) => v.push(Some(s)),
            (ColumnBuffer::Float(v), CellValue::Number(n)) => v.push(Some(n)),
            (ColumnBuffer::Float(v), CellValue::Integer(n)) => v.push(Some(n as f64)),
            (ColumnBuffer::Int(v), CellValue::Integer(n)) => v.push(Some(n)),
            (ColumnBuffer::Int(v), CellValue::Date(n)) => v.push(Some(n)),
            (ColumnBuffer::Utf8(v), _) => v.push(None),
            (ColumnBuffer::Float(v), _) => v.push(None),
            (ColumnBuffer::Int(v), _) => v.push(None),
        }
    }

    fn take_series(&mut self, name: &str) -> Series {
        match self {
            ColumnBuffer::Utf8(v) => Series::new(name, std::mem::take(v)),
            ColumnBuffer::Float(v) => Series::new(name, std::mem::take(v)),
            ColumnBuffer::Int(v) => Series::new(name, std::mem::take(v)),
        }
    }
}

/// Consumes a transformer's output and writes one Parquet file.
pub struct ParquetSink<W: Write> {
    target: Option<W>,
    compression: ParquetCompression,
    batch_size: usize,
    writer: Option<ParquetBatchedWriter<W>>,
    names: Vec<String>,
    buffers: Vec<ColumnBuffer>,
    buffered: usize,
    rows_written: u64,
}

impl ParquetSink<File> {
    /// Create (or truncate) a Parquet file, making parent directories.
    pub fn create(
        path: impl AsRef<Path>,
        compression: ParquetCompression,
        batch_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self::new(file, compression, batch_size))
    }
}

impl<W: Write> ParquetSink<W> {
    pub fn new(target: W, compression: ParquetCompression, batch_size: usize) -> Self {
        Self {
            target: Some(target),
            compression,
            batch_size: batch_size.max(1),
            writer: None,
            names: Vec::new(),
            buffers: Vec::new(),
            buffered: 0,
            rows_written: 0,
        }
    }

    fn open(&mut self, schema: SchemaRecord) -> Result<()> {
        let target = self.target.take().ok_or_else(|| {
            IngestError::InvalidOperation("schema record received twice".to_string())
        })?;
        self.names = schema.columns.iter().map(|c| c.name.clone()).collect();
        self.buffers = schema
            .columns
            .iter()
            .map(|c| ColumnBuffer::for_field_type(c.field_type))
            .collect();

        let polars_schema = Schema::from_iter(
            self.names
                .iter()
                .zip(&self.buffers)
                .map(|(name, buf)| Field::new(name, buf.dtype())),
        );
        let writer = ParquetWriter::new(target)
            .with_compression(self.compression)
            .batched(&polars_schema)?;
        self.writer = Some(writer);
        Ok(())
    }

    pub fn write_record(&mut self, record: TransformRecord) -> Result<()> {
        match record {
            TransformRecord::Schema(schema) => self.open(schema),
            TransformRecord::Row(row) => {
                if self.writer.is_none() {
                    return Err(IngestError::InvalidOperation(
                        "row received before schema record".to_string(),
                    ));
                }
                for (buffer, cell) in self.buffers.iter_mut().zip(row.values) {
                    buffer.push(cell);
                }
                self.buffered += 1;
                if self.buffered >= self.batch_size {
                    self.flush()?;
                }
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffered == 0 {
            return Ok(());
        }
        let columns = self
            .names
            .iter()
            .zip(self.buffers.iter_mut())
            .map(|(name, buf)| buf.take_series(name))
            .collect::<Vec<_>>();
        let df = DataFrame::new(columns)?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write_batch(&df)?;
        }
        debug!(rows = self.buffered, "flushed parquet row group");
        self.rows_written += self.buffered as u64;
        self.buffered = 0;
        Ok(())
    }

    /// Flush the tail and close the file. Returns rows written.
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        match self.writer.as_mut() {
            Some(writer) => {
                writer.finish()?;
                Ok(self.rows_written)
            }
            None => Err(IngestError::InvalidOperation(
                "input ended before a schema record".to_string(),
            )),
        }
    }

    /// Pull records until the sender side closes. Meant for a blocking task.
    pub fn drain_blocking(mut self, mut input: mpsc::Receiver<TransformRecord>) -> Result<u64> {
        while let Some(record) = input.blocking_recv() {
            self.write_record(record)?;
        }
        self.finish()
    }
}

/// Writer codec for the compression named in table properties.
pub fn parquet_compression(compression: CompressionType) -> ParquetCompression {
    match compression {
        CompressionType::Snappy => ParquetCompression::Snappy,
        CompressionType::Gzip => ParquetCompression::Gzip(None),
        CompressionType::Zstd => ParquetCompression::Zstd(None),
        CompressionType::Uncompressed => ParquetCompression::Uncompressed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::row_transformer::{SchemaColumn, StorageHints, TypedRow};

    fn schema() -> TransformRecord {
        let col = |name: &str, t: FieldType| SchemaColumn {
            name: name.to_string(),
            original_name: name.to_string(),
            field_type: t,
            hints: StorageHints::for_field_type(t),
        };
        TransformRecord::Schema(SchemaRecord {
            columns: vec![col("name", FieldType::String), col("value", FieldType::Number)],
        })
    }

    fn row(i: u64) -> TransformRecord {
        TransformRecord::Row(TypedRow {
            row_index: i,
            values: vec![CellValue::String(format!("n{}", i)), CellValue::Number(i as f64)],
        })
    }

    #[test]
    fn test_writes_readable_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/data.parquet");
        let mut sink = ParquetSink::create(&path, ParquetCompression::Snappy, 3).unwrap();
        sink.write_record(schema()).unwrap();
        for i in 1..=7 {
            sink.write_record(row(i)).unwrap();
        }
        assert_eq!(sink.finish().unwrap(), 7);

        let file = File::open(&path).unwrap();
        let df = ParquetReader::new(file).finish().unwrap();
        assert_eq!(df.height(), 7);
        assert_eq!(df.width(), 2);
    }

    #[test]
    fn test_row_before_schema_fails() {
        let mut sink = ParquetSink::new(Vec::new(), ParquetCompression::Snappy, 10);
        assert!(sink.write_record(row(1)).is_err());
    }

    #[test]
    fn test_compression_mapping() {
        assert!(matches!(
            parquet_compression(CompressionType::Snappy),
            ParquetCompression::Snappy
        ));
        assert!(matches!(
            parquet_compression(CompressionType::Uncompressed),
            ParquetCompression::Uncompressed
        ));
    }
}
