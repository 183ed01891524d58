//! Row Transformer - raw header-keyed rows to typed rows
//!
//! The first record out is always the schema record. Rows are held back only
//! while the sampling window is open (at most `sample_limit` rows); after the
//! schema is emitted every input row produces exactly one output row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::ingestion::column_name_cleaner::ColumnNameCleanerFactory;
use crate::ingestion::field_type_sampler::{
    parse_date_millis, parse_number, FieldType, FieldTypeSampler, FieldTypeSamplerFactory,
};
use crate::ingestion::{
    ColumnInfo, FileInformation, FileOperation, FileProcessingError, ProcessingErrorType,
};

/// Rows sampled before the schema is fixed, unless configured otherwise.
pub const DEFAULT_SAMPLE_LIMIT: usize = 10;

/// One input row: header name to raw cell text, in header order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawRow {
    pub fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    pub fn from_record(headers: &[String], values: Vec<String>) -> Self {
        let mut values = values.into_iter();
        let fields = headers
            .iter()
            .map(|h| (h.clone(), values.next().unwrap_or_default()))
            .collect();
        Self { fields }
    }

    fn keys(&self) -> Vec<String> {
        self.fields.iter().map(|(k, _)| k.clone()).collect()
    }

    fn into_values(self) -> Vec<String> {
        self.fields.into_iter().map(|(_, v)| v).collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellValue {
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    /// Epoch milliseconds
    Date(i64),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhysicalType {
    ByteArray,
    Double,
    Int64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalType {
    Utf8,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    Plain,
}

/// Encoding hints for the columnar writer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StorageHints {
    pub physical_type: PhysicalType,
    pub logical_type: Option<LogicalType>,
    pub encoding: Encoding,
    pub optional: bool,
}

impl StorageHints {
    pub fn for_field_type(field_type: FieldType) -> Self {
        let (physical_type, logical_type) = match field_type {
            FieldType::String => (PhysicalType::ByteArray, Some(LogicalType::Utf8)),
            FieldType::Number => (PhysicalType::Double, None),
            FieldType::Integer => (PhysicalType::Int64, None),
            // epoch millis, grouped with from_unixtime(col/1000)
            FieldType::Date => (PhysicalType::Int64, None),
        };
        Self {
            physical_type,
            logical_type,
            encoding: Encoding::Plain,
            optional: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaColumn {
    pub name: String,
    pub original_name: String,
    pub field_type: FieldType,
    pub hints: StorageHints,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SchemaRecord {
    pub columns: Vec<SchemaColumn>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypedRow {
    /// 1-based data row number.
    pub row_index: u64,
    pub values: Vec<CellValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransformRecord {
    Schema(SchemaRecord),
    Row(TypedRow),
}

/// Receives the file summary and per-cell errors.
pub trait TransformListener: Send {
    /// Called exactly once, when the input ends.
    fn on_info(&mut self, info: &FileInformation);

    fn on_error(&mut self, error: FileProcessingError);
}

#[derive(Debug, Default)]
struct Collected {
    info: Vec<FileInformation>,
    errors: Vec<FileProcessingError>,
}

/// Listener that keeps everything it is told. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct CollectingListener {
    inner: Arc<Mutex<Collected>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Collected) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn info(&self) -> Option<FileInformation> {
        self.with(|c| c.info.last().cloned())
    }

    pub fn info_count(&self) -> usize {
        self.with(|c| c.info.len())
    }

    pub fn errors(&self) -> Vec<FileProcessingError> {
        self.with(|c| c.errors.clone())
    }

    pub fn take_errors(&self) -> Vec<FileProcessingError> {
        self.with(|c| std::mem::take(&mut c.errors))
    }
}

impl TransformListener for CollectingListener {
    fn on_info(&mut self, info: &FileInformation) {
        let info = info.clone();
        self.with(|c| c.info.push(info));
    }

    fn on_error(&mut self, error: FileProcessingError) {
        self.with(|c| c.errors.push(error));
    }
}

/// Per-file settings for a transformer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowTransformerConfig {
    pub file_name: String,
    pub file_size: u64,
    pub output_file_name: String,
    pub output_directory: String,
    pub table_name: String,
    pub file_operation_type: FileOperation,
    pub sample_limit: usize,
}

impl RowTransformerConfig {
    pub fn new(
        file_name: impl Into<String>,
        table_name: impl Into<String>,
        file_operation_type: FileOperation,
    ) -> Self {
        let file_name = file_name.into();
        let stem = file_name
            .rsplit_once('.')
            .map(|(s, _)| s.to_string())
            .unwrap_or_else(|| file_name.clone());
        Self {
            output_file_name: format!("{}.parquet", stem),
            output_directory: String::new(),
            file_name,
            file_size: 0,
            table_name: table_name.into(),
            file_operation_type,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

struct Column {
    name: String,
    original_name: String,
}

pub struct RowTransformer {
    config: RowTransformerConfig,
    sampler_factory: Arc<dyn FieldTypeSamplerFactory>,
    cleaner_factory: Arc<dyn ColumnNameCleanerFactory>,
    listener: Box<dyn TransformListener>,
    columns: Option<Vec<Column>>,
    samplers: Vec<FieldTypeSampler>,
    field_types: Option<Vec<FieldType>>,
    window: Vec<(u64, Vec<String>)>,
    rows_seen: u64,
    error_count: u64,
}

impl RowTransformer {
    pub fn new(
        config: RowTransformerConfig,
        sampler_factory: Arc<dyn FieldTypeSamplerFactory>,
        cleaner_factory: Arc<dyn ColumnNameCleanerFactory>,
        listener: Box<dyn TransformListener>,
    ) -> Self {
        Self {
            config,
            sampler_factory,
            cleaner_factory,
            listener,
            columns: None,
            samplers: Vec::new(),
            field_types: None,
            window: Vec::new(),
            rows_seen: 0,
            error_count: 0,
        }
    }

    pub fn config(&self) -> &RowTransformerConfig {
        &self.config
    }

    /// Fix the header before any row arrives. Needed for header-only files;
    /// otherwise the header is taken from the first row's keys.
    pub fn set_header(&mut self, headers: &[String]) -> Result<()> {
        if self.columns.is_some() {
            return Err(IngestError::InvalidOperation(format!(
                "header for {} is already set",
                self.config.file_name
            )));
        }
        let cleaner = self.cleaner_factory.create();
        let mut seen: HashMap<String, &str> = HashMap::new();
        let mut columns = Vec::with_capacity(headers.len());

        for raw in headers {
            let cleaned = cleaner.clean_column_name(raw);
            if seen.insert(cleaned.clone(), raw.as_str()).is_some() {
                return Err(IngestError::DuplicateColumnName {
                    file_name: self.config.file_name.clone(),
                    cleaned,
                });
            }
            columns.push(Column {
                name: cleaned,
                original_name: raw.clone(),
            });
        }

        self.samplers = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| self.sampler_factory.create(&c.name, idx))
            .collect::<Result<Vec<_>>>()?;
        self.columns = Some(columns);
        Ok(())
    }

    fn column_count(&self) -> usize {
        self.columns.as_ref().map(|c| c.len()).unwrap_or(0)
    }

    /// Cells in header order. Rows keyed differently from the header are
    /// matched by key; keys the header lacks are dropped.
    fn align(&self, row: RawRow) -> Vec<String> {
        let columns = self.columns.as_deref().unwrap_or_default();
        let in_order = row.fields.len() >= columns.len()
            && columns
                .iter()
                .zip(&row.fields)
                .all(|(c, (key, _))| *key == c.original_name);
        if in_order {
            return row.into_values();
        }

        let mut by_key: HashMap<String, String> = row.fields.into_iter().collect();
        let values = columns
            .iter()
            .map(|c| by_key.remove(&c.original_name).unwrap_or_default())
            .collect();
        if !by_key.is_empty() {
            debug!(
                file = %self.config.file_name,
                unknown = by_key.len(),
                "dropping cells whose keys are not in the header"
            );
        }
        values
    }

    /// Process one row; returns the records that became ready.
    pub fn push(&mut self, row: RawRow) -> Result<Vec<TransformRecord>> {
        if self.columns.is_none() {
            self.set_header(&row.keys())?;
        }
        self.rows_seen += 1;
        let row_index = self.rows_seen;

        let mut values = self.align(row);
        let width = self.column_count();
        if values.len() > width {
            debug!(
                file = %self.config.file_name,
                row_index,
                extra = values.len() - width,
                "dropping cells beyond the header"
            );
        }
        values.resize(width, String::new());

        if self.field_types.is_some() {
            for (sampler, value) in self.samplers.iter_mut().zip(&values) {
                sampler.record_length(value);
            }
            let row = self.coerce(row_index, values);
            return Ok(vec![TransformRecord::Row(row)]);
        }

        for (sampler, value) in self.samplers.iter_mut().zip(&values) {
            sampler.process_item(value)?;
        }
        self.window.push((row_index, values));

        if self.window.len() >= self.config.sample_limit.max(1) {
            Ok(self.close_window())
        } else {
            Ok(Vec::new())
        }
    }

    /// Freeze the schema and release the buffered rows.
    fn close_window(&mut self) -> Vec<TransformRecord> {
        let mut field_types = Vec::with_capacity(self.samplers.len());
        for sampler in &mut self.samplers {
            sampler.finish();
            field_types.push(frozen_type(sampler.field_type().unwrap_or(FieldType::String)));
        }

        let schema = SchemaRecord {
            columns: self
                .columns
                .as_deref()
                .unwrap_or_default()
                .iter()
                .zip(&field_types)
                .map(|(c, t)| SchemaColumn {
                    name: c.name.clone(),
                    original_name: c.original_name.clone(),
                    field_type: *t,
                    hints: StorageHints::for_field_type(*t),
                })
                .collect(),
        };
        debug!(
            file = %self.config.file_name,
            columns = schema.columns.len(),
            sampled_rows = self.window.len(),
            "schema fixed"
        );
        self.field_types = Some(field_types);

        let mut records = Vec::with_capacity(self.window.len() + 1);
        records.push(TransformRecord::Schema(schema));
        for (row_index, values) in std::mem::take(&mut self.window) {
            records.push(TransformRecord::Row(self.coerce(row_index, values)));
        }
        records
    }

    fn coerce(&mut self, row_index: u64, values: Vec<String>) -> TypedRow {
        let field_types = self.field_types.as_deref().unwrap_or_default();
        let mut out = Vec::with_capacity(values.len());
        let mut failed = Vec::new();

        for (idx, (value, field_type)) in values.into_iter().zip(field_types).enumerate() {
            if value.trim().is_empty() {
                out.push(CellValue::Null);
                continue;
            }
            let cell = match field_type {
                FieldType::String => Some(CellValue::String(value)),
                FieldType::Integer | FieldType::Number => {
                    parse_number(&value).map(CellValue::Number)
                }
                FieldType::Date => parse_date_millis(&value).map(CellValue::Date),
            };
            match cell {
                Some(cell) => out.push(cell),
                None => {
                    failed.push(idx);
                    out.push(CellValue::Null);
                }
            }
        }

        for column_index in failed {
            let column_name = self
                .columns
                .as_ref()
                .and_then(|c| c.get(column_index))
                .map(|c| c.name.clone())
                .unwrap_or_default();
            debug!(
                file = %self.config.file_name,
                row_index,
                column = %column_name,
                "invalid field value"
            );
            self.error_count += 1;
            self.listener.on_error(FileProcessingError {
                row_index,
                column_index,
                column_name,
                error_type: ProcessingErrorType::InvalidFieldValue,
            });
        }

        TypedRow {
            row_index,
            values: out,
        }
    }

    /// End of input: flush anything still buffered and report the summary.
    pub fn finish(mut self) -> Result<(Vec<TransformRecord>, FileInformation)> {
        if self.columns.is_none() {
            self.set_header(&[])?;
        }
        let records = if self.field_types.is_none() {
            self.close_window()
        } else {
            Vec::new()
        };

        let columns = self
            .columns
            .as_deref()
            .unwrap_or_default()
            .iter()
            .zip(&self.samplers)
            .zip(self.field_types.as_deref().unwrap_or_default())
            .map(|((c, sampler), t)| ColumnInfo {
                name: c.name.clone(),
                original_name: c.original_name.clone(),
                field_type: *t,
                longest_string: match t {
                    FieldType::String => Some(sampler.longest_string().unwrap_or(0)),
                    _ => None,
                },
            })
            .collect::<Vec<_>>();

        let info = FileInformation {
            file_name: self.config.file_name.clone(),
            table_name: self.config.table_name.clone(),
            parquet_file_name: self.config.output_file_name.clone(),
            output_directory: self.config.output_directory.clone(),
            number_of_rows: self.rows_seen,
            number_of_columns: columns.len(),
            columns,
            file_size: self.config.file_size,
            file_operation_type: self.config.file_operation_type,
        };

        info!(
            file = %info.file_name,
            table = %info.table_name,
            rows = info.number_of_rows,
            columns = info.number_of_columns,
            errors = self.error_count,
            "file transformed"
        );
        self.listener.on_info(&info);
        Ok((records, info))
    }

    /// Drive the transformer between two bounded channels.
    ///
    /// Sending waits for the consumer, so at most `sample_limit` rows are ever
    /// held here.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<RawRow>,
        output: mpsc::Sender<TransformRecord>,
    ) -> Result<FileInformation> {
        while let Some(row) = input.recv().await {
            for record in self.push(row)? {
                send(&output, record).await?;
            }
        }
        let (records, info) = self.finish()?;
        for record in records {
            send(&output, record).await?;
        }
        Ok(info)
    }
}

/// Type a column keeps once the window closes. Rows after the window may hold
/// decimals even when every sampled value was whole, so integers widen.
fn frozen_type(sampled: FieldType) -> FieldType {
    match sampled {
        FieldType::Integer => FieldType::Number,
        other => other,
    }
}

async fn send(output: &mpsc::Sender<TransformRecord>, record: TransformRecord) -> Result<()> {
    output
        .send(record)
        .await
        .map_err(|_| IngestError::InvalidOperation("record consumer closed early".to_string()))
}
