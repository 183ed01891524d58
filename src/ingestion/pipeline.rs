//! Ingestion Pipeline - one batch of uploads, end to end
//!
//! 1. Clean names and check the batch against what storage already holds
//! 2. Stream each file through the row transformer into a staged Parquet file
//! 3. Commit: upload outputs and sources, summarize tables touched by deletes
//! 4. Hand the resulting file summaries to the orchestrator
//! 5. Retire objects of replaced or deleted files
//!
//! Nothing is written to storage until every file has transformed cleanly,
//! and nothing is removed until the orchestrator has succeeded. A failed run
//! takes its uploads back out.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clients::{QueryEngineClient, StorageClient, StoragePaths};
use crate::config::PipelineConfig;
use crate::ddl::TableDdlPlanner;
use crate::error::{IngestError, Result};
use crate::ingestion::{
    clean_file_name, clean_table_name, parquet_compression, BatchEntry, BatchValidator,
    CollectingListener, ColumnNameCleanerFactory, CsvRowSource, DefaultColumnNameCleaner,
    DefaultSamplerFactory, ExistingTables, FieldTypeSamplerFactory, FileInformation,
    FileOperation, FileProcessingError, IngestionOrchestrator, IngestionStatus,
    JoinTableDefinition, ParquetSink, RowTransformer, RowTransformerConfig,
};

/// Where an upload's bytes come from.
#[derive(Clone, Debug)]
pub enum FileSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub table_name: String,
    pub file_name: String,
    pub file_operation_type: FileOperation,
    /// Absent for DELETE, which only names the file to remove.
    pub source: Option<FileSource>,
}

impl UploadedFile {
    pub fn from_path(
        table_name: impl Into<String>,
        file_operation_type: FileOperation,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            table_name: table_name.into(),
            file_name,
            file_operation_type,
            source: Some(FileSource::Path(path)),
        }
    }

    pub fn from_bytes(
        table_name: impl Into<String>,
        file_name: impl Into<String>,
        file_operation_type: FileOperation,
        body: Vec<u8>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            file_name: file_name.into(),
            file_operation_type,
            source: Some(FileSource::Bytes(body)),
        }
    }

    pub fn delete(table_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            file_name: file_name.into(),
            file_operation_type: FileOperation::Delete,
            source: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IngestionRequest {
    pub view_name: String,
    pub files: Vec<UploadedFile>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResponse {
    pub run_id: String,
    pub view_name: String,
    pub status: IngestionStatus,
    pub file_information: Vec<FileInformation>,
    /// Cell-level errors keyed by file name.
    pub file_processing_errors: BTreeMap<String, Vec<FileProcessingError>>,
    pub join_information: Vec<JoinTableDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestionResponse {
    fn failed(run_id: String, view_name: String, err: &IngestError) -> Self {
        Self {
            run_id,
            view_name,
            status: IngestionStatus::Failed,
            file_information: Vec::new(),
            file_processing_errors: BTreeMap::new(),
            join_information: Vec::new(),
            error_code: Some(err.code().to_string()),
            error: Some(err.to_string()),
        }
    }

    pub fn error_count(&self) -> usize {
        self.file_processing_errors.values().map(Vec::len).sum()
    }
}

struct StagedFile {
    source: Option<FileSource>,
    info: FileInformation,
    errors: Vec<FileProcessingError>,
    scratch: PathBuf,
}

/// Objects a run has written, so a failed run can be undone.
#[derive(Default)]
struct CommitLog {
    written: Vec<String>,
    overwritten: Vec<(String, Vec<u8>)>,
}

impl CommitLog {
    /// Note a key before it is written, keeping any body it already has.
    async fn record(&mut self, storage: &dyn StorageClient, key: &str) -> Result<()> {
        if storage.object_exists(key).await? {
            let body = storage.get_object(key).await?;
            self.overwritten.push((key.to_string(), body));
        } else {
            self.written.push(key.to_string());
        }
        Ok(())
    }
}

struct Applied {
    outcome: BatchOutcome,
    /// Objects to delete once the run has succeeded.
    superseded: Vec<String>,
    /// Tables whose last file was deleted.
    emptied: Vec<String>,
}

struct BatchOutcome {
    file_information: Vec<FileInformation>,
    errors: BTreeMap<String, Vec<FileProcessingError>>,
    joins: Vec<JoinTableDefinition>,
}

pub struct IngestionPipeline {
    config: PipelineConfig,
    paths: StoragePaths,
    storage: Arc<dyn StorageClient>,
    orchestrator: IngestionOrchestrator,
    sampler_factory: Arc<dyn FieldTypeSamplerFactory>,
    cleaner_factory: Arc<dyn ColumnNameCleanerFactory>,
}

impl IngestionPipeline {
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn StorageClient>,
        query_engine: Arc<dyn QueryEngineClient>,
    ) -> Result<Self> {
        config.validate()?;
        let table_planner =
            TableDdlPlanner::new(&config.bucket_name, config.storage_format, config.compression);
        Ok(Self {
            paths: StoragePaths::new(&config.workspace_id, &config.project_id),
            orchestrator: IngestionOrchestrator::new(storage.clone(), query_engine, table_planner),
            sampler_factory: Arc::new(DefaultSamplerFactory {
                sample_rate: config.sample_rate,
            }),
            cleaner_factory: Arc::new(DefaultColumnNameCleaner),
            storage,
            config,
        })
    }

    pub fn with_cleaner_factory(mut self, factory: Arc<dyn ColumnNameCleanerFactory>) -> Self {
        self.cleaner_factory = factory;
        self
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn orchestrator(&self) -> &IngestionOrchestrator {
        &self.orchestrator
    }

    /// Run one batch. Failures are reported in the response, never raised.
    pub async fn ingest_batch(&mut self, request: IngestionRequest) -> IngestionResponse {
        let run_id = Uuid::new_v4().to_string();
        let view_name = request.view_name.clone();
        let span = info_span!("ingest_batch", run_id = %run_id, view = %view_name);

        match self.run(request).instrument(span).await {
            Ok(outcome) => {
                let error_count: usize = outcome.errors.values().map(Vec::len).sum();
                let status = if error_count > 0 {
                    IngestionStatus::Partial
                } else {
                    IngestionStatus::Success
                };
                info!(run_id = %run_id, ?status, errors = error_count, "batch finished");
                IngestionResponse {
                    run_id,
                    view_name,
                    status,
                    file_information: outcome.file_information,
                    file_processing_errors: outcome.errors,
                    join_information: outcome.joins,
                    error_code: None,
                    error: None,
                }
            }
            Err(e) => {
                warn!(run_id = %run_id, code = e.code(), "batch failed: {}", e);
                IngestionResponse::failed(run_id, view_name, &e)
            }
        }
    }

    async fn run(&mut self, request: IngestionRequest) -> Result<BatchOutcome> {
        if request.view_name.trim().is_empty() {
            return Err(IngestError::InvalidArgument("view name is required".to_string()));
        }
        if request.files.is_empty() {
            return Err(IngestError::InvalidArgument("batch has no files".to_string()));
        }
        self.orchestrator.init().await?;

        let files = request
            .files
            .into_iter()
            .map(|f| UploadedFile {
                table_name: clean_table_name(&f.table_name),
                file_name: clean_file_name(&f.file_name),
                ..f
            })
            .collect::<Vec<_>>();

        let existing = self.existing_tables().await?;
        let entries = files
            .iter()
            .map(|f| BatchEntry::new(f.table_name.as_str(), f.file_name.as_str(), f.file_operation_type))
            .collect::<Vec<_>>();
        BatchValidator::new(&existing).validate(&entries)?;

        let staged = self.stage_all(&files).await?;
        let scratch = staged.iter().map(|s| s.scratch.clone()).collect::<Vec<_>>();
        let mut log = CommitLog::default();

        let applied = self.apply(&request.view_name, staged, &files, &mut log).await;
        for path in &scratch {
            remove_scratch(path).await;
        }
        let applied = match applied {
            Ok(applied) => applied,
            Err(e) => {
                self.roll_back(log).await;
                return Err(e);
            }
        };

        // the new tables are live; only now retire what they replaced
        for table in &applied.emptied {
            info!(table = %table, "last file deleted, dropping table");
            self.orchestrator.drop_table(table).await?;
        }
        for key in &applied.superseded {
            self.storage.delete_object(key).await?;
        }
        Ok(applied.outcome)
    }

    /// Upload staged outputs, summarize tables touched by deletes and run
    /// the table and view DDL. Existing objects are never removed here.
    async fn apply(
        &mut self,
        view_name: &str,
        staged: Vec<StagedFile>,
        files: &[UploadedFile],
        log: &mut CommitLog,
    ) -> Result<Applied> {
        let targets = staged
            .iter()
            .flat_map(|s| {
                let (object, input) = self.object_keys(&s.info);
                [object, input]
            })
            .collect::<HashSet<_>>();

        let mut superseded = BTreeSet::new();
        let mut replaced = HashSet::new();
        for file in staged
            .iter()
            .filter(|s| s.info.file_operation_type == FileOperation::Replace)
        {
            if replaced.insert(file.info.table_name.clone()) {
                superseded.extend(self.table_objects(&file.info.table_name).await?);
            }
        }
        let deletes = files
            .iter()
            .filter(|f| f.file_operation_type == FileOperation::Delete)
            .collect::<Vec<_>>();
        for file in &deletes {
            let parquet_file_name = RowTransformerConfig::new(
                file.file_name.as_str(),
                file.table_name.as_str(),
                FileOperation::Delete,
            )
            .output_file_name;
            superseded.insert(self.paths.input_path(&file.table_name, &file.file_name));
            superseded.insert(self.paths.table_object(&file.table_name, &parquet_file_name));
        }
        superseded.retain(|key| !targets.contains(key));

        let mut file_information = Vec::with_capacity(files.len());
        let mut errors = BTreeMap::new();
        for file in staged {
            self.commit(&file, log).await?;
            errors.insert(file.info.file_name.clone(), file.errors);
            file_information.push(file.info);
        }

        let mut emptied = BTreeSet::new();
        for file in deletes {
            match self.describe_remaining(file, &superseded).await? {
                Some(info) => file_information.push(info),
                None => {
                    emptied.insert(file.table_name.clone());
                }
            }
        }

        errors.retain(|_, e: &mut Vec<FileProcessingError>| !e.is_empty());
        let joins = self
            .orchestrator
            .process_tables(view_name, file_information.clone())
            .await?;

        Ok(Applied {
            outcome: BatchOutcome {
                file_information,
                errors,
                joins,
            },
            superseded: superseded.into_iter().collect(),
            emptied: emptied.into_iter().collect(),
        })
    }

    /// Undo the uploads of a failed run.
    async fn roll_back(&self, log: CommitLog) {
        for key in log.written.iter().rev() {
            if let Err(e) = self.storage.delete_object(key).await {
                warn!(object = %key, "rollback could not remove upload: {}", e);
            }
        }
        for (key, body) in log.overwritten {
            if let Err(e) = self.storage.put_object(&key, body).await {
                warn!(object = %key, "rollback could not restore object: {}", e);
            }
        }
    }

    async fn existing_tables(&self) -> Result<ExistingTables> {
        let mut existing = ExistingTables::new();
        for key in self.storage.list_objects(&self.paths.input_root()).await? {
            if let Some((table, file)) = self.paths.parse_input_path(&key) {
                existing.insert(table, file);
            }
        }
        Ok(existing)
    }

    fn transformer_config(
        &self,
        table_name: &str,
        file_name: &str,
        file_operation_type: FileOperation,
        file_size: u64,
    ) -> RowTransformerConfig {
        let mut config = RowTransformerConfig::new(file_name, table_name, file_operation_type);
        config.file_size = file_size;
        config.output_directory = self.paths.table_prefix(table_name);
        config.sample_limit = self.config.sample_limit;
        config
    }

    fn transformer(&self, config: RowTransformerConfig, listener: &CollectingListener) -> RowTransformer {
        RowTransformer::new(
            config,
            self.sampler_factory.clone(),
            self.cleaner_factory.clone(),
            Box::new(listener.clone()),
        )
    }

    /// Transform every non-DELETE file. Staged outputs are removed again if
    /// any file fails.
    async fn stage_all(&self, files: &[UploadedFile]) -> Result<Vec<StagedFile>> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;
        let mut staged = Vec::new();
        for file in files
            .iter()
            .filter(|f| f.file_operation_type != FileOperation::Delete)
        {
            match self.stage(file).await {
                Ok(s) => staged.push(s),
                Err(e) => {
                    for s in &staged {
                        remove_scratch(&s.scratch).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    async fn stage(&self, file: &UploadedFile) -> Result<StagedFile> {
        let (reader, file_size): (Box<dyn Read + Send>, u64) = match &file.source {
            Some(FileSource::Path(path)) => {
                let handle = std::fs::File::open(path)?;
                let size = handle.metadata()?.len();
                (Box::new(handle), size)
            }
            Some(FileSource::Bytes(body)) => (Box::new(Cursor::new(body.clone())), body.len() as u64),
            None => {
                return Err(IngestError::InvalidArgument(format!(
                    "{} has no content to ingest",
                    file.file_name
                )))
            }
        };

        let config = self.transformer_config(
            &file.table_name,
            &file.file_name,
            file.file_operation_type,
            file_size,
        );
        let scratch = self
            .config
            .scratch_dir
            .join(format!("{}-{}", Uuid::new_v4(), config.output_file_name));

        let listener = CollectingListener::new();
        let mut transformer = self.transformer(config, &listener);
        let source = CsvRowSource::new(reader)?;
        transformer.set_header(source.headers())?;
        let sink = ParquetSink::create(
            &scratch,
            parquet_compression(self.config.compression),
            self.config.write_batch_size,
        )?;

        let (row_tx, row_rx) = mpsc::channel(self.config.channel_capacity);
        let (record_tx, record_rx) = mpsc::channel(self.config.channel_capacity);
        let reader_task = tokio::task::spawn_blocking(move || source.feed_blocking(row_tx));
        let writer_task = tokio::task::spawn_blocking(move || sink.drain_blocking(record_rx));

        let transformed = transformer.run(row_rx, record_tx).await;
        let read = reader_task.await.map_err(worker_failed);
        let written = writer_task.await.map_err(worker_failed);

        let outcome = transformed.and_then(|info| {
            read??;
            written??;
            Ok(info)
        });
        let info = match outcome {
            Ok(info) => info,
            Err(e) => {
                remove_scratch(&scratch).await;
                return Err(e);
            }
        };

        Ok(StagedFile {
            source: file.source.clone(),
            errors: listener.take_errors(),
            info,
            scratch,
        })
    }

    /// `(parquet object, input object)` keys for a staged file.
    fn object_keys(&self, info: &FileInformation) -> (String, String) {
        (
            self.paths.table_object(&info.table_name, &info.parquet_file_name),
            self.paths.input_path(&info.table_name, &info.file_name),
        )
    }

    async fn commit(&self, file: &StagedFile, log: &mut CommitLog) -> Result<()> {
        let info = &file.info;
        let (object, input) = self.object_keys(info);

        log.record(self.storage.as_ref(), &object).await?;
        self.storage.upload_file(&object, &file.scratch).await?;
        match &file.source {
            Some(FileSource::Path(path)) => {
                log.record(self.storage.as_ref(), &input).await?;
                self.storage.upload_file(&input, path).await?
            }
            Some(FileSource::Bytes(body)) => {
                log.record(self.storage.as_ref(), &input).await?;
                self.storage.put_object(&input, body.clone()).await?
            }
            None => {}
        }
        info!(table = %info.table_name, object = %object, "file committed");
        Ok(())
    }

    /// Every input and table object a table currently has.
    async fn table_objects(&self, table_name: &str) -> Result<Vec<String>> {
        let mut keys = self.storage.list_objects(&self.paths.input_prefix(table_name)).await?;
        keys.extend(self.storage.list_objects(&self.paths.table_prefix(table_name)).await?);
        Ok(keys)
    }

    /// Summary of a file that will still back the table once the deleted
    /// file is gone, or `None` when nothing remains.
    async fn describe_remaining(
        &self,
        file: &UploadedFile,
        superseded: &BTreeSet<String>,
    ) -> Result<Option<FileInformation>> {
        let remaining = self
            .storage
            .list_objects(&self.paths.input_prefix(&file.table_name))
            .await?;
        let Some((key, remaining_file)) = remaining
            .iter()
            .filter(|key| !superseded.contains(*key))
            .find_map(|key| {
                self.paths
                    .parse_input_path(key)
                    .map(|(_, name)| (key.clone(), name.to_string()))
            })
        else {
            return Ok(None);
        };

        let body = self.storage.get_object(&key).await?;
        let config = self.transformer_config(
            &file.table_name,
            &remaining_file,
            FileOperation::Delete,
            body.len() as u64,
        );
        let listener = CollectingListener::new();
        let transformer = self.transformer(config, &listener);
        let info = tokio::task::spawn_blocking(move || describe(transformer, body))
            .await
            .map_err(worker_failed)??;
        Ok(Some(info))
    }
}

/// Summarize a stored file without writing any output.
fn describe(mut transformer: RowTransformer, body: Vec<u8>) -> Result<FileInformation> {
    let source = CsvRowSource::new(Cursor::new(body))?;
    transformer.set_header(source.headers())?;
    for row in source {
        transformer.push(row?)?;
    }
    let (_, info) = transformer.finish()?;
    Ok(info)
}

fn worker_failed(err: tokio::task::JoinError) -> IngestError {
    IngestError::InvalidOperation(format!("ingestion worker failed: {}", err))
}

async fn remove_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "failed to remove staged file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryObjectStore, RecordingQueryEngine};

    fn pipeline(
        scratch: &Path,
    ) -> (IngestionPipeline, Arc<InMemoryObjectStore>, Arc<RecordingQueryEngine>) {
        pipeline_with_engine(scratch, RecordingQueryEngine::new())
    }

    fn pipeline_with_engine(
        scratch: &Path,
        engine: RecordingQueryEngine,
    ) -> (IngestionPipeline, Arc<InMemoryObjectStore>, Arc<RecordingQueryEngine>) {
        let storage = Arc::new(InMemoryObjectStore::new());
        let engine = Arc::new(engine);
        let config = PipelineConfig {
            scratch_dir: scratch.to_path_buf(),
            workspace_id: "ws".to_string(),
            project_id: "p".to_string(),
            ..PipelineConfig::default()
        };
        let pipeline = IngestionPipeline::new(config, storage.clone(), engine.clone()).unwrap();
        (pipeline, storage, engine)
    }

    #[tokio::test]
    async fn test_add_two_joined_tables() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, storage, engine) = pipeline(dir.path());

        let response = pipeline
            .ingest_batch(IngestionRequest {
                view_name: "combined".to_string(),
                files: vec![
                    UploadedFile::from_bytes(
                        "Orders",
                        "orders.csv",
                        FileOperation::Add,
                        b"Customer ID,Total\n1,9.5\n2,3.25\n".to_vec(),
                    ),
                    UploadedFile::from_bytes(
                        "customers",
                        "customers.csv",
                        FileOperation::Add,
                        b"customer id,name\n1,Ann\n2,Bob\n".to_vec(),
                    ),
                ],
            })
            .await;

        assert_eq!(response.status, IngestionStatus::Success, "{:?}", response.error);
        assert_eq!(response.file_information.len(), 2);
        assert_eq!(response.join_information.len(), 2);
        assert!(storage
            .get("client/ws/p/tables/orders/orders.parquet")
            .is_some());
        assert!(storage.get("client/ws/p/input/orders/orders.csv").is_some());

        let statements = engine.statements();
        assert_eq!(statements.len(), 4);
        assert!(statements[3].starts_with("CREATE VIEW \"combined\""));
        assert_eq!(pipeline.orchestrator().state(), crate::ingestion::OrchestratorState::Done);
    }

    #[tokio::test]
    async fn test_illegal_batch_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, storage, engine) = pipeline(dir.path());

        let response = pipeline
            .ingest_batch(IngestionRequest {
                view_name: "v".to_string(),
                files: vec![UploadedFile::from_bytes(
                    "orders",
                    "orders.csv",
                    FileOperation::Append,
                    b"id\n1\n".to_vec(),
                )],
            })
            .await;

        assert_eq!(response.status, IngestionStatus::Failed);
        assert_eq!(response.error_code.as_deref(), Some("TABLE_DOES_NOT_EXIST"));
        assert!(storage.list_objects("client/").await.unwrap().is_empty());
        assert!(engine.statements().is_empty());
    }

    #[tokio::test]
    async fn test_bad_cells_make_partial_status() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, _, _) = pipeline(dir.path());

        let mut csv = String::from("amount\n");
        for i in 0..12 {
            csv.push_str(&format!("{}\n", i));
        }
        csv.push_str("oops\n");

        let response = pipeline
            .ingest_batch(IngestionRequest {
                view_name: "v".to_string(),
                files: vec![UploadedFile::from_bytes(
                    "amounts",
                    "amounts.csv",
                    FileOperation::Add,
                    csv.into_bytes(),
                )],
            })
            .await;

        assert_eq!(response.status, IngestionStatus::Partial);
        assert_eq!(response.error_count(), 1);
        assert_eq!(response.file_processing_errors["amounts.csv"][0].row_index, 13);
    }

    #[tokio::test]
    async fn test_delete_last_file_drops_table() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, storage, engine) = pipeline(dir.path());
        storage.insert("client/ws/p/input/orders/jan.csv", b"id\n1\n".to_vec());
        storage.insert("client/ws/p/tables/orders/jan.parquet", vec![1]);

        let response = pipeline
            .ingest_batch(IngestionRequest {
                view_name: "v".to_string(),
                files: vec![UploadedFile::delete("orders", "jan.csv")],
            })
            .await;

        assert_eq!(response.status, IngestionStatus::Success, "{:?}", response.error);
        assert!(response.file_information.is_empty());
        assert!(storage.list_objects("client/ws/p/").await.unwrap().is_empty());
        assert_eq!(engine.statements(), vec!["DROP TABLE IF EXISTS `orders`".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_rebuilds_from_remaining_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, storage, engine) = pipeline(dir.path());
        storage.insert("client/ws/p/input/orders/jan.csv", b"id,total\n1,2\n".to_vec());
        storage.insert("client/ws/p/input/orders/feb.csv", b"id,total\n3,4\n".to_vec());
        storage.insert("client/ws/p/tables/orders/jan.parquet", vec![1]);
        storage.insert("client/ws/p/tables/orders/feb.parquet", vec![1]);

        let response = pipeline
            .ingest_batch(IngestionRequest {
                view_name: "v".to_string(),
                files: vec![UploadedFile::delete("orders", "jan.csv")],
            })
            .await;

        assert_eq!(response.status, IngestionStatus::Success, "{:?}", response.error);
        assert_eq!(response.file_information.len(), 1);
        assert_eq!(response.file_information[0].file_name, "feb.csv");
        assert!(storage.get("client/ws/p/tables/orders/jan.parquet").is_none());
        let statements = engine.statements();
        assert_eq!(statements[0], "DROP TABLE IF EXISTS `orders`");
        assert!(statements[1].contains("`id` double, `total` double"));
    }

    fn replace_orders(body: &[u8]) -> IngestionRequest {
        IngestionRequest {
            view_name: "v".to_string(),
            files: vec![UploadedFile::from_bytes(
                "orders",
                "feb.csv",
                FileOperation::Replace,
                body.to_vec(),
            )],
        }
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_objects() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, storage, engine) = pipeline_with_engine(
            dir.path(),
            RecordingQueryEngine::failing_on("CREATE EXTERNAL"),
        );
        storage.insert("client/ws/p/input/orders/jan.csv", b"id\n1\n".to_vec());
        storage.insert("client/ws/p/tables/orders/jan.parquet", vec![7]);

        let response = pipeline.ingest_batch(replace_orders(b"id\n2\n")).await;

        assert_eq!(response.status, IngestionStatus::Failed);
        assert_eq!(response.error_code.as_deref(), Some("INVALID_OPERATION"));
        assert_eq!(
            storage.list_objects("client/ws/p/").await.unwrap(),
            vec![
                "client/ws/p/input/orders/jan.csv".to_string(),
                "client/ws/p/tables/orders/jan.parquet".to_string(),
            ]
        );
        assert_eq!(storage.get("client/ws/p/tables/orders/jan.parquet"), Some(vec![7]));
        assert!(engine.statements().iter().all(|s| !s.starts_with("CREATE")));
    }

    #[tokio::test]
    async fn test_failed_replace_restores_overwritten_source() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, storage, _) = pipeline_with_engine(
            dir.path(),
            RecordingQueryEngine::failing_on("CREATE EXTERNAL"),
        );
        storage.insert("client/ws/p/input/orders/feb.csv", b"id\n1\n".to_vec());
        storage.insert("client/ws/p/tables/orders/feb.parquet", vec![7]);

        let response = pipeline.ingest_batch(replace_orders(b"id\n2\n")).await;

        assert_eq!(response.status, IngestionStatus::Failed);
        assert_eq!(
            storage.get("client/ws/p/input/orders/feb.csv"),
            Some(b"id\n1\n".to_vec())
        );
        assert_eq!(storage.get("client/ws/p/tables/orders/feb.parquet"), Some(vec![7]));
    }

    #[tokio::test]
    async fn test_replace_retires_previous_objects_after_ddl() {
        let dir = tempfile::tempdir().unwrap();
        let (mut pipeline, storage, engine) = pipeline(dir.path());
        storage.insert("client/ws/p/input/orders/jan.csv", b"id\n1\n".to_vec());
        storage.insert("client/ws/p/tables/orders/jan.parquet", vec![7]);

        let response = pipeline.ingest_batch(replace_orders(b"id\n2\n")).await;

        assert_eq!(response.status, IngestionStatus::Success, "{:?}", response.error);
        assert_eq!(
            storage.list_objects("client/ws/p/").await.unwrap(),
            vec![
                "client/ws/p/input/orders/feb.csv".to_string(),
                "client/ws/p/tables/orders/feb.parquet".to_string(),
            ]
        );
        let statements = engine.statements();
        assert_eq!(statements[0], "DROP TABLE IF EXISTS `orders`");
        assert!(statements[1].starts_with("CREATE EXTERNAL TABLE orders"));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
