//! Ingestion Orchestrator - turns a batch of transformed files into tables and a view
//!
//! Runs in a fixed order: sort the batch, verify every backing object,
//! (re)create the external tables, discover joins, then create the view.
//! Any missing object aborts the run before a single statement is issued.

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::clients::{QueryEngineClient, StorageClient};
use crate::ddl::{self, TableDdlPlanner, ViewDdlPlanner};
use crate::error::{IngestError, Result};
use crate::ingestion::{
    sort_tables, FileInformation, FileOperation, JoinDiscoverer, JoinTableDefinition,
};

/// Where a `process_tables` run currently is.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    Init,
    TablesVerified,
    TablesCreated,
    Joined,
    ViewCreated,
    Done,
    Failed,
}

pub struct IngestionOrchestrator {
    storage: Arc<dyn StorageClient>,
    query_engine: Arc<dyn QueryEngineClient>,
    table_planner: TableDdlPlanner,
    view_planner: ViewDdlPlanner,
    initialized: OnceCell<()>,
    state: OrchestratorState,
}

impl IngestionOrchestrator {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        query_engine: Arc<dyn QueryEngineClient>,
        table_planner: TableDdlPlanner,
    ) -> Self {
        Self {
            storage,
            query_engine,
            table_planner,
            view_planner: ViewDdlPlanner::new(),
            initialized: OnceCell::new(),
            state: OrchestratorState::Init,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn table_planner(&self) -> &TableDdlPlanner {
        &self.table_planner
    }

    pub fn view_planner(&self) -> &ViewDdlPlanner {
        &self.view_planner
    }

    /// Initialize both clients. Safe to call repeatedly or concurrently;
    /// the clients see exactly one `init`.
    pub async fn init(&self) -> Result<()> {
        self.initialized
            .get_or_try_init(|| async {
                self.storage.init().await?;
                self.query_engine.init().await?;
                info!("orchestrator clients initialized");
                Ok::<(), IngestError>(())
            })
            .await?;
        Ok(())
    }

    /// Create or refresh every table in `files` and the view joining them.
    ///
    /// Returns the join set; empty when no two tables share a column, in
    /// which case no view is created.
    pub async fn process_tables(
        &mut self,
        view_name: &str,
        files: Vec<FileInformation>,
    ) -> Result<Vec<JoinTableDefinition>> {
        self.state = OrchestratorState::Init;
        match self.run(view_name, files).await {
            Ok(joins) => {
                self.state = OrchestratorState::Done;
                Ok(joins)
            }
            Err(e) => {
                error!(view = view_name, error = %e, "table processing failed");
                self.state = OrchestratorState::Failed;
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        view_name: &str,
        files: Vec<FileInformation>,
    ) -> Result<Vec<JoinTableDefinition>> {
        self.init().await?;

        let files = sort_tables(files);
        let mut seen = HashSet::new();
        let rewrites = files
            .iter()
            .filter(|f| f.file_operation_type.rewrites_table())
            .filter(|f| seen.insert(f.table_name.clone()))
            .collect::<Vec<_>>();

        info!(
            view = view_name,
            files = files.len(),
            rewrites = rewrites.len(),
            "processing tables"
        );

        try_join_all(rewrites.iter().map(|f| self.verify_backing_object(f))).await?;
        self.state = OrchestratorState::TablesVerified;

        for (idx, file) in rewrites.iter().enumerate() {
            let definition = JoinTableDefinition::from_file_information(file, idx);
            if matches!(
                file.file_operation_type,
                FileOperation::Replace | FileOperation::Delete
            ) {
                self.execute(&ddl::drop_table(&file.table_name)).await?;
            }
            let create = self.table_planner.define_query(
                &file.output_directory,
                &file.table_name,
                &definition,
            );
            self.execute(&create).await?;
        }
        self.state = OrchestratorState::TablesCreated;

        let mut discoverer = JoinDiscoverer::new(&files);
        let joins = discoverer.compute_joins().to_vec();
        self.state = OrchestratorState::Joined;

        if joins.is_empty() {
            debug!(view = view_name, "no shared columns, skipping view");
            return Ok(joins);
        }

        let create_view = self.view_planner.define_view(view_name, &joins)?;
        self.execute(&ddl::drop_view(view_name)).await?;
        self.execute(&create_view).await?;
        self.state = OrchestratorState::ViewCreated;
        info!(view = view_name, tables = joins.len(), "view created");

        Ok(joins)
    }

    /// Remove a table whose last file was deleted.
    pub async fn drop_table(&self, table_name: &str) -> Result<()> {
        self.init().await?;
        self.execute(&ddl::drop_table(table_name)).await
    }

    async fn verify_backing_object(&self, file: &FileInformation) -> Result<()> {
        let directory = file.output_directory.trim_end_matches('/');
        let present = match file.file_operation_type {
            FileOperation::Delete => !self
                .storage
                .list_objects(&format!("{}/", directory))
                .await?
                .is_empty(),
            _ => {
                self.storage
                    .object_exists(&format!("{}/{}", directory, file.parquet_file_name))
                    .await?
            }
        };
        if present {
            Ok(())
        } else {
            warn!(
                table = %file.table_name,
                file = %file.parquet_file_name,
                "backing object missing"
            );
            Err(IngestError::InvalidArgument(format!(
                "no storage object backs table {} ({}/{})",
                file.table_name, directory, file.parquet_file_name
            )))
        }
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        debug!(sql, "executing statement");
        self.query_engine
            .run_query(sql)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                IngestError::InvalidOperation(_) => e,
                other => IngestError::InvalidOperation(format!("statement failed: {}", other)),
            })
    }
}
