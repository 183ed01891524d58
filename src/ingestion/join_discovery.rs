//! Join Discovery - shared column names across a batch's tables become join keys

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::ingestion::field_type_sampler::FieldType;
use crate::ingestion::FileInformation;

/// One column as seen by the view planner.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinColumn {
    /// Alias of the owning table definition.
    pub table_alias: String,
    pub column_index: usize,
    pub column_name: String,
    pub column_type: FieldType,
    pub is_join_column: bool,
    pub is_selected_column: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_length: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinTableDefinition {
    pub table_name: String,
    pub backing_file_name: String,
    pub table_alias: String,
    pub table_index: usize,
    pub columns: Vec<JoinColumn>,
}

impl JoinTableDefinition {
    /// Definition with every column selected and none marked as a join key.
    pub fn from_file_information(info: &FileInformation, table_index: usize) -> Self {
        let table_alias = table_alias(table_index);
        let columns = info
            .columns
            .iter()
            .enumerate()
            .map(|(column_index, c)| JoinColumn {
                table_alias: table_alias.clone(),
                column_index,
                column_name: c.name.clone(),
                column_type: c.field_type,
                is_join_column: false,
                is_selected_column: true,
                column_length: c.longest_string,
            })
            .collect();
        Self {
            table_name: info.table_name.clone(),
            backing_file_name: info.parquet_file_name.clone(),
            table_alias,
            table_index,
            columns,
        }
    }

    pub fn join_columns(&self) -> impl Iterator<Item = &JoinColumn> {
        self.columns.iter().filter(|c| c.is_join_column)
    }

    pub fn has_join_columns(&self) -> bool {
        self.columns.iter().any(|c| c.is_join_column)
    }
}

/// Spreadsheet-style alias: 0 -> A, 25 -> Z, 26 -> AA.
pub fn table_alias(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Computes the join graph for the tables of one ingestion run.
pub struct JoinDiscoverer {
    tables: Vec<FileInformation>,
    joins: Option<Vec<JoinTableDefinition>>,
}

impl JoinDiscoverer {
    /// Keeps the first entry per table name; later files of the same table
    /// share its columns.
    pub fn new(files: &[FileInformation]) -> Self {
        let mut seen = HashSet::new();
        let tables = files
            .iter()
            .filter(|f| seen.insert(f.table_name.clone()))
            .cloned()
            .collect();
        Self {
            tables,
            joins: None,
        }
    }

    /// Result of the last [`compute_joins`](Self::compute_joins), if any.
    pub fn joins(&self) -> Option<&[JoinTableDefinition]> {
        self.joins.as_deref()
    }

    pub fn compute_joins(&mut self) -> &[JoinTableDefinition] {
        if self.joins.is_none() {
            self.joins = Some(self.discover());
        }
        self.joins.as_deref().unwrap_or_default()
    }

    fn discover(&self) -> Vec<JoinTableDefinition> {
        let mut owners: HashMap<&str, usize> = HashMap::new();
        for table in &self.tables {
            for column in &table.columns {
                *owners.entry(column.name.as_str()).or_default() += 1;
            }
        }
        let shared: HashSet<&str> = owners
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(name, _)| name)
            .collect();

        if shared.is_empty() {
            debug!(tables = self.tables.len(), "no shared columns, no joins");
            return Vec::new();
        }

        let mut selected: HashSet<String> = HashSet::new();
        let mut definitions = Vec::new();
        for table in &self.tables {
            if !table.columns.iter().any(|c| shared.contains(c.name.as_str())) {
                debug!(table = %table.table_name, "table shares no columns, left out of the view");
                continue;
            }
            let mut definition = JoinTableDefinition::from_file_information(table, definitions.len());
            for column in &mut definition.columns {
                column.is_join_column = shared.contains(column.column_name.as_str());
                column.is_selected_column =
                    !column.is_join_column || selected.insert(column.column_name.clone());
            }
            definitions.push(definition);
        }

        info!(
            tables = definitions.len(),
            join_columns = shared.len(),
            "joins discovered"
        );
        definitions
    }
}
