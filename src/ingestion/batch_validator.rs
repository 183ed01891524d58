//! Batch Validator - operation legality checks run before any file is touched

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::ingestion::FileOperation;

/// One `(tableName, fileName)` pair submitted in a batch.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub table_name: String,
    pub file_name: String,
    pub file_operation_type: FileOperation,
}

impl BatchEntry {
    pub fn new(
        table_name: impl Into<String>,
        file_name: impl Into<String>,
        file_operation_type: FileOperation,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            file_name: file_name.into(),
            file_operation_type,
        }
    }
}

/// Tables already present in storage, with their input files.
#[derive(Clone, Debug, Default)]
pub struct ExistingTables {
    tables: HashMap<String, HashSet<String>>,
}

impl ExistingTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table_name: impl Into<String>, file_name: impl Into<String>) {
        self.tables
            .entry(table_name.into())
            .or_default()
            .insert(file_name.into());
    }

    /// A table with no files yet still counts as existing.
    pub fn insert_table(&mut self, table_name: impl Into<String>) {
        self.tables.entry(table_name.into()).or_default();
    }

    pub fn has_table(&self, table_name: &str) -> bool {
        self.tables.contains_key(table_name)
    }

    pub fn has_file(&self, table_name: &str, file_name: &str) -> bool {
        self.tables
            .get(table_name)
            .map(|files| files.contains(file_name))
            .unwrap_or(false)
    }
}

pub struct BatchValidator<'a> {
    existing: &'a ExistingTables,
}

impl<'a> BatchValidator<'a> {
    pub fn new(existing: &'a ExistingTables) -> Self {
        Self { existing }
    }

    /// Fails on the first violation found, in submission order.
    pub fn validate(&self, batch: &[BatchEntry]) -> Result<()> {
        let mut pairs: HashSet<(&str, &str)> = HashSet::new();
        let mut per_table: HashMap<&str, usize> = HashMap::new();

        for entry in batch {
            if !pairs.insert((entry.table_name.as_str(), entry.file_name.as_str())) {
                return Err(self.reject(IngestError::InvalidTableSet(format!(
                    "{}/{} appears more than once in the batch",
                    entry.table_name, entry.file_name
                ))));
            }
            *per_table.entry(entry.table_name.as_str()).or_default() += 1;
        }

        for entry in batch {
            let table = entry.table_name.as_str();
            match entry.file_operation_type {
                FileOperation::Add => {
                    if self.existing.has_table(table) {
                        return Err(self.reject(IngestError::TableAlreadyExists(table.to_string())));
                    }
                    if per_table.get(table).copied().unwrap_or(0) > 1 {
                        return Err(self.reject(IngestError::InvalidTableSet(format!(
                            "table {} is added and targeted by another operation in the same batch",
                            table
                        ))));
                    }
                }
                FileOperation::Append => {
                    if !self.existing.has_table(table) {
                        return Err(self.reject(IngestError::TableDoesNotExist(table.to_string())));
                    }
                    if self.existing.has_file(table, &entry.file_name) {
                        return Err(self.reject(IngestError::FileAlreadyExists(format!(
                            "{}/{}",
                            table, entry.file_name
                        ))));
                    }
                }
                FileOperation::Replace | FileOperation::Delete => {
                    if !self.existing.has_table(table) {
                        return Err(self.reject(IngestError::TableDoesNotExist(table.to_string())));
                    }
                }
            }
        }
        Ok(())
    }

    fn reject(&self, err: IngestError) -> IngestError {
        warn!(code = err.code(), "batch rejected: {}", err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing() -> ExistingTables {
        let mut e = ExistingTables::new();
        e.insert("orders", "jan.csv");
        e
    }

    #[test]
    fn test_add_new_table() {
        let e = existing();
        let batch = vec![BatchEntry::new("users", "users.csv", FileOperation::Add)];
        assert!(BatchValidator::new(&e).validate(&batch).is_ok());
    }

    #[test]
    fn test_add_existing_table() {
        let e = existing();
        let batch = vec![BatchEntry::new("orders", "feb.csv", FileOperation::Add)];
        let err = BatchValidator::new(&e).validate(&batch).unwrap_err();
        assert_eq!(err.code(), "TABLE_ALREADY_EXISTS");
    }

    #[test]
    fn test_add_targeted_twice() {
        let e = existing();
        let batch = vec![
            BatchEntry::new("users", "a.csv", FileOperation::Add),
            BatchEntry::new("users", "b.csv", FileOperation::Append),
        ];
        let err = BatchValidator::new(&e).validate(&batch).unwrap_err();
        assert_eq!(err.code(), "INVALID_TABLE_SET");
    }

    #[test]
    fn test_append_rules() {
        let e = existing();
        let ok = vec![BatchEntry::new("orders", "feb.csv", FileOperation::Append)];
        assert!(BatchValidator::new(&e).validate(&ok).is_ok());

        let missing = vec![BatchEntry::new("users", "a.csv", FileOperation::Append)];
        assert_eq!(
            BatchValidator::new(&e).validate(&missing).unwrap_err().code(),
            "TABLE_DOES_NOT_EXIST"
        );

        let dup_file = vec![BatchEntry::new("orders", "jan.csv", FileOperation::Append)];
        assert_eq!(
            BatchValidator::new(&e).validate(&dup_file).unwrap_err().code(),
            "FILE_ALREADY_EXISTS"
        );
    }

    #[test]
    fn test_duplicate_pair() {
        let e = existing();
        let batch = vec![
            BatchEntry::new("orders", "feb.csv", FileOperation::Append),
            BatchEntry::new("orders", "feb.csv", FileOperation::Append),
        ];
        let err = BatchValidator::new(&e).validate(&batch).unwrap_err();
        assert!(err.is_batch_violation());
        assert_eq!(err.code(), "INVALID_TABLE_SET");
    }

    #[test]
    fn test_replace_requires_table() {
        let e = existing();
        let batch = vec![BatchEntry::new("users", "a.csv", FileOperation::Replace)];
        assert_eq!(
            BatchValidator::new(&e).validate(&batch).unwrap_err().code(),
            "TABLE_DOES_NOT_EXIST"
        );
    }
}
