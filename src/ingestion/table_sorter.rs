//! Table Batch Sorter - sequences structural operations ahead of appends

use crate::ingestion::{FileInformation, FileOperation};

fn rank(op: FileOperation) -> u8 {
    match op {
        FileOperation::Delete => 0,
        FileOperation::Replace => 1,
        FileOperation::Add => 2,
        FileOperation::Append => 3,
    }
}

/// Stable sort: DELETE, REPLACE, ADD, then APPEND. Entries with the same
/// operation keep their submitted order.
pub fn sort_tables(mut files: Vec<FileInformation>) -> Vec<FileInformation> {
    files.sort_by_key(|f| rank(f.file_operation_type));
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(table: &str, file: &str, op: FileOperation) -> FileInformation {
        FileInformation {
            file_name: file.to_string(),
            table_name: table.to_string(),
            parquet_file_name: format!("{}.parquet", file),
            output_directory: String::new(),
            number_of_rows: 0,
            number_of_columns: 0,
            columns: vec![],
            file_size: 0,
            file_operation_type: op,
        }
    }

    #[test]
    fn test_structural_operations_come_first() {
        let sorted = sort_tables(vec![
            info("orders", "o2", FileOperation::Append),
            info("orders", "o1", FileOperation::Replace),
            info("users", "u1", FileOperation::Add),
            info("items", "i1", FileOperation::Delete),
            info("orders", "o3", FileOperation::Append),
        ]);
        let order: Vec<&str> = sorted.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(order, vec!["i1", "o1", "u1", "o2", "o3"]);
    }

    #[test]
    fn test_sort_is_stable() {
        let sorted = sort_tables(vec![
            info("b", "b1", FileOperation::Add),
            info("a", "a1", FileOperation::Add),
        ]);
        assert_eq!(sorted[0].table_name, "b");
        assert_eq!(sorted[1].table_name, "a");
    }
}
