//! View DDL Planner - one view joining every table of a batch on shared columns

use itertools::Itertools;

use crate::error::{IngestError, Result};
use crate::ingestion::JoinTableDefinition;

#[derive(Debug, Default)]
pub struct ViewDdlPlanner {
    last_query: Option<String>,
}

impl ViewDdlPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Render `CREATE VIEW` as an inner equi-join in alias order.
    ///
    /// Each table joins on every join column it shares with an earlier table,
    /// matched against the first earlier table carrying that column. A table
    /// with nothing in common with its predecessors is cross joined.
    pub fn define_view(&mut self, view_name: &str, tables: &[JoinTableDefinition]) -> Result<String> {
        let first = tables.first().ok_or_else(|| {
            IngestError::InvalidArgument(format!("view {} has no tables", view_name))
        })?;

        let projection = tables
            .iter()
            .flat_map(|t| t.columns.iter())
            .filter(|c| c.is_selected_column)
            .map(|c| format!("{}.\"{}\"", c.table_alias, c.column_name))
            .join(", ");

        let mut from = format!("\"{}\" {}", first.table_name, first.table_alias);
        for (idx, table) in tables.iter().enumerate().skip(1) {
            let conditions = table
                .join_columns()
                .filter_map(|column| {
                    tables[..idx]
                        .iter()
                        .find(|prior| {
                            prior
                                .join_columns()
                                .any(|c| c.column_name == column.column_name)
                        })
                        .map(|prior| {
                            format!(
                                "{}.\"{}\" = {}.\"{}\"",
                                prior.table_alias,
                                column.column_name,
                                table.table_alias,
                                column.column_name
                            )
                        })
                })
                .collect::<Vec<_>>();

            if conditions.is_empty() {
                from.push_str(&format!(
                    " CROSS JOIN \"{}\" {}",
                    table.table_name, table.table_alias
                ));
            } else {
                from.push_str(&format!(
                    " INNER JOIN \"{}\" {} ON {}",
                    table.table_name,
                    table.table_alias,
                    conditions.join(" AND ")
                ));
            }
        }

        let query = format!("CREATE VIEW \"{}\" AS SELECT {} FROM {}", view_name, projection, from);
        self.last_query = Some(query.clone());
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::{ColumnInfo, FieldType, FileInformation, FileOperation, JoinDiscoverer};

    fn info(table: &str, columns: &[&str]) -> FileInformation {
        FileInformation {
            file_name: format!("{}.csv", table),
            table_name: table.to_string(),
            parquet_file_name: format!("{}.parquet", table),
            output_directory: String::new(),
            number_of_rows: 1,
            number_of_columns: columns.len(),
            columns: columns
                .iter()
                .map(|c| ColumnInfo {
                    name: c.to_string(),
                    original_name: c.to_string(),
                    field_type: FieldType::Integer,
                    longest_string: None,
                })
                .collect(),
            file_size: 0,
            file_operation_type: FileOperation::Add,
        }
    }

    #[test]
    fn test_two_table_view() {
        let mut d = JoinDiscoverer::new(&[
            info("orders", &["customer_id", "total"]),
            info("customers", &["customer_id", "age"]),
        ]);
        let mut planner = ViewDdlPlanner::new();
        let sql = planner.define_view("combined", d.compute_joins()).unwrap();
        assert_eq!(
            sql,
            "CREATE VIEW \"combined\" AS SELECT A.\"customer_id\", A.\"total\", B.\"age\" \
             FROM \"orders\" A INNER JOIN \"customers\" B ON A.\"customer_id\" = B.\"customer_id\""
        );
        assert_eq!(planner.last_query(), Some(sql.as_str()));
    }

    #[test]
    fn test_chain_joins_against_first_owner() {
        let mut d = JoinDiscoverer::new(&[
            info("a", &["k", "x"]),
            info("b", &["k", "m"]),
            info("c", &["m", "k"]),
        ]);
        let sql = ViewDdlPlanner::new()
            .define_view("v", d.compute_joins())
            .unwrap();
        assert!(sql.contains("INNER JOIN \"c\" C ON B.\"m\" = C.\"m\" AND A.\"k\" = C.\"k\""));
    }

    #[test]
    fn test_disconnected_table_is_cross_joined() {
        let mut d = JoinDiscoverer::new(&[
            info("a", &["k"]),
            info("b", &["j"]),
            info("c", &["k", "j"]),
        ]);
        let sql = ViewDdlPlanner::new()
            .define_view("v", d.compute_joins())
            .unwrap();
        assert!(sql.contains("CROSS JOIN \"b\" B"));
        assert!(sql.contains("INNER JOIN \"c\" C ON A.\"k\" = C.\"k\" AND B.\"j\" = C.\"j\""));
    }

    #[test]
    fn test_empty_view_is_rejected() {
        assert!(ViewDdlPlanner::new().define_view("v", &[]).is_err());
    }
}
