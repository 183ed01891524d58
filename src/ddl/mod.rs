//! DDL planners for the Hive-compatible metastore
//!
//! Both planners are pure apart from remembering the last statement they
//! rendered, which callers can inspect for logging or dry runs.

pub mod table_planner;
pub mod view_planner;

pub use table_planner::{column_sql_type, CompressionType, StorageFormat, TableDdlPlanner};
pub use view_planner::ViewDdlPlanner;

/// varchar length used when a STRING column has no observed length.
pub const DEFAULT_VARCHAR_LENGTH: usize = 100;

/// `DROP TABLE` issued before a table definition is rewritten.
pub fn drop_table(table_name: &str) -> String {
    format!("DROP TABLE IF EXISTS `{}`", table_name)
}

/// `DROP VIEW` issued before the joining view is recreated.
pub fn drop_view(view_name: &str) -> String {
    format!("DROP VIEW IF EXISTS \"{}\"", view_name)
}
