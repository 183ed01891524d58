//! Column Name Cleaner - identifiers legal for the query engine and storage paths

use lazy_static::lazy_static;
use regex::Regex;

/// Longest identifier the engine metastore accepts without complaint.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

lazy_static! {
    static ref ILLEGAL_CHARS: Regex = Regex::new(r"[^a-z0-9_]").unwrap();
    static ref UNDERSCORE_RUNS: Regex = Regex::new(r"_{2,}").unwrap();
}

/// Normalizes raw header names. Must be deterministic and pure.
pub trait ColumnNameCleaner: Send {
    fn clean_column_name(&self, raw: &str) -> String;
}

/// Builds one cleaner per transformed file.
pub trait ColumnNameCleanerFactory: Send + Sync {
    fn create(&self) -> Box<dyn ColumnNameCleaner>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultColumnNameCleaner;

impl ColumnNameCleaner for DefaultColumnNameCleaner {
    fn clean_column_name(&self, raw: &str) -> String {
        clean_column_name(raw)
    }
}

impl ColumnNameCleanerFactory for DefaultColumnNameCleaner {
    fn create(&self) -> Box<dyn ColumnNameCleaner> {
        Box::new(DefaultColumnNameCleaner)
    }
}

/// Clean a raw column name into a lowercase `[a-z0-9_]` identifier.
///
/// - "Order Date" -> "order_date"
/// - "  Revenue ($) " -> "revenue"
/// - "2024 total" -> "c_2024_total"
/// - "" -> "column"
pub fn clean_column_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let replaced = ILLEGAL_CHARS.replace_all(&lowered, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    let mut cleaned = collapsed.trim_matches('_').to_string();

    if cleaned.is_empty() {
        return "column".to_string();
    }
    if cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        cleaned = format!("c_{}", cleaned);
    }
    if cleaned.len() > MAX_IDENTIFIER_LENGTH {
        // only ASCII survives the replacement, so byte truncation is safe
        cleaned.truncate(MAX_IDENTIFIER_LENGTH);
        cleaned = cleaned.trim_end_matches('_').to_string();
    }
    cleaned
}

/// Table names follow the column rules.
pub fn clean_table_name(raw: &str) -> String {
    clean_column_name(raw)
}

/// Clean a file name for use in a storage path, keeping its extension.
///
/// "Q3 Sales (final).CSV" -> "q3_sales_final.csv"
pub fn clean_file_name(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !stem.trim().is_empty() && !ext.is_empty() => {
            let ext = ILLEGAL_CHARS.replace_all(&ext.to_lowercase(), "").to_string();
            let stem = clean_column_name(stem);
            if ext.is_empty() {
                stem
            } else {
                format!("{}.{}", stem, ext)
            }
        }
        _ => clean_column_name(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_column_name() {
        assert_eq!(clean_column_name("Order Date"), "order_date");
        assert_eq!(clean_column_name("  Revenue ($) "), "revenue");
        assert_eq!(clean_column_name("a--b__c"), "a_b_c");
        assert_eq!(clean_column_name("2024 total"), "c_2024_total");
        assert_eq!(clean_column_name("   "), "column");
        assert_eq!(clean_column_name("Ünïcode"), "n_code");
    }

    #[test]
    fn test_clean_column_name_is_idempotent() {
        for raw in ["Order Date", "2024", "x__y", "ALL CAPS!"] {
            let once = clean_column_name(raw);
            assert_eq!(clean_column_name(&once), once);
        }
    }

    #[test]
    fn test_clean_column_name_truncates() {
        let raw = "x".repeat(300);
        assert_eq!(clean_column_name(&raw).len(), MAX_IDENTIFIER_LENGTH);
    }

    #[test]
    fn test_clean_file_name() {
        assert_eq!(clean_file_name("Q3 Sales (final).CSV"), "q3_sales_final.csv");
        assert_eq!(clean_file_name("no_extension"), "no_extension");
        assert_eq!(clean_file_name(".hidden"), "hidden");
    }
}
