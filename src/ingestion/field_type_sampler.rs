//! Field Type Sampler - per-column type inference over a sampled subset of values

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, Result};
use crate::ingestion::VARCHAR_CEILING;

/// Physical type of a column.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    String,
    /// 64-bit float
    Number,
    Integer,
    /// Epoch milliseconds
    Date,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Number | FieldType::Integer)
    }

    /// Narrowest type compatible with both.
    fn merge(self, other: FieldType) -> FieldType {
        match (self, other) {
            (a, b) if a == b => a,
            (FieldType::Integer, FieldType::Number) | (FieldType::Number, FieldType::Integer) => {
                FieldType::Number
            }
            _ => FieldType::String,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "STRING",
            FieldType::Number => "NUMBER",
            FieldType::Integer => "INTEGER",
            FieldType::Date => "DATE",
        };
        f.write_str(name)
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];

pub(crate) fn parse_integer(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

pub(crate) fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Parse a calendar value into UTC epoch milliseconds.
pub(crate) fn parse_date_millis(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
        }
    }
    None
}

fn classify(value: &str) -> FieldType {
    if parse_integer(value).is_some() {
        FieldType::Integer
    } else if parse_number(value).is_some() {
        FieldType::Number
    } else if parse_date_millis(value).is_some() {
        FieldType::Date
    } else {
        FieldType::String
    }
}

/// Streaming classifier for one column.
///
/// Every value is counted; only values selected at `sample_rate` influence the
/// inferred type. Item `n` (1-based) is selected when
/// `floor(n * rate) > floor((n - 1) * rate)`, so after `n` items exactly
/// `floor(n * rate)` samples have been analyzed.
#[derive(Clone, Debug)]
pub struct FieldTypeSampler {
    field_name: String,
    field_index: usize,
    sample_rate: f64,
    number_passed: u64,
    samples_analyzed: u64,
    observed: Option<FieldType>,
    longest_string: usize,
    finished: bool,
}

impl FieldTypeSampler {
    pub fn new(field_name: impl Into<String>, field_index: usize, sample_rate: f64) -> Result<Self> {
        if !(sample_rate > 0.0 && sample_rate <= 1.0) {
            return Err(IngestError::InvalidArgument(format!(
                "sample rate must be in (0, 1], got {}",
                sample_rate
            )));
        }
        Ok(Self {
            field_name: field_name.into(),
            field_index,
            sample_rate,
            number_passed: 0,
            samples_analyzed: 0,
            observed: None,
            longest_string: 0,
            finished: false,
        })
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn field_index(&self) -> usize {
        self.field_index
    }

    fn is_selected(&self, n: u64) -> bool {
        let current = (n as f64 * self.sample_rate).floor();
        let previous = ((n - 1) as f64 * self.sample_rate).floor();
        current > previous
    }

    /// Feed one value.
    pub fn process_item(&mut self, value: &str) -> Result<()> {
        if self.finished {
            return Err(IngestError::InvalidOperation(format!(
                "sampler for '{}' is already finished",
                self.field_name
            )));
        }
        self.number_passed += 1;
        self.record_length(value);

        if !self.is_selected(self.number_passed) {
            return Ok(());
        }
        self.samples_analyzed += 1;

        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let kind = classify(trimmed);
        self.observed = Some(match self.observed {
            Some(current) => current.merge(kind),
            None => kind,
        });
        Ok(())
    }

    /// Feed a batch of values synchronously.
    pub fn process_items_sync<I, S>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in values {
            self.process_item(value.as_ref())?;
        }
        Ok(())
    }

    /// Drain a push-based sequence, then finish.
    pub async fn process_items<St, S>(&mut self, mut stream: St) -> Result<()>
    where
        St: Stream<Item = S> + Unpin,
        S: AsRef<str>,
    {
        while let Some(value) = stream.next().await {
            self.process_item(value.as_ref())?;
        }
        self.finish();
        Ok(())
    }

    /// Freeze the inferred type. Length tracking continues via [`record_length`].
    ///
    /// [`record_length`]: FieldTypeSampler::record_length
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Track string length for values seen after the type was frozen.
    pub fn record_length(&mut self, value: &str) {
        let len = value.chars().count();
        if len > self.longest_string {
            self.longest_string = len;
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        if !self.finished {
            return Err(IngestError::InvalidOperation(format!(
                "sampler for '{}' has not been finished",
                self.field_name
            )));
        }
        if self.number_passed == 0 {
            return Err(IngestError::InvalidOperation(format!(
                "sampler for '{}' has not processed any items",
                self.field_name
            )));
        }
        Ok(())
    }

    pub fn field_type(&self) -> Result<FieldType> {
        self.ensure_ready()?;
        Ok(self.observed.unwrap_or(FieldType::String))
    }

    pub fn number_passed(&self) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.number_passed)
    }

    pub fn samples_analyzed(&self) -> Result<u64> {
        self.ensure_ready()?;
        Ok(self.samples_analyzed)
    }

    /// Longest observed value for STRING columns, capped at the varchar ceiling.
    pub fn longest_string(&self) -> Option<usize> {
        match self.field_type() {
            Ok(FieldType::String) => Some(self.longest_string.min(VARCHAR_CEILING)),
            _ => None,
        }
    }
}

/// Builds one sampler per column of a transformed file.
pub trait FieldTypeSamplerFactory: Send + Sync {
    fn create(&self, field_name: &str, field_index: usize) -> Result<FieldTypeSampler>;
}

#[derive(Clone, Copy, Debug)]
pub struct DefaultSamplerFactory {
    pub sample_rate: f64,
}

impl Default for DefaultSamplerFactory {
    fn default() -> Self {
        Self { sample_rate: 1.0 }
    }
}

impl FieldTypeSamplerFactory for DefaultSamplerFactory {
    fn create(&self, field_name: &str, field_index: usize) -> Result<FieldTypeSampler> {
        FieldTypeSampler::new(field_name, field_index, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn infer(values: &[&str]) -> FieldType {
        let mut sampler = FieldTypeSampler::new("col", 0, 1.0).unwrap();
        sampler.process_items_sync(values.iter()).unwrap();
        sampler.finish();
        sampler.field_type().unwrap()
    }

    #[test]
    fn test_accessors_fail_before_finish() {
        let mut sampler = FieldTypeSampler::new("col", 0, 1.0).unwrap();
        assert!(matches!(sampler.field_type(), Err(IngestError::InvalidOperation(_))));
        sampler.process_item("1").unwrap();
        assert!(sampler.number_passed().is_err());
        assert!(sampler.samples_analyzed().is_err());
        sampler.finish();
        assert_eq!(sampler.number_passed().unwrap(), 1);
    }

    #[test]
    fn test_accessors_fail_without_items() {
        let mut sampler = FieldTypeSampler::new("col", 0, 1.0).unwrap();
        sampler.finish();
        assert!(sampler.field_type().is_err());
    }

    #[test]
    fn test_rejects_bad_sample_rate() {
        assert!(FieldTypeSampler::new("col", 0, 0.0).is_err());
        assert!(FieldTypeSampler::new("col", 0, 1.5).is_err());
        assert!(FieldTypeSampler::new("col", 0, f64::NAN).is_err());
    }

    #[test]
    fn test_type_lattice() {
        assert_eq!(infer(&["1", "2", "3"]), FieldType::Integer);
        assert_eq!(infer(&["1", "2.5", "3"]), FieldType::Number);
        assert_eq!(infer(&["1", "", "3"]), FieldType::Integer);
        assert_eq!(infer(&["1", "abc", "3"]), FieldType::String);
        assert_eq!(infer(&["2024-01-01", "2024-02-01T10:00:00Z"]), FieldType::Date);
        assert_eq!(infer(&["2024-01-01", "12"]), FieldType::String);
        assert_eq!(infer(&["", ""]), FieldType::String);
        assert_eq!(infer(&["NaN"]), FieldType::String);
    }

    #[test]
    fn test_samples_analyzed_follows_rate() {
        let mut sampler = FieldTypeSampler::new("col", 0, 0.3).unwrap();
        let values: Vec<String> = (0..37).map(|i| i.to_string()).collect();
        sampler.process_items_sync(&values).unwrap();
        sampler.finish();
        assert_eq!(sampler.number_passed().unwrap(), 37);
        assert_eq!(sampler.samples_analyzed().unwrap(), (37.0_f64 * 0.3).floor() as u64);
    }

    #[test]
    fn test_unsampled_values_do_not_demote() {
        // rate 0.5 analyzes items 2, 4, 6, ...
        let mut sampler = FieldTypeSampler::new("col", 0, 0.5).unwrap();
        sampler.process_items_sync(["oops", "1", "oops", "2"]).unwrap();
        sampler.finish();
        assert_eq!(sampler.field_type().unwrap(), FieldType::Integer);
    }

    #[test]
    fn test_longest_string_only_for_strings() {
        let mut sampler = FieldTypeSampler::new("col", 0, 1.0).unwrap();
        sampler.process_items_sync(["a", "abcd", "ab"]).unwrap();
        sampler.finish();
        sampler.record_length("abcdefg");
        assert_eq!(sampler.longest_string(), Some(7));

        let mut numeric = FieldTypeSampler::new("n", 1, 1.0).unwrap();
        numeric.process_items_sync(["12345"]).unwrap();
        numeric.finish();
        assert_eq!(numeric.longest_string(), None);
    }

    #[test]
    fn test_longest_string_is_capped() {
        let mut sampler = FieldTypeSampler::new("col", 0, 1.0).unwrap();
        sampler.process_item(&"x".repeat(VARCHAR_CEILING + 10)).unwrap();
        sampler.finish();
        assert_eq!(sampler.longest_string(), Some(VARCHAR_CEILING));
    }

    #[test]
    fn test_process_after_finish_fails() {
        let mut sampler = FieldTypeSampler::new("col", 0, 1.0).unwrap();
        sampler.finish();
        assert!(sampler.process_item("1").is_err());
    }

    #[tokio::test]
    async fn test_process_items_stream() {
        let mut sampler = FieldTypeSampler::new("col", 0, 1.0).unwrap();
        let stream = futures::stream::iter(vec!["1.5", "2", "3"]);
        sampler.process_items(stream).await.unwrap();
        assert!(sampler.is_finished());
        assert_eq!(sampler.field_type().unwrap(), FieldType::Number);
        assert_eq!(sampler.samples_analyzed().unwrap(), 3);
    }

    #[test]
    fn test_parse_date_millis() {
        assert_eq!(parse_date_millis("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_date_millis("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(parse_date_millis("01/02/1970"), Some(86_400_000));
        assert_eq!(parse_date_millis("tomorrow"), None);
    }
}
