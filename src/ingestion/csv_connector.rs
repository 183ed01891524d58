//! CSV Connector - turns an uploaded CSV stream into header-keyed raw rows

use csv::ReaderBuilder;
use std::io::Read;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::ingestion::row_transformer::RawRow;

/// Reads CSV text and yields [`RawRow`]s keyed by the (trimmed) header.
pub struct CsvRowSource<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    delimiter: u8,
}

impl<R: Read> CsvRowSource<R> {
    pub fn new(input: R) -> Result<Self> {
        Self::with_delimiter(input, b',')
    }

    pub fn with_delimiter(input: R, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(input);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect::<Vec<_>>();

        Ok(Self {
            reader,
            headers,
            delimiter,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Next row, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<RawRow>> {
        let mut record = csv::StringRecord::new();
        if !self.reader.read_record(&mut record)? {
            return Ok(None);
        }
        let values = record.iter().map(|v| v.to_string()).collect();
        Ok(Some(RawRow::from_record(&self.headers, values)))
    }

    /// Push every row into a bounded channel. Blocks while the channel is full.
    pub fn feed_blocking(mut self, output: mpsc::Sender<RawRow>) -> Result<u64> {
        let mut count = 0u64;
        while let Some(row) = self.next_row()? {
            output.blocking_send(row).map_err(|_| {
                IngestError::InvalidOperation("row consumer closed early".to_string())
            })?;
            count += 1;
        }
        debug!(rows = count, "csv source exhausted");
        Ok(count)
    }
}

impl<R: Read> Iterator for CsvRowSource<R> {
    type Item = Result<RawRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}
