use chrono::{DateTime, TimeZone};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::instrument;

use crate::catalog::Product;
use crate::price::PriceQuote;

pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";
pub const CSV_HEADER: [&str; 5] = [
    "Fecha",
    "Producto",
    "Numero de Pañales",
    "Precio",
    "Precio por unidad",
];

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("csv error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl RecordError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Formats the run timestamp shared by every CSV row and the log line.
pub fn run_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Wraps a text field in quotes, doubling any embedded quote.
fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Append-only CSV history of successful observations.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    /// Creates the file (and its parent directories) with the header row if
    /// it does not exist yet. An existing file is left untouched.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir).map_err(|e| RecordError::io(dir, e))?;
            }

            let mut writer = WriterBuilder::new()
                .terminator(Terminator::CRLF)
                .from_path(&path)
                .map_err(|e| RecordError::csv(&path, e))?;
            writer
                .write_record(CSV_HEADER)
                .map_err(|e| RecordError::csv(&path, e))?;
            writer.flush().map_err(|e| RecordError::io(&path, e))?;
            tracing::info!(path = %path.display(), "Created CSV file with header");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timestamp and name are always quoted, numbers never are; rows end in
    /// CRLF. The writer does no quoting of its own so a name such as `2024`
    /// still comes out as `"2024"`.
    pub fn append(
        &self,
        timestamp: &str,
        product: &Product,
        quote: &PriceQuote,
    ) -> Result<(), RecordError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| RecordError::io(&self.path, e))?;

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .quote_style(QuoteStyle::Never)
            .terminator(Terminator::CRLF)
            .from_writer(file);

        writer
            .write_record([
                quoted(timestamp),
                quoted(&product.name),
                product.pack_count.to_string(),
                quote.price.to_string(),
                quote.per_unit.to_string(),
            ])
            .map_err(|e| RecordError::csv(&self.path, e))?;
        writer.flush().map_err(|e| RecordError::io(&self.path, e))?;
        Ok(())
    }
}

/// The one-line plaintext summary of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    line: String,
}

impl RunSummary {
    pub fn new(timestamp: &str) -> Self {
        Self {
            line: timestamp.to_string(),
        }
    }

    pub fn push_success(&mut self, product: &Product, quote: &PriceQuote) {
        self.line.push_str(&format!(
            " {} ({} pañales): {} por unidad : {}",
            product.name, product.pack_count, quote.raw_text, quote.per_unit
        ));
    }

    pub fn push_failure(&mut self, product: &Product) {
        self.line.push_str(&format!(" {}: Error", product.name));
    }

    /// The summary terminated with a newline, as stored in the log.
    pub fn finish(mut self) -> String {
        self.line.push('\n');
        self.line
    }
}

/// Persists the outcome of each product in a run.
///
/// Successful observations go to both the CSV file and the run summary.
/// Failures are only noted in the summary: the CSV holds prices, and a row
/// without one is never written.
#[derive(Debug)]
pub struct Recorder {
    timestamp: String,
    csv: CsvLog,
    log_path: PathBuf,
    summary: RunSummary,
}

impl Recorder {
    pub fn open<P, Q>(csv_path: P, log_path: Q, timestamp: String) -> Result<Self, RecordError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let csv = CsvLog::open(csv_path)?;
        Ok(Self {
            summary: RunSummary::new(&timestamp),
            timestamp,
            csv,
            log_path: log_path.as_ref().to_path_buf(),
        })
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    #[instrument(skip(self, product, quote), fields(product = %product.name, price = quote.price))]
    pub fn record_success(&mut self, product: &Product, quote: &PriceQuote) -> Result<(), RecordError> {
        self.csv.append(&self.timestamp, product, quote)?;
        self.summary.push_success(product, quote);
        tracing::info!(per_unit = %quote.per_unit, path = %self.csv.path().display(), "Recorded price");
        Ok(())
    }

    pub fn record_failure(&mut self, product: &Product, error: &str) {
        tracing::warn!(product = %product.name, error, "Recorded failure in run summary only");
        self.summary.push_failure(product);
    }

    /// Appends the summary line to the plaintext log and returns it.
    pub fn finish(self) -> Result<String, RecordError> {
        let line = self.summary.finish();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| RecordError::io(&self.log_path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RecordError::io(&self.log_path, e))?;

        tracing::info!(path = %self.log_path.display(), "Appended run summary");
        Ok(line)
    }
}
