//! Item Pipeline for exporting scraped items to a deduplicated CSV file.
//!
//! This module provides the `CsvExporterPipeline`, an item pipeline that
//! appends every `ScrapedItem` to a CSV file as soon as it arrives and
//! tidies the whole file up when the job closes.
//!
//! Key features include:
//! - Append-friendly output: the file is opened in append mode and the
//!   header line is only written when the file is empty, so several runs of
//!   the same job accumulate into one CSV.
//! - Fixed column order: columns follow the configured header (or the item
//!   schema), not the key order of individual items.
//! - Finalization on close: exact duplicate rows are removed, the rows are
//!   optionally sorted by one column, and the result replaces the original
//!   through a staging file.
//! - Blocking file I/O runs on Tokio's blocking pool.

use crate::config::JobConfig;
use crate::error::PipelineError;
use crate::item::ScrapedItem;
use crate::pipeline::Pipeline;
use crate::schema::ItemSchema;
use crate::utils::{replace_file, validate_output_dir};
use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Writer};
use seahash::SeaHasher;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Column and direction used to sort the CSV on close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    pub column: String,
    pub ascending: bool,
}

impl SortOrder {
    pub fn ascending(column: impl Into<String>) -> Self {
        SortOrder {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        SortOrder {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Row counts reported by [`finalize_csv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeSummary {
    pub rows_read: usize,
    pub duplicates_removed: usize,
    pub rows_written: usize,
}

/// A pipeline that appends scraped items to a CSV file and deduplicates
/// (and optionally sorts) the file when closed.
pub struct CsvExporterPipeline<I> {
    path: PathBuf,
    header: Vec<String>,
    sort: Option<SortOrder>,
    writer: Arc<Mutex<Option<Writer<File>>>>,
    finalized: AtomicBool,
    _phantom: PhantomData<I>,
}

impl<I: ScrapedItem> CsvExporterPipeline<I> {
    /// Creates a new `CsvExporterPipeline` writing `header`-ordered rows to
    /// `file_path`.
    pub fn new(
        file_path: impl AsRef<Path>,
        header: Vec<String>,
        sort: Option<SortOrder>,
    ) -> Result<Self, PipelineError> {
        if header.is_empty() {
            return Err(PipelineError::Config(
                "CSV header must contain at least one column".to_string(),
            ));
        }
        validate_output_dir(&file_path)?;
        let path_buf = file_path.as_ref().to_path_buf();
        info!("Initializing CsvExporterPipeline for file: {:?}", path_buf);

        let should_write_header = !path_buf.exists() || path_buf.metadata()?.len() == 0;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path_buf)?;
        let mut writer = Writer::from_writer(file);
        if should_write_header {
            debug!("Writing CSV header {:?}", header);
            writer.write_record(&header)?;
            writer.flush()?;
        }

        Ok(CsvExporterPipeline {
            path: path_buf,
            header,
            sort,
            writer: Arc::new(Mutex::new(Some(writer))),
            finalized: AtomicBool::new(false),
            _phantom: PhantomData,
        })
    }

    /// Builds the pipeline from a job configuration. The header falls back to
    /// the schema's field names when none is configured.
    pub fn from_config(config: &JobConfig, schema: &ItemSchema) -> Result<Self, PipelineError> {
        config.validate()?;
        let sort = config.csv.sort_by.as_ref().map(|column| SortOrder {
            column: column.clone(),
            ascending: config.csv.sort_ascending,
        });
        Self::new(config.csv_path(), config.header(schema), sort)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn to_record(&self, item_value: &Value) -> Result<Vec<String>, PipelineError> {
        let map = item_value.as_object().ok_or_else(|| {
            PipelineError::ItemError("Item for CSV must be a JSON object.".to_string())
        })?;
        Ok(self
            .header
            .iter()
            .map(|h| map.get(h).map(render_cell).unwrap_or_default())
            .collect())
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl<I: ScrapedItem> Pipeline<I> for CsvExporterPipeline<I> {
    fn name(&self) -> &str {
        "CsvExporterPipeline"
    }

    async fn process_item(&self, item: I) -> Result<Option<I>, PipelineError> {
        debug!("CsvExporterPipeline processing item.");
        let record = self.to_record(&item.to_json_value())?;
        let writer = Arc::clone(&self.writer);

        tokio::task::spawn_blocking(move || -> Result<(), PipelineError> {
            let mut guard = writer.blocking_lock();
            let writer = guard.as_mut().ok_or_else(|| {
                PipelineError::Other("CsvExporterPipeline is already closed".to_string())
            })?;
            writer.write_record(&record)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| PipelineError::Other(format!("spawn_blocking failed: {}", e)))??;

        Ok(Some(item))
    }

    async fn close(&self) -> Result<(), PipelineError> {
        info!("Closing CsvExporterPipeline.");
        if self.finalized.load(AtomicOrdering::Acquire) {
            warn!("CsvExporterPipeline for {:?} was already closed.", self.path);
            return Ok(());
        }
        // The append handle goes away on the first close; a failed finalize
        // is retried by the next one.
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.flush()?;
        }

        let path = self.path.clone();
        let sort = self.sort.clone();
        let summary =
            tokio::task::spawn_blocking(move || finalize_csv(&path, sort.as_ref()))
                .await
                .map_err(|e| PipelineError::Other(format!("spawn_blocking failed: {}", e)))??;

        self.finalized.store(true, AtomicOrdering::Release);
        info!(
            "CSV file {:?} finalized: {} rows written, {} duplicates removed.",
            self.path, summary.rows_written, summary.duplicates_removed
        );
        Ok(())
    }
}

/// Reloads the CSV at `path`, drops exact duplicate rows (keeping the first
/// occurrence), optionally sorts by `sort`, and atomically rewrites the file.
///
/// Rows with a different number of fields than the header, and a sort column
/// missing from the header, are errors; the file is left untouched then.
pub fn finalize_csv(
    path: &Path,
    sort: Option<&SortOrder>,
) -> Result<FinalizeSummary, PipelineError> {
    if path.metadata()?.len() == 0 {
        warn!("CSV file {:?} is empty; nothing to finalize.", path);
        return Ok(FinalizeSummary {
            rows_read: 0,
            duplicates_removed: 0,
            rows_written: 0,
        });
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
    let rows_read = rows.len();

    let mut rows = dedup_rows(rows);
    let duplicates_removed = rows_read - rows.len();
    debug!(
        "Removed {} duplicate rows from {:?}",
        duplicates_removed, path
    );

    if let Some(order) = sort {
        let column = headers
            .iter()
            .position(|h| h == order.column)
            .ok_or_else(|| PipelineError::MissingSortColumn {
                column: order.column.clone(),
                path: path.to_path_buf(),
            })?;
        debug!("Sorting {:?} by {:?}", path, order);
        sort_rows(&mut rows, column, order.ascending);
    }

    replace_file(path, |file| {
        let mut writer = Writer::from_writer(file);
        writer.write_record(&headers)?;
        for row in &rows {
            writer.write_record(row)?;
        }
        writer.flush()
    })?;

    Ok(FinalizeSummary {
        rows_read,
        duplicates_removed,
        rows_written: rows.len(),
    })
}

fn row_hash(row: &StringRecord) -> u64 {
    let mut hasher = SeaHasher::new();
    for field in row.iter() {
        hasher.write_usize(field.len());
        hasher.write(field.as_bytes());
    }
    hasher.finish()
}

fn dedup_rows(rows: Vec<StringRecord>) -> Vec<StringRecord> {
    let mut seen: HashMap<u64, Vec<usize>> = HashMap::new();
    let mut unique: Vec<StringRecord> = Vec::with_capacity(rows.len());
    for row in rows {
        let bucket = seen.entry(row_hash(&row)).or_default();
        if bucket.iter().any(|&idx| unique[idx] == row) {
            continue;
        }
        bucket.push(unique.len());
        unique.push(row);
    }
    unique
}

/// Cell values read as missing, on top of the empty cell.
const MISSING_TOKENS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty()
        || MISSING_TOKENS.contains(&cell)
        || cell.parse::<f64>().map(f64::is_nan).unwrap_or(false)
}

/// Stable sort on one column. The column compares numerically when every
/// present cell parses as a number, lexically otherwise. Missing cells
/// (empty, NA tokens, NaN) go last in both directions.
fn sort_rows(rows: &mut [StringRecord], column: usize, ascending: bool) {
    let cell = |row: &StringRecord| row.get(column).unwrap_or("").to_string();
    let numeric = rows
        .iter()
        .map(cell)
        .filter(|v| !is_missing(v))
        .all(|v| v.trim().parse::<f64>().is_ok());

    rows.sort_by(|a, b| {
        let (a, b) = (cell(a), cell(b));
        match (is_missing(&a), is_missing(&b)) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        let ord = if numeric {
            let x: f64 = a.trim().parse().unwrap_or_default();
            let y: f64 = b.trim().parse().unwrap_or_default();
            x.total_cmp(&y)
        } else {
            a.cmp(&b)
        };
        if ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}
