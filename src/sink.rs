use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::atomic;
use crate::config::{Settings, WriteMode};
use crate::error::PersistenceError;
use crate::record::ProductRecord;

/// Rows written (or skipped as already present) when a sink is finished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub skipped: usize,
}

/// Destination for extracted records.
pub trait RecordSink {
    /// Durably accept one record. Once this returns `Ok`, the record survives
    /// a crash (in the CSV itself or in the replayable buffer).
    fn append(&mut self, record: &ProductRecord) -> Result<(), PersistenceError>;

    /// Make everything visible in the CSV. No-op for direct sinks.
    fn finish(&mut self) -> Result<FlushReport, PersistenceError>;

    /// Records accepted but not yet in the CSV.
    fn pending(&self) -> usize {
        0
    }
}

pub fn open(settings: &Settings) -> Result<Box<dyn RecordSink>, PersistenceError> {
    match settings.write_mode {
        WriteMode::Direct => Ok(Box::new(CsvSink::open(settings.output_path())?)),
        WriteMode::Buffered => {
            // Header check up front, not at the final flush.
            CsvSink::open(settings.output_path())?;
            Ok(Box::new(BufferedSink::open(
                settings.buffer_path(),
                settings.output_path(),
            )?))
        }
    }
}

// ── Direct CSV ──

/// Append-only CSV with a fixed header.
///
/// On open, an existing file is scanned: its header must match
/// [`ProductRecord::COLUMNS`], and a trailing partial row left by a crash is
/// cut off. Every row is written with one `write_all` and synced before
/// `append` returns.
pub struct CsvSink {
    path: PathBuf,
    file: File,
    urls: HashSet<String>,
    rows: usize,
}

struct Scan {
    valid_len: usize,
    header: Option<Vec<String>>,
    urls: HashSet<String>,
    rows: usize,
}

impl CsvSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(PersistenceError::io(&path, e)),
        };
        let scan = scan(&path, &bytes)?;

        if let Some(header) = &scan.header {
            if header.iter().map(String::as_str).ne(ProductRecord::COLUMNS) {
                return Err(PersistenceError::SchemaMismatch {
                    path,
                    found: header.clone(),
                });
            }
        }

        if scan.valid_len < bytes.len() {
            warn!(
                "Truncating {} incomplete trailing bytes in {}",
                bytes.len() - scan.valid_len,
                path.display()
            );
            OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|f| f.set_len(scan.valid_len as u64).and_then(|_| f.sync_all()))
                .map_err(|e| PersistenceError::io(&path, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;

        let mut sink = CsvSink {
            path,
            file,
            urls: scan.urls,
            rows: scan.rows,
        };
        if scan.header.is_none() {
            sink.write_line(&ProductRecord::COLUMNS)?;
        }
        debug!("Opened {} ({} existing rows)", sink.path.display(), sink.rows);
        Ok(sink)
    }

    /// Append a row unless a row for the same URL is already in the file.
    /// Returns whether a row was written.
    pub fn write_record(&mut self, record: &ProductRecord) -> Result<bool, PersistenceError> {
        if let Some(url) = record.url() {
            if self.urls.contains(url) {
                debug!("Row for {} already present, not appending", url);
                return Ok(false);
            }
        }
        self.write_line(&record.to_row())?;
        if let Some(url) = record.url() {
            self.urls.insert(url.to_string());
        }
        self.rows += 1;
        Ok(true)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn write_line(&mut self, cells: &[&str]) -> Result<(), PersistenceError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(cells)
            .map_err(|source| PersistenceError::Csv {
                path: self.path.clone(),
                source,
            })?;
        let line = writer
            .into_inner()
            .map_err(|e| PersistenceError::io(&self.path, e.into_error()))?;

        self.file
            .write_all(&line)
            .and_then(|_| self.file.sync_data())
            .map_err(|e| PersistenceError::io(&self.path, e))
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &ProductRecord) -> Result<(), PersistenceError> {
        self.write_record(record).map(|_| ())
    }

    fn finish(&mut self) -> Result<FlushReport, PersistenceError> {
        Ok(FlushReport::default())
    }
}

/// Walk the file record by record. The valid prefix ends after the last
/// record that is newline-terminated, has every quoted field closed and has
/// the full column count.
fn scan(path: &Path, bytes: &[u8]) -> Result<Scan, PersistenceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut record = csv::ByteRecord::new();
    let mut out = Scan {
        valid_len: 0,
        header: None,
        urls: HashSet::new(),
        rows: 0,
    };
    let mut first = true;

    loop {
        let start = (reader.position().byte() as usize).min(bytes.len());
        let more = reader
            .read_byte_record(&mut record)
            .map_err(|source| PersistenceError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
        if !more {
            break;
        }
        let end = (reader.position().byte() as usize).min(bytes.len());
        // The reader closes a quote left open at EOF; an odd quote count
        // means the row was cut inside a quoted field.
        let closed = bytes[start..end].iter().filter(|&&b| b == b'"').count() % 2 == 0;
        let terminated = closed && matches!(bytes[..end].last(), Some(b'\n' | b'\r'));
        if !terminated {
            break;
        }
        let complete = record.len() == ProductRecord::COLUMNS.len();

        if first {
            first = false;
            out.header = Some(
                record
                    .iter()
                    .map(|f| String::from_utf8_lossy(f).trim_start_matches('\u{feff}').to_string())
                    .collect(),
            );
            out.valid_len = end;
            continue;
        }
        if complete {
            out.valid_len = end;
            out.rows += 1;
            if let Some(url) = record.get(ProductRecord::URL_COLUMN) {
                if !url.is_empty() {
                    out.urls.insert(String::from_utf8_lossy(url).into_owned());
                }
            }
        }
    }

    // "\r\n" may be reported as ending after the "\r".
    if bytes[out.valid_len..].iter().all(|b| matches!(b, b'\r' | b'\n')) {
        out.valid_len = bytes.len();
    }
    Ok(out)
}

/// Count data rows of an existing CSV without modifying it.
pub fn count_rows(path: &Path) -> Result<usize, PersistenceError> {
    match fs::read(path) {
        Ok(bytes) => Ok(scan(path, &bytes)?.rows),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

// ── Buffered ──

/// Accumulates records in a JSON buffer file and writes the CSV in one go.
///
/// The buffer is rewritten atomically on every append, so it is always a
/// complete array. Flushing skips records whose URL is already in the CSV,
/// which makes a flush that died halfway safe to repeat.
pub struct BufferedSink {
    buffer_path: PathBuf,
    csv_path: PathBuf,
    records: Vec<ProductRecord>,
}

impl BufferedSink {
    pub fn open(
        buffer_path: impl Into<PathBuf>,
        csv_path: impl Into<PathBuf>,
    ) -> Result<Self, PersistenceError> {
        let buffer_path = buffer_path.into();
        let records: Vec<ProductRecord> = atomic::read_json(&buffer_path)?.unwrap_or_default();
        if !records.is_empty() {
            info!(
                "Resuming with {} unflushed records from {}",
                records.len(),
                buffer_path.display()
            );
        }
        Ok(BufferedSink {
            buffer_path,
            csv_path: csv_path.into(),
            records,
        })
    }
}

impl RecordSink for BufferedSink {
    fn append(&mut self, record: &ProductRecord) -> Result<(), PersistenceError> {
        self.records.push(record.clone());
        if let Err(e) = atomic::write_json(&self.buffer_path, &self.records) {
            self.records.pop();
            return Err(e);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<FlushReport, PersistenceError> {
        let mut report = FlushReport::default();
        if self.records.is_empty() {
            return Ok(report);
        }

        let mut csv = CsvSink::open(&self.csv_path)?;
        for record in &self.records {
            if csv.write_record(record)? {
                report.written += 1;
            } else {
                report.skipped += 1;
            }
        }

        match fs::remove_file(&self.buffer_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PersistenceError::io(&self.buffer_path, e)),
        }
        self.records.clear();

        info!(
            "Flushed buffer to {}: {} rows written, {} already present ({} rows total)",
            self.csv_path.display(),
            report.written,
            report.skipped,
            csv.rows()
        );
        Ok(report)
    }

    fn pending(&self) -> usize {
        self.records.len()
    }
}

/// Flush a buffer left behind by an earlier run.
pub fn flush_buffer(settings: &Settings) -> Result<FlushReport, PersistenceError> {
    BufferedSink::open(settings.buffer_path(), settings.output_path())?.finish()
}
