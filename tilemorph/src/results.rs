//! Append-only results catalog.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::morphology::MorphologyRecord;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("results file I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("results file CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Comma-separated catalog with one header line and one row per measured source.
///
/// Opening an existing non-empty file adopts its header; every later row is
/// laid out by that header's field names so the file never gets ragged rows.
/// Fields a record lacks are left empty. Fields the header lacks are dropped.
pub struct ResultsWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
    header: Option<Vec<String>>,
    dropped: HashSet<String>,
    rows_written: usize,
}

fn existing_header(path: &Path) -> Result<Option<Vec<String>>, ResultsError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    match reader.records().next() {
        Some(record) => Ok(Some(record?.iter().map(str::to_string).collect())),
        None => Ok(None),
    }
}

/// True when a non-empty file does not end with a line break, e.g. after a
/// run was killed mid-row.
fn lacks_final_newline(path: &Path) -> Result<bool, ResultsError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl ResultsWriter {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ResultsError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let header = existing_header(&path)?;
        if let Some(fields) = &header {
            info!(
                "Appending to {} ({} columns)",
                path.display(),
                fields.len()
            );
        }

        let needs_newline = lacks_final_newline(&path)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if needs_newline {
            warn!("{} ends mid-line; terminating the last row", path.display());
            file.write_all(b"\n")?;
        }
        let writer = csv::WriterBuilder::new()
            .flexible(false)
            .from_writer(file);

        Ok(Self {
            path,
            writer,
            header,
            dropped: HashSet::new(),
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column names, once known.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Rows appended through this writer.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Append one record, writing the header first if the file had none.
    pub fn append(&mut self, record: &MorphologyRecord) -> Result<(), ResultsError> {
        if self.header.is_none() {
            let names: Vec<String> = record.names().map(str::to_string).collect();
            self.writer.write_record(&names)?;
            self.header = Some(names);
        }
        let header = self.header.as_deref().unwrap_or_default();

        for name in record.names() {
            if !header.iter().any(|h| h == name) && self.dropped.insert(name.to_string()) {
                warn!(
                    "Field {name} is not a column of {}; dropping it",
                    self.path.display()
                );
            }
        }

        let row: Vec<String> = header
            .iter()
            .map(|name| record.get(name).map(ToString::to_string).unwrap_or_default())
            .collect();
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }
}
