use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use sync_core::{CoreError, StorageError};
use tracing::{debug, info};

/// Output format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    Csv,
    Json,
    JsonLines,
}

impl StorageFormat {
    /// Pick the format from the path's extension. Unknown extensions are
    /// rejected rather than guessed.
    pub fn from_path(path: &Path) -> Result<Self, CoreError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            _ => Err(CoreError::Storage(StorageError::UnsupportedFormat {
                extension: format!(".{}", extension),
            })),
        }
    }
}

/// Write all records to `path`, replacing any existing file. The parent
/// directory is created if missing.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<(), CoreError> {
    let format = StorageFormat::from_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    match format {
        StorageFormat::Csv => write_csv(path, records)?,
        StorageFormat::Json => write_json(path, records)?,
        StorageFormat::JsonLines => write_json_lines(path, records)?,
    }

    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<(), CoreError> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    for record in records {
        writer
            .serialize(record)
            .map_err(|e| CoreError::Storage(StorageError::Csv(e)))?;
    }

    writer.flush().map_err(|_| {
        CoreError::Storage(StorageError::FlushFailed {
            path: path.display().to_string(),
        })
    })?;
    debug!("CSV flush complete for {}", path.display());
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, records: &[T]) -> Result<(), CoreError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, records)?;
    Ok(())
}

fn write_json_lines<T: Serialize>(path: &Path, records: &[T]) -> Result<(), CoreError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    for record in records {
        let line = serde_json::to_string(record)?;
        writeln!(writer, "{}", line)?;
    }

    writer.flush().map_err(|_| {
        CoreError::Storage(StorageError::FlushFailed {
            path: path.display().to_string(),
        })
    })?;
    Ok(())
}
