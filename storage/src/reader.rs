use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use sync_core::{CoreError, StorageError};
use tracing::debug;

use crate::writer::StorageFormat;

/// Read all records from `path`. A missing file is an error; callers that
/// treat absence as an empty store check existence first.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
    let format = StorageFormat::from_path(path)?;

    if !path.exists() {
        return Err(CoreError::Storage(StorageError::FileNotFound {
            path: path.display().to_string(),
        }));
    }

    let records = match format {
        StorageFormat::Csv => read_csv(path)?,
        StorageFormat::Json => read_json(path)?,
        StorageFormat::JsonLines => read_json_lines(path)?,
    };

    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
    let file = File::open(path)?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: T = result.map_err(|e| {
            CoreError::Storage(StorageError::CorruptData {
                details: e.to_string(),
            })
        })?;
        records.push(record);
    }
    Ok(records)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
    let file = File::open(path)?;
    let records: Vec<T> = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        CoreError::Storage(StorageError::CorruptData {
            details: e.to_string(),
        })
    })?;
    Ok(records)
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: T = serde_json::from_str(&line).map_err(|e| {
            CoreError::Storage(StorageError::CorruptData {
                details: e.to_string(),
            })
        })?;
        records.push(record);
    }
    Ok(records)
}
