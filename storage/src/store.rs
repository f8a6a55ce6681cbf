use std::collections::HashSet;
use std::path::{Path, PathBuf};
use sync_core::{CoreError, ProfileRecord};
use tracing::{debug, info};

use crate::reader::read_records;
use crate::writer::{write_records, StorageFormat};

/// In-memory view of the output file. Appends accumulate and are only
/// written back on flush, so a run that fails halfway never leaves a
/// half-written file behind.
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    records: Vec<ProfileRecord>,
    known_logins: HashSet<String>,
    dirty: bool,
}

impl ProfileStore {
    /// Open the store at `path`, loading existing records when the file is
    /// already there. The extension is validated up front so a bad output
    /// path fails before any API work is done.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        StorageFormat::from_path(&path)?;

        let records: Vec<ProfileRecord> = if path.exists() {
            read_records(&path)?
        } else {
            Vec::new()
        };

        let known_logins = records
            .iter()
            .map(|r| r.login.to_ascii_lowercase())
            .collect();

        if !records.is_empty() {
            info!(
                "Loaded {} existing records from {}",
                records.len(),
                path.display()
            );
        }

        Ok(Self {
            path,
            records,
            known_logins,
            dirty: false,
        })
    }

    /// Append a record. A login already in the store replaces its old row
    /// instead of duplicating it.
    pub fn append(&mut self, record: ProfileRecord) {
        let key = record.login.to_ascii_lowercase();
        if self.known_logins.contains(&key) {
            if let Some(existing) = self
                .records
                .iter_mut()
                .find(|r| r.login.eq_ignore_ascii_case(&record.login))
            {
                debug!("Replacing existing record for {}", record.login);
                *existing = record;
            }
        } else {
            self.known_logins.insert(key);
            self.records.push(record);
        }
        self.dirty = true;
    }

    pub fn contains(&self, login: &str) -> bool {
        self.known_logins.contains(&login.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the store back to disk. A no-op when nothing changed.
    pub fn flush(&mut self) -> Result<(), CoreError> {
        if !self.dirty {
            debug!("Store unchanged, skipping flush");
            return Ok(());
        }
        write_records(&self.path, &self.records)?;
        self.dirty = false;
        Ok(())
    }
}
