//! Persistence of calibration and the mark log between runs.
//!
//! `flush` reports success as a boolean; a failed flush leaves the previous
//! record in place and the run result untouched.
use crate::atomic::write_atomic;
use crate::error::{Result, TracerError};
use eyre::WrapErr;
use std::path::{Path, PathBuf};
use tracer_config::{PersistedRecord, load_record, render_record};

pub trait RecordStore {
    /// The stored record, or an empty one when nothing was stored yet.
    fn load(&mut self) -> Result<PersistedRecord>;
    /// Write `rec` and verify it reads back identically.
    fn flush(&mut self, rec: &PersistedRecord) -> bool;
}

/// TOML file written atomically and read back after every flush.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_verified(&self, rec: &PersistedRecord) -> Result<()> {
        let text = render_record(rec).wrap_err("render record")?;
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| TracerError::Io(format!("{}: {e}", dir.display())))?;
            }
        }
        write_atomic(&self.path, text.as_bytes())
            .map_err(|e| TracerError::Io(format!("{}: {e}", self.path.display())))?;
        let back = std::fs::read_to_string(&self.path)
            .map_err(|e| TracerError::Io(format!("{}: {e}", self.path.display())))?;
        let parsed = load_record(&back).wrap_err("read back record")?;
        if parsed != *rec {
            return Err(TracerError::Io("record read back differs from what was written".into()).into());
        }
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn load(&mut self) -> Result<PersistedRecord> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PersistedRecord::default());
            }
            Err(e) => {
                return Err(TracerError::Io(format!("{}: {e}", self.path.display())).into());
            }
        };
        let rec = load_record(&text)
            .wrap_err_with(|| format!("parse record {}", self.path.display()))?;
        if let Some(cal) = &rec.calibration {
            cal.validate()?;
        }
        Ok(rec)
    }

    fn flush(&mut self, rec: &PersistedRecord) -> bool {
        match self.write_verified(rec) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), marks = rec.marks.len(), "record flushed");
                true
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "record flush failed");
                false
            }
        }
    }
}

/// In-memory store; `fail_next` makes the following flush fail.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    rec: PersistedRecord,
    fail_next: bool,
    flushes: u32,
}

impl MemStore {
    pub fn new(rec: PersistedRecord) -> Self {
        Self {
            rec,
            ..Self::default()
        }
    }

    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }

    pub fn flushes(&self) -> u32 {
        self.flushes
    }

    pub fn record(&self) -> &PersistedRecord {
        &self.rec
    }
}

impl RecordStore for MemStore {
    fn load(&mut self) -> Result<PersistedRecord> {
        Ok(self.rec.clone())
    }

    fn flush(&mut self, rec: &PersistedRecord) -> bool {
        if std::mem::take(&mut self.fail_next) {
            return false;
        }
        self.rec = rec.clone();
        self.flushes += 1;
        true
    }
}
