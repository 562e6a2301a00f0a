//! Update cursor - highest consumed update id, persisted next to the schedule

use crate::error::Result;
use crate::store::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Monotonic position in the inbound update feed
#[derive(Debug, Clone)]
pub struct UpdateCursor {
    last: i64,
    path: Option<PathBuf>,
}

impl UpdateCursor {
    /// In-memory cursor starting at `last`
    pub fn new(last: i64) -> Self {
        Self { last, path: None }
    }

    /// Load from `path`; a missing or unreadable file starts from 0
    pub fn load(path: &Path) -> Result<Self> {
        let last = match fs::read_to_string(path) {
            Ok(content) => match content.trim().parse::<i64>() {
                Ok(value) => value,
                Err(e) => {
                    warn!(path = %path.display(), "Ignoring unparsable cursor file: {}", e);
                    0
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            last,
            path: Some(path.to_path_buf()),
        })
    }

    /// Last consumed update id
    pub fn last(&self) -> i64 {
        self.last
    }

    /// Offset for the next pull: only updates strictly newer than the cursor
    pub fn offset(&self) -> i64 {
        self.last + 1
    }

    /// Record `update_id` as consumed. Older ids are ignored.
    pub fn advance(&mut self, update_id: i64) -> Result<bool> {
        if update_id <= self.last {
            return Ok(false);
        }
        // Persist first so memory never runs ahead of the file
        if let Some(path) = &self.path {
            write_atomic(path, update_id.to_string().as_bytes())?;
        }
        self.last = update_id;
        Ok(true)
    }
}
