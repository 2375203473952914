use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::user::UserRecord;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum JournalEntry {
    UserCreated(UserRecord),
    UserUpdated(UserRecord),
}

impl JournalEntry {
    pub fn user(&self) -> &UserRecord {
        match self {
            JournalEntry::UserCreated(user) | JournalEntry::UserUpdated(user) => user,
        }
    }
}

/// Append-only log of identity writes, framed as little-endian length + bincode.
pub struct JournalWriter {
    file: std::fs::File,
    entry_count: u64,
}

impl JournalWriter {
    /// Opens the journal for appending and returns the entries already in it.
    ///
    /// Bytes past the last decodable frame are cut off, so later appends never
    /// land behind a torn frame that replay would stop at.
    pub fn open(dir: &Path) -> anyhow::Result<(Self, Vec<JournalEntry>)> {
        std::fs::create_dir_all(dir)?;
        let path = Self::path(dir);
        let data = if path.exists() {
            std::fs::read(&path)?
        } else {
            Vec::new()
        };
        let (entries, valid_len) = decode_frames(&data);

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        if valid_len < data.len() {
            tracing::warn!(
                kept = valid_len,
                dropped = data.len() - valid_len,
                "Cutting undecodable tail off identity journal"
            );
            file.set_len(valid_len as u64)?;
        }

        Ok((
            Self {
                file,
                entry_count: entries.len() as u64,
            },
            entries,
        ))
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join("current.journal")
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Writes one frame. A failed write is rolled back to the previous end of
    /// file.
    pub fn append(&mut self, entry: &JournalEntry) -> anyhow::Result<()> {
        let data = bincode::serialize(entry)?;
        let len = u32::try_from(data.len())?;
        let mut frame = Vec::with_capacity(4 + data.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&data);

        let offset = self.file.metadata()?.len();
        if let Err(e) = self.file.write_all(&frame).and_then(|()| self.file.flush()) {
            if let Err(rollback) = self.file.set_len(offset) {
                tracing::error!(
                    error = %rollback,
                    offset,
                    "Failed to roll back partial journal frame"
                );
            }
            return Err(e.into());
        }
        self.entry_count += 1;
        Ok(())
    }

    /// Empties the journal. The handle stays in append mode, so later frames
    /// always land at the new end of file.
    pub fn truncate(&mut self) -> anyhow::Result<()> {
        self.file.set_len(0)?;
        self.entry_count = 0;
        Ok(())
    }

    pub fn read_entries(dir: &Path) -> anyhow::Result<Vec<JournalEntry>> {
        let path = Self::path(dir);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read(&path)?;
        Ok(decode_frames(&data).0)
    }
}

/// Decodes frames up to the first incomplete or corrupt one. Returns the
/// entries and the byte length of the valid prefix.
fn decode_frames(data: &[u8]) -> (Vec<JournalEntry>, usize) {
    let mut entries = Vec::new();
    let mut cursor = 0;
    while cursor + 4 <= data.len() {
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[cursor..cursor + 4]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = cursor + 4;
        if start + len > data.len() {
            tracing::warn!("Journal truncated at entry boundary, stopping replay");
            break;
        }
        match bincode::deserialize::<JournalEntry>(&data[start..start + len]) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("Journal entry corrupt, stopping replay: {}", e);
                break;
            }
        }
        cursor = start + len;
    }
    (entries, cursor)
}
