use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::models::user::UserRecord;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Compacted durable identity state, keyed by API key.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub users: HashMap<String, UserRecord>,
}

impl IdentitySnapshot {
    pub fn capture(users: HashMap<String, UserRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            users,
        }
    }

    /// Writes through a temporary file so a crash never leaves a torn snapshot.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("bin.tmp");
        std::fs::write(&tmp_path, bincode::serialize(self)?)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// `None` when no snapshot exists or it cannot be used; the journal is
    /// then the only source of state.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read(path)?;
        let snapshot = match bincode::deserialize::<Self>(&data) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Failed to deserialize identity snapshot: {}", e);
                return Ok(None);
            }
        };
        if snapshot.version != SNAPSHOT_VERSION {
            tracing::warn!(
                expected = SNAPSHOT_VERSION,
                found = snapshot.version,
                "Identity snapshot version mismatch, ignoring"
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }
}
