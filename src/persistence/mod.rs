//! Durable identity backend: an append-only journal on local disk, compacted
//! into a snapshot at intervals. State is materialized in memory on open.

pub mod snapshot;
pub mod wal;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::models::user::UserRecord;
use crate::services::identity::IdentityBackend;
use snapshot::IdentitySnapshot;
use wal::{JournalEntry, JournalWriter};

pub struct JournalBackend {
    users: DashMap<String, UserRecord>,
    journal: Mutex<JournalWriter>,
    snapshot_path: PathBuf,
}

impl JournalBackend {
    /// Loads the last snapshot, then replays the journal written since.
    pub fn open(journal_dir: &Path, snapshot_path: &Path) -> anyhow::Result<Self> {
        let users = DashMap::new();

        if let Some(snapshot) = IdentitySnapshot::load(snapshot_path)? {
            tracing::info!(
                users = snapshot.users.len(),
                "Loaded identity snapshot from {}",
                snapshot.timestamp
            );
            for (api_key, user) in snapshot.users {
                users.insert(api_key, user);
            }
        }

        let (journal, entries) = JournalWriter::open(journal_dir)?;
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Replaying identity journal");
        }
        for entry in entries {
            let user = entry.user().clone();
            users.insert(user.api_key.clone(), user);
        }

        Ok(Self {
            users,
            journal: Mutex::new(journal),
            snapshot_path: snapshot_path.to_path_buf(),
        })
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Writes a snapshot of the current state and truncates the journal.
    pub async fn compact(&self) -> anyhow::Result<()> {
        // Writers append and apply under this lock, so nothing lands between
        // the capture and the truncate.
        let mut journal = self.journal.lock().await;
        let users: HashMap<_, _> = self
            .users
            .iter()
            .map(|u| (u.key().clone(), u.value().clone()))
            .collect();
        let count = users.len();

        IdentitySnapshot::capture(users).save(&self.snapshot_path)?;
        let compacted = journal.entry_count();
        journal.truncate()?;

        tracing::info!(users = count, compacted, "Identity snapshot written");
        Ok(())
    }

    async fn record(&self, entry: JournalEntry) -> anyhow::Result<()> {
        let mut journal = self.journal.lock().await;
        self.apply(&mut journal, entry)
    }

    fn apply(&self, journal: &mut JournalWriter, entry: JournalEntry) -> anyhow::Result<()> {
        journal.append(&entry)?;
        let user = entry.user().clone();
        self.users.insert(user.api_key.clone(), user);
        Ok(())
    }
}

#[async_trait]
impl IdentityBackend for JournalBackend {
    async fn insert(&self, user: &UserRecord) -> anyhow::Result<()> {
        self.record(JournalEntry::UserCreated(user.clone())).await
    }

    async fn find_by_api_key(&self, api_key: &str) -> anyhow::Result<Option<UserRecord>> {
        Ok(self.users.get(api_key).map(|u| u.value().clone()))
    }

    async fn update(&self, user: &UserRecord) -> anyhow::Result<()> {
        self.record(JournalEntry::UserUpdated(user.clone())).await
    }

    async fn touch(&self, api_key: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        // Read under the journal lock so a concurrent token update is not
        // overwritten with the record as it was before.
        let mut journal = self.journal.lock().await;
        let Some(mut user) = self.users.get(api_key).map(|u| u.value().clone()) else {
            return Ok(());
        };
        user.last_accessed_at = at;
        self.apply(&mut journal, JournalEntry::UserUpdated(user))
    }
}
