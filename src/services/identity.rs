//! API keys and the provider credentials attached to them.
//!
//! Records go to the durable backend when one is configured and reachable,
//! otherwise to a process-local map. The two are never reconciled: a record
//! written to the map during a backend outage stays invisible to lookups once
//! the backend answers again, and is lost on restart.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::models::user::UserRecord;

#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn insert(&self, user: &UserRecord) -> anyhow::Result<()>;

    async fn find_by_api_key(&self, api_key: &str) -> anyhow::Result<Option<UserRecord>>;

    async fn update(&self, user: &UserRecord) -> anyhow::Result<()>;

    /// Sets `last_accessed_at` on the stored record and nothing else. Unknown
    /// keys are ignored.
    async fn touch(&self, api_key: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Where a record was read from or written to.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted<T> {
    Durable(T),
    Fallback(T),
}

impl<T> Persisted<T> {
    pub fn is_durable(&self) -> bool {
        matches!(self, Persisted::Durable(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Persisted::Durable(v) | Persisted::Fallback(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Persisted::Durable(v) | Persisted::Fallback(v) => v,
        }
    }

    pub fn storage(&self) -> &'static str {
        match self {
            Persisted::Durable(_) => "durable",
            Persisted::Fallback(_) => "fallback",
        }
    }
}

pub struct IdentityStore {
    durable: Option<Arc<dyn IdentityBackend>>,
    fallback: DashMap<String, UserRecord>,
}

impl IdentityStore {
    pub fn new(durable: Option<Arc<dyn IdentityBackend>>) -> Self {
        if durable.is_none() {
            tracing::warn!("No durable identity backend configured, keys live in memory only");
        }
        Self {
            durable,
            fallback: DashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn has_durable_backend(&self) -> bool {
        self.durable.is_some()
    }

    /// Issues a fresh API key. Emails are not deduplicated: every call yields
    /// a new record.
    pub async fn create_user(&self, email: &str) -> Persisted<UserRecord> {
        let now = Utc::now();
        let user = UserRecord {
            id: random_hex::<16>(),
            email: email.to_string(),
            api_key: random_hex::<32>(),
            provider_access_token: None,
            provider_refresh_token: None,
            created_at: now,
            last_accessed_at: now,
        };

        let stored = self.write(user, true).await;
        tracing::info!(
            user_id = %stored.get().id,
            storage = stored.storage(),
            "API key issued"
        );
        stored
    }

    /// Resolves an API key and stamps `last_accessed_at` on a hit. Only the
    /// timestamp is written back.
    pub async fn get_user_by_api_key(&self, api_key: &str) -> Option<UserRecord> {
        let located = self.locate(api_key).await?;
        let now = Utc::now();

        if located.is_durable() {
            if let Some(backend) = &self.durable {
                if let Err(e) = backend.touch(api_key, now).await {
                    tracing::warn!(
                        user_id = %located.get().id,
                        error = %e,
                        "Failed to record key access in durable backend"
                    );
                }
            }
        } else if let Some(mut entry) = self.fallback.get_mut(api_key) {
            entry.last_accessed_at = now;
        }

        let mut user = located.into_inner();
        user.last_accessed_at = now;
        Some(user)
    }

    /// Overwrites the provider tokens of an existing key. `None` if the key
    /// is unknown. Empty tokens are stored as given; such a record does not
    /// count as having provider credentials.
    pub async fn add_provider_tokens(
        &self,
        api_key: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Option<Persisted<UserRecord>> {
        let located = self.locate(api_key).await?;
        let from_durable = located.is_durable();

        let mut user = located.into_inner();
        user.provider_access_token = Some(access_token.to_string());
        user.provider_refresh_token = Some(refresh_token.to_string());
        user.last_accessed_at = Utc::now();

        let stored = if from_durable {
            self.write(user, false).await
        } else {
            self.fallback.insert(user.api_key.clone(), user.clone());
            Persisted::Fallback(user)
        };

        tracing::info!(
            user_id = %stored.get().id,
            storage = stored.storage(),
            "Provider tokens attached"
        );
        Some(stored)
    }

    /// Durable backend first; the fallback map only when there is no backend
    /// or the backend read fails.
    async fn locate(&self, api_key: &str) -> Option<Persisted<UserRecord>> {
        if let Some(backend) = &self.durable {
            match backend.find_by_api_key(api_key).await {
                Ok(found) => return found.map(Persisted::Durable),
                Err(e) => {
                    tracing::warn!(error = %e, "Durable identity lookup failed, using fallback");
                }
            }
        }

        self.fallback
            .get(api_key)
            .map(|u| Persisted::Fallback(u.value().clone()))
    }

    async fn write(&self, user: UserRecord, create: bool) -> Persisted<UserRecord> {
        if let Some(backend) = &self.durable {
            let result = if create {
                backend.insert(&user).await
            } else {
                backend.update(&user).await
            };
            match result {
                Ok(()) => return Persisted::Durable(user),
                Err(e) => {
                    tracing::warn!(
                        user_id = %user.id,
                        error = %e,
                        "Durable identity write failed, keeping record in memory"
                    );
                }
            }
        }

        self.fallback.insert(user.api_key.clone(), user.clone());
        Persisted::Fallback(user)
    }
}

fn random_hex<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
