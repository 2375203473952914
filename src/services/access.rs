//! Mode selection, response caching and the private-to-public fallback.
//!
//! Every upstream call goes through one path that picks the client for the
//! requested mode and bounds the call with a deadline. When a private-mode
//! call fails it is reissued once in public mode, as far as the configured
//! [`FallbackPolicy`] allows.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::file::{FileRecord, FolderHop, Listing};
use crate::models::user::ProviderCredentials;
use crate::provider::{ContentStream, DriveConnector, DriveProvider, UpstreamError};
use crate::services::cache::{self, ResponseCache};
use crate::services::deadline::{with_deadline, DeadlineExceeded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Public,
    Private,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Public => "public",
            AccessMode::Private => "private",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(AccessMode::Public),
            "private" => Ok(AccessMode::Private),
            other => Err(format!("Unknown access mode '{}'", other)),
        }
    }
}

/// Which private-mode failures are retried in public mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Any failure, timeouts included.
    AnyError,
    /// Only failures where the provider rejected the credentials.
    AuthorizationOnly,
    Never,
}

impl FallbackPolicy {
    pub fn permits(&self, err: &UpstreamError) -> bool {
        match self {
            FallbackPolicy::AnyError => true,
            FallbackPolicy::AuthorizationOnly => err.is_authorization(),
            FallbackPolicy::Never => false,
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(FallbackPolicy::AnyError),
            "authorization" => Ok(FallbackPolicy::AuthorizationOnly),
            "never" => Ok(FallbackPolicy::Never),
            other => Err(format!("Unknown fallback policy '{}'", other)),
        }
    }
}

/// The client chosen for one request.
#[derive(Clone)]
pub enum UpstreamClient {
    Public(Arc<dyn DriveProvider>),
    Private(Arc<dyn DriveProvider>),
}

impl UpstreamClient {
    pub fn mode(&self) -> AccessMode {
        match self {
            UpstreamClient::Public(_) => AccessMode::Public,
            UpstreamClient::Private(_) => AccessMode::Private,
        }
    }

    pub fn provider(&self) -> Arc<dyn DriveProvider> {
        match self {
            UpstreamClient::Public(p) | UpstreamClient::Private(p) => p.clone(),
        }
    }
}

/// A result together with the mode that actually produced it.
#[derive(Debug, Clone)]
pub struct Served<T> {
    pub value: T,
    pub mode: AccessMode,
    pub fell_back: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    pub listing: Duration,
    pub detail: Duration,
}

pub struct AccessModeResolver {
    connector: Arc<dyn DriveConnector>,
    cache: Arc<ResponseCache>,
    policy: FallbackPolicy,
    deadlines: Deadlines,
}

impl AccessModeResolver {
    pub fn new(
        connector: Arc<dyn DriveConnector>,
        cache: Arc<ResponseCache>,
        policy: FallbackPolicy,
        deadlines: Deadlines,
    ) -> Self {
        Self {
            connector,
            cache,
            policy,
            deadlines,
        }
    }

    pub fn select(
        &self,
        mode: AccessMode,
        credentials: Option<&ProviderCredentials>,
    ) -> Result<UpstreamClient, AppError> {
        match (mode, credentials) {
            (AccessMode::Public, _) => Ok(UpstreamClient::Public(self.connector.public_client())),
            (AccessMode::Private, Some(creds)) => {
                Ok(UpstreamClient::Private(self.connector.private_client(creds)))
            }
            (AccessMode::Private, None) => Err(AppError::Forbidden(
                "Private access requires attached provider credentials".into(),
            )),
        }
    }

    pub async fn fetch_listing(
        &self,
        folder_id: &str,
        mode: AccessMode,
        credentials: Option<&ProviderCredentials>,
        search: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Served<Listing>, AppError> {
        // Paged results are never cached.
        let cached = |mode: AccessMode| -> Option<Listing> {
            if cursor.is_some() {
                return None;
            }
            self.cache
                .get_json(&cache::listing_key(mode, folder_id, search))
        };

        if let Some(listing) = cached(mode) {
            tracing::debug!(folder_id = %folder_id, mode = %mode, "Listing served from cache");
            return Ok(Served {
                value: listing,
                mode,
                fell_back: false,
            });
        }

        let served = self
            .run(
                "listing",
                folder_id,
                mode,
                credentials,
                self.deadlines.listing,
                &cached,
                |p| async move { p.list_children(folder_id, search, cursor).await },
            )
            .await?;

        if cursor.is_none() {
            self.cache.set_json(
                cache::listing_key(served.mode, folder_id, search),
                &served.value,
            );
        }
        Ok(served)
    }

    pub async fn fetch_detail(
        &self,
        file_id: &str,
        mode: AccessMode,
        credentials: Option<&ProviderCredentials>,
    ) -> Result<Served<FileRecord>, AppError> {
        let cached =
            |mode: AccessMode| self.cache.get_json::<FileRecord>(&cache::detail_key(mode, file_id));

        if let Some(record) = cached(mode) {
            tracing::debug!(file_id = %file_id, mode = %mode, "Detail served from cache");
            return Ok(Served {
                value: record,
                mode,
                fell_back: false,
            });
        }

        let served = self
            .run(
                "detail",
                file_id,
                mode,
                credentials,
                self.deadlines.detail,
                &cached,
                |p| async move { p.get_file(file_id).await },
            )
            .await?;

        self.cache
            .set_json(cache::detail_key(served.mode, file_id), &served.value);
        Ok(served)
    }

    /// Metadata lookup for one breadcrumb hop under a caller-chosen deadline.
    /// Hops are cached as [`FolderHop`] under the mode that served them; a
    /// public fallback reuses a cached public hop.
    pub async fn fetch_hop(
        &self,
        folder_id: &str,
        mode: AccessMode,
        credentials: Option<&ProviderCredentials>,
        deadline: Duration,
    ) -> Result<Served<FolderHop>, AppError> {
        let cached =
            |mode: AccessMode| self.cache.get_json::<FolderHop>(&cache::path_key(folder_id, mode));

        if let Some(hop) = cached(mode) {
            return Ok(Served {
                value: hop,
                mode,
                fell_back: false,
            });
        }

        let served = self
            .run("path", folder_id, mode, credentials, deadline, &cached, |p| async move {
                p.get_file(folder_id).await.map(FolderHop::from)
            })
            .await?;

        self.cache
            .set_json(cache::path_key(folder_id, served.mode), &served.value);
        Ok(served)
    }

    /// Opens the raw byte stream of a file. The deadline bounds the time to
    /// the provider's response headers, not the transfer.
    pub async fn fetch_content(
        &self,
        file_id: &str,
        mode: AccessMode,
        credentials: Option<&ProviderCredentials>,
    ) -> Result<Served<ContentStream>, AppError> {
        self.run(
            "content",
            file_id,
            mode,
            credentials,
            self.deadlines.listing,
            &|_: AccessMode| None,
            |p| async move { p.fetch_content(file_id).await },
        )
        .await
    }

    /// `cached` looks up a stored result for a mode. It is consulted before
    /// the public retry; the requested mode's entry is the caller's to check.
    #[allow(clippy::too_many_arguments)]
    async fn run<T, C, F, Fut>(
        &self,
        operation: &'static str,
        target_id: &str,
        mode: AccessMode,
        credentials: Option<&ProviderCredentials>,
        deadline: Duration,
        cached: &C,
        call: F,
    ) -> Result<Served<T>, AppError>
    where
        C: Fn(AccessMode) -> Option<T>,
        F: Fn(Arc<dyn DriveProvider>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let client = self.select(mode, credentials)?;

        let err = match attempt(&client, deadline, &call).await {
            Ok(value) => {
                return Ok(Served {
                    value,
                    mode: client.mode(),
                    fell_back: false,
                })
            }
            Err(err) => err,
        };

        if client.mode() != AccessMode::Private || !self.policy.permits(&err) {
            tracing::warn!(
                operation,
                id = %target_id,
                mode = %client.mode(),
                error = %err,
                "Upstream call failed"
            );
            return Err(err.into());
        }

        tracing::warn!(
            operation,
            id = %target_id,
            error = %err,
            "Private access failed, retrying in public mode"
        );

        if let Some(value) = cached(AccessMode::Public) {
            tracing::debug!(operation, id = %target_id, "Public fallback served from cache");
            return Ok(Served {
                value,
                mode: AccessMode::Public,
                fell_back: true,
            });
        }

        let public = UpstreamClient::Public(self.connector.public_client());
        match attempt(&public, deadline, &call).await {
            Ok(value) => Ok(Served {
                value,
                mode: AccessMode::Public,
                fell_back: true,
            }),
            Err(fallback_err) => {
                tracing::warn!(
                    operation,
                    id = %target_id,
                    private_error = %err,
                    error = %fallback_err,
                    "Public fallback failed"
                );
                Err(fallback_err.into())
            }
        }
    }
}

async fn attempt<T, F, Fut>(
    client: &UpstreamClient,
    deadline: Duration,
    call: &F,
) -> Result<T, UpstreamError>
where
    F: Fn(Arc<dyn DriveProvider>) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    match with_deadline(deadline, call(client.provider())).await {
        Ok(result) => result,
        Err(DeadlineExceeded { after }) => Err(UpstreamError::Timeout(after)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("public".parse::<AccessMode>(), Ok(AccessMode::Public));
        assert_eq!("private".parse::<AccessMode>(), Ok(AccessMode::Private));
        assert!("shared".parse::<AccessMode>().is_err());
    }

    #[test]
    fn test_fallback_policy_permits() {
        let denied = UpstreamError::Denied("nope".into());
        let timeout = UpstreamError::Timeout(Duration::from_secs(1));

        assert!(FallbackPolicy::AnyError.permits(&denied));
        assert!(FallbackPolicy::AnyError.permits(&timeout));
        assert!(FallbackPolicy::AuthorizationOnly.permits(&denied));
        assert!(!FallbackPolicy::AuthorizationOnly.permits(&timeout));
        assert!(!FallbackPolicy::Never.permits(&denied));
    }

    #[test]
    fn test_fallback_policy_parsing() {
        assert_eq!("ANY".parse::<FallbackPolicy>(), Ok(FallbackPolicy::AnyError));
        assert_eq!(
            "authorization".parse::<FallbackPolicy>(),
            Ok(FallbackPolicy::AuthorizationOnly)
        );
        assert!("sometimes".parse::<FallbackPolicy>().is_err());
    }
}
