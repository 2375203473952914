//! Upstream file-storage provider seam.
//!
//! [`DriveProvider`] is one authenticated view of the provider; a
//! [`DriveConnector`] hands out the anonymous (public) view or a credentialed
//! (private) view for a user's tokens.

pub mod google_drive;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::models::file::{FileRecord, Listing};
use crate::models::user::ProviderCredentials;

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("deadline of {}ms exceeded", .0.as_millis())]
    Timeout(Duration),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl UpstreamError {
    /// Authorization-class failures: the credentials were rejected.
    pub fn is_authorization(&self) -> bool {
        matches!(self, UpstreamError::Denied(_))
    }
}

/// Raw file bytes as the provider streams them.
pub struct ContentStream {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, UpstreamError>>,
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait DriveProvider: Send + Sync {
    /// One page of the children of `folder_id`. `cursor` is forwarded as-is.
    async fn list_children(
        &self,
        folder_id: &str,
        search: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Listing, UpstreamError>;

    async fn get_file(&self, file_id: &str) -> Result<FileRecord, UpstreamError>;

    async fn fetch_content(&self, file_id: &str) -> Result<ContentStream, UpstreamError>;
}

pub trait DriveConnector: Send + Sync {
    fn public_client(&self) -> Arc<dyn DriveProvider>;

    fn private_client(&self, credentials: &ProviderCredentials) -> Arc<dyn DriveProvider>;
}
