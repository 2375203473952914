use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::models::file::FolderPathEntry;
use crate::models::user::ProviderCredentials;
use crate::services::access::{AccessMode, AccessModeResolver};

/// Walks parent links upward from a folder to build its breadcrumb trail.
pub struct BreadcrumbResolver {
    access: Arc<AccessModeResolver>,
    max_depth: usize,
    hop_deadline: Duration,
}

impl BreadcrumbResolver {
    pub fn new(
        access: Arc<AccessModeResolver>,
        max_depth: usize,
        hop_deadline: Duration,
    ) -> Self {
        Self {
            access,
            max_depth,
            hop_deadline,
        }
    }

    /// Root-to-leaf path ending at `folder_id`, at most `max_depth` entries.
    ///
    /// Best effort: an upstream failure ends the walk and the entries gathered
    /// so far are returned, which may be none at all.
    pub async fn resolve_path(
        &self,
        folder_id: &str,
        mode: AccessMode,
        credentials: Option<&ProviderCredentials>,
    ) -> Vec<FolderPathEntry> {
        let mut path = VecDeque::new();
        let mut current = Some(folder_id.to_string());

        for _ in 0..self.max_depth {
            let Some(id) = current.take() else {
                break;
            };

            let hop = match self
                .access
                .fetch_hop(&id, mode, credentials, self.hop_deadline)
                .await
            {
                Ok(served) => served.value,
                Err(e) => {
                    tracing::warn!(
                        folder_id = %folder_id,
                        hop_id = %id,
                        mode = %mode,
                        depth = path.len(),
                        error = %e,
                        "Breadcrumb walk stopped early"
                    );
                    break;
                }
            };

            current = hop.parents.first().cloned();
            path.push_front(FolderPathEntry {
                id: hop.id,
                name: hop.name,
            });
        }

        if current.is_some() {
            tracing::debug!(
                folder_id = %folder_id,
                max_depth = self.max_depth,
                "Breadcrumb walk reached depth limit"
            );
        }

        path.into()
    }
}
