use crate::config::AppConfig;
use crate::persistence::JournalBackend;
use crate::provider::DriveConnector;
use crate::services::access::{AccessModeResolver, Deadlines};
use crate::services::breadcrumbs::BreadcrumbResolver;
use crate::services::cache::ResponseCache;
use crate::services::identity::IdentityStore;
use std::sync::Arc;

/// Everything a handler can reach, built once at start-up.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<ResponseCache>,
    pub identity: Arc<IdentityStore>,
    pub access: Arc<AccessModeResolver>,
    pub breadcrumbs: Arc<BreadcrumbResolver>,
    pub journal: Option<Arc<JournalBackend>>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        connector: Arc<dyn DriveConnector>,
        identity: IdentityStore,
        journal: Option<Arc<JournalBackend>>,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache_ttl()));
        let access = Arc::new(AccessModeResolver::new(
            connector,
            cache.clone(),
            config.fallback_policy,
            Deadlines {
                listing: config.listing_timeout(),
                detail: config.detail_timeout(),
            },
        ));
        let breadcrumbs = Arc::new(BreadcrumbResolver::new(
            access.clone(),
            config.breadcrumb_max_depth,
            config.path_hop_timeout(),
        ));

        Self {
            config: Arc::new(config),
            cache,
            identity: Arc::new(identity),
            access,
            breadcrumbs,
            journal,
            start_time: chrono::Utc::now(),
        }
    }
}
