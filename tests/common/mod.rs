#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use drive_gateway::config::AppConfig;
use drive_gateway::models::file::{FileRecord, Listing};
use drive_gateway::models::user::ProviderCredentials;
use drive_gateway::provider::{ContentStream, DriveConnector, DriveProvider, UpstreamError};
use drive_gateway::services::access::FallbackPolicy;

pub const PAGE_SIZE: usize = 2;

pub fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        drive_api_key: Some("test-drive-key".to_string()),
        drive_api_base: "http://127.0.0.1:9".to_string(),
        oauth_client_id: None,
        oauth_client_secret: None,
        oauth_redirect_uri: None,
        oauth_token_url: "http://127.0.0.1:9/token".to_string(),
        data_dir: None,
        snapshot_interval_secs: 3600,
        listing_timeout_ms: 1_000,
        detail_timeout_ms: 500,
        path_hop_timeout_ms: 300,
        identity_timeout_ms: 200,
        cache_ttl_secs: 300,
        breadcrumb_max_depth: 5,
        fallback_policy: FallbackPolicy::AnyError,
        log_level: "error".to_string(),
    }
}

pub fn folder(id: &str, name: &str, parent: Option<&str>) -> FileRecord {
    record(id, name, FileRecord::FOLDER_MIME_TYPE, parent)
}

pub fn file(id: &str, name: &str, parent: &str) -> FileRecord {
    let mut f = record(id, name, "text/plain", Some(parent));
    f.size = Some(11);
    f
}

fn record(id: &str, name: &str, mime_type: &str, parent: Option<&str>) -> FileRecord {
    FileRecord {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        size: None,
        created_time: None,
        modified_time: None,
        web_view_link: Some(format!("https://drive.example/view/{}", id)),
        web_content_link: None,
        thumbnail_link: None,
        icon_link: None,
        owners: Vec::new(),
        parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
    }
}

/// In-memory provider with a call counter and injectable failures.
#[derive(Default)]
pub struct MockDrive {
    files: Mutex<HashMap<String, FileRecord>>,
    failure: Mutex<Option<UpstreamError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockDrive {
    pub fn with_files(files: Vec<FileRecord>) -> Arc<Self> {
        let drive = Self::default();
        {
            let mut map = drive.files.lock().unwrap();
            for f in files {
                map.insert(f.id.clone(), f);
            }
        }
        Arc::new(drive)
    }

    pub fn fail_with(&self, err: UpstreamError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rename(&self, id: &str, name: &str) {
        if let Some(f) = self.files.lock().unwrap().get_mut(id) {
            f.name = name.to_string();
        }
    }

    async fn enter(&self) -> Result<(), UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DriveProvider for MockDrive {
    async fn list_children(
        &self,
        folder_id: &str,
        search: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Listing, UpstreamError> {
        self.enter().await?;

        let mut children: Vec<FileRecord> = self
            .files
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.parents.iter().any(|p| p == folder_id))
            .filter(|f| search.map(|s| f.name.contains(s)).unwrap_or(true))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));

        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let files: Vec<FileRecord> = children.iter().skip(offset).take(PAGE_SIZE).cloned().collect();
        let next_cursor = (offset + PAGE_SIZE < children.len()).then(|| (offset + PAGE_SIZE).to_string());

        Ok(Listing { files, next_cursor })
    }

    async fn get_file(&self, file_id: &str) -> Result<FileRecord, UpstreamError> {
        self.enter().await?;
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| UpstreamError::NotFound(format!("file {}", file_id)))
    }

    async fn fetch_content(&self, file_id: &str) -> Result<ContentStream, UpstreamError> {
        let record = self.get_file(file_id).await?;
        let payload = Bytes::from(format!("contents of {}", record.name));
        Ok(ContentStream {
            content_type: Some(record.mime_type),
            content_length: Some(payload.len() as u64),
            body: Box::pin(futures_util::stream::once(async move { Ok(payload) })),
        })
    }
}

/// Hands out one fixed drive per mode.
pub struct MockConnector {
    pub public: Arc<MockDrive>,
    pub private: Arc<MockDrive>,
}

impl MockConnector {
    pub fn new(public: Arc<MockDrive>, private: Arc<MockDrive>) -> Arc<Self> {
        Arc::new(Self { public, private })
    }

    /// Both modes see the same files through separate counters.
    pub fn mirrored(files: Vec<FileRecord>) -> Arc<Self> {
        Self::new(MockDrive::with_files(files.clone()), MockDrive::with_files(files))
    }
}

impl DriveConnector for MockConnector {
    fn public_client(&self) -> Arc<dyn DriveProvider> {
        self.public.clone()
    }

    fn private_client(&self, _credentials: &ProviderCredentials) -> Arc<dyn DriveProvider> {
        self.private.clone()
    }
}

pub fn credentials() -> ProviderCredentials {
    ProviderCredentials {
        access_token: "access".to_string(),
        refresh_token: "refresh".to_string(),
    }
}

/// root > a > b > c, with two files and a subfolder in `c`.
pub fn sample_tree() -> Vec<FileRecord> {
    vec![
        folder("root", "My Drive", None),
        folder("a", "Projects", Some("root")),
        folder("b", "2024", Some("a")),
        folder("c", "Reports", Some("b")),
        file("f1", "alpha.txt", "c"),
        file("f2", "beta.txt", "c"),
        folder("d", "archive", Some("c")),
    ]
}

/// A straight parent chain `n0 > n1 > ... > n{depth-1}`.
pub fn chain(depth: usize) -> Vec<FileRecord> {
    (0..depth)
        .map(|i| {
            let parent = if i == 0 { None } else { Some(format!("n{}", i - 1)) };
            folder(&format!("n{}", i), &format!("Level {}", i), parent.as_deref())
        })
        .collect()
}
