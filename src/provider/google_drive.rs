use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{ContentStream, DriveConnector, DriveProvider, UpstreamError};
use crate::config::AppConfig;
use crate::models::file::{FileRecord, Listing, Owner};
use crate::models::user::ProviderCredentials;

const FILE_FIELDS: &str = "id,name,mimeType,size,createdTime,modifiedTime,webViewLink,\
webContentLink,thumbnailLink,iconLink,owners(displayName,emailAddress),parents";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Clone)]
struct OAuthClient {
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
    token_url: String,
}

/// Builds Drive v3 clients sharing one connection pool.
#[derive(Clone)]
pub struct GoogleDriveConnector {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    oauth: Option<OAuthClient>,
}

impl GoogleDriveConnector {
    pub fn new(config: &AppConfig) -> Self {
        let oauth = match (&config.oauth_client_id, &config.oauth_client_secret) {
            (Some(id), Some(secret)) => Some(OAuthClient {
                client_id: id.clone(),
                client_secret: secret.clone(),
                redirect_uri: config.oauth_redirect_uri.clone(),
                token_url: config.oauth_token_url.clone(),
            }),
            _ => None,
        };

        if config.drive_api_key.is_none() {
            tracing::warn!("DRIVE_API_KEY not set, public access will be rejected upstream");
        }

        Self {
            http: Client::new(),
            base_url: config.drive_api_base.trim_end_matches('/').to_string(),
            api_key: config.drive_api_key.clone(),
            oauth,
        }
    }
}

impl DriveConnector for GoogleDriveConnector {
    fn public_client(&self) -> Arc<dyn DriveProvider> {
        Arc::new(GoogleDriveClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            auth: DriveAuth::ApiKey(self.api_key.clone()),
            oauth: None,
        })
    }

    fn private_client(&self, credentials: &ProviderCredentials) -> Arc<dyn DriveProvider> {
        Arc::new(GoogleDriveClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            auth: DriveAuth::Bearer(credentials.clone()),
            oauth: self.oauth.clone(),
        })
    }
}

enum DriveAuth {
    ApiKey(Option<String>),
    Bearer(ProviderCredentials),
}

pub struct GoogleDriveClient {
    http: Client,
    base_url: String,
    auth: DriveAuth,
    oauth: Option<OAuthClient>,
}

impl GoogleDriveClient {
    /// Resolves path segments below the API base. Each segment is
    /// percent-encoded, so an id can never step outside its collection.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| UpstreamError::Unavailable(format!("invalid Drive API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|()| UpstreamError::Unavailable("Drive API base cannot hold a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_once(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        access_token: Option<&str>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let mut req = self.http.get(url).query(query);

        match (&self.auth, access_token) {
            (DriveAuth::ApiKey(Some(key)), _) => req = req.query(&[("key", key)]),
            (DriveAuth::ApiKey(None), _) => {}
            (DriveAuth::Bearer(_), Some(token)) => req = req.bearer_auth(token),
            (DriveAuth::Bearer(creds), None) => req = req.bearer_auth(&creds.access_token),
        }

        req.send()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("request to {} failed: {}", path, e)))
    }

    /// Issues a GET and maps the provider status onto [`UpstreamError`].
    /// A credentialed client whose access token is rejected refreshes it once.
    async fn get(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, UpstreamError> {
        let mut resp = self.send_once(segments, query, None).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            if let (DriveAuth::Bearer(creds), Some(oauth)) = (&self.auth, &self.oauth) {
                tracing::debug!(path = %resp.url().path(), "Access token rejected, refreshing");
                // TODO: persist the refreshed access token back to the identity store
                let fresh = self.refresh_access_token(oauth, &creds.refresh_token).await?;
                resp = self.send_once(segments, query, Some(&fresh)).await?;
            }
        }

        check_status(resp).await
    }

    async fn refresh_access_token(
        &self,
        oauth: &OAuthClient,
        refresh_token: &str,
    ) -> Result<String, UpstreamError> {
        let mut form = vec![
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        // Providers that bind tokens to the registered redirect expect it echoed.
        if let Some(redirect_uri) = &oauth.redirect_uri {
            form.push(("redirect_uri", redirect_uri.as_str()));
        }

        let resp = self
            .http
            .post(&oauth.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("token refresh failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::Denied(format!(
                "token refresh rejected with status {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp.json().await.map_err(|e| {
            UpstreamError::Unavailable(format!("failed to parse token response: {}", e))
        })?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl DriveProvider for GoogleDriveClient {
    async fn list_children(
        &self,
        folder_id: &str,
        search: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Listing, UpstreamError> {
        let mut query = vec![
            ("q", children_query(folder_id, search)),
            ("fields", format!("nextPageToken,files({})", FILE_FIELDS)),
            ("pageSize", PAGE_SIZE.to_string()),
            ("orderBy", "folder,name".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("pageToken", cursor.to_string()));
        }

        let list: DriveFileList = self
            .get(&["files"], &query)
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("invalid listing payload: {}", e)))?;

        Ok(Listing {
            files: list.files.into_iter().map(FileRecord::from).collect(),
            next_cursor: list.next_page_token,
        })
    }

    async fn get_file(&self, file_id: &str) -> Result<FileRecord, UpstreamError> {
        let file: DriveFile = self
            .get(&["files", file_id], &[("fields", FILE_FIELDS.to_string())])
            .await?
            .json()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("invalid file payload: {}", e)))?;

        Ok(file.into())
    }

    async fn fetch_content(&self, file_id: &str) -> Result<ContentStream, UpstreamError> {
        let resp = self
            .get(&["files", file_id], &[("alt", "media".to_string())])
            .await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let content_length = resp.content_length();
        let body = resp
            .bytes_stream()
            .map_err(|e| UpstreamError::Unavailable(format!("content stream failed: {}", e)));

        Ok(ContentStream {
            content_type,
            content_length,
            body: Box::pin(body),
        })
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let path = resp.url().path().to_string();
    let detail = resp.text().await.unwrap_or_default();
    let message = format!("{} returned {}: {}", path, status.as_u16(), detail.trim());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Denied(message),
        StatusCode::NOT_FOUND => UpstreamError::NotFound(message),
        _ => UpstreamError::Unavailable(message),
    })
}

/// Drive query selecting the non-trashed children of a folder.
fn children_query(folder_id: &str, search: Option<&str>) -> String {
    let mut q = format!(
        "'{}' in parents and trashed = false",
        escape_query_literal(folder_id)
    );
    if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
        q.push_str(&format!(" and name contains '{}'", escape_query_literal(term)));
    }
    q
}

fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// File resource as Drive v3 serializes it; `size` arrives as a decimal string.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    size: Option<String>,
    created_time: Option<DateTime<Utc>>,
    modified_time: Option<DateTime<Utc>>,
    web_view_link: Option<String>,
    web_content_link: Option<String>,
    thumbnail_link: Option<String>,
    icon_link: Option<String>,
    #[serde(default)]
    owners: Vec<DriveOwner>,
    #[serde(default)]
    parents: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveOwner {
    display_name: String,
    email_address: Option<String>,
}

impl From<DriveFile> for FileRecord {
    fn from(f: DriveFile) -> Self {
        FileRecord {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            size: f.size.and_then(|s| s.parse().ok()),
            created_time: f.created_time,
            modified_time: f.modified_time,
            web_view_link: f.web_view_link,
            web_content_link: f.web_content_link,
            thumbnail_link: f.thumbnail_link,
            icon_link: f.icon_link,
            owners: f
                .owners
                .into_iter()
                .map(|o| Owner {
                    display_name: o.display_name,
                    email_address: o.email_address,
                })
                .collect(),
            parents: f.parents,
        }
    }
}
