use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub api_key: String,
    pub provider_access_token: Option<String>,
    pub provider_refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl UserRecord {
    /// True iff both provider tokens are present and non-empty.
    pub fn has_provider_credentials(&self) -> bool {
        let present = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.provider_access_token) && present(&self.provider_refresh_token)
    }

    pub fn provider_credentials(&self) -> Option<ProviderCredentials> {
        if !self.has_provider_credentials() {
            return None;
        }
        Some(ProviderCredentials {
            access_token: self.provider_access_token.clone().unwrap_or_default(),
            refresh_token: self.provider_refresh_token.clone().unwrap_or_default(),
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTokensRequest {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}
