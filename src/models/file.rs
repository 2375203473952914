use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a provider file or folder at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_link: Option<String>,
    #[serde(default)]
    pub owners: Vec<Owner>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl FileRecord {
    pub const FOLDER_MIME_TYPE: &'static str = "application/vnd.google-apps.folder";

    pub fn is_folder(&self) -> bool {
        self.mime_type == Self::FOLDER_MIME_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
}

/// One page of a folder listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub files: Vec<FileRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A single breadcrumb, ordered root-to-leaf in a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPathEntry {
    pub id: String,
    pub name: String,
}

/// The part of a folder the breadcrumb walk needs per hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderHop {
    pub id: String,
    pub name: String,
    pub parents: Vec<String>,
}

impl From<FileRecord> for FolderHop {
    fn from(record: FileRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            parents: record.parents,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListingQuery {
    pub search: Option<String>,
    pub cursor: Option<String>,
}
