// src/google/models.rs
#![allow(dead_code)]
use serde::{Deserialize, Serialize};

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const PDF_MIME_TYPE: &str = "application/pdf";
const GOOGLE_APPS_MIME_PREFIX: &str = "application/vnd.google-apps.";

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: Option<u64>,
}

/// A Drive v3 file resource, limited to the fields we request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    pub modified_time: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl DriveFile {
    pub fn is_pdf(&self) -> bool {
        self.mime_type == PDF_MIME_TYPE || self.name.to_lowercase().ends_with(".pdf")
    }

    /// Native Google formats have no media content and must be exported
    pub fn is_google_native(&self) -> bool {
        self.mime_type.starts_with(GOOGLE_APPS_MIME_PREFIX)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSpreadsheet {
    pub spreadsheet_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Spreadsheet {
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
pub struct Sheet {
    pub properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProperties {
    pub sheet_id: i64,
    pub title: String,
}

/// Where the published result lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetMeta {
    pub id: String,
    pub url: String,
    pub title: String,
}

impl SheetMeta {
    pub fn new(id: String, title: String) -> Self {
        let url = format!("https://docs.google.com/spreadsheets/d/{}", id);
        Self { id, url, title }
    }
}
