// src/google/client.rs
use reqwest::{header, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::google::auth::{self, ServiceAccountKey, DRIVE_SCOPE, SHEETS_SCOPE};
use crate::google::models::{
    CreatedSpreadsheet, DriveFile, FileList, Spreadsheet, FOLDER_MIME_TYPE, PDF_MIME_TYPE,
};
use crate::utils::error::GoogleError;

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime";

/// Authorized client for the Drive v3 and Sheets v4 endpoints the run needs.
pub struct GoogleClient {
    http: reqwest::Client,
    token: String,
}

/// Turns non-2xx responses into `GoogleError::Http`, keeping the body for the operator.
async fn check_status(response: Response) -> Result<Response, GoogleError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    tracing::error!("HTTP error status: {} for URL: {}", status, url);
    Err(GoogleError::Http { status, body })
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn parse_url(raw: &str) -> Result<Url, GoogleError> {
    Url::parse(raw).map_err(|e| GoogleError::Parse(format!("invalid URL {}: {}", raw, e)))
}

// drive/v3/files/{id}, with the id percent-encoded as one segment
fn file_url(file_id: &str) -> Result<Url, GoogleError> {
    let mut url = parse_url(DRIVE_FILES_URL)?;
    url.path_segments_mut()
        .map_err(|_| GoogleError::Parse("Drive URL cannot be a base".to_string()))?
        .push(file_id);
    Ok(url)
}

impl GoogleClient {
    /// Builds the HTTP client and exchanges the service-account key for a token
    /// covering both Drive and Sheets.
    pub async fn connect(key: &ServiceAccountKey) -> Result<Self, GoogleError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let token = auth::fetch_access_token(&http, key, &[DRIVE_SCOPE, SHEETS_SCOPE]).await?;
        Ok(Self { http, token })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, GoogleError> {
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GoogleError::Parse(e.to_string()))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: Url,
        body: &Value,
    ) -> Result<T, GoogleError> {
        let response = self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| GoogleError::Parse(e.to_string()))
    }

    async fn query_files(&self, q: &str, page_token: Option<&str>) -> Result<FileList, GoogleError> {
        let mut url = parse_url(DRIVE_FILES_URL)?;
        url.query_pairs_mut()
            .append_pair("q", q)
            .append_pair("fields", &format!("nextPageToken, files({})", FILE_FIELDS))
            .append_pair("includeItemsFromAllDrives", "true")
            .append_pair("supportsAllDrives", "true")
            .append_pair("corpora", "allDrives");
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        self.get_json(url).await
    }

    /// Lists every non-trashed file directly inside a folder, following pagination.
    pub async fn list_files_in_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>, GoogleError> {
        let q = format!("'{}' in parents and trashed=false", escape_query_value(folder_id));
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.query_files(&q, page_token.as_deref()).await?;
            tracing::debug!("Listed {} files (page token: {:?})", page.files.len(), page_token);
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::info!("Folder {} holds {} files", folder_id, files.len());
        Ok(files)
    }

    pub async fn find_file_by_name(&self, folder_id: &str, name: &str) -> Result<Option<DriveFile>, GoogleError> {
        let q = format!(
            "'{}' in parents and trashed=false and name = '{}'",
            escape_query_value(folder_id),
            escape_query_value(name)
        );
        let list = self.query_files(&q, None).await?;
        Ok(list.files.into_iter().next())
    }

    /// Returns the id of the named sub-folder, creating it when missing.
    pub async fn find_or_create_folder(&self, parent_id: &str, folder_name: &str) -> Result<String, GoogleError> {
        let q = format!(
            "'{}' in parents and trashed=false and mimeType = '{}' and name = '{}'",
            escape_query_value(parent_id),
            FOLDER_MIME_TYPE,
            escape_query_value(folder_name)
        );
        if let Some(folder) = self.query_files(&q, None).await?.files.into_iter().next() {
            return Ok(folder.id);
        }

        tracing::info!("Creating folder '{}' under {}", folder_name, parent_id);
        let mut url = parse_url(DRIVE_FILES_URL)?;
        url.query_pairs_mut()
            .append_pair("fields", "id")
            .append_pair("supportsAllDrives", "true");
        let metadata = json!({
            "name": folder_name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let created: DriveFile = self.send_json(reqwest::Method::POST, url, &metadata).await?;
        Ok(created.id)
    }

    /// Display name of a folder; falls back to its id when the name is empty.
    pub async fn folder_name(&self, folder_id: &str) -> Result<String, GoogleError> {
        let mut url = file_url(folder_id)?;
        url.query_pairs_mut()
            .append_pair("fields", "id,name")
            .append_pair("supportsAllDrives", "true");
        let meta: DriveFile = self.get_json(url).await?;
        if meta.name.is_empty() {
            Ok(folder_id.to_string())
        } else {
            Ok(meta.name)
        }
    }

    /// Downloads a file's bytes; native Google formats are exported as PDF.
    pub async fn download_file(&self, file: &DriveFile) -> Result<Vec<u8>, GoogleError> {
        let mut url = parse_url(DRIVE_FILES_URL)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GoogleError::Parse("Drive URL cannot be a base".to_string()))?;
            segments.push(&file.id);
            if file.is_google_native() {
                segments.push("export");
            }
        }
        if file.is_google_native() {
            url.query_pairs_mut().append_pair("mimeType", PDF_MIME_TYPE);
        } else {
            url.query_pairs_mut()
                .append_pair("alt", "media")
                .append_pair("supportsAllDrives", "true");
        }

        tracing::info!("Downloading {} ({})", file.name, file.id);
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        tracing::debug!("Downloaded {} bytes for {}", bytes.len(), file.name);
        Ok(bytes.to_vec())
    }

    async fn upload_media(&self, file_id: &str, content: Vec<u8>, mime_type: &str) -> Result<(), GoogleError> {
        let mut url = parse_url(DRIVE_UPLOAD_URL)?;
        url.path_segments_mut()
            .map_err(|_| GoogleError::Parse("Drive upload URL cannot be a base".to_string()))?
            .push(file_id);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("supportsAllDrives", "true");

        let response = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .header(header::CONTENT_TYPE, mime_type)
            .body(content)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Writes `content` as `filename` inside `parent_id`, overwriting a same-named file.
    pub async fn upload_bytes(
        &self,
        parent_id: &str,
        filename: &str,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<String, GoogleError> {
        let file_id = match self.find_file_by_name(parent_id, filename).await? {
            Some(existing) => existing.id,
            None => {
                let mut url = parse_url(DRIVE_FILES_URL)?;
                url.query_pairs_mut()
                    .append_pair("fields", "id")
                    .append_pair("supportsAllDrives", "true");
                let metadata = json!({
                    "name": filename,
                    "mimeType": mime_type,
                    "parents": [parent_id],
                });
                let created: DriveFile = self.send_json(reqwest::Method::POST, url, &metadata).await?;
                created.id
            }
        };

        self.upload_media(&file_id, content, mime_type).await?;
        tracing::info!("Uploaded {} ({} in {})", filename, file_id, parent_id);
        Ok(file_id)
    }

    /// Moves a file so that `folder_id` is its only parent.
    pub async fn move_file_to_folder(&self, file_id: &str, folder_id: &str) -> Result<(), GoogleError> {
        let mut url = file_url(file_id)?;
        let mut meta_url = url.clone();
        meta_url
            .query_pairs_mut()
            .append_pair("fields", "id,parents")
            .append_pair("supportsAllDrives", "true");
        let current: DriveFile = self.get_json(meta_url).await?;

        url.query_pairs_mut()
            .append_pair("addParents", folder_id)
            .append_pair("removeParents", &current.parents.join(","))
            .append_pair("fields", "id,parents")
            .append_pair("supportsAllDrives", "true");
        let _: DriveFile = self.send_json(reqwest::Method::PATCH, url, &json!({})).await?;
        tracing::debug!("Moved {} into {}", file_id, folder_id);
        Ok(())
    }

    /// Permanently deletes a file the service account owns.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), GoogleError> {
        let mut url = file_url(file_id)?;
        url.query_pairs_mut().append_pair("supportsAllDrives", "true");
        let response = self.http.delete(url).bearer_auth(&self.token).send().await?;
        check_status(response).await?;
        tracing::info!("Deleted {}", file_id);
        Ok(())
    }

    /// Creates a spreadsheet with a single named tab and returns its id.
    pub async fn create_spreadsheet(&self, title: &str, tab_title: &str) -> Result<String, GoogleError> {
        let mut url = parse_url(SHEETS_URL)?;
        url.query_pairs_mut().append_pair("fields", "spreadsheetId");
        let body = json!({
            "properties": { "title": title },
            "sheets": [{ "properties": { "title": tab_title } }],
        });
        let created: CreatedSpreadsheet = self.send_json(reqwest::Method::POST, url, &body).await?;
        tracing::info!("Created spreadsheet '{}' ({})", title, created.spreadsheet_id);
        Ok(created.spreadsheet_id)
    }

    /// Writes raw (uninterpreted) values starting at `range`, e.g. `Sheet1!A1`.
    pub async fn update_values(
        &self,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<(), GoogleError> {
        let mut url = parse_url(SHEETS_URL)?;
        url.path_segments_mut()
            .map_err(|_| GoogleError::Parse("Sheets URL cannot be a base".to_string()))?
            .push(spreadsheet_id)
            .push("values")
            .push(range);
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = json!({ "range": range, "values": values });
        let _: Value = self.send_json(reqwest::Method::PUT, url, &body).await?;
        tracing::info!("Wrote {} rows to {}", values.len(), range);
        Ok(())
    }

    pub async fn first_sheet_id(&self, spreadsheet_id: &str) -> Result<i64, GoogleError> {
        let mut url = parse_url(SHEETS_URL)?;
        url.path_segments_mut()
            .map_err(|_| GoogleError::Parse("Sheets URL cannot be a base".to_string()))?
            .push(spreadsheet_id);
        url.query_pairs_mut().append_pair("fields", "sheets.properties");
        let spreadsheet: Spreadsheet = self.get_json(url).await?;
        spreadsheet
            .sheets
            .first()
            .map(|sheet| sheet.properties.sheet_id)
            .ok_or_else(|| GoogleError::Parse(format!("spreadsheet {} has no sheets", spreadsheet_id)))
    }

    pub async fn batch_update(&self, spreadsheet_id: &str, requests: Vec<Value>) -> Result<(), GoogleError> {
        if requests.is_empty() {
            return Ok(());
        }
        let url = parse_url(&format!("{}/{}:batchUpdate", SHEETS_URL, spreadsheet_id))?;
        let count = requests.len();
        let _: Value = self
            .send_json(reqwest::Method::POST, url, &json!({ "requests": requests }))
            .await?;
        tracing::debug!("Applied {} format requests", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query_value() {
        assert_eq!(escape_query_value("it's"), "it\\'s");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_file_url_encodes_id_as_one_segment() {
        let url = file_url("abc/def").unwrap();
        assert_eq!(url.as_str(), "https://www.googleapis.com/drive/v3/files/abc%2Fdef");
    }
}
