// src/storage/mod.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::google::GoogleClient;
use crate::report::record::DocumentRecord;
use crate::utils::error::{AppError, StorageError};

pub const PROCESSED_INDEX_FILENAME: &str = "_processed.json";
pub const RECORD_CACHE_FILENAME: &str = "_register_cache.json";
const JSON_MIME_TYPE: &str = "application/json";

/// Processing state of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatus {
    pub processed_at: DateTime<Utc>,
    /// Set by an operator to have the next run analyze the file again
    #[serde(default)]
    pub reprocess: bool,
}

/// Which source files have been read, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessedIndex {
    files: BTreeMap<String, FileStatus>,
}

// Older indexes were a bare list of names
#[derive(Deserialize)]
#[serde(untagged)]
enum IndexFile {
    Current { files: BTreeMap<String, FileStatus> },
    Legacy { processed: Vec<String> },
}

impl ProcessedIndex {
    /// Parses a stored index; legacy name lists get `loaded_at` as their timestamp.
    pub fn from_json(bytes: &[u8], loaded_at: DateTime<Utc>) -> Result<Self, StorageError> {
        let files = match serde_json::from_slice::<IndexFile>(bytes)? {
            IndexFile::Current { files } => files,
            IndexFile::Legacy { processed } => processed
                .into_iter()
                .map(|name| (name, FileStatus { processed_at: loaded_at, reprocess: false }))
                .collect(),
        };
        Ok(Self { files })
    }

    pub fn to_json(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn status(&self, name: &str) -> Option<&FileStatus> {
        self.files.get(name)
    }

    /// Unknown files and files flagged for reprocessing are due.
    pub fn should_process(&self, name: &str) -> bool {
        self.files.get(name).map_or(true, |status| status.reprocess)
    }

    /// Records a successful analysis. Repeating the call changes nothing; after a
    /// reprocess request the timestamp moves to `now` and the flag is cleared.
    pub fn mark_processed(&mut self, name: &str, now: DateTime<Utc>) {
        match self.files.get_mut(name) {
            Some(status) if status.reprocess => {
                status.processed_at = now;
                status.reprocess = false;
            }
            Some(_) => {}
            None => {
                self.files.insert(name.to_string(), FileStatus { processed_at: now, reprocess: false });
            }
        }
    }

    /// Flags a processed file for another analysis. Returns false for unknown files,
    /// which are processed anyway.
    pub fn request_reprocess(&mut self, name: &str) -> bool {
        match self.files.get_mut(name) {
            Some(status) => {
                status.reprocess = true;
                true
            }
            None => false,
        }
    }

    /// Forgets a file entirely, so the next run treats it as new.
    pub fn mark_unread(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

/// Records extracted from one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub company_name: Option<String>,
    pub records: Vec<DocumentRecord>,
}

/// Extraction results of every processed file, so a run can publish files it skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCache {
    #[serde(default)]
    files: BTreeMap<String, CachedFile>,
}

impl RecordCache {
    pub fn from_json(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Stores a file's records, replacing whatever an earlier analysis left.
    pub fn insert(&mut self, name: &str, entry: CachedFile) {
        if self.files.insert(name.to_string(), entry).is_some() {
            tracing::debug!("Replaced cached records for {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&CachedFile> {
        self.files.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<CachedFile> {
        self.files.remove(name)
    }

    /// All records, files in name order, records in extraction order.
    pub fn records(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.files.values().flat_map(|entry| entry.records.iter())
    }
}

/// Reads and writes the run state kept next to the results in the `result` folder.
pub struct ResultFolderStore<'a> {
    client: &'a GoogleClient,
    folder_id: String,
}

impl<'a> ResultFolderStore<'a> {
    pub fn new(client: &'a GoogleClient, folder_id: &str) -> Self {
        Self { client, folder_id: folder_id.to_string() }
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    async fn load_bytes(&self, filename: &str) -> Result<Option<Vec<u8>>, AppError> {
        match self.client.find_file_by_name(&self.folder_id, filename).await? {
            Some(file) => Ok(Some(self.client.download_file(&file).await?)),
            None => Ok(None),
        }
    }

    /// A missing or unreadable index starts empty.
    pub async fn load_index(&self, now: DateTime<Utc>) -> Result<ProcessedIndex, AppError> {
        let Some(bytes) = self.load_bytes(PROCESSED_INDEX_FILENAME).await? else {
            return Ok(ProcessedIndex::default());
        };
        match ProcessedIndex::from_json(&bytes, now) {
            Ok(index) => {
                tracing::info!("Loaded processed index with {} files", index.len());
                Ok(index)
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable {}: {}", PROCESSED_INDEX_FILENAME, e);
                Ok(ProcessedIndex::default())
            }
        }
    }

    /// A missing or unreadable cache starts empty.
    pub async fn load_cache(&self) -> Result<RecordCache, AppError> {
        let Some(bytes) = self.load_bytes(RECORD_CACHE_FILENAME).await? else {
            return Ok(RecordCache::default());
        };
        match RecordCache::from_json(&bytes) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                tracing::warn!("Ignoring unreadable {}: {}", RECORD_CACHE_FILENAME, e);
                Ok(RecordCache::default())
            }
        }
    }

    pub async fn save_index(&self, index: &ProcessedIndex) -> Result<(), AppError> {
        let bytes = index.to_json()?;
        self.client
            .upload_bytes(&self.folder_id, PROCESSED_INDEX_FILENAME, bytes, JSON_MIME_TYPE)
            .await?;
        Ok(())
    }

    pub async fn save_cache(&self, cache: &RecordCache) -> Result<(), AppError> {
        let bytes = cache.to_json()?;
        self.client
            .upload_bytes(&self.folder_id, RECORD_CACHE_FILENAME, bytes, JSON_MIME_TYPE)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::table::tests::record;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_unknown_files_are_due() {
        let index = ProcessedIndex::default();
        assert!(index.should_process("a.pdf"));
        assert!(index.status("a.pdf").is_none());
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let mut index = ProcessedIndex::default();
        index.mark_processed("a.pdf", at(1));
        let once = index.clone();
        index.mark_processed("a.pdf", at(2));

        assert_eq!(index, once);
        assert_eq!(index.status("a.pdf").unwrap().processed_at, at(1));
        assert!(!index.should_process("a.pdf"));
    }

    #[test]
    fn test_reprocess_request_bypasses_skip() {
        let mut index = ProcessedIndex::default();
        assert!(!index.request_reprocess("a.pdf"));

        index.mark_processed("a.pdf", at(1));
        assert!(index.request_reprocess("a.pdf"));
        assert!(index.should_process("a.pdf"));

        index.mark_processed("a.pdf", at(3));
        let status = index.status("a.pdf").unwrap();
        assert_eq!(status.processed_at, at(3));
        assert!(!status.reprocess);
        assert!(!index.should_process("a.pdf"));
    }

    #[test]
    fn test_mark_unread_forgets_file() {
        let mut index = ProcessedIndex::default();
        index.mark_processed("a.pdf", at(1));
        assert!(index.mark_unread("a.pdf"));
        assert!(!index.mark_unread("a.pdf"));
        assert!(index.should_process("a.pdf"));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_index_json_round_trip_and_legacy() {
        let mut index = ProcessedIndex::default();
        index.mark_processed("b.pdf", at(1));
        index.mark_processed("a.pdf", at(2));
        index.request_reprocess("b.pdf");
        let parsed = ProcessedIndex::from_json(&index.to_json().unwrap(), at(9)).unwrap();
        assert_eq!(parsed, index);

        let legacy = br#"{"processed": ["x.pdf", "y.pdf"]}"#;
        let parsed = ProcessedIndex::from_json(legacy, at(9)).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.status("x.pdf").unwrap().processed_at, at(9));
    }

    #[test]
    fn test_reprocessing_replaces_cached_records() {
        let mut cache = RecordCache::default();
        cache.insert(
            "a.pdf",
            CachedFile { company_name: None, records: vec![record("A", "a.pdf", 1), record("A", "a.pdf", 2)] },
        );
        cache.insert("b.pdf", CachedFile { company_name: None, records: vec![record("B", "b.pdf", 5)] });

        let mut index = ProcessedIndex::default();
        index.mark_processed("a.pdf", at(1));
        index.mark_unread("a.pdf");
        assert!(index.should_process("a.pdf"));

        cache.insert("a.pdf", CachedFile { company_name: None, records: vec![record("A", "a.pdf", 3)] });

        let issued: Vec<i64> = cache.records().filter_map(|r| r.issued_shares).collect();
        assert_eq!(issued, vec![3, 5]);
    }

    #[test]
    fn test_cache_json_round_trip() {
        let mut cache = RecordCache::default();
        cache.insert("a.pdf", CachedFile { company_name: Some("주식회사 A".to_string()), records: vec![record("A", "a.pdf", 1)] });
        let parsed = RecordCache::from_json(&cache.to_json().unwrap()).unwrap();
        assert_eq!(parsed, cache);
    }

    #[test]
    fn test_cache_of_sheet_rows_is_rejected() {
        // Rows cached as rendered sheet cells carry no records to publish
        let rows = br#"{"files": {"a.pdf": {"company_name": "A", "rows": [["A"]], "red_rows": []}}}"#;
        let err = RecordCache::from_json(rows).unwrap_err();
        assert!(err.to_string().contains("records"));
    }
}
