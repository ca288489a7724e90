// src/pipeline.rs
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::extractors::register::{DocumentExtract, RegisterExtractor, DEBUG_PATTERNS};
use crate::google::models::SheetMeta;
use crate::google::{DriveFile, GoogleClient};
use crate::pdf;
use crate::report::record::{build_records, DocumentRecord};
use crate::report::sheet::{result_sheet_title, SheetLayout, SHEET_TAB_TITLE};
use crate::report::table::ResultTable;
use crate::storage::{CachedFile, ProcessedIndex, RecordCache, ResultFolderStore};
use crate::utils::error::{AppError, ExtractError, GoogleError};
use crate::utils::text_debug;

pub const RESULT_FOLDER_NAME: &str = "result";

/// What the operator asked for in this run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub folder_id: String,
    /// File names to analyze again even though they were processed before
    pub reanalyze: BTreeSet<String>,
    /// File names to drop from the index and cache before the run
    pub forget: BTreeSet<String>,
    pub debug_dir: Option<PathBuf>,
    pub run_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    AlreadyProcessed,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub filename: String,
    pub company_name: Option<String>,
    pub status: FileOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub total: usize,
    pub already_processed: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub counts: RunCounts,
    pub files: Vec<FileReport>,
    pub result_folder_id: String,
    pub sheet: SheetMeta,
}

/// Extracts, validates and turns one document's text into rows. With a debug
/// directory, the annotated text and the parsed blocks are written there as well.
pub fn analyze_document(
    extractor: &RegisterExtractor,
    filename: &str,
    text: &str,
    debug_dir: Option<&Path>,
) -> Result<Vec<DocumentRecord>, ExtractError> {
    let extract = extractor.extract(text);
    if let Some(dir) = debug_dir {
        write_debug_output(dir, filename, text, extract.as_ref().ok());
    }
    Ok(build_records(filename, &extract?))
}

fn write_debug_output(debug_dir: &Path, filename: &str, text: &str, extract: Option<&DocumentExtract>) {
    let stem = filename.replace('/', "_");
    let written = std::fs::create_dir_all(debug_dir)
        .map_err(AppError::from)
        .and_then(|_| {
            text_debug::create_debug_text(text, &debug_dir.join(format!("{}.txt", stem)), DEBUG_PATTERNS)
        })
        .and_then(|_| match extract {
            Some(extract) => text_debug::save_debug_json(extract, &debug_dir.join(format!("{}.blocks.json", stem))),
            None => Ok(()),
        });
    if let Err(e) = written {
        tracing::warn!("Failed to write debug output for {}: {}", filename, e);
    }
}

/// Processed index, record cache and tallies of one run, updated file by file.
#[derive(Debug, Default)]
pub struct RunState {
    pub index: ProcessedIndex,
    pub cache: RecordCache,
    pub counts: RunCounts,
}

impl RunState {
    pub fn new(index: ProcessedIndex, cache: RecordCache) -> Self {
        Self { index, cache, counts: RunCounts::default() }
    }

    /// Applies `--forget` before `--reanalyze`, so a name given to both is analyzed as new.
    pub fn apply_requests(&mut self, forget: &BTreeSet<String>, reanalyze: &BTreeSet<String>) {
        for name in forget {
            let forgotten = self.index.mark_unread(name);
            self.cache.remove(name);
            tracing::info!("Forgot {} (was processed: {})", name, forgotten);
        }
        for name in reanalyze {
            if self.index.request_reprocess(name) {
                tracing::info!("Re-analysis requested for {}", name);
            }
        }
    }

    /// A file is due when the index asks for it or when its rows are not cached,
    /// since a skipped file is published from the cache alone.
    pub fn is_due(&self, name: &str) -> bool {
        self.index.should_process(name) || self.cache.get(name).is_none()
    }

    /// Sets the opening tallies for the files found in the folder.
    pub fn plan(&mut self, targets: &[DriveFile]) {
        for file in targets {
            if !self.index.should_process(&file.name) && self.cache.get(&file.name).is_none() {
                tracing::warn!("{} is indexed but has no cached rows; analyzing it again", file.name);
            }
        }
        let already_processed = targets.iter().filter(|f| !self.is_due(&f.name)).count();
        self.counts = RunCounts {
            total: targets.len(),
            already_processed,
            pending: targets.len() - already_processed,
            ..RunCounts::default()
        };
        tracing::info!("Progress: {:?}", self.counts);
    }

    pub fn skipped(&self, name: &str) -> FileReport {
        if let Some(status) = self.index.status(name) {
            tracing::debug!("Skipping {} (processed {})", name, status.processed_at);
        }
        FileReport {
            filename: name.to_string(),
            company_name: self.cache.get(name).and_then(|c| c.company_name.clone()),
            status: FileOutcome::AlreadyProcessed,
            error: None,
        }
    }

    /// Stores a file's analysis. A failure leaves the index and cache as they were,
    /// so a pending reprocess request survives for the next run.
    pub fn record_outcome(
        &mut self,
        name: &str,
        outcome: Result<Vec<DocumentRecord>, ExtractError>,
        now: DateTime<Utc>,
    ) -> FileReport {
        let report = match outcome {
            Ok(mut records) => {
                for record in &mut records {
                    record.processed = true;
                }
                let company_name = records.first().and_then(|r| r.company_name.clone());
                self.cache.insert(name, CachedFile { company_name: company_name.clone(), records });
                self.index.mark_processed(name, now);
                self.counts.completed += 1;
                FileReport {
                    filename: name.to_string(),
                    company_name,
                    status: FileOutcome::Completed,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!("Failed to analyze {}: {}", name, e);
                self.counts.failed += 1;
                FileReport {
                    filename: name.to_string(),
                    company_name: None,
                    status: FileOutcome::Failed,
                    error: Some(e.to_string()),
                }
            }
        };
        self.counts.pending = self.counts.pending.saturating_sub(1);
        tracing::info!("Progress: {:?}", self.counts);
        report
    }

    /// Every cached row, grouped by company.
    pub fn table(&self) -> ResultTable {
        ResultTable::accumulate(self.cache.records().cloned())
    }
}

async fn process_file(
    client: &GoogleClient,
    extractor: &RegisterExtractor,
    file: &DriveFile,
    debug_dir: Option<&Path>,
) -> Result<Result<Vec<DocumentRecord>, ExtractError>, AppError> {
    // Network failures end the run; anything wrong with the document itself does not
    let bytes = client.download_file(file).await?;
    let text = match pdf::extract_text(&bytes) {
        Ok(text) => text,
        Err(e) => return Ok(Err(e)),
    };
    Ok(analyze_document(extractor, &file.name, &text, debug_dir))
}

/// Awaits `cleanup` when `result` failed and hands back the original error either way.
async fn undo_on_error<T, C>(result: Result<T, AppError>, cleanup: C) -> Result<T, AppError>
where
    C: Future<Output = Result<(), GoogleError>>,
{
    if result.is_err() {
        if let Err(e) = cleanup.await {
            tracing::warn!("Cleanup after a failed publish also failed: {}", e);
        }
    }
    result
}

async fn fill_spreadsheet(
    client: &GoogleClient,
    spreadsheet_id: &str,
    result_folder_id: &str,
    layout: &SheetLayout,
) -> Result<(), AppError> {
    client.move_file_to_folder(spreadsheet_id, result_folder_id).await?;
    client
        .update_values(spreadsheet_id, &format!("{}!A1", SHEET_TAB_TITLE), &layout.values)
        .await?;
    let sheet_id = client.first_sheet_id(spreadsheet_id).await?;
    client.batch_update(spreadsheet_id, layout.format_requests(sheet_id)).await?;
    Ok(())
}

/// Runs one analysis of a Drive folder and publishes `{folder}_result_YYYYMMDD`.
///
/// The processed index and record cache are only written after the spreadsheet, so a
/// run that fails part way leaves the previous state untouched. A spreadsheet that
/// could not be filled is deleted again.
pub async fn run_register(client: &GoogleClient, options: &RunOptions) -> Result<RunSummary, AppError> {
    let extractor = RegisterExtractor::new();
    let started_at = Utc::now();

    let files = client.list_files_in_folder(&options.folder_id).await?;
    let targets: Vec<DriveFile> = files.into_iter().filter(|f| f.is_pdf()).collect();
    tracing::info!("Found {} PDF files in {}", targets.len(), options.folder_id);

    let result_folder_id = client
        .find_or_create_folder(&options.folder_id, RESULT_FOLDER_NAME)
        .await?;
    let store = ResultFolderStore::new(client, &result_folder_id);
    let index = store.load_index(started_at).await?;
    let cache = store.load_cache().await?;

    let mut state = RunState::new(index, cache);
    state.apply_requests(&options.forget, &options.reanalyze);
    state.plan(&targets);

    let mut reports = Vec::with_capacity(targets.len());
    for file in &targets {
        if !state.is_due(&file.name) {
            reports.push(state.skipped(&file.name));
            continue;
        }
        tracing::info!("Processing {}", file.name);
        let outcome = process_file(client, &extractor, file, options.debug_dir.as_deref()).await?;
        reports.push(state.record_outcome(&file.name, outcome, Utc::now()));
    }

    let table = state.table();
    let layout = SheetLayout::from_table(&table);

    let folder_name = client.folder_name(&options.folder_id).await?;
    let title = result_sheet_title(&folder_name, options.run_date);
    let spreadsheet_id = client.create_spreadsheet(&title, SHEET_TAB_TITLE).await?;
    let filled = fill_spreadsheet(client, &spreadsheet_id, &result_folder_id, &layout).await;
    undo_on_error(filled, client.delete_file(&spreadsheet_id)).await?;
    tracing::info!(
        "Published {} rows ({} highlighted, {} company boundaries) to '{}'",
        table.record_count(),
        layout.highlight_rows.len(),
        layout.boundary_rows.len(),
        title
    );

    store.save_index(&state.index).await?;
    store.save_cache(&state.cache).await?;

    Ok(RunSummary {
        counts: state.counts,
        files: reports,
        result_folder_id: store.folder_id().to_string(),
        sheet: SheetMeta::new(spreadsheet_id, title),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::validate::Validation;
    use crate::report::table::tests::record;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    const DOC: &str = "\
등록번호 110111-7654321
상호 주식회사 감마
본점 서울
발행주식의 총수와 그 종류 및 각각의 수
발행주식의 총수 1,300 주 2023.01.02 변경
보통주식 1,000 주 2023.01.05 등기
우선주식 100 주
전환우선주식 150 주
목적
";

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn pdf(name: &str) -> DriveFile {
        DriveFile {
            id: format!("id-{}", name),
            name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            modified_time: None,
            parents: vec![],
        }
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // Every file indexed at 01:00 with one cached row
    fn processed_state(files: &[(&str, &str, i64)]) -> RunState {
        let mut index = ProcessedIndex::default();
        let mut cache = RecordCache::default();
        for (name, company, issued) in files {
            index.mark_processed(name, at(1));
            cache.insert(name, CachedFile { company_name: None, records: vec![record(company, name, *issued)] });
        }
        RunState::new(index, cache)
    }

    #[test]
    fn test_analyze_document_flags_mismatch() {
        let records = analyze_document(&RegisterExtractor::new(), "gamma.pdf", DOC, None).unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.company_id, "1101117654321");
        assert_eq!(record.source_file, "gamma.pdf");
        assert_eq!(record.preferred.stated_total, Some(300));
        assert_eq!(record.preferred.computed_sum, Some(250));
        assert_eq!(record.validation(), Validation::Fail);
    }

    #[test]
    fn test_analyze_document_without_share_section_fails() {
        let err = analyze_document(&RegisterExtractor::new(), "empty.pdf", "상호 주식회사 감마", None).unwrap_err();
        assert!(matches!(err, ExtractError::SectionNotFound(_)));
    }

    #[test]
    fn test_huge_share_counts_fail_the_row() {
        let doc = "\
상호 주식회사 델타
본점 서울
발행주식의 총수와 그 종류 및 각각의 수
발행주식의 총수 9,000,000,000,000,000,000 주
보통주식 0 주
우선주식 9,000,000,000,000,000,000 주
전환우선주식 9,000,000,000,000,000,000 주
목적
";
        let records = analyze_document(&RegisterExtractor::new(), "delta.pdf", doc, None).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].preferred.stated_total, Some(9_000_000_000_000_000_000));
        assert_eq!(records[0].preferred.computed_sum, None);
        assert_eq!(records[0].validation(), Validation::Fail);
    }

    #[test]
    fn test_debug_dir_receives_text_and_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let debug_dir = dir.path().join("debug");

        analyze_document(&RegisterExtractor::new(), "sub/gamma.pdf", DOC, Some(&debug_dir)).unwrap();

        let text = std::fs::read_to_string(debug_dir.join("sub_gamma.pdf.txt")).unwrap();
        assert!(text.contains("주식회사 감마"));
        let blocks: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(debug_dir.join("sub_gamma.pdf.blocks.json")).unwrap())
                .unwrap();
        assert_eq!(blocks["registration_number"], "1101117654321");
        assert_eq!(blocks["blocks"][0]["total"], 1300);
        assert_eq!(blocks["blocks"][0]["preferred_items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_debug_dir_keeps_text_when_extraction_fails() {
        let dir = tempfile::tempdir().unwrap();

        let err = analyze_document(&RegisterExtractor::new(), "empty.pdf", "상호 주식회사 감마", Some(dir.path()));

        assert!(err.is_err());
        assert!(dir.path().join("empty.pdf.txt").exists());
        assert!(!dir.path().join("empty.pdf.blocks.json").exists());
    }

    #[test]
    fn test_forget_then_reanalyze_then_skip() {
        let mut state = processed_state(&[("a.pdf", "A", 1), ("b.pdf", "B", 2), ("c.pdf", "C", 3)]);

        state.apply_requests(&names(&["a.pdf"]), &names(&["a.pdf", "b.pdf"]));
        state.plan(&[pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf"), pdf("d.pdf")]);

        // a was forgotten, so the reanalyze request finds nothing to flag
        assert!(state.index.status("a.pdf").is_none());
        assert!(state.cache.get("a.pdf").is_none());
        assert!(state.index.status("b.pdf").unwrap().reprocess);
        let due: Vec<bool> = ["a.pdf", "b.pdf", "c.pdf", "d.pdf"].iter().map(|n| state.is_due(n)).collect();
        assert_eq!(due, vec![true, true, false, true]);
        assert_eq!(
            state.counts,
            RunCounts { total: 4, already_processed: 1, pending: 3, completed: 0, failed: 0 }
        );
    }

    #[test]
    fn test_indexed_file_without_cached_rows_is_due() {
        let index = ProcessedIndex::from_json(br#"{"processed": ["a.pdf", "b.pdf"]}"#, at(1)).unwrap();
        let mut cache = RecordCache::default();
        cache.insert("b.pdf", CachedFile { company_name: None, records: vec![record("B", "b.pdf", 2)] });
        let mut state = RunState::new(index, cache);

        state.plan(&[pdf("a.pdf"), pdf("b.pdf")]);

        assert!(state.is_due("a.pdf"));
        assert!(!state.is_due("b.pdf"));
        assert_eq!(state.counts.already_processed, 1);
        assert_eq!(state.counts.pending, 1);

        let report = state.record_outcome("a.pdf", Ok(vec![record("A", "a.pdf", 7)]), at(2));
        assert_eq!(report.status, FileOutcome::Completed);
        assert!(!state.is_due("a.pdf"));
        let issued: Vec<i64> = state.table().records().filter_map(|r| r.issued_shares).collect();
        assert_eq!(issued, vec![7, 2]);
    }

    #[test]
    fn test_failed_reanalysis_keeps_flag_and_old_rows() {
        let mut state = processed_state(&[("b.pdf", "B", 2)]);
        state.apply_requests(&BTreeSet::new(), &names(&["b.pdf"]));
        state.plan(&[pdf("b.pdf")]);

        let report = state.record_outcome(
            "b.pdf",
            Err(ExtractError::SectionNotFound("share history".to_string())),
            at(2),
        );

        assert_eq!(report.status, FileOutcome::Failed);
        assert!(report.error.unwrap().contains("share history"));
        let status = state.index.status("b.pdf").unwrap();
        assert!(status.reprocess);
        assert_eq!(status.processed_at, at(1));
        assert_eq!(state.table().record_count(), 1);
        assert_eq!(
            state.counts,
            RunCounts { total: 1, already_processed: 0, pending: 0, completed: 0, failed: 1 }
        );
    }

    #[test]
    fn test_successful_reanalysis_replaces_rows_and_skipped_files_still_publish() {
        let mut state = processed_state(&[("b.pdf", "B", 2), ("c.pdf", "C", 3)]);
        state.apply_requests(&BTreeSet::new(), &names(&["b.pdf"]));
        state.plan(&[pdf("b.pdf"), pdf("c.pdf")]);

        let skipped = state.skipped("c.pdf");
        let mut fresh = record("B", "b.pdf", 20);
        fresh.processed = false;
        let done = state.record_outcome("b.pdf", Ok(vec![fresh]), at(2));

        assert_eq!(skipped.status, FileOutcome::AlreadyProcessed);
        assert_eq!(done.status, FileOutcome::Completed);
        assert_eq!(done.company_name.as_deref(), Some("주식회사 B"));
        let status = state.index.status("b.pdf").unwrap();
        assert!(!status.reprocess);
        assert_eq!(status.processed_at, at(2));

        let table = state.table();
        let rows: Vec<(&str, Option<i64>, bool)> = table
            .records()
            .map(|r| (r.source_file.as_str(), r.issued_shares, r.processed))
            .collect();
        assert_eq!(rows, vec![("b.pdf", Some(20), true), ("c.pdf", Some(3), true)]);
        assert_eq!(
            state.counts,
            RunCounts { total: 2, already_processed: 1, pending: 0, completed: 1, failed: 0 }
        );
    }

    #[tokio::test]
    async fn test_failed_publish_runs_cleanup() {
        let cleaned = Cell::new(false);
        let result: Result<(), AppError> =
            undo_on_error(Err(AppError::Config("values rejected".to_string())), async {
                cleaned.set(true);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(cleaned.get());
    }

    #[tokio::test]
    async fn test_successful_publish_skips_cleanup() {
        let cleaned = Cell::new(false);
        let result = undo_on_error(Ok(5), async {
            cleaned.set(true);
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap(), 5);
        assert!(!cleaned.get());
    }

    #[tokio::test]
    async fn test_failed_cleanup_keeps_original_error() {
        let result: Result<(), AppError> = undo_on_error(Err(AppError::Config("values rejected".to_string())), async {
            Err(GoogleError::Auth("token expired".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Config(msg)) if msg == "values rejected"));
    }
}
