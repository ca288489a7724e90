// src/report/record.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::extractors::register::{clean_company_name, DocumentExtract, PreferredItem};
use crate::extractors::validate::{capital_mismatch, check_preferred, PreferredCheck, Validation};

const PREFERRED_MISMATCH_NOTE: &str = "우선주 합산 불일치";
const CAPITAL_MISMATCH_NOTE: &str = "자본금-주식수 불일치";

/// One output row: a single issued-share change of one company, already validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Registration number, else company name, else source file name
    pub company_id: String,
    pub company_name: Option<String>,
    pub clean_name: Option<String>,
    pub registration_number: Option<String>,
    pub source_file: String,
    /// Number of share changes found in the source document
    pub document_row_count: usize,
    pub issued_shares: Option<i64>,
    pub common_shares: Option<i64>,
    pub capital: Option<i64>,
    pub change_date: Option<NaiveDate>,
    pub registration_date: Option<NaiveDate>,
    pub preferred_items: Vec<PreferredItem>,
    pub preferred: PreferredCheck,
    pub capital_mismatch: bool,
    pub delta_total: Option<i64>,
    pub delta_common: Option<i64>,
    pub delta_preferred: Option<i64>,
    pub processed: bool,
}

impl DocumentRecord {
    pub fn validation(&self) -> Validation {
        self.preferred.validation
    }

    pub fn note(&self) -> String {
        let mut notes = Vec::new();
        if self.preferred.validation == Validation::Fail {
            notes.push(PREFERRED_MISMATCH_NOTE);
        }
        if self.capital_mismatch {
            notes.push(CAPITAL_MISMATCH_NOTE);
        }
        notes.join("; ")
    }
}

fn delta(current: Option<i64>, previous: Option<i64>) -> Option<i64> {
    current?.checked_sub(previous?)
}

/// Turns the share blocks of one document into validated rows, oldest change first,
/// each carrying the difference to the change before it.
pub fn build_records(source_file: &str, doc: &DocumentExtract) -> Vec<DocumentRecord> {
    let company_id = doc
        .registration_number
        .clone()
        .or_else(|| doc.company_name.clone())
        .unwrap_or_else(|| source_file.to_string());
    let clean_name = doc.company_name.as_deref().map(clean_company_name);

    let mut records: Vec<DocumentRecord> = Vec::with_capacity(doc.blocks.len());
    for block in &doc.blocks {
        let preferred = check_preferred(block.total, block.common, &block.preferred_items);
        let (delta_total, delta_common, delta_preferred) = match records.last() {
            Some(prev) => (
                delta(block.total, prev.issued_shares),
                delta(block.common, prev.common_shares),
                delta(preferred.computed_sum, prev.preferred.computed_sum),
            ),
            None => (None, None, None),
        };

        records.push(DocumentRecord {
            company_id: company_id.clone(),
            company_name: doc.company_name.clone(),
            clean_name: clean_name.clone(),
            registration_number: doc.registration_number.clone(),
            source_file: source_file.to_string(),
            document_row_count: doc.blocks.len(),
            issued_shares: block.total,
            common_shares: block.common,
            capital: block.capital,
            change_date: block.change_date,
            registration_date: block.registration_date,
            preferred_items: block.preferred_items.clone(),
            preferred,
            capital_mismatch: capital_mismatch(doc.par_value, block.capital, block.total),
            delta_total,
            delta_common,
            delta_preferred,
            processed: false,
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::register::ShareBlock;
    use pretty_assertions::assert_eq;

    fn sample_extract() -> DocumentExtract {
        DocumentExtract {
            registration_number: None,
            company_name: Some("주식회사 알파랩".to_string()),
            par_value: Some(500),
            blocks: vec![
                ShareBlock {
                    total: Some(100_000),
                    common: Some(100_000),
                    capital: Some(50_000_000),
                    ..ShareBlock::default()
                },
                ShareBlock {
                    total: Some(120_000),
                    common: Some(100_000),
                    preferred_items: vec![PreferredItem { label: "우선주식".to_string(), value: 15_000 }],
                    capital: Some(50_000_000),
                    ..ShareBlock::default()
                },
            ],
        }
    }

    #[test]
    fn test_records_carry_deltas_and_notes() {
        let records = build_records("alpha.pdf", &sample_extract());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].company_id, "주식회사 알파랩");
        assert_eq!(records[0].clean_name.as_deref(), Some("알파랩"));
        assert_eq!(records[0].document_row_count, 2);
        assert_eq!(records[0].delta_total, None);
        assert_eq!(records[0].note(), "");

        assert_eq!(records[1].delta_total, Some(20_000));
        assert_eq!(records[1].delta_common, Some(0));
        assert_eq!(records[1].delta_preferred, Some(15_000));
        assert_eq!(records[1].validation(), Validation::Fail);
        assert_eq!(records[1].note(), "우선주 합산 불일치; 자본금-주식수 불일치");
    }

    #[test]
    fn test_company_id_falls_back_to_file_name() {
        let mut doc = sample_extract();
        doc.company_name = None;
        let records = build_records("unknown.pdf", &doc);
        assert_eq!(records[0].company_id, "unknown.pdf");

        doc.registration_number = Some("1101111234567".to_string());
        let records = build_records("unknown.pdf", &doc);
        assert_eq!(records[0].company_id, "1101111234567");
    }
}
