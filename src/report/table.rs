// src/report/table.rs
use crate::report::record::DocumentRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEntry {
    Record(DocumentRecord),
    /// Boundary between two companies
    Separator,
}

/// Records grouped per company, in the order companies were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    entries: Vec<TableEntry>,
}

impl ResultTable {
    /// Groups records by `company_id`. Groups keep first-seen order and records keep
    /// their input order within a group; a separator sits between consecutive groups.
    pub fn accumulate<I>(records: I) -> Self
    where
        I: IntoIterator<Item = DocumentRecord>,
    {
        let mut groups: Vec<(String, Vec<DocumentRecord>)> = Vec::new();
        for record in records {
            match groups.iter_mut().find(|(id, _)| *id == record.company_id) {
                Some((_, rows)) => rows.push(record),
                None => groups.push((record.company_id.clone(), vec![record])),
            }
        }

        let mut entries = Vec::new();
        for (index, (_, rows)) in groups.into_iter().enumerate() {
            if index > 0 {
                entries.push(TableEntry::Separator);
            }
            entries.extend(rows.into_iter().map(TableEntry::Record));
        }

        tracing::debug!("Accumulated {} table entries", entries.len());
        Self { entries }
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.entries.iter().filter_map(|entry| match entry {
            TableEntry::Record(record) => Some(record),
            TableEntry::Separator => None,
        })
    }

    pub fn record_count(&self) -> usize {
        self.records().count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::extractors::validate::{PreferredCheck, Validation};
    use pretty_assertions::assert_eq;

    pub(crate) fn record(company_id: &str, source_file: &str, issued: i64) -> DocumentRecord {
        DocumentRecord {
            company_id: company_id.to_string(),
            company_name: Some(format!("주식회사 {}", company_id)),
            clean_name: Some(company_id.to_string()),
            registration_number: None,
            source_file: source_file.to_string(),
            document_row_count: 1,
            issued_shares: Some(issued),
            common_shares: Some(issued),
            capital: None,
            change_date: None,
            registration_date: None,
            preferred_items: vec![],
            preferred: PreferredCheck {
                computed_sum: Some(0),
                stated_total: Some(0),
                validation: Validation::Pass,
            },
            capital_mismatch: false,
            delta_total: None,
            delta_common: None,
            delta_preferred: None,
            processed: true,
        }
    }

    fn shape(table: &ResultTable) -> Vec<String> {
        table
            .entries()
            .iter()
            .map(|entry| match entry {
                TableEntry::Record(r) => format!("{}{}", r.company_id, r.issued_shares.unwrap_or_default()),
                TableEntry::Separator => "|".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_separators_between_companies_only() {
        let table = ResultTable::accumulate(vec![
            record("A", "a.pdf", 1),
            record("A", "a.pdf", 2),
            record("B", "b.pdf", 1),
            record("C", "c.pdf", 1),
        ]);
        assert_eq!(shape(&table), vec!["A1", "A2", "|", "B1", "|", "C1"]);
    }

    #[test]
    fn test_groups_keep_first_seen_and_input_order() {
        let table = ResultTable::accumulate(vec![
            record("B", "b1.pdf", 1),
            record("A", "a.pdf", 1),
            record("B", "b2.pdf", 2),
        ]);
        assert_eq!(shape(&table), vec!["B1", "B2", "|", "A1"]);
        assert_eq!(table.record_count(), 3);
    }

    #[test]
    fn test_single_company_has_no_separator() {
        let table = ResultTable::accumulate(vec![record("A", "a.pdf", 1), record("A", "a.pdf", 2)]);
        assert!(table.entries().iter().all(|e| *e != TableEntry::Separator));
    }

    #[test]
    fn test_empty_table() {
        let table = ResultTable::accumulate(Vec::new());
        assert!(table.entries().is_empty());
    }
}
