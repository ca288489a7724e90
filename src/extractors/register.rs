// src/extractors/register.rs

// --- Imports ---
use crate::utils::error::ExtractError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// --- Section Markers ---
// Header line that opens the issued-share history table
const SHARE_SECTION_START: &str = "발행주식의 총수와";
// Headers that follow the share history in the registry layout
const SHARE_SECTION_END: &[&str] = &["목          적", "목적", "임원에 관한 사항", "종류주식의 내용"];

const ISSUED_TOTAL_LABEL: &str = "발행주식의 총수";
const AUTHORIZED_TOTAL_LABEL: &str = "발행할 주식의 총수";
const CAPITAL_HEADER_LABEL: &str = "자본금의 액";
const COMMON_SHARE_LABEL: &str = "보통주식";

const COMPANY_NAME_LABELS: &[&str] = &["상  호", "상호"];
const HEAD_OFFICE_LABELS: &[&str] = &["본  점", "본점"];
const CORPORATION_MARKERS: &[&str] = &["주식회사", "㈜", "(주)"];

/// Registry dates are written `YYYY.MM.DD`
pub const REGISTRY_DATE_FORMAT: &str = "%Y.%m.%d";

// --- Regex Patterns (Lazy Static) ---
static REGISTRATION_NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"등록번호\s*([0-9\-\s]{13,})").expect("Failed to compile REGISTRATION_NUMBER_RE")
});

static PAR_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"1\s*주\s*의\s*금액\s*금\s*([0-9,]+)\s*원").expect("Failed to compile PAR_VALUE_RE")
});

// Looser form for layouts that wrap the label
static PAR_VALUE_FALLBACK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"1\s*주[^0-9]{0,10}금\s*([0-9,]+)\s*원").expect("Failed to compile PAR_VALUE_FALLBACK_RE")
});

static SHARE_COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9,]+)\s*주").expect("Failed to compile SHARE_COUNT_RE")
});

static CAPITAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"금\s*([0-9,]+)\s*원").expect("Failed to compile CAPITAL_RE")
});

static CHANGE_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}\.\d{2}\.\d{2})\s*변경").expect("Failed to compile CHANGE_DATE_RE")
});

static REGISTRATION_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4}\.\d{2}\.\d{2})\s*등기").expect("Failed to compile REGISTRATION_DATE_RE")
});

static SHARE_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([가-힣A-Za-z0-9]+주식)").expect("Failed to compile SHARE_LABEL_RE")
});

static TRAILING_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*\d{4}\.\d{2}\.\d{2}.*$").expect("Failed to compile TRAILING_DATE_RE")
});

static PARENTHESIZED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(.*?\)").expect("Failed to compile PARENTHESIZED_RE")
});

static CORPORATE_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"주식회사|\(주\)|㈜").expect("Failed to compile CORPORATE_SUFFIX_RE")
});

static LATIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z]").expect("Failed to compile LATIN_RE")
});

static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s{2,}").expect("Failed to compile MULTI_SPACE_RE")
});

/// Patterns highlighted in `--debug` text dumps
pub const DEBUG_PATTERNS: &[(&str, &str)] = &[
    (r"등록번호\s*[0-9\-\s]{13,}", "regno"),
    (r"1\s*주\s*의\s*금액\s*금\s*[0-9,]+\s*원", "par"),
    (r"발행주식의 총수[^\n]*", "total"),
    (r"보통주식\s*[0-9,]+\s*주", "common"),
    (r"[가-힣A-Za-z0-9]+주식\s*[0-9,]+\s*주", "shares"),
    (r"금\s*[0-9,]+\s*원", "capital"),
    (r"\d{4}\.\d{2}\.\d{2}\s*변경", "change"),
    (r"\d{4}\.\d{2}\.\d{2}\s*등기", "registered"),
];

// --- Data Structures ---

/// One labelled share class inside a share block, e.g. `상환전환우선주식 1,000주`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredItem {
    pub label: String,
    pub value: i64,
}

/// One issued-share change recorded in the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareBlock {
    pub total: Option<i64>,
    pub common: Option<i64>,
    pub preferred_items: Vec<PreferredItem>,
    pub capital: Option<i64>,
    pub change_date: Option<NaiveDate>,
    pub registration_date: Option<NaiveDate>,
}

/// Everything pulled out of one registry document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentExtract {
    pub registration_number: Option<String>,
    pub company_name: Option<String>,
    pub par_value: Option<i64>,
    pub blocks: Vec<ShareBlock>,
}

// --- Main Extractor Structure ---
pub struct RegisterExtractor;

impl RegisterExtractor {
    pub fn new() -> Self { Self {} }

    /// Extracts the header fields and the issued-share history from a registry document.
    ///
    /// Missing header fields stay `None`. A document without any share block is an error.
    pub fn extract(&self, text: &str) -> Result<DocumentExtract, ExtractError> {
        let registration_number = parse_registration_number(text);
        let company_name = extract_company_name(text);
        let par_value = parse_par_value(text);

        let lines = section_lines(text);
        tracing::debug!("Share section has {} lines", lines.len());
        let blocks = parse_share_history(&lines);

        if blocks.is_empty() {
            return Err(ExtractError::SectionNotFound(
                "no issued-share blocks found (발행주식 섹션 추출 실패)".to_string(),
            ));
        }

        tracing::info!(
            "Extracted {} share blocks for {:?} ({:?})",
            blocks.len(),
            company_name,
            registration_number
        );

        Ok(DocumentExtract {
            registration_number,
            company_name,
            par_value,
            blocks,
        })
    }
}

impl Default for RegisterExtractor {
    fn default() -> Self {
        Self::new()
    }
}

// --- Field Helpers ---

/// Keeps only the digits of a number string; `None` when nothing numeric remains.
pub fn to_int(num: &str) -> Option<i64> {
    let digits: String = num.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn parse_registry_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, REGISTRY_DATE_FORMAT).ok()
}

fn parse_registration_number(text: &str) -> Option<String> {
    let caps = REGISTRATION_NUMBER_RE.captures(text)?;
    let digits: String = caps[1].chars().filter(|c| c.is_ascii_digit()).take(14).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

fn parse_par_value(text: &str) -> Option<i64> {
    let caps = PAR_VALUE_RE
        .captures(text)
        .or_else(|| PAR_VALUE_FALLBACK_RE.captures(text))?;
    to_int(&caps[1])
}

fn extract_share_count(line: &str) -> Option<i64> {
    SHARE_COUNT_RE.captures(line).and_then(|caps| to_int(&caps[1]))
}

fn extract_capital(line: &str) -> Option<i64> {
    CAPITAL_RE.captures(line).and_then(|caps| to_int(&caps[1]))
}

fn extract_label(line: &str) -> Option<String> {
    SHARE_LABEL_RE
        .captures(line)
        .map(|caps| caps[1].trim().to_string())
        .filter(|label| !label.is_empty())
}

/// The registry lists every trade name the company has had; the last one is current.
fn extract_company_name(text: &str) -> Option<String> {
    let mut collected: Vec<String> = Vec::new();
    let mut in_section = false;

    for line in text.lines() {
        if COMPANY_NAME_LABELS.iter().any(|label| line.contains(label)) {
            in_section = true;
            let mut rest = line.to_string();
            for label in COMPANY_NAME_LABELS {
                rest = rest.replace(label, "");
            }
            let rest = rest.trim();
            if !rest.is_empty() {
                collected.push(rest.to_string());
            }
            continue;
        }
        if in_section {
            if HEAD_OFFICE_LABELS.iter().any(|label| line.contains(label)) {
                break;
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                collected.push(trimmed.to_string());
            }
        }
    }

    collected
        .iter()
        .filter(|line| CORPORATION_MARKERS.iter().any(|m| line.contains(m)))
        .filter_map(|line| {
            let name = TRAILING_DATE_RE.replace(line.as_str(), "");
            let name = name.replace("    .  .", "");
            let name = name.trim();
            if name.is_empty() { None } else { Some(name.to_string()) }
        })
        .last()
}

/// Strips corporate suffixes, parentheticals and Latin letters from a Korean company name.
pub fn clean_company_name(name: &str) -> String {
    let s = PARENTHESIZED_RE.replace_all(name, "");
    let s = CORPORATE_SUFFIX_RE.replace_all(&s, "");
    let s = LATIN_RE.replace_all(&s, "");
    let s = MULTI_SPACE_RE.replace_all(&s, " ");
    s.trim().to_string()
}

/// Lines from the share-history header up to and including the first end marker.
fn section_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut in_section = false;

    for line in text.lines() {
        if line.contains(SHARE_SECTION_START) {
            in_section = true;
        }
        if in_section {
            lines.push(line);
            if SHARE_SECTION_END.iter().any(|marker| line.contains(marker)) {
                return lines;
            }
        }
    }

    if in_section {
        tracing::warn!("No end marker after the share section, using the rest of the document");
    }
    lines
}

fn parse_share_history(lines: &[&str]) -> Vec<ShareBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<ShareBlock> = None;

    for raw in lines {
        let line = raw.trim();
        if line.is_empty()
            || line.contains(AUTHORIZED_TOTAL_LABEL)
            || line.contains(SHARE_SECTION_START)
            || line.contains(CAPITAL_HEADER_LABEL)
        {
            continue;
        }

        if line.contains(ISSUED_TOTAL_LABEL) {
            let Some(total) = extract_share_count(line) else {
                continue;
            };
            if let Some(done) = current.take() {
                blocks.push(done);
            }
            current = Some(ShareBlock {
                total: Some(total),
                change_date: CHANGE_DATE_RE
                    .captures(line)
                    .and_then(|caps| parse_registry_date(&caps[1])),
                capital: extract_capital(line),
                ..ShareBlock::default()
            });
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };

        if block.change_date.is_none() {
            block.change_date = CHANGE_DATE_RE
                .captures(line)
                .and_then(|caps| parse_registry_date(&caps[1]));
        }
        if block.registration_date.is_none() {
            block.registration_date = REGISTRATION_DATE_RE
                .captures(line)
                .and_then(|caps| parse_registry_date(&caps[1]));
        }

        if line.contains(COMMON_SHARE_LABEL) {
            block.common = extract_share_count(line);
            if let Some(capital) = extract_capital(line) {
                block.capital = Some(capital);
            }
            continue;
        }

        if line.contains("주식") {
            if let Some(label) = extract_label(line).filter(|l| !l.contains(COMMON_SHARE_LABEL)) {
                if let Some(value) = extract_share_count(line) {
                    block.preferred_items.push(PreferredItem { label, value });
                }
                if let Some(capital) = extract_capital(line) {
                    block.capital = Some(capital);
                }
            }
        }
    }

    if let Some(done) = current {
        blocks.push(done);
    }
    blocks
}
