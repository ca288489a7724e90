// src/extractors/validate.rs
use crate::extractors::register::PreferredItem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Generic class label the registry uses alongside the detailed ones
const GENERIC_CLASS_LABEL: &str = "종류주식";

static NUMBERED_CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"제\d+종").expect("Failed to compile NUMBERED_CLASS_RE")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    Pass,
    Fail,
    /// Issued total or common count missing, nothing to compare against
    NotChecked,
}

/// Outcome of comparing the preferred-share items against the stated total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredCheck {
    pub computed_sum: Option<i64>,
    pub stated_total: Option<i64>,
    pub validation: Validation,
}

fn is_detailed_label(label: &str) -> bool {
    NUMBERED_CLASS_RE.is_match(label) || label.contains("전환") || label.contains("상환")
}

// None when the counts overflow
fn checked_sum<'a>(mut items: impl Iterator<Item = &'a PreferredItem>) -> Option<i64> {
    items.try_fold(0i64, |acc, item| acc.checked_add(item.value))
}

/// Checks that the preferred items add up to `total - common`.
///
/// When detailed classes (`제1종…`, `전환…`, `상환…`) are listed, a generic `종류주식`
/// line usually repeats their sum, so it is left out first. If that does not add up, the
/// sum over every item is tried before reporting a mismatch.
pub fn check_preferred(total: Option<i64>, common: Option<i64>, items: &[PreferredItem]) -> PreferredCheck {
    let (Some(total), Some(common)) = (total, common) else {
        return PreferredCheck {
            computed_sum: None,
            stated_total: None,
            validation: Validation::NotChecked,
        };
    };

    let Some(stated_total) = total.checked_sub(common) else {
        return PreferredCheck {
            computed_sum: None,
            stated_total: None,
            validation: Validation::NotChecked,
        };
    };
    let has_detail = items.iter().any(|item| is_detailed_label(&item.label));

    let all_items = checked_sum(items.iter());
    let primary = if has_detail {
        checked_sum(items.iter().filter(|item| item.label != GENERIC_CLASS_LABEL))
    } else {
        all_items
    };

    let computed_sum = if primary == Some(stated_total) || !has_detail {
        primary
    } else {
        all_items
    };

    // A sum that does not fit in i64 cannot equal a stated total that does
    let validation = if computed_sum == Some(stated_total) {
        Validation::Pass
    } else {
        Validation::Fail
    };

    PreferredCheck {
        computed_sum,
        stated_total: Some(stated_total),
        validation,
    }
}

/// True when par value x issued shares disagrees with the registered capital.
/// Any missing or zero input means there is nothing to compare.
pub fn capital_mismatch(par_value: Option<i64>, capital: Option<i64>, total: Option<i64>) -> bool {
    match (par_value, capital, total) {
        (Some(par), Some(capital), Some(total)) if par != 0 && capital != 0 => {
            par.checked_mul(total) != Some(capital)
        }
        _ => false,
    }
}
