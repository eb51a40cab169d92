//! Event-type vocabulary.
//!
//! Maps normalized event types onto the six convergence categories and the
//! five chain stages, and folds source-specific spellings into canonical
//! type names.

use crate::types::{Category, ChainStage};

/// Event type that carries the insider-buy bonus.
pub const INSIDER_BUY: &str = "insider_buy";

const CATEGORY_A_TYPES: &[&str] = &[
    "lease_grant",
    "permit_filed",
    "permit_issued",
    "drilling_permit",
    "claims_staked",
    "exploration_permit",
];

const CATEGORY_B_TYPES: &[&str] = &[
    "spud_reported",
    "drill_result",
    "drill_assay",
    "completion_reported",
    "well_completion",
    "well_record",
    "production_reported",
];

const CATEGORY_C_TYPES: &[&str] = &[
    "resource_estimate",
    "pea_published",
    "pfs_published",
    "feasibility_study",
];

const CATEGORY_D_TYPES: &[&str] = &["financing_closed", "financing_announced", "offtake_agreement"];

const CATEGORY_E_TYPES: &[&str] = &["insider_buy", "institutional_13g", "institutional_13f"];

const CATEGORY_F_TYPES: &[&str] = &[
    "policy_designation",
    "policy_final_rule",
    "policy_nprm_open",
    "policy_comment_deadline",
    "congressional_trade_disclosure",
    "legislation_committee_advance",
];

/// Substrings that mark an otherwise unknown type as policy/macro.
const POLICY_KEYWORDS: &[&str] = &[
    "policy",
    "macro",
    "rule",
    "nprm",
    "congress",
    "legislation",
    "committee",
];

const TYPE_ALIASES: &[(&str, &str)] = &[
    ("insider_purchase", "insider_buy"),
    ("purchase", "insider_buy"),
    ("buy", "insider_buy"),
    ("open_market_purchase", "insider_buy"),
    ("insider_sale", "insider_sell"),
    ("sale", "insider_sell"),
    ("sell", "insider_sell"),
    ("option_exercise", "insider_option_exercise"),
    ("exercise", "insider_option_exercise"),
    ("13g", "institutional_13g"),
    ("schedule_13g", "institutional_13g"),
    ("13f", "institutional_13f"),
    ("form_13f", "institutional_13f"),
    ("spud", "spud_reported"),
    ("completion", "completion_reported"),
    ("assay", "drill_assay"),
    ("pea", "pea_published"),
    ("pfs", "pfs_published"),
    ("offtake", "offtake_agreement"),
];

/// Lowercase, `-`/space → `_`, then resolve aliases.
pub fn normalize_event_type(raw: &str) -> String {
    let key: String = raw
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace('-', "_");
    TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(key)
}

/// The convergence category an event type belongs to, if any.
pub fn category_for(event_type: &str) -> Option<Category> {
    let t = event_type.trim().to_lowercase();
    if t.is_empty() {
        return None;
    }
    let tables: [(&[&str], Category); 6] = [
        (CATEGORY_A_TYPES, Category::A),
        (CATEGORY_B_TYPES, Category::B),
        (CATEGORY_C_TYPES, Category::C),
        (CATEGORY_D_TYPES, Category::D),
        (CATEGORY_E_TYPES, Category::E),
        (CATEGORY_F_TYPES, Category::F),
    ];
    for (types, category) in tables {
        if types.contains(&t.as_str()) {
            return Some(category);
        }
    }
    if POLICY_KEYWORDS.iter().any(|k| t.contains(k)) {
        return Some(Category::F);
    }
    None
}

/// The chain stage an event type demonstrates, if any.
pub fn stage_for(event_type: &str) -> Option<ChainStage> {
    match event_type.trim().to_lowercase().as_str() {
        "permit_filed" | "permit_issued" | "drilling_permit" | "lease_grant" | "claims_staked"
        | "exploration_permit" => Some(ChainStage::Permit),
        "spud_reported" => Some(ChainStage::Spud),
        "completion_reported" | "well_completion" | "well_record" => Some(ChainStage::Completion),
        "drill_assay" | "drill_result" => Some(ChainStage::Assay),
        "production_reported" => Some(ChainStage::Production),
        _ => None,
    }
}

/// Normalize a person's name for distinct-insider comparisons.
pub fn normalize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_event_type_aliases() {
        assert_eq!(normalize_event_type("Open-Market Purchase"), "insider_buy");
        assert_eq!(normalize_event_type(" 13G "), "institutional_13g");
        assert_eq!(normalize_event_type("permit_issued"), "permit_issued");
        assert_eq!(normalize_event_type("Drill Assay"), "drill_assay");
        assert_eq!(normalize_event_type("something_new"), "something_new");
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(category_for("permit_issued"), Some(Category::A));
        assert_eq!(category_for("completion_reported"), Some(Category::B));
        assert_eq!(category_for("pfs_published"), Some(Category::C));
        assert_eq!(category_for("offtake_agreement"), Some(Category::D));
        assert_eq!(category_for("insider_buy"), Some(Category::E));
        assert_eq!(category_for("institutional_13f"), Some(Category::E));
        assert_eq!(category_for("policy_designation"), Some(Category::F));
        assert_eq!(category_for("insider_sell"), None);
        assert_eq!(category_for(""), None);
    }

    #[test]
    fn test_policy_keyword_fallback() {
        assert_eq!(category_for("senate_committee_hearing"), Some(Category::F));
        assert_eq!(category_for("macro_tailwind"), Some(Category::F));
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(stage_for("claims_staked"), Some(ChainStage::Permit));
        assert_eq!(stage_for("spud_reported"), Some(ChainStage::Spud));
        assert_eq!(stage_for("well_record"), Some(ChainStage::Completion));
        assert_eq!(stage_for("drill_assay"), Some(ChainStage::Assay));
        assert_eq!(stage_for("production_reported"), Some(ChainStage::Production));
        assert_eq!(stage_for("insider_buy"), None);
    }

    #[test]
    fn test_every_stage_type_has_a_category() {
        for t in CATEGORY_A_TYPES.iter().chain(CATEGORY_B_TYPES) {
            assert!(category_for(t).is_some(), "{t} has no category");
        }
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Dana  Morgan "), "dana morgan");
        assert_eq!(normalize_name("O'Neil, J."), "o neil j");
    }
}
