//! Deterministic business rules applied on top of model output.
//!
//! Model answers are advisory; anything these functions decide overrides
//! what the model said.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use briefwise_collaborators::{SearchQuery, SearchResult};

use crate::schema::{ActionCategory, ActionItem, AlternativeSupplier, ValueAssessment};

/// Number of action items marked `recommended`.
pub const RECOMMENDED_ACTIONS: usize = 2;

// ---------------------------------------------------------------------------
// Prices
// ---------------------------------------------------------------------------

/// Extract a numeric amount from a price such as `"$10,000"`, `"1.000,50 €"`
/// or `"1000 USD"`.
///
/// With both separators present the later one is the decimal mark. A lone
/// comma is read as a thousands separator.
pub fn parse_price(price: &str) -> Option<f64> {
    static NON_NUMERIC: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\d.,]").expect("valid regex"));
    let cleaned = NON_NUMERIC.replace_all(price, "");

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), _) => cleaned.replace(',', ""),
        _ => cleaned.into_owned(),
    };
    normalized.parse().ok()
}

/// `Some(offer <= target)` when both prices parse.
pub fn target_achievable(offer_price: &str, target_price: &str) -> Option<bool> {
    Some(parse_price(offer_price)? <= parse_price(target_price)?)
}

pub fn confidence_for(value: ValueAssessment) -> &'static str {
    match value {
        ValueAssessment::Urgent | ValueAssessment::HighImpact => "High",
        ValueAssessment::MediumImpact => "Medium",
        ValueAssessment::LowImpact => "Low",
    }
}

pub fn partnership_for(value: ValueAssessment) -> &'static str {
    match value {
        ValueAssessment::Urgent | ValueAssessment::HighImpact => "Strategic Partner",
        ValueAssessment::MediumImpact => "Preferred Vendor",
        ValueAssessment::LowImpact => "Transactional",
    }
}

// ---------------------------------------------------------------------------
// Lists and scores
// ---------------------------------------------------------------------------

/// Drop blank and "not available" entries, then cap at `max`.
pub fn clean_list(items: Vec<String>, max: usize) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !is_not_available(s))
        .take(max)
        .collect()
}

/// Cap at `max`, then pad with `filler` up to `min`.
pub fn fit_list(mut items: Vec<String>, min: usize, max: usize, filler: &str) -> Vec<String> {
    items.truncate(max);
    while items.len() < min {
        items.push(filler.to_string());
    }
    items
}

/// `items`, or `defaults` when nothing usable came back.
pub fn or_defaults(items: Vec<String>, defaults: &[&str]) -> Vec<String> {
    if items.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        items
    }
}

pub fn is_not_available(text: &str) -> bool {
    let t = text.trim().to_ascii_lowercase();
    t == "not available" || t == "n/a" || t == "unknown"
}

/// An optional text field, with blank and "not available" treated as absent.
pub fn available(text: Option<String>) -> Option<String> {
    text.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !is_not_available(s))
}

/// Completeness score from a model answer that may be a number or text such
/// as `"7/10"`, clamped to `1..=10`. Defaults to 5.
pub fn completeness_score(raw: &Value) -> u8 {
    let parsed = match raw {
        Value::Number(n) => n.as_f64().map(|f| f.round() as i64),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<i64>().ok()
        }
        _ => None,
    };
    parsed.unwrap_or(5).clamp(1, 10) as u8
}

/// Cap at `max`, pad to `min`, then make exactly [`RECOMMENDED_ACTIONS`]
/// items recommended, keeping the model's picks where it made some.
pub fn fit_action_items(mut items: Vec<ActionItem>, min: usize, max: usize) -> Vec<ActionItem> {
    items.retain(|item| !item.action.trim().is_empty());
    items.truncate(max);
    while items.len() < min {
        let n = items.len() + 1;
        items.push(ActionItem {
            category: ActionCategory::Terms,
            action: format!("Review and address gap #{n} in the offer"),
            recommended: false,
        });
    }

    let mut marked = 0;
    for item in items.iter_mut() {
        if item.recommended {
            item.recommended = marked < RECOMMENDED_ACTIONS;
            marked += 1;
        }
    }
    for item in items.iter_mut() {
        if marked >= RECOMMENDED_ACTIONS {
            break;
        }
        if !item.recommended {
            item.recommended = true;
            marked += 1;
        }
    }
    items
}

// ---------------------------------------------------------------------------
// Prompt material
// ---------------------------------------------------------------------------

/// Cut `text` to at most `max_chars` characters.
pub fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Successful research results in query order, each under an upper-cased
/// heading and cut to `max_chars`.
pub fn research_context(
    queries: &[SearchQuery],
    results: &HashMap<String, SearchResult>,
    max_chars: usize,
) -> String {
    let mut context = String::new();
    for query in queries {
        if let Some(content) = results.get(&query.key).and_then(SearchResult::usable) {
            context.push_str(&format!(
                "\n\n{}:\n{}",
                query.key.to_uppercase(),
                truncate(content, max_chars)
            ));
        }
    }
    context.trim().to_string()
}

/// First error among failed results, for fallback reasons.
pub fn first_research_error(
    queries: &[SearchQuery],
    results: &HashMap<String, SearchResult>,
) -> String {
    queries
        .iter()
        .filter_map(|q| results.get(&q.key))
        .find_map(|r| r.error.clone())
        .unwrap_or_else(|| "no research results".to_string())
}

pub fn alternatives_listing(alternatives: &[AlternativeSupplier], missing: &str) -> String {
    if alternatives.is_empty() {
        return "No alternatives provided".to_string();
    }
    alternatives
        .iter()
        .map(|alt| format!("- {}: {}", alt.name, alt.description.as_deref().unwrap_or(missing)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "None".to_string();
    }
    items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prices_with_currency_and_separators() {
        assert_eq!(parse_price("$10,000"), Some(10000.0));
        assert_eq!(parse_price("1.000,50 €"), Some(1000.5));
        assert_eq!(parse_price("1,000.50"), Some(1000.5));
        assert_eq!(parse_price("1000 USD"), Some(1000.0));
        assert_eq!(parse_price("call us"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn target_needs_both_prices() {
        assert_eq!(target_achievable("$9,000", "$10,000"), Some(true));
        assert_eq!(target_achievable("$12,000", "$10,000"), Some(false));
        assert_eq!(target_achievable("TBD", "$10,000"), None);
    }

    #[test]
    fn value_assessment_maps() {
        assert_eq!(confidence_for(ValueAssessment::Urgent), "High");
        assert_eq!(confidence_for(ValueAssessment::MediumImpact), "Medium");
        assert_eq!(confidence_for(ValueAssessment::LowImpact), "Low");
        assert_eq!(partnership_for(ValueAssessment::HighImpact), "Strategic Partner");
        assert_eq!(partnership_for(ValueAssessment::MediumImpact), "Preferred Vendor");
        assert_eq!(partnership_for(ValueAssessment::LowImpact), "Transactional");
    }

    #[test]
    fn score_is_clamped_and_lenient() {
        assert_eq!(completeness_score(&json!(7)), 7);
        assert_eq!(completeness_score(&json!(14)), 10);
        assert_eq!(completeness_score(&json!(0)), 1);
        assert_eq!(completeness_score(&json!("8/10")), 8);
        assert_eq!(completeness_score(&json!(null)), 5);
        assert_eq!(completeness_score(&json!("unclear")), 5);
    }

    #[test]
    fn lists_are_cleaned_and_fitted() {
        let cleaned = clean_list(
            vec!["a".into(), " ".into(), "Not available".into(), "b".into()],
            5,
        );
        assert_eq!(cleaned, vec!["a", "b"]);
        assert_eq!(fit_list(cleaned, 3, 5, "x"), vec!["a", "b", "x"]);
        assert_eq!(fit_list(vec!["1".into(); 7], 3, 5, "x").len(), 5);
    }

    #[test]
    fn action_items_get_exactly_two_recommended() {
        let item = |action: &str, recommended| ActionItem {
            category: ActionCategory::Price,
            action: action.into(),
            recommended,
        };
        let fitted = fit_action_items(
            vec![item("a", true), item("b", true), item("c", true)],
            5,
            5,
        );
        assert_eq!(fitted.len(), 5);
        assert_eq!(fitted.iter().filter(|i| i.recommended).count(), 2);
        assert!(fitted[0].recommended && fitted[1].recommended && !fitted[2].recommended);
        assert_eq!(fitted[4].action, "Review and address gap #5 in the offer");

        let fitted = fit_action_items(vec![item("a", false), item("b", false)], 5, 10);
        assert!(fitted[0].recommended && fitted[1].recommended);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn research_context_follows_query_order() {
        let queries = vec![SearchQuery::new("profile", "q1"), SearchQuery::new("news", "q2")];
        let mut results = HashMap::new();
        results.insert("news".to_string(), SearchResult::ok("fresh", vec![]));
        results.insert("profile".to_string(), SearchResult::failed("Request timeout"));

        assert_eq!(research_context(&queries, &results, 100), "NEWS:\nfresh");
        assert_eq!(first_research_error(&queries, &results), "Request timeout");
    }
}
