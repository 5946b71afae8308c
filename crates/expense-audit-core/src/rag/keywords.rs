//! Retrieval query and keyword construction for claims

use crate::model::ClaimFields;

/// Upper bound on keywords passed to hybrid search
pub const MAX_KEYWORDS: usize = 5;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "the", "to", "with", "was", "were", "this", "that", "our", "my", "per", "via", "other",
    "misc", "expense", "expenses", "claim",
];

/// Coarse amount band used in retrieval queries
pub fn amount_bucket(amount: f64) -> &'static str {
    if amount < 500.0 {
        "small amount"
    } else if amount < 2000.0 {
        "moderate amount"
    } else if amount < 10_000.0 {
        "large amount"
    } else {
        "very large amount"
    }
}

/// Natural-language retrieval query for a claim
pub fn audit_query(claim: &ClaimFields) -> String {
    format!(
        "{} expense reimbursement policy for {} ({}) limits and required documentation",
        claim.claim_type.trim(),
        claim.category.trim(),
        amount_bucket(claim.amount)
    )
}

/// Distinct, stop-word-free keywords from the claim's descriptive fields
///
/// Order of preference: category, claim type, then description and vendor
/// words. At most [`MAX_KEYWORDS`] are returned.
pub fn extract_keywords(claim: &ClaimFields) -> Vec<String> {
    let sources = [
        claim.category.as_str(),
        claim.claim_type.as_str(),
        claim.description.as_str(),
        claim.vendor.as_str(),
    ];

    let mut keywords: Vec<String> = Vec::with_capacity(MAX_KEYWORDS);
    for word in sources
        .iter()
        .flat_map(|s| s.split(|c: char| !c.is_alphanumeric() && c != '-'))
    {
        let word = word.trim_matches('-').to_lowercase();
        let long_enough = word.chars().count() >= 2 || word.chars().any(|c| !c.is_ascii());
        if word.is_empty() || !long_enough || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        if word.chars().all(|c| c.is_ascii_digit()) || keywords.contains(&word) {
            continue;
        }
        keywords.push(word);
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fields(category: &str, claim_type: &str, description: &str, vendor: &str, amount: f64) -> ClaimFields {
        ClaimFields {
            claim_id: "c".to_string(),
            claim_type: claim_type.to_string(),
            category: category.to_string(),
            amount,
            currency: "CNY".to_string(),
            description: description.to_string(),
            vendor: vendor.to_string(),
            department: String::new(),
            expense_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            invoice_items: vec![],
            seller_name: None,
        }
    }

    #[test]
    fn test_amount_buckets() {
        assert_eq!(amount_bucket(499.99), "small amount");
        assert_eq!(amount_bucket(500.0), "moderate amount");
        assert_eq!(amount_bucket(2000.0), "large amount");
        assert_eq!(amount_bucket(10_000.0), "very large amount");
    }

    #[test]
    fn test_keywords_are_bounded_and_deduplicated() {
        let claim = fields(
            "hotel",
            "travel",
            "Hotel stay for the Shanghai client visit with 2 colleagues",
            "Hilton",
            800.0,
        );
        let keywords = extract_keywords(&claim);
        assert_eq!(keywords, vec!["hotel", "travel", "stay", "shanghai", "client"]);
    }

    #[test]
    fn test_stop_words_and_numbers_removed() {
        let claim = fields("meal", "meal", "the dinner of 2024", "", 120.0);
        assert_eq!(extract_keywords(&claim), vec!["meal", "dinner"]);
    }

    #[test]
    fn test_audit_query_mentions_bucket() {
        let claim = fields("hotel", "travel", "", "", 2500.0);
        assert_eq!(
            audit_query(&claim),
            "travel expense reimbursement policy for hotel (large amount) limits and required documentation"
        );
    }
}
