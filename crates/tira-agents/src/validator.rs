use rust_decimal::Decimal;
use tira_models::{AnalystKind, IssueCode};

/// Reports shorter than this are flagged `TOO_SHORT`.
pub const MIN_REPORT_CHARS: usize = 200;

const CITATION_PHRASES: [&str; 7] = [
    "according to",
    "source",
    "data shows",
    "reported",
    "as of",
    "based on",
    "per the",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<IssueCode>,
    pub score: Decimal,
}

fn penalty(issue: IssueCode) -> Decimal {
    match issue {
        IssueCode::NoDataBacking => Decimal::ONE,
        IssueCode::TooShort => Decimal::new(30, 2),
        IssueCode::MissingSections => Decimal::new(25, 2),
        IssueCode::NoCitations => Decimal::new(20, 2),
        IssueCode::NoNumbers => Decimal::new(15, 2),
    }
}

/// Keywords an analyst of this kind must touch on.
pub fn required_keywords(kind: AnalystKind) -> &'static [&'static str] {
    match kind {
        AnalystKind::Market => &["trend", "price", "volume"],
        AnalystKind::Sentiment => &["sentiment", "social"],
        AnalystKind::News => &["news", "macro"],
        AnalystKind::Fundamentals => &["revenue", "earnings", "balance"],
    }
}

/// Score an analyst report. `has_tool_data` comes from the invocation's fetch ledger.
pub fn validate_report(kind: AnalystKind, text: &str, has_tool_data: bool) -> ValidationResult {
    if !has_tool_data {
        return ValidationResult {
            valid: false,
            issues: vec![IssueCode::NoDataBacking],
            score: Decimal::ZERO,
        };
    }

    let lower = text.to_lowercase();
    let mut issues = Vec::new();

    if text.trim().chars().count() < MIN_REPORT_CHARS {
        issues.push(IssueCode::TooShort);
    }
    if required_keywords(kind).iter().any(|kw| !lower.contains(kw)) {
        issues.push(IssueCode::MissingSections);
    }
    if !CITATION_PHRASES.iter().any(|p| lower.contains(p)) {
        issues.push(IssueCode::NoCitations);
    }
    if !text.chars().any(|c| c.is_ascii_digit()) {
        issues.push(IssueCode::NoNumbers);
    }

    let deducted: Decimal = issues.iter().map(|i| penalty(*i)).sum();
    let score = (Decimal::ONE - deducted).clamp(Decimal::ZERO, Decimal::ONE);

    ValidationResult {
        valid: issues.is_empty(),
        issues,
        score,
    }
}
