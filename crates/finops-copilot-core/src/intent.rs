//! Free-text question parsing.
//!
//! [`parse_question`] extracts a [`ParsedIntent`] from a question using
//! lightweight pattern matching. It is a best-effort heuristic, not a
//! grammar: ambiguous questions resolve to whatever the first satisfied
//! pattern says.
//!
//! # Extracted fields
//!
//! | Field | Source |
//! |-------|--------|
//! | `month` | explicit `YYYY-MM`, else a month name paired with the first `20xx` year (or the default year) |
//! | `owner` | `by <word>`, then `owner <word>`, then `for <word>` |
//! | `top_n` | first all-digit token, else first number word `one`..`ten` |
//! | `service_keyword` | `in <word>` |
//! | `query_kind` | first satisfied rule of [`RULES`] |
//!
//! Words that cannot name an owner or service (stop words, month names,
//! numbers, and `owner` itself in `cost by owner alice`) are skipped.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Calendar month names, January first.
pub const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const NUMBER_WORDS: [&str; 10] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "are", "cost", "costs", "each", "every", "for", "group", "had",
    "has", "in", "is", "last", "me", "month", "monthly", "my", "next", "of", "on", "or", "our",
    "owner", "owners", "region", "resource", "service", "services", "spend", "that", "the",
    "this", "to", "trend", "trends", "us", "was", "were", "with", "year",
];

/// Kind of structured lookup a question asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    CostByOwner,
    Trend,
    HighestPaid,
    MostUsedService,
    TopNService,
    None,
}

/// Structured intent extracted from one question. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedIntent {
    /// Target invoice month, `YYYY-MM`.
    pub month: Option<String>,
    /// Target owner, lowercased.
    pub owner: Option<String>,
    pub top_n: Option<usize>,
    /// Service name fragment from `in <word>`, lowercased.
    pub service_keyword: Option<String>,
    /// First satisfied rule, or [`QueryKind::None`].
    pub query_kind: QueryKind,
    /// Every satisfied rule, in precedence order.
    pub matched: Vec<QueryKind>,
}

/// One classification rule: a query kind and the predicate that selects it.
pub struct Rule {
    pub kind: QueryKind,
    pub matches: fn(&str, &ParsedIntent) -> bool,
}

/// Classification rules in precedence order.
pub const RULES: &[Rule] = &[
    Rule {
        kind: QueryKind::CostByOwner,
        matches: is_cost_by_owner,
    },
    Rule {
        kind: QueryKind::Trend,
        matches: is_trend,
    },
    Rule {
        kind: QueryKind::HighestPaid,
        matches: is_highest_paid,
    },
    Rule {
        kind: QueryKind::MostUsedService,
        matches: is_most_used_service,
    },
    Rule {
        kind: QueryKind::TopNService,
        matches: is_top_n_service,
    },
];

fn is_cost_by_owner(text: &str, _intent: &ParsedIntent) -> bool {
    text.contains("cost by owner")
}

fn is_trend(text: &str, _intent: &ParsedIntent) -> bool {
    text.contains("trend")
}

fn is_highest_paid(text: &str, _intent: &ParsedIntent) -> bool {
    text.contains("highest paid")
}

fn is_most_used_service(text: &str, _intent: &ParsedIntent) -> bool {
    text.contains("mostly taken service") || text.contains("most used service")
}

fn is_top_n_service(text: &str, intent: &ParsedIntent) -> bool {
    text.contains("top") && intent.top_n.is_some() && intent.service_keyword.is_some()
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn explicit_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\b(20\d{2})-(0[1-9]|1[0-2])\b")
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\b20\d{2}\b")
}

fn month_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\b[a-z]+\b")
}

fn by_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bby\s+(\w+)")
}

fn owner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bowner\s+(\w+)")
}

fn for_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bfor\s+(\w+)")
}

fn in_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bin\s+(\w+)")
}

/// Parses a question into a [`ParsedIntent`].
///
/// `default_year` pairs with a month name when the question has no `20xx`
/// year.
pub fn parse_question(question: &str, default_year: u16) -> ParsedIntent {
    let text = question.to_lowercase();

    let mut intent = ParsedIntent {
        month: parse_month(&text, default_year),
        owner: parse_owner(&text),
        top_n: parse_top_n(&text),
        service_keyword: parse_service_keyword(&text),
        query_kind: QueryKind::None,
        matched: Vec::new(),
    };

    intent.matched = RULES
        .iter()
        .filter(|rule| (rule.matches)(&text, &intent))
        .map(|rule| rule.kind)
        .collect();
    intent.query_kind = intent.matched.first().copied().unwrap_or(QueryKind::None);
    intent
}

/// Extracts the target month as `YYYY-MM`.
///
/// An explicit `YYYY-MM` token wins. Otherwise the first month name in
/// calendar order that appears as a whole word is paired with the first
/// `20xx` year, or `default_year` when there is none. No month name means no
/// month, even if a year is present.
pub fn parse_month(text: &str, default_year: u16) -> Option<String> {
    let text = text.to_lowercase();

    if let Some(caps) = explicit_month_re().captures(&text) {
        return Some(format!("{}-{}", &caps[1], &caps[2]));
    }

    let words: Vec<&str> = month_name_re()
        .find_iter(&text)
        .map(|m| m.as_str())
        .collect();
    let month = MONTH_NAMES
        .iter()
        .position(|name| words.contains(name))?
        + 1;

    let year = year_re()
        .find(&text)
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .unwrap_or(default_year);

    Some(format!("{}-{:02}", year, month))
}

/// Extracts the owner name, lowercased.
pub fn parse_owner(text: &str) -> Option<String> {
    let text = text.to_lowercase();
    [by_re(), owner_re(), for_re()]
        .iter()
        .find_map(|re| first_candidate(re, &text))
}

/// Extracts the requested result count.
pub fn parse_top_n(text: &str) -> Option<usize> {
    let text = text.to_lowercase();
    let tokens: Vec<&str> = text.split_whitespace().collect();

    tokens
        .iter()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .find_map(|t| t.parse::<usize>().ok().filter(|n| *n > 0))
        .or_else(|| {
            tokens
                .iter()
                .find_map(|t| NUMBER_WORDS.iter().position(|w| w == t).map(|i| i + 1))
        })
}

/// Extracts the service keyword from `in <word>`, lowercased.
pub fn parse_service_keyword(text: &str) -> Option<String> {
    first_candidate(in_re(), &text.to_lowercase())
}

fn first_candidate(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|word| is_name_candidate(word))
}

fn is_name_candidate(word: &str) -> bool {
    !(word.chars().all(|c| c.is_ascii_digit())
        || STOP_WORDS.contains(&word)
        || MONTH_NAMES.contains(&word)
        || NUMBER_WORDS.contains(&word))
}
