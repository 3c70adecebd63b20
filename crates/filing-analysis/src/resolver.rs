//! Company resolution from free-text queries
//!
//! Resolution order:
//! 1. Exact match of one to three consecutive words against known names,
//!    aliases and tickers (longest phrase first)
//! 2. An all-caps token that looks like a ticker ("TSLA")
//! 3. The first capitalized word that is not an action, question or period
//!    word, extended by the capitalized words that follow it
//! 4. For queries that open with an action word ("analyze rivian"), the
//!    first remaining word

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

/// Words that never name a company
mod stopwords {
    pub const ACTIONS: &[&str] = &[
        "analyze", "analyse", "review", "evaluate", "assess", "research", "examine", "summarize",
        "summarise", "compare", "explain", "show", "tell", "give", "check", "look",
    ];

    pub const QUESTIONS: &[&str] = &[
        "what", "whats", "how", "hows", "why", "when", "where", "which", "who", "is", "are", "was",
        "were", "do", "does", "did", "can", "could", "should", "would", "will",
    ];

    pub const FILLER: &[&str] = &[
        "a", "an", "the", "of", "for", "in", "on", "at", "to", "and", "or", "with", "about", "me",
        "my", "i", "its", "their", "please", "this", "that", "last", "latest", "recent", "current",
        "new",
    ];

    pub const FINANCE: &[&str] = &[
        "performance", "quarter", "quarterly", "annual", "year", "results", "earnings", "financials",
        "financial", "statements", "statement", "report", "filing", "filings", "balance", "sheet",
        "income", "cash", "flow", "stock", "shares", "company", "health", "position", "outlook",
        "analysis", "ratios", "revenue", "profit", "debt",
    ];

    /// All-caps tokens that are not tickers
    pub const NOT_TICKERS: &[&str] = &[
        "A", "I", "Q", "SEC", "CEO", "CFO", "COO", "EPS", "GAAP", "USA", "US", "AI", "IPO", "ETF",
        "FY", "YOY", "QOQ", "TTM", "ROE", "ROA", "USD", "EBIT", "OK",
    ];
}

static PERIOD_TOKEN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^(q[1-4]|h[12]|fy\d{2,4}|\d{2,4}|\d{4}q[1-4]|q[1-4]\d{2,4})$").ok());

fn is_period_token(token: &str) -> bool {
    PERIOD_TOKEN.as_ref().is_some_and(|re| re.is_match(token))
}

fn is_stopword(token: &str) -> bool {
    let lower = token.to_lowercase();
    [
        stopwords::ACTIONS,
        stopwords::QUESTIONS,
        stopwords::FILLER,
        stopwords::FINANCE,
    ]
    .iter()
    .any(|list| list.contains(&lower.as_str()))
        || is_period_token(token)
}

/// How a company was identified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Ticker,
    Keyword,
}

/// A resolved company
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCompany {
    pub company_id: String,
    pub matched_by: MatchKind,
}

/// A company the resolver knows by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownCompany {
    pub id: String,
    /// Lowercase names, short names and tickers
    pub aliases: Vec<String>,
}

impl KnownCompany {
    pub fn new(id: &str, aliases: &[&str]) -> Self {
        let mut all: Vec<String> = aliases.iter().map(|a| a.to_lowercase()).collect();
        all.push(id.to_lowercase());
        Self {
            id: id.to_string(),
            aliases: all,
        }
    }
}

/// One query word, with whether it ended in a possessive
#[derive(Debug, Clone)]
struct Token {
    text: String,
    possessive: bool,
}

fn tokenize(query: &str) -> Vec<Token> {
    query
        .split_whitespace()
        .filter_map(|word| {
            let trimmed = word.trim_matches(|c: char| !(c.is_alphanumeric() || c == '&'));
            let (text, possessive) = match trimmed
                .strip_suffix("'s")
                .or_else(|| trimmed.strip_suffix("\u{2019}s"))
            {
                Some(stem) => (stem, true),
                None => (trimmed, false),
            };
            (!text.is_empty()).then(|| Token {
                text: text.to_string(),
                possessive,
            })
        })
        .collect()
}

fn is_capitalized(token: &str) -> bool {
    token.chars().next().is_some_and(char::is_uppercase)
}

fn looks_like_ticker(token: &str) -> bool {
    (1..=5).contains(&token.len())
        && token.chars().all(|c| c.is_ascii_uppercase())
        && !stopwords::NOT_TICKERS.contains(&token)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Identifies the company a query is about
#[derive(Debug, Clone, Default)]
pub struct CompanyResolver {
    known: Vec<KnownCompany>,
}

impl CompanyResolver {
    /// Resolver with no known companies; only heuristics apply
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver preloaded with widely followed issuers
    pub fn with_defaults() -> Self {
        Self::new()
            .with_company(KnownCompany::new("Tesla", &["TSLA", "Tesla Inc", "Tesla Motors"]))
            .with_company(KnownCompany::new("Apple", &["AAPL", "Apple Inc"]))
            .with_company(KnownCompany::new("Microsoft", &["MSFT", "Microsoft Corp"]))
            .with_company(KnownCompany::new("Alphabet", &["GOOGL", "GOOG", "Google"]))
            .with_company(KnownCompany::new("Amazon", &["AMZN", "Amazon.com"]))
            .with_company(KnownCompany::new("Nvidia", &["NVDA", "Nvidia Corp"]))
            .with_company(KnownCompany::new("Meta Platforms", &["META", "Facebook"]))
            .with_company(KnownCompany::new("Berkshire Hathaway", &["BRK", "Berkshire"]))
            .with_company(KnownCompany::new("JPMorgan Chase", &["JPM", "JPMorgan", "JP Morgan"]))
            .with_company(KnownCompany::new("Netflix", &["NFLX"]))
    }

    pub fn with_company(mut self, company: KnownCompany) -> Self {
        self.known.push(company);
        self
    }

    /// Resolve a query to a company, or `None` when nothing plausible is named
    pub fn resolve(&self, query: &str) -> Option<ResolvedCompany> {
        let tokens = tokenize(query);
        let resolved = self
            .exact(&tokens)
            .or_else(|| Self::ticker(&tokens))
            .or_else(|| Self::keyword(&tokens))
            .or_else(|| Self::after_action(&tokens));
        debug!(query, ?resolved, "Company resolution");
        resolved
    }

    fn exact(&self, tokens: &[Token]) -> Option<ResolvedCompany> {
        let words: Vec<String> = tokens.iter().map(|t| t.text.to_lowercase()).collect();
        for width in (1..=3).rev() {
            for window in words.windows(width) {
                let phrase = window.join(" ");
                if let Some(company) = self.known.iter().find(|c| c.aliases.contains(&phrase)) {
                    return Some(ResolvedCompany {
                        company_id: company.id.clone(),
                        matched_by: MatchKind::Exact,
                    });
                }
            }
        }
        None
    }

    fn ticker(tokens: &[Token]) -> Option<ResolvedCompany> {
        tokens
            .iter()
            .find(|t| looks_like_ticker(&t.text))
            .map(|t| ResolvedCompany {
                company_id: t.text.clone(),
                matched_by: MatchKind::Ticker,
            })
    }

    fn keyword(tokens: &[Token]) -> Option<ResolvedCompany> {
        let start = tokens
            .iter()
            .position(|t| is_capitalized(&t.text) && !is_stopword(&t.text))?;

        let mut name = vec![tokens[start].text.as_str()];
        if !tokens[start].possessive {
            for token in &tokens[start + 1..] {
                let continues = (is_capitalized(&token.text) || token.text == "&") && !is_stopword(&token.text);
                if !continues {
                    break;
                }
                name.push(&token.text);
                if token.possessive {
                    break;
                }
            }
        }

        Some(ResolvedCompany {
            company_id: name.join(" "),
            matched_by: MatchKind::Keyword,
        })
    }

    fn after_action(tokens: &[Token]) -> Option<ResolvedCompany> {
        let first = tokens.first()?;
        if !stopwords::ACTIONS.contains(&first.text.to_lowercase().as_str()) {
            return None;
        }
        tokens[1..]
            .iter()
            .find(|t| t.text.len() >= 3 && t.text.chars().all(char::is_alphabetic) && !is_stopword(&t.text))
            .map(|t| ResolvedCompany {
                company_id: capitalize(&t.text),
                matched_by: MatchKind::Keyword,
            })
    }
}
