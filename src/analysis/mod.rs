//! Analysis API surface: typed results, the error taxonomy, and response parsing.
//!
//! The provider answers in a pipe-delimited line (`verdict|explanation` or
//! `mainInfo|detail|detail`). Parsing failures are reported as
//! [`QueryError::Parsing`] and go through the same retry path as HTTP failures.

pub mod client;
pub mod prompts;

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::format::truncate_to_boundary;

pub use client::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionTransport, PerplexityTransport,
    QueryClient, RetryPolicy,
};

/// Hard cap for explanation / main info text, in grapheme clusters.
pub const MAX_EXPLANATION_LENGTH: usize = 300;
/// Only the first few provider citations are ever posted.
pub const MAX_CITATIONS: usize = 5;

pub const FACTCHECK_FALLBACK: &str =
    "Unable to verify due to technical difficulties. Please try again later.";
pub const MOREINFO_FALLBACK: &str =
    "Unable to retrieve information due to technical difficulties. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    True,
    False,
    Misleading,
    Unverified,
}

impl Verdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Verdict::True => "True",
            Verdict::False => "False",
            Verdict::Misleading => "Misleading",
            Verdict::Unverified => "Unverified",
        }
    }

    /// Lenient parse: case-insensitive, ignores stray `*`, braces, quotes.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned = raw
            .trim()
            .trim_matches(|c: char| c == '*' || c == '{' || c == '}' || c == '"' || c.is_whitespace())
            .to_ascii_lowercase();
        match cleaned.as_str() {
            "true" => Some(Verdict::True),
            "false" => Some(Verdict::False),
            "misleading" => Some(Verdict::Misleading),
            "unverified" => Some(Verdict::Unverified),
            _ => None,
        }
    }
}

/// Which command a mention asked for; selects prompt and parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    FactCheck,
    MoreInfo,
}

impl QueryMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            QueryMode::FactCheck => "factcheck",
            QueryMode::MoreInfo => "moreinfo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactCheck {
    pub verdict: Verdict,
    pub explanation: String,
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoSummary {
    pub main_info: String,
    pub details: Vec<String>,
    pub sources: Vec<String>,
}

/// Outcome of a query. The degraded fallback is an ordinary value of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisResult {
    FactCheck(FactCheck),
    Info(InfoSummary),
}

impl AnalysisResult {
    /// Postable placeholder used once retries are exhausted.
    pub fn fallback(mode: QueryMode) -> Self {
        match mode {
            QueryMode::FactCheck => AnalysisResult::FactCheck(FactCheck {
                verdict: Verdict::Unverified,
                explanation: FACTCHECK_FALLBACK.to_string(),
                citations: Vec::new(),
            }),
            QueryMode::MoreInfo => AnalysisResult::Info(InfoSummary {
                main_info: MOREINFO_FALLBACK.to_string(),
                details: Vec::new(),
                sources: Vec::new(),
            }),
        }
    }

    /// Citations (fact-check) or sources (info), in provider order.
    pub fn citations(&self) -> &[String] {
        match self {
            AnalysisResult::FactCheck(fc) => &fc.citations,
            AnalysisResult::Info(info) => &info.sources,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("analysis API rate limited, retry after {retry_after:?}")]
    RateLimit { retry_after: Duration },
    #[error("analysis API returned HTTP {status}")]
    Api { status: u16 },
    #[error("malformed analysis response: {0}")]
    Parsing(String),
    #[error("analysis request failed: {0}")]
    Network(String),
}

impl QueryError {
    pub const fn kind(&self) -> &'static str {
        match self {
            QueryError::RateLimit { .. } => "RATE_LIMIT",
            QueryError::Api { .. } => "API_ERROR",
            QueryError::Parsing(_) => "PARSING_ERROR",
            QueryError::Network(_) => "NETWORK_ERROR",
        }
    }
}

static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*{2,3}").expect("valid regex"));
static RE_CITE_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[\d,\s]+\]").expect("valid regex"));
static RE_SOURCE_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Source:.*$").expect("valid regex"));
static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([.,;:])").expect("valid regex"));

/// Strip markdown emphasis, `[1]`-style markers and a trailing `Source:` line.
pub fn clean_text(s: &str) -> String {
    let out = RE_EMPHASIS.replace_all(s, "");
    let out = RE_CITE_MARKERS.replace_all(&out, "");
    let out = RE_SPACE_BEFORE_PUNCT.replace_all(&out, "$1");
    let out = RE_SOURCE_TAIL.replace(&out, "");
    out.trim().to_string()
}

fn first_citations(mut citations: Vec<String>) -> Vec<String> {
    citations.truncate(MAX_CITATIONS);
    citations
}

/// Parse `{verdict}|{explanation}`. Segments past the second are ignored.
pub fn parse_fact_check(content: &str, citations: Vec<String>) -> Result<FactCheck, QueryError> {
    let mut parts = content.split('|');
    let verdict_raw = parts.next().unwrap_or_default();
    let explanation_raw = parts
        .next()
        .ok_or_else(|| QueryError::Parsing("missing explanation segment".into()))?;

    let verdict = Verdict::parse(verdict_raw)
        .ok_or_else(|| QueryError::Parsing(format!("unknown verdict {:?}", verdict_raw.trim())))?;
    let explanation = truncate_to_boundary(&clean_text(explanation_raw), MAX_EXPLANATION_LENGTH);
    if explanation.is_empty() {
        return Err(QueryError::Parsing("empty explanation".into()));
    }

    Ok(FactCheck {
        verdict,
        explanation,
        citations: first_citations(citations),
    })
}

/// Parse `{mainInfo}|{detail}*`.
pub fn parse_info(content: &str, sources: Vec<String>) -> Result<InfoSummary, QueryError> {
    let mut parts = content.split('|');
    let main_info = truncate_to_boundary(
        &clean_text(parts.next().unwrap_or_default()),
        MAX_EXPLANATION_LENGTH,
    );
    if main_info.is_empty() {
        return Err(QueryError::Parsing("empty main info".into()));
    }
    let details = parts
        .map(clean_text)
        .filter(|d| !d.is_empty())
        .collect();

    Ok(InfoSummary {
        main_info,
        details,
        sources: first_citations(sources),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parse_is_lenient() {
        assert_eq!(Verdict::parse(" **False** "), Some(Verdict::False));
        assert_eq!(Verdict::parse("{Misleading}"), Some(Verdict::Misleading));
        assert_eq!(Verdict::parse("TRUE"), Some(Verdict::True));
        assert_eq!(Verdict::parse("Partly true"), None);
    }

    #[test]
    fn clean_text_strips_markers_and_source_tail() {
        let s = "The **claim** is wrong [1][2, 3]. Source: example.com";
        assert_eq!(clean_text(s), "The claim is wrong.");
        assert_eq!(clean_text("Up 3% [4] , then down [5] ; see [6] :"), "Up 3%, then down; see:");
    }

    #[test]
    fn fact_check_requires_explanation() {
        let err = parse_fact_check("True", vec![]).unwrap_err();
        assert_eq!(err.kind(), "PARSING_ERROR");
    }

    #[test]
    fn fact_check_caps_citations_and_ignores_extra_segments() {
        let cites: Vec<String> = (1..=8).map(|i| format!("https://s{i}.org")).collect();
        let fc = parse_fact_check("False | Not supported by data. | extra", cites).unwrap();
        assert_eq!(fc.verdict, Verdict::False);
        assert_eq!(fc.explanation, "Not supported by data.");
        assert_eq!(fc.citations.len(), MAX_CITATIONS);
        assert_eq!(fc.citations[0], "https://s1.org");
    }

    #[test]
    fn info_collects_non_empty_details() {
        let info = parse_info("Summary here.| first | |second", vec![]).unwrap();
        assert_eq!(info.main_info, "Summary here.");
        assert_eq!(info.details, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn fallback_is_unverified_and_citation_free() {
        let AnalysisResult::FactCheck(fc) = AnalysisResult::fallback(QueryMode::FactCheck) else {
            panic!("expected fact-check fallback");
        };
        assert_eq!(fc.verdict, Verdict::Unverified);
        assert!(fc.citations.is_empty());
    }
}
