//! Compose grounded answers from retrieval output.
//!
//! Summarizes the top retrieved passage into plain text, deduplicates
//! citations (with a system placeholder when none exist), and generates
//! topic-aware follow-up suggestions keyed by the cited sections.

use std::sync::LazyLock;

use regex::Regex;

use crate::schema::{Answer, Citation};

const MAX_SUMMARY_CHARS: usize = 300;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*\*|__)(.*?)(\*\*|__)").unwrap());
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\*|_)(.*?)(\*|_)").unwrap());
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+").unwrap());
static ESCAPE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\(.)").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip common markdown formatting from text.
fn strip_markdown(text: &str) -> String {
    let text = HEADER_RE.replace_all(text, "");
    let text = BOLD_RE.replace_all(&text, "$2");
    let text = ITALIC_RE.replace_all(&text, "$2");
    let text = CODE_RE.replace_all(&text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = LIST_RE.replace_all(&text, "");
    let text = ESCAPE_RE.replace_all(&text, "$1");
    let text = BLANKS_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Summarize retrieval context into a concise passage.
///
/// Takes the first passage, drops citation markers and relevance lines,
/// strips markdown, and truncates to 300 characters with an ellipsis.
#[must_use]
pub fn summarize_context(context: &str) -> String {
    let passages: Vec<&str> = context
        .split("\n---\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let Some(first) = passages.first() else {
        return "No relevant information found.".to_string();
    };

    let body: String = first
        .lines()
        .filter(|line| !line.starts_with("(relevance:") && !line.starts_with('['))
        .collect::<Vec<_>>()
        .join("\n");

    let clean = strip_markdown(&body);
    if clean.is_empty() {
        return "No relevant information found.".to_string();
    }

    if clean.chars().count() > MAX_SUMMARY_CHARS {
        let truncated: String = clean.chars().take(MAX_SUMMARY_CHARS - 3).collect();
        format!("{truncated}...")
    } else {
        clean
    }
}

/// Section-keyed follow-up candidates; the first entry of each cited
/// section is surfaced, padded from the defaults.
fn follow_up_candidates(section_id: &str) -> &'static [&'static str] {
    match section_id {
        "finance" => &[
            "Explain ARPU calculation",
            "Define customer lifetime value",
            "Show ROI by strategy",
        ],
        "network-economics" => &[
            "Explain network IRR",
            "Describe capex structure",
            "How does 5G affect economics?",
        ],
        "pricing-elasticity" => &[
            "Define price elasticity",
            "How does pricing affect churn?",
            "Explain ARPU optimization",
        ],
        "lifecycle" => &[
            "Describe customer lifecycle stages",
            "Explain acquisition vs retention",
            "What is win-back strategy?",
        ],
        "modeling" => &[
            "Explain uplift modeling",
            "Describe survival analysis",
            "What is reinforcement learning for churn?",
        ],
        "ops" => &[
            "How do you integrate churn models?",
            "Explain NBA systems",
            "Describe campaign ROI measurement",
        ],
        "geo" => &[
            "How does coverage affect churn?",
            "Explain competitive analysis",
            "Describe geospatial features",
        ],
        _ => &[],
    }
}

const DEFAULT_FOLLOW_UPS: &[&str] = &[
    "Compare ROI across strategies",
    "Show customer risk distribution",
    "Explain churn drivers",
];

/// Build follow-ups from up to 3 distinct cited sections, padded with
/// defaults, skipping duplicates.
fn generate_follow_ups(citations: &[Citation]) -> Vec<String> {
    let mut seen_sections = Vec::new();
    let mut follow_ups: Vec<String> = Vec::new();

    for citation in citations {
        if seen_sections.len() >= 3 {
            break;
        }
        if seen_sections.contains(&citation.source) {
            continue;
        }
        seen_sections.push(citation.source.clone());

        if let Some(first) = follow_up_candidates(&citation.source).first() {
            if !follow_ups.iter().any(|f| f == first) {
                follow_ups.push((*first).to_string());
            }
        }
    }

    for default in DEFAULT_FOLLOW_UPS {
        if follow_ups.len() >= 3 {
            break;
        }
        if !follow_ups.iter().any(|f| f == default) {
            follow_ups.push((*default).to_string());
        }
    }

    follow_ups.truncate(3);
    follow_ups
}

/// Compose a grounded answer from retrieval context and citations.
///
/// Citations are deduplicated by source in first-seen order; an empty
/// list is replaced with a system placeholder so the answer contract's
/// minimum-citation invariant always holds.
#[must_use]
pub fn compose_grounded_answer(_query: &str, context: &str, citations: &[Citation]) -> Answer {
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<Citation> = Vec::new();
    for citation in citations {
        if seen.insert(citation.source.clone()) {
            unique.push(citation.clone());
        }
    }

    let follow_ups = generate_follow_ups(&unique);

    if unique.is_empty() {
        unique.push(Citation::new("system", "No relevant sources found"));
    }

    Answer {
        text: summarize_context(context),
        citations: unique,
        chart: None,
        follow_ups,
    }
}
