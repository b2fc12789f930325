//! Scored routing between the RAG path and the numeric tools path.
//!
//! Precedence order matters and is covered by the test matrix: a strong
//! conceptual phrase forces RAG; otherwise a mandatory numeric keyword
//! forces the tools path; otherwise the keyword scores are compared with
//! ties going to RAG. Hybrid detection runs on top of the preference.

/// Conceptual/strategic hints that indicate the knowledge base.
const CONCEPTUAL_HINTS: &[&str] = &[
    "what is",
    "define",
    "explain",
    "describe",
    "tell me",
    "how does",
    "why",
    "overview",
    "everything",
    "framework",
    "kpi",
    "glossary",
    "business",
    "economics",
    "theory",
    "best practice",
    "methodology",
    "approach",
    "strategy",
    "benchmark",
    "playbook",
    "lifecycle",
    "segmentation",
    "fundamentals",
    "principles",
    "concepts",
    "terminology",
    "background",
    "context",
    "history",
];

/// Numeric/data hints that indicate the deterministic tools.
const NUMERIC_HINTS: &[&str] = &[
    "roi",
    "irr",
    "arpu",
    "mrr",
    "cltv",
    "budget",
    "conversion",
    "cost per intervention",
    "risk distribution",
    "compare",
    "by strategy",
    "calculate",
    "show me",
    "what is the",
    "get",
    "fetch",
    "tenure",
    "contract",
    "segment",
    "drivers",
    "feature importance",
    "month-to-month",
    "mtm",
    "m2m",
];

/// Phrases that force the RAG path regardless of scores.
const STRONG_CONCEPTUAL: &[&str] = &[
    "what is",
    "define",
    "explain",
    "describe",
    "how does",
    "why does",
    "why is",
];

/// Keywords that force the tools path when no strong conceptual phrase
/// is present.
const MANDATORY_NUMERIC: &[&str] = &[
    "month-to-month",
    "mtm",
    "m2m",
    "tenure",
    "contract",
    "segment",
    "roi",
    "arpu",
    "cltv",
    "drivers",
    "feature importance",
    "risk distribution",
];

const VISUAL_HINTS: &[&str] = &["show", "chart", "graph", "plot", "distribution", "visual"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteScore {
    pub rag: usize,
    pub numeric: usize,
    pub prefer_rag: bool,
    pub is_hybrid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Rag,
    Numeric,
    Hybrid,
    Generic,
}

impl Route {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Rag => "rag",
            Route::Numeric => "numeric",
            Route::Hybrid => "hybrid",
            Route::Generic => "generic",
        }
    }
}

/// Score a query on the conceptual and numeric axes.
#[must_use]
pub fn score_route(query: &str) -> RouteScore {
    let s = query.to_lowercase();

    let conceptual_hits = CONCEPTUAL_HINTS.iter().filter(|k| s.contains(*k)).count();
    // Bonus for longer, explanatory queries
    let length_bonus = (s.len() / 60).min(2);
    let rag = conceptual_hits + length_bonus;

    let numeric = NUMERIC_HINTS.iter().filter(|k| s.contains(*k)).count();

    let strong_conceptual = STRONG_CONCEPTUAL.iter().any(|k| s.contains(*k));
    let mandatory_numeric = MANDATORY_NUMERIC.iter().any(|k| s.contains(*k));

    let prefer_rag = if strong_conceptual {
        true
    } else if mandatory_numeric {
        false
    } else {
        // Ties favor the knowledge base
        rag >= numeric
    };

    let mentions_data = numeric > 0 || mandatory_numeric;
    let wants_visual = VISUAL_HINTS.iter().any(|k| s.contains(*k)) || s.contains("tell me about");
    let long_enough = s.split_whitespace().count() >= 4;
    let is_hybrid = mentions_data && wants_visual && long_enough;

    RouteScore {
        rag,
        numeric,
        prefer_rag,
        is_hybrid,
    }
}

/// Resolve the final route. Hybrid takes priority over the RAG/numeric
/// preference.
#[must_use]
pub fn route(query: &str) -> Route {
    let score = score_route(query);

    if score.is_hybrid {
        return Route::Hybrid;
    }
    if score.prefer_rag {
        return Route::Rag;
    }
    if score.numeric > 0 {
        return Route::Numeric;
    }
    Route::Generic
}
