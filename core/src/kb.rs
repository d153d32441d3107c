//! Knowledge-base retrieval: term scoring, snippets, contextual citations.
//!
//! The retriever is deliberately infallible: a storage error during triage
//! degrades to an empty result set so a KB outage can never fail a run.

use crate::store::{KbDocRecord, TriageStore};
use std::collections::BTreeSet;

const MAX_RESULTS: usize = 5;
const SNIPPET_LEN: usize = 150;
const TITLE_WEIGHT: i64 = 3;
const MIN_TOKEN_LEN: usize = 4;

/// Fixed fraud vocabulary always tried against the KB, on top of the
/// tokens extracted from the risk reasons.
const FRAUD_TERMS: [&str; 8] = [
    "velocity",
    "device",
    "location",
    "merchant",
    "dispute",
    "chargeback",
    "unusual",
    "spike",
];

/// Contextual citations keyed by reason keyword.
const CITATION_MAP: [(&str, &str); 4] = [
    ("velocity", "Reference: Transaction Velocity Guidelines"),
    ("device", "Reference: Device Fingerprinting Playbook"),
    ("location", "Reference: Geographic Anomaly Procedures"),
    ("merchant", "Reference: Merchant Risk Classification"),
];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KbHit {
    pub doc_id: String,
    pub title: String,
    pub anchor: String,
    pub extract: String,
    pub relevance_score: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct KbLookup {
    pub results: Vec<KbHit>,
    pub citations: Vec<String>,
}

#[derive(Clone)]
pub struct KbRetriever {
    store: TriageStore,
}

impl KbRetriever {
    pub fn new(store: TriageStore) -> Self {
        Self { store }
    }

    /// Search driven by risk-signal reasons: extract tokens, add the fixed
    /// vocabulary, score, and attach contextual citations.
    pub fn search_reasons(&self, reasons: &[String]) -> KbLookup {
        let mut terms: BTreeSet<String> = BTreeSet::new();
        for reason in reasons {
            for token in tokenize(reason) {
                terms.insert(token);
            }
        }
        let lowered: Vec<String> = reasons.iter().map(|r| r.to_lowercase()).collect();
        for term in FRAUD_TERMS {
            if lowered.iter().any(|r| r.contains(term)) {
                terms.insert(term.to_string());
            }
        }

        let terms: Vec<String> = terms.into_iter().collect();
        let results = self.ranked(&terms, MAX_RESULTS);

        let mut citations = Vec::new();
        for (keyword, citation) in CITATION_MAP {
            if lowered.iter().any(|r| r.contains(keyword)) {
                citations.push(citation.to_string());
            }
        }

        KbLookup { results, citations }
    }

    /// Free-text search used by the KB search surface.
    pub fn search(&self, query: &str, limit: usize) -> KbLookup {
        let mut terms: Vec<String> = tokenize(query).collect();
        terms.sort();
        terms.dedup();
        KbLookup {
            results: self.ranked(&terms, limit),
            citations: Vec::new(),
        }
    }

    fn ranked(&self, terms: &[String], limit: usize) -> Vec<KbHit> {
        if terms.is_empty() {
            return Vec::new();
        }
        let docs = match self.store.all_kb_docs() {
            Ok(docs) => docs,
            Err(err) => {
                log::warn!("kb lookup failed, returning no results: {err}");
                return Vec::new();
            }
        };

        let mut hits: Vec<KbHit> = docs
            .iter()
            .filter_map(|doc| score_doc(doc, terms))
            .collect();
        hits.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        hits.truncate(limit);
        hits
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(|t| t.to_lowercase())
}

fn score_doc(doc: &KbDocRecord, terms: &[String]) -> Option<KbHit> {
    let title = doc.title.to_lowercase();
    let body = doc.content_text.to_lowercase();

    let mut score = 0i64;
    let mut first_match: Option<usize> = None;
    for term in terms {
        let title_matches = count_matches(&title, term);
        let body_matches = count_matches(&body, term);
        score += TITLE_WEIGHT * title_matches + body_matches;
        if first_match.is_none() {
            first_match = body.find(term.as_str());
        }
    }
    if score == 0 {
        return None;
    }

    Some(KbHit {
        doc_id: doc.id.clone(),
        title: doc.title.clone(),
        anchor: doc.anchor.clone(),
        extract: snippet(&doc.content_text, first_match.unwrap_or(0)),
        relevance_score: score,
    })
}

fn count_matches(haystack: &str, needle: &str) -> i64 {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count() as i64
}

/// A window of at most `SNIPPET_LEN` characters (ellipses included) around
/// the first matched term.
fn snippet(content: &str, around: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= SNIPPET_LEN {
        return content.to_string();
    }

    // `around` is a byte offset into the lowercased body; clamp it into the
    // char domain before windowing.
    let center = around.min(chars.len().saturating_sub(1));
    let budget = SNIPPET_LEN - 6; // room for leading and trailing ellipses
    let half = budget / 2;
    let start = center.saturating_sub(half);
    let end = (start + budget).min(chars.len());
    let start = end.saturating_sub(budget);

    let window: String = chars[start..end].iter().collect();
    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < chars.len() { "..." } else { "" };
    format!("{prefix}{window}{suffix}")
}
