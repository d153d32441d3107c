//! KB retriever tests: term scoring, ranking, snippet bounds, contextual
//! citations, and search-surface validation.

use triage_core::error::TriageResult;
use triage_core::kb::KbRetriever;
use triage_core::store::{KbDocRecord, TriageStore};

fn seeded_store() -> TriageResult<TriageStore> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;

    store.insert_kb_doc(&KbDocRecord {
        id: "kb-velocity".to_string(),
        title: "Transaction Velocity Guidelines".to_string(),
        anchor: "velocity".to_string(),
        content_text: "Velocity analysis compares the 24 hour window against the daily \
                       average. A velocity spike is a strong indicator."
            .to_string(),
    })?;
    store.insert_kb_doc(&KbDocRecord {
        id: "kb-device".to_string(),
        title: "Device Fingerprinting Playbook".to_string(),
        anchor: "device".to_string(),
        content_text: "A device never seen before raises risk. Device churn across many \
                       devices in a short period is another marker."
            .to_string(),
    })?;
    store.insert_kb_doc(&KbDocRecord {
        id: "kb-long".to_string(),
        title: "Geographic Anomaly Procedures".to_string(),
        anchor: "location".to_string(),
        content_text: format!(
            "{}The keyword location appears exactly here, deep inside the document, \
             so the snippet must be windowed around it.{}",
            "lead-in text. ".repeat(40),
            " trailing text".repeat(40)
        ),
    })?;
    Ok(store)
}

/// Test 1: title matches weigh three times body matches.
#[test]
fn title_matches_outrank_body() -> TriageResult<()> {
    let retriever = KbRetriever::new(seeded_store()?);
    let lookup = retriever.search("velocity", 5);

    assert!(!lookup.results.is_empty());
    assert_eq!(lookup.results[0].doc_id, "kb-velocity");
    // Title (1 match * 3) + body (2 matches) = 5.
    assert_eq!(lookup.results[0].relevance_score, 5);
    Ok(())
}

/// Test 2: snippets stay within 150 characters including ellipses.
#[test]
fn snippet_bounded() -> TriageResult<()> {
    let retriever = KbRetriever::new(seeded_store()?);
    let lookup = retriever.search("location", 5);

    let hit = lookup
        .results
        .iter()
        .find(|h| h.doc_id == "kb-long")
        .expect("long doc matched");
    assert!(
        hit.extract.chars().count() <= 150,
        "snippet too long: {}",
        hit.extract.len()
    );
    assert!(hit.extract.contains("location"));
    assert!(hit.extract.starts_with("..."));
    Ok(())
}

/// Test 3: reason-driven search adds contextual citations per keyword.
#[test]
fn reason_driven_citations() -> TriageResult<()> {
    let retriever = KbRetriever::new(seeded_store()?);
    let lookup = retriever.search_reasons(&[
        "velocity: 20 transactions in 24h vs 2.0/day average".to_string(),
        "device not seen before for this customer".to_string(),
    ]);

    assert!(lookup
        .citations
        .contains(&"Reference: Transaction Velocity Guidelines".to_string()));
    assert!(lookup
        .citations
        .contains(&"Reference: Device Fingerprinting Playbook".to_string()));
    assert!(!lookup.results.is_empty());
    Ok(())
}

/// Test 4: no matching terms means empty results, not an error.
#[test]
fn unmatched_terms_empty() -> TriageResult<()> {
    let retriever = KbRetriever::new(seeded_store()?);
    let lookup = retriever.search("zzzzqqqq", 5);
    assert!(lookup.results.is_empty());

    // Short tokens (under 4 chars) are ignored entirely.
    let lookup = retriever.search("a bb ccc", 5);
    assert!(lookup.results.is_empty());
    Ok(())
}

/// Test 5: reason search returns at most five documents.
#[test]
fn result_cap() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    for i in 0..8 {
        store.insert_kb_doc(&KbDocRecord {
            id: format!("kb-{i}"),
            title: format!("Velocity note {i}"),
            anchor: format!("a{i}"),
            content_text: "velocity guidance".to_string(),
        })?;
    }
    let retriever = KbRetriever::new(store);
    let lookup = retriever.search_reasons(&["velocity spike".to_string()]);
    assert!(lookup.results.len() <= 5);
    Ok(())
}
