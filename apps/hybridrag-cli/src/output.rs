use std::fmt::Write;

use serde_json::json;

use hybridrag_core::access::AccessDecision;
use hybridrag_core::types::Chunk;
use hybridrag_hybrid::RetrievalResponse;

const SNIPPET_CHARS: usize = 120;

pub fn format_human(query: &str, resp: &RetrievalResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "query: {query}  ({} hits, {} ms)", resp.hits.len(), resp.latency.as_millis());
    if let Some(d) = &resp.degraded {
        let failed: Vec<String> = d.failed.iter().map(|f| format!("{} ({:?})", f.kind, f.reason)).collect();
        let _ = writeln!(out, "warning: degraded results, failed sources: {}", failed.join(", "));
    }
    for hit in &resp.hits {
        let r = &hit.result;
        let provenance: Vec<String> = r.provenance.iter().map(ToString::to_string).collect();
        let scores: Vec<String> = r.source_scores.iter().map(|(k, s)| format!("{k}={s:.4}")).collect();
        let _ = writeln!(out, "{:>3}. {}  fused={:.5}  [{}]  {}", r.rank, r.chunk_id, r.fused_score, provenance.join("+"), scores.join(" "));
        let _ = writeln!(out, "     {}", snippet(&hit.chunk.text));
    }
    out
}

pub fn format_json(query: &str, resp: &RetrievalResponse) -> String {
    let hits: Vec<_> = resp
        .hits
        .iter()
        .map(|h| json!({ "result": h.result, "doc_id": h.chunk.doc_id, "text": h.chunk.text }))
        .collect();
    let body = json!({
        "query": query,
        "latency_ms": u64::try_from(resp.latency.as_millis()).unwrap_or(u64::MAX),
        "degraded": resp.degraded,
        "states": resp.states,
        "hits": hits,
    });
    serde_json::to_string_pretty(&body).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

pub fn format_decision(principal_id: &str, chunk: &Chunk, decision: AccessDecision) -> String {
    let verdict = if decision.allowed { "ALLOW" } else { "DENY" };
    let mut keys: Vec<_> = chunk.metadata.iter().collect();
    keys.sort();
    let meta: Vec<String> = keys.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{verdict} {principal_id} -> {} (rule: {:?})\n  metadata: {}", chunk.id, decision.rule, meta.join(", "))
}

fn snippet(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SNIPPET_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(SNIPPET_CHARS).collect();
    format!("{cut}…")
}
