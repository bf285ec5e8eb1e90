//! C11 — Extraction Pipeline. Fire-and-forget per-topic drain of turns
//! past the extraction cursor into durable memories plus a rolling
//! summary (spec.md §4.11).

use cortex_domain::model::{Turn, TurnRole};
use cortex_domain::tool::ChatMessage;
use cortex_memory::RememberRequest;
use cortex_store::{CursorStore, SummaryStore};
use sha2::{Digest, Sha256};

use crate::state::AppState;
use crate::trace::TraceEvent;

const BATCH_LIMIT: usize = 100;
const CHAR_BUDGET: usize = 50_000;
const RECALL_LIMIT: u32 = 10;
const MAX_ITEMS_PER_BATCH: usize = 10;
const MIN_FACT_LEN: usize = 5;

/// Runs one extraction pass for `topic`, then clears the in-flight guard
/// no matter how it ends. Intended to be spawned with `tokio::spawn` and
/// never awaited by the caller.
pub async fn run(state: AppState, topic: String) {
    if let Err(e) = drain(&state, &topic).await {
        tracing::warn!(topic = %topic, error = %e, "extraction: drain failed");
        TraceEvent::ExtractionFailed { topic_key: topic.clone(), error: e }.emit();
    }
    state.extraction_inflight.lock().remove(&topic);
}

async fn drain(state: &AppState, topic: &str) -> Result<(), String> {
    let extraction_model = match &state.config.llm.extraction_model {
        Some(m) => m.clone(),
        None => return Ok(()),
    };

    let cursor_store = CursorStore::new(&state.store);
    let cursor = cursor_store.get(topic).map_err(|e| e.to_string())?;
    let (mut last_rowid, turns_since) = match cursor {
        Some(c) => (c.last_extracted_rowid, c.turns_since_extraction),
        None => (0, 0),
    };
    if turns_since < state.config.extraction.extraction_interval as i64 {
        return Ok(());
    }

    let mut produced_any = false;

    loop {
        let batch = cursor_store
            .load_turns_since(topic, last_rowid, BATCH_LIMIT)
            .map_err(|e| e.to_string())?;
        if batch.is_empty() {
            cursor_store
                .advance(topic, last_rowid)
                .map_err(|e| e.to_string())?;
            break;
        }

        let batch_last_rowid = batch.iter().map(|(_, rowid)| *rowid).max().unwrap_or(last_rowid);
        let extractable: Vec<&Turn> = batch
            .iter()
            .map(|(turn, _)| turn)
            .filter(|t| is_extractable(t))
            .collect();

        if extractable.is_empty() {
            cursor_store
                .advance(topic, batch_last_rowid)
                .map_err(|e| e.to_string())?;
            last_rowid = batch_last_rowid;
            if batch.len() < BATCH_LIMIT {
                break;
            }
            continue;
        }

        let trimmed = trim_to_char_budget(&extractable, CHAR_BUDGET);
        let existing = state
            .memory
            .recall(
                topic,
                &state.config.memory.engram_url,
                Some(RECALL_LIMIT),
                Some(topic),
            )
            .await;

        let messages = extraction_prompt(&trimmed, &existing);
        let reply = match state
            .llm
            .chat(&messages, &extraction_model, &state.config.llm.synapse_url, &[])
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "extraction: LLM call failed, not advancing cursor");
                break;
            }
        };

        let items = match parse_extracted_items(&reply.content) {
            Some(items) => items,
            None => {
                tracing::warn!(topic = %topic, "extraction: no parseable JSON array in response");
                break;
            }
        };

        let mut facts_stored = 0usize;
        for item in items.into_iter().take(MAX_ITEMS_PER_BATCH) {
            let key = idempotency_key(topic, &item.content, &item.category);
            let remembered = state
                .memory
                .remember(
                    RememberRequest {
                        content: item.content,
                        category: Some(item.category),
                        scope_id: Some(topic.to_string()),
                        idempotency_key: Some(key),
                        upsert: Some(true),
                    },
                    &state.config.memory.engram_url,
                )
                .await;
            if remembered.is_none() {
                tracing::warn!(topic = %topic, "extraction: remember failed for one item");
            } else {
                facts_stored += 1;
            }
        }
        TraceEvent::ExtractionBatchProcessed {
            topic_key: topic.to_string(),
            turns: trimmed.len(),
            facts_stored,
        }
        .emit();

        if facts_stored > 0 {
            produced_any = true;
        }
        cursor_store
            .advance(topic, batch_last_rowid)
            .map_err(|e| e.to_string())?;
        last_rowid = batch_last_rowid;

        if batch.len() < BATCH_LIMIT {
            break;
        }
    }

    if produced_any {
        summarize(state, topic, &extraction_model).await;
    }

    Ok(())
}

fn is_extractable(turn: &Turn) -> bool {
    if turn.role == TurnRole::Tool {
        return false;
    }
    if turn.role == TurnRole::Assistant && turn.content.is_empty() && turn.tool_calls.is_some() {
        return false;
    }
    true
}

fn trim_to_char_budget<'a>(turns: &[&'a Turn], budget: usize) -> Vec<&'a Turn> {
    let mut kept = Vec::new();
    let mut used = 0usize;
    for turn in turns {
        let len = turn.content.len();
        if !kept.is_empty() && used + len > budget {
            break;
        }
        used += len;
        kept.push(*turn);
    }
    if kept.is_empty() {
        if let Some(first) = turns.first() {
            kept.push(*first);
        }
    }
    kept
}

struct ExtractedItem {
    content: String,
    category: String,
}

fn extraction_prompt(turns: &[&Turn], existing: &[cortex_memory::Memory]) -> Vec<ChatMessage> {
    let mut system = String::from(
        "Extract durable facts, preferences, and decisions from the conversation below. \
         Respond with a JSON array of objects shaped {\"content\": string, \"category\": \
         \"fact\"|\"preference\"|\"decision\"}. Omit anything already known. Respond with \
         only the JSON array, nothing else.",
    );
    if !existing.is_empty() {
        system.push_str("\n\nAlready known, do not repeat:\n");
        for memory in existing {
            system.push_str(&format!("- {}\n", memory.content));
        }
    }

    let mut transcript = String::new();
    for turn in turns {
        transcript.push_str(&format!("{}: {}\n", turn.role.as_str(), turn.content));
    }

    vec![ChatMessage::system(system), ChatMessage::user(transcript)]
}

/// Parses the extraction model's reply as a JSON array, tolerating
/// surrounding prose by scanning for `[...]` substrings from the last
/// occurrence to the first when a direct parse fails (spec.md §4.11g).
fn parse_extracted_items(content: &str) -> Option<Vec<ExtractedItem>> {
    if let Some(items) = try_parse_array(content) {
        return Some(items);
    }

    let starts: Vec<usize> = content.match_indices('[').map(|(i, _)| i).collect();
    let ends: Vec<usize> = content.match_indices(']').map(|(i, _)| i).collect();
    let mut candidates = Vec::new();
    for &end in &ends {
        for &start in &starts {
            if start < end {
                candidates.push((start, end));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    for (start, end) in candidates {
        if let Some(slice) = content.get(start..=end) {
            if let Some(items) = try_parse_array(slice) {
                return Some(items);
            }
        }
    }
    None
}

fn try_parse_array(text: &str) -> Option<Vec<ExtractedItem>> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let array = value.as_array()?;
    let mut items = Vec::new();
    for entry in array {
        let content = entry.get("content")?.as_str()?.to_string();
        let category = entry.get("category")?.as_str()?.to_string();
        if content.len() < MIN_FACT_LEN {
            continue;
        }
        if !matches!(category.as_str(), "fact" | "preference" | "decision") {
            continue;
        }
        items.push(ExtractedItem { content, category });
    }
    Some(items)
}

fn idempotency_key(topic: &str, content: &str, category: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(topic.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(category.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("cortex:extract:{}", &digest[..16])
}

async fn summarize(state: &AppState, topic: &str, extraction_model: &str) {
    let summary_store = SummaryStore::new(&state.store);
    let previous = summary_store.get(topic).ok().flatten();

    let mut system = String::from(
        "You are asked to summarize what this conversation has covered so far, in a few \
         sentences suitable as durable context for future turns.",
    );
    if let Some(previous) = &previous {
        system.push_str(&format!("\n\nPrevious summary:\n{}", previous.summary));
    }

    let messages = vec![
        ChatMessage::system(system),
        ChatMessage::user("Summarize the conversation."),
    ];

    let reply = match state
        .llm
        .chat(&messages, extraction_model, &state.config.llm.synapse_url, &[])
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, "extraction: summarization failed");
            return;
        }
    };

    if reply.content.trim().is_empty() {
        return;
    }

    if let Err(e) = summary_store.upsert(topic, &reply.content) {
        tracing::warn!(topic = %topic, error = %e, "extraction: failed to persist local summary");
    }

    let key = format!("topic-summary:{topic}");
    let remembered = state
        .memory
        .remember(
            RememberRequest {
                content: reply.content,
                category: Some("summary".to_string()),
                scope_id: Some(topic.to_string()),
                idempotency_key: Some(key),
                upsert: Some(true),
            },
            &state.config.memory.engram_url,
        )
        .await;
    if remembered.is_none() {
        tracing::warn!(topic = %topic, "extraction: remember for summary failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: TurnRole, content: &str, has_tool_calls: bool) -> Turn {
        Turn {
            id: "turn_1".into(),
            rowid: 1,
            topic_key: "t1".into(),
            role,
            content: content.to_string(),
            tool_calls: if has_tool_calls {
                Some(vec![cortex_domain::tool::ToolCall {
                    id: "call_1".into(),
                    kind: "function".into(),
                    function: cortex_domain::tool::ToolCallFunction {
                        name: "math.add".into(),
                        arguments: "{}".into(),
                    },
                }])
            } else {
                None
            },
            tool_call_id: None,
            name: None,
            created_at: 0,
        }
    }

    #[test]
    fn tool_results_and_empty_tool_call_turns_are_not_extractable() {
        assert!(!is_extractable(&turn(TurnRole::Tool, "3", false)));
        assert!(!is_extractable(&turn(TurnRole::Assistant, "", true)));
        assert!(is_extractable(&turn(TurnRole::Assistant, "hi", false)));
        assert!(is_extractable(&turn(TurnRole::User, "hi", false)));
    }

    #[test]
    fn trim_to_char_budget_always_keeps_at_least_one_turn() {
        let big = turn(TurnRole::User, &"x".repeat(100_000), false);
        let refs = vec![&big];
        let kept = trim_to_char_budget(&refs, 50_000);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn trim_to_char_budget_stops_before_exceeding() {
        let a = turn(TurnRole::User, &"a".repeat(30_000), false);
        let b = turn(TurnRole::Assistant, &"b".repeat(30_000), false);
        let refs = vec![&a, &b];
        let kept = trim_to_char_budget(&refs, 50_000);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn parse_extracted_items_handles_direct_json() {
        let input = r#"[{"content": "likes tea", "category": "preference"}]"#;
        let items = parse_extracted_items(input).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "likes tea");
    }

    #[test]
    fn parse_extracted_items_recovers_array_from_prose() {
        let input = "Here you go: [{\"content\": \"uses rust\", \"category\": \"fact\"}] hope that helps";
        let items = parse_extracted_items(input).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "uses rust");
    }

    #[test]
    fn parse_extracted_items_drops_malformed_entries() {
        let input = r#"[{"content": "ok", "category": "fact"}, {"content": "x", "category": "fact"}, {"content": "bad cat", "category": "nonsense"}]"#;
        let items = parse_extracted_items(input).unwrap();
        // "x" is below MIN_FACT_LEN, "bad cat" has an invalid category.
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "ok");
    }

    #[test]
    fn parse_extracted_items_none_when_no_array_present() {
        assert!(parse_extracted_items("no json here").is_none());
    }

    #[test]
    fn idempotency_key_is_stable_and_prefixed() {
        let k1 = idempotency_key("t1", "likes tea", "preference");
        let k2 = idempotency_key("t1", "likes tea", "preference");
        assert_eq!(k1, k2);
        assert!(k1.starts_with("cortex:extract:"));
        assert_eq!(k1.len(), "cortex:extract:".len() + 16);
    }
}
