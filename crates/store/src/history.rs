//! C4 — History Store. Per-topic turn log with tool-call fidelity and a
//! recent-N loader grouped by user message (spec.md §4.4).

use cortex_domain::ids::{now_ms, turn_id};
use cortex_domain::model::{Turn, TurnRole};
use cortex_domain::tool::{ChatMessage, ToolCall};
use rusqlite::{params, Row, Transaction};

use crate::error::Result;
use crate::store::Store;

/// Fields needed to append one turn. Mirrors `Turn` minus the fields the
/// store assigns (`id`, `rowid`, `created_at`).
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub topic_key: String,
    pub role: TurnRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
}

impl NewTurn {
    pub fn user(topic_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            topic_key: topic_key.into(),
            role: TurnRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(topic_key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            topic_key: topic_key.into(),
            role: TurnRole::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Lift a `ChatMessage` (as produced by the agent loop) into a
    /// persistable turn for `topic_key`.
    pub fn from_chat_message(topic_key: impl Into<String>, msg: &ChatMessage) -> Self {
        let role = match msg.role {
            cortex_domain::tool::Role::System => TurnRole::Assistant,
            cortex_domain::tool::Role::User => TurnRole::User,
            cortex_domain::tool::Role::Assistant => TurnRole::Assistant,
            cortex_domain::tool::Role::Tool => TurnRole::Tool,
        };
        Self {
            topic_key: topic_key.into(),
            role,
            content: msg.content.clone(),
            tool_calls: msg.tool_calls.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }
}

pub struct HistoryStore<'a> {
    store: &'a Store,
}

impl<'a> HistoryStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Append a single turn.
    pub fn save_turn(&self, turn: NewTurn) -> Result<String> {
        self.store
            .transaction(|tx| insert_turn(tx, &turn))
    }

    /// Append a batch of turns atomically, so a crash mid-agent-loop
    /// never leaves a partial round visible (spec.md §4.4, §5).
    pub fn save_agent_history(&self, turns: Vec<NewTurn>) -> Result<Vec<String>> {
        self.store.transaction(|tx| {
            turns.iter().map(|t| insert_turn(tx, t)).collect()
        })
    }

    /// Load the last `user_group_limit` user-message groups for `topic`,
    /// oldest-first, reconstructed as `ChatMessage`s (spec.md §4.4).
    pub fn load_recent(&self, topic_key: &str, user_group_limit: usize) -> Result<Vec<ChatMessage>> {
        let window = (user_group_limit.max(1)) * 8;
        let rows: Vec<Turn> = self.store.transaction(|tx| {
            let mut stmt = tx.prepare(
                "SELECT rowid, id, topic_key, role, content, tool_calls, tool_call_id, name, created_at
                 FROM turns
                 WHERE topic_key = ?1
                 ORDER BY rowid DESC
                 LIMIT ?2",
            )?;
            let mut rows: Vec<Turn> = stmt
                .query_map(params![topic_key, window as i64], row_to_turn)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })?;

        let groups = group_by_user(rows);
        let start = groups.len().saturating_sub(user_group_limit);
        let kept = &groups[start..];

        Ok(kept
            .iter()
            .flatten()
            .map(turn_to_chat_message)
            .collect())
    }
}

fn insert_turn(tx: &Transaction, turn: &NewTurn) -> Result<String> {
    let id = turn_id();
    let now = now_ms();
    let tool_calls_raw = turn
        .tool_calls
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    tx.execute(
        "INSERT INTO turns (id, topic_key, role, content, tool_calls, tool_call_id, name, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            turn.topic_key,
            turn.role.as_str(),
            turn.content,
            tool_calls_raw,
            turn.tool_call_id,
            turn.name,
            now,
        ],
    )?;
    Ok(id)
}

fn row_to_turn(row: &Row) -> rusqlite::Result<Turn> {
    let role_raw: String = row.get(3)?;
    let role = TurnRole::parse(&role_raw).unwrap_or(TurnRole::User);
    let tool_calls_raw: Option<String> = row.get(5)?;
    // "malformed tool_calls JSON is silently dropped for that turn"
    // (spec.md §4.4) — keep the turn, just treat its tool_calls as absent.
    let tool_calls = tool_calls_raw.and_then(|s| serde_json::from_str(&s).ok());

    Ok(Turn {
        id: row.get(1)?,
        rowid: row.get(0)?,
        topic_key: row.get(2)?,
        role,
        content: row.get(4)?,
        tool_calls,
        tool_call_id: row.get(6)?,
        name: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn turn_to_chat_message(turn: &Turn) -> ChatMessage {
    let role = match turn.role {
        TurnRole::User => cortex_domain::tool::Role::User,
        TurnRole::Assistant => cortex_domain::tool::Role::Assistant,
        TurnRole::Tool => cortex_domain::tool::Role::Tool,
    };
    ChatMessage {
        role,
        content: turn.content.clone(),
        tool_calls: turn.tool_calls.clone(),
        tool_call_id: turn.tool_call_id.clone(),
        name: turn.name.clone(),
    }
}

/// Split a chronological turn list into groups, each starting at a user
/// turn. Any turns preceding the first user turn (possible when the
/// recent-N window cuts a topic mid-group) form a leading partial group
/// so every turn is accounted for.
fn group_by_user(turns: Vec<Turn>) -> Vec<Vec<Turn>> {
    let mut groups: Vec<Vec<Turn>> = Vec::new();
    for turn in turns {
        if groups.is_empty() || turn.role == TurnRole::User {
            groups.push(vec![turn]);
        } else {
            groups.last_mut().unwrap().push(turn);
        }
    }
    groups
}
