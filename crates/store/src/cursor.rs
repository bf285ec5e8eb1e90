//! C5 — Extraction Cursor. Per-topic counter and high-water rowid for
//! incremental fact/summary extraction (spec.md §4.5).

use cortex_domain::model::{ExtractionCursor, Turn, TurnRole};
use cortex_domain::tool::ToolCall;
use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::store::Store;

pub struct CursorStore<'a> {
    store: &'a Store,
}

impl<'a> CursorStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get(&self, topic_key: &str) -> Result<Option<ExtractionCursor>> {
        self.store.transaction(|tx| {
            let row = tx
                .query_row(
                    "SELECT topic_key, last_extracted_rowid, turns_since_extraction
                     FROM extraction_cursors WHERE topic_key = ?1",
                    params![topic_key],
                    |row| {
                        Ok(ExtractionCursor {
                            topic_key: row.get(0)?,
                            last_extracted_rowid: row.get(1)?,
                            turns_since_extraction: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Insert-or-update: `turns_since_extraction += 1`. Called
    /// unconditionally by the processor on every message when extraction
    /// is enabled, independent of whether an extraction run actually
    /// fires this cycle (spec.md §9 Open Questions).
    pub fn increment(&self, topic_key: &str) -> Result<()> {
        self.store.transaction(|tx| {
            tx.execute(
                "INSERT INTO extraction_cursors (topic_key, last_extracted_rowid, turns_since_extraction)
                 VALUES (?1, 0, 1)
                 ON CONFLICT(topic_key) DO UPDATE SET
                     turns_since_extraction = turns_since_extraction + 1",
                params![topic_key],
            )?;
            Ok(())
        })
    }

    /// Advance the high-water rowid (monotone, `MAX` guard) and reset
    /// the pending-turns counter to zero.
    pub fn advance(&self, topic_key: &str, last_rowid: i64) -> Result<()> {
        self.store.transaction(|tx| {
            tx.execute(
                "INSERT INTO extraction_cursors (topic_key, last_extracted_rowid, turns_since_extraction)
                 VALUES (?1, ?2, 0)
                 ON CONFLICT(topic_key) DO UPDATE SET
                     last_extracted_rowid = MAX(last_extracted_rowid, ?2),
                     turns_since_extraction = 0",
                params![topic_key, last_rowid],
            )?;
            Ok(())
        })
    }

    /// Turns strictly after `after_rowid`, ascending, capped at `limit`.
    pub fn load_turns_since(
        &self,
        topic_key: &str,
        after_rowid: i64,
        limit: usize,
    ) -> Result<Vec<(Turn, i64)>> {
        self.store.transaction(|tx| {
            let mut stmt = tx.prepare(
                "SELECT rowid, id, topic_key, role, content, tool_calls, tool_call_id, name, created_at
                 FROM turns
                 WHERE topic_key = ?1 AND rowid > ?2
                 ORDER BY rowid ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![topic_key, after_rowid, limit as i64], |row| {
                    let turn = row_to_turn(row)?;
                    let rowid: i64 = row.get(0)?;
                    Ok((turn, rowid))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_turn(row: &Row) -> rusqlite::Result<Turn> {
    let role_raw: String = row.get(3)?;
    let role = TurnRole::parse(&role_raw).unwrap_or(TurnRole::User);
    let tool_calls_raw: Option<String> = row.get(5)?;
    let tool_calls: Option<Vec<ToolCall>> = tool_calls_raw.and_then(|s| serde_json::from_str(&s).ok());

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStore, NewTurn};
    use std::path::Path;

    #[test]
    fn increment_creates_lazily_and_advance_resets() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let c = CursorStore::new(&store);
        assert!(c.get("t1").unwrap().is_none());

        c.increment("t1").unwrap();
        let cur = c.get("t1").unwrap().unwrap();
        assert_eq!(cur.turns_since_extraction, 1);
        assert_eq!(cur.last_extracted_rowid, 0);

        c.increment("t1").unwrap();
        assert_eq!(c.get("t1").unwrap().unwrap().turns_since_extraction, 2);

        c.advance("t1", 5).unwrap();
        let cur = c.get("t1").unwrap().unwrap();
        assert_eq!(cur.last_extracted_rowid, 5);
        assert_eq!(cur.turns_since_extraction, 0);
    }

    #[test]
    fn advance_never_moves_backward() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let c = CursorStore::new(&store);
        c.advance("t1", 10).unwrap();
        c.advance("t1", 3).unwrap();
        assert_eq!(c.get("t1").unwrap().unwrap().last_extracted_rowid, 10);
    }

    #[test]
    fn load_turns_since_is_ascending_and_excludes_cursor_rowid() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let h = HistoryStore::new(&store);
        let c = CursorStore::new(&store);
        for i in 0..3 {
            h.save_turn(NewTurn::user("t1", format!("m{i}"))).unwrap();
        }
        let all = c.load_turns_since("t1", 0, 100).unwrap();
        assert_eq!(all.len(), 3);
        let (_, first_rowid) = all[0];
        let after_first = c.load_turns_since("t1", first_rowid, 100).unwrap();
        assert_eq!(after_first.len(), 2);
    }
}
