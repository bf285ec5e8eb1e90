//! Local mirror of the rolling per-topic summary (spec.md §4 TopicSummary,
//! §4.11 extraction pipeline step 3: upserted locally alongside the
//! `remember` call to the memory service).

use cortex_domain::ids::now_ms;
use cortex_domain::model::TopicSummary;
use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::store::Store;

pub struct SummaryStore<'a> {
    store: &'a Store,
}

impl<'a> SummaryStore<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn get(&self, topic_key: &str) -> Result<Option<TopicSummary>> {
        self.store.transaction(|tx| {
            let row = tx
                .query_row(
                    "SELECT topic_key, summary, updated_at FROM topic_summaries WHERE topic_key = ?1",
                    params![topic_key],
                    |row| {
                        Ok(TopicSummary {
                            topic_key: row.get(0)?,
                            summary: row.get(1)?,
                            updated_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn upsert(&self, topic_key: &str, summary: &str) -> Result<()> {
        self.store.transaction(|tx| {
            tx.execute(
                "INSERT INTO topic_summaries (topic_key, summary, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(topic_key) DO UPDATE SET summary = ?2, updated_at = ?3",
                params![topic_key, summary, now_ms()],
            )?;
            Ok(())
        })
    }
}
