//! C3 — Outbox Queue. Enqueue, lease-based poll with backoff, ack,
//! dead-lettering (spec.md §4.3).

use cortex_domain::ids::{lease_token, now_ms, outbox_id};
use cortex_domain::model::{AckOutcome, OutboxStatus, PolledOutboxMessage};
use rand::Rng;
use rusqlite::{params, OptionalExtension, Row};

use crate::error::Result;
use crate::store::Store;

pub struct OutboxQueue<'a> {
    store: &'a Store,
}

impl<'a> OutboxQueue<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn enqueue(
        &self,
        source: &str,
        topic_key: &str,
        text: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<String> {
        self.store.transaction(|tx| {
            let id = outbox_id();
            let now = now_ms();
            let payload_raw = payload.map(serde_json::to_string).transpose()?;
            tx.execute(
                "INSERT INTO outbox_messages
                 (id, source, topic_key, text, payload, status, attempts, next_attempt_at,
                  lease_token, lease_expires_at, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, NULL, NULL, NULL, ?7, ?7)",
                params![
                    id,
                    source,
                    topic_key,
                    text,
                    payload_raw,
                    OutboxStatus::Pending.as_str(),
                    now,
                ],
            )?;
            Ok(id)
        })
    }

    /// Lease up to `max` eligible rows for `source` (optionally scoped
    /// to `topic_key`). Dead-letters any row whose attempt count has
    /// exceeded `max_attempts` instead of returning it.
    pub fn poll(
        &self,
        source: &str,
        max: u32,
        lease_seconds: u32,
        max_attempts: u32,
        topic_key: Option<&str>,
    ) -> Result<Vec<PolledOutboxMessage>> {
        self.store.transaction(|tx| {
            let now = now_ms();

            let ids: Vec<String> = {
                let sql = match topic_key {
                    Some(_) => {
                        "SELECT id FROM outbox_messages
                         WHERE source = ?1 AND topic_key = ?2 AND next_attempt_at <= ?3
                           AND (status = 'pending' OR (status = 'leased' AND lease_expires_at <= ?3))
                         ORDER BY next_attempt_at ASC, created_at ASC
                         LIMIT ?4"
                    }
                    None => {
                        "SELECT id FROM outbox_messages
                         WHERE source = ?1 AND next_attempt_at <= ?2
                           AND (status = 'pending' OR (status = 'leased' AND lease_expires_at <= ?2))
                         ORDER BY next_attempt_at ASC, created_at ASC
                         LIMIT ?3"
                    }
                };

                let mut stmt = tx.prepare(sql)?;
                let rows = if let Some(tk) = topic_key {
                    stmt.query_map(params![source, tk, now, max], |row| row.get::<_, String>(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                } else {
                    stmt.query_map(params![source, now, max], |row| row.get::<_, String>(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                };
                rows
            };

            let mut out = Vec::with_capacity(ids.len());
            let mut rng = rand::thread_rng();

            for id in ids {
                let attempts: i64 = tx.query_row(
                    "SELECT attempts FROM outbox_messages WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                let attempts = attempts + 1;

                if attempts > max_attempts as i64 {
                    tx.execute(
                        "UPDATE outbox_messages
                         SET status = ?1, attempts = ?2, last_error = ?3, updated_at = ?4
                         WHERE id = ?5",
                        params![
                            OutboxStatus::Dead.as_str(),
                            attempts,
                            "max attempts exceeded",
                            now,
                            id
                        ],
                    )?;
                    continue;
                }

                let token = lease_token();
                let lease_expires_at = now + lease_seconds as i64 * 1000;
                let next_attempt_at = now + backoff_ms(attempts, &mut rng);

                tx.execute(
                    "UPDATE outbox_messages
                     SET status = ?1, attempts = ?2, lease_token = ?3, lease_expires_at = ?4,
                         next_attempt_at = ?5, updated_at = ?6
                     WHERE id = ?7",
                    params![
                        OutboxStatus::Leased.as_str(),
                        attempts,
                        token,
                        lease_expires_at,
                        next_attempt_at,
                        now,
                        id
                    ],
                )?;

                let (topic_key, text, payload_raw): (String, String, Option<String>) = tx
                    .query_row(
                        "SELECT topic_key, text, payload FROM outbox_messages WHERE id = ?1",
                        params![id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )?;
                let payload = payload_raw
                    .map(|s| serde_json::from_str(&s))
                    .transpose()?;

                out.push(PolledOutboxMessage {
                    message_id: id,
                    lease_token: token,
                    topic_key,
                    text,
                    payload,
                });
            }

            Ok(out)
        })
    }

    /// Acknowledge delivery of a leased row.
    pub fn ack(&self, message_id: &str, lease_token: &str) -> Result<AckOutcome> {
        self.store.transaction(|tx| {
            let row = tx
                .query_row(
                    "SELECT status, lease_token, lease_expires_at FROM outbox_messages WHERE id = ?1",
                    params![message_id],
                    |row: &Row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<i64>>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((status, stored_token, lease_expires_at)) = row else {
                return Ok(AckOutcome::NotFound);
            };

            if status == OutboxStatus::Delivered.as_str() {
                return Ok(if stored_token.as_deref() == Some(lease_token) {
                    AckOutcome::AlreadyDelivered
                } else {
                    AckOutcome::LeaseConflict
                });
            }

            let now = now_ms();
            let lease_ok = status == OutboxStatus::Leased.as_str()
                && stored_token.as_deref() == Some(lease_token)
                && lease_expires_at.map(|exp| exp > now).unwrap_or(false);

            if !lease_ok {
                return Ok(AckOutcome::LeaseConflict);
            }

            let changed = tx.execute(
                "UPDATE outbox_messages
                 SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'leased' AND lease_token = ?4",
                params![OutboxStatus::Delivered.as_str(), now, message_id, lease_token],
            )?;

            Ok(if changed == 1 {
                AckOutcome::Delivered
            } else {
                AckOutcome::LeaseConflict
            })
        })
    }
}

/// `min(5000 * 2^(attempts-1), 900_000)` ms with +/-20% uniform jitter
/// (spec.md §4.3 / GLOSSARY "Backoff"). `rand` is used here the way
/// `stencila`'s Rust crates reach for it; the teacher has no retry/backoff
/// logic of its own to ground this on.
fn backoff_ms(attempts: i64, rng: &mut impl Rng) -> i64 {
    let base = 5_000i64.saturating_mul(1i64 << (attempts - 1).clamp(0, 32));
    let capped = base.min(900_000);
    let jitter = rng.gen_range(0.8..=1.2);
    (capped as f64 * jitter) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn enqueue_then_poll_returns_row_and_leases_it() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let q = OutboxQueue::new(&store);
        q.enqueue("cli", "t1", "hello!", None).unwrap();
        let polled = q.poll("cli", 10, 60, 10, None).unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].text, "hello!");
    }

    #[test]
    fn poll_with_no_eligible_rows_is_empty_and_noop() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let q = OutboxQueue::new(&store);
        let polled = q.poll("cli", 10, 60, 10, None).unwrap();
        assert!(polled.is_empty());
    }

    #[test]
    fn ack_is_idempotent_and_detects_conflict() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let q = OutboxQueue::new(&store);
        q.enqueue("cli", "t1", "hello!", None).unwrap();
        let polled = q.poll("cli", 10, 60, 10, None).unwrap();
        let msg = &polled[0];

        let first = q.ack(&msg.message_id, &msg.lease_token).unwrap();
        assert_eq!(first, AckOutcome::Delivered);

        let second = q.ack(&msg.message_id, &msg.lease_token).unwrap();
        assert_eq!(second, AckOutcome::AlreadyDelivered);

        let wrong = q.ack(&msg.message_id, "lease_bogus").unwrap();
        assert_eq!(wrong, AckOutcome::LeaseConflict);
    }

    #[test]
    fn ack_missing_row_is_not_found() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let q = OutboxQueue::new(&store);
        let outcome = q.ack("out_nope", "lease_nope").unwrap();
        assert_eq!(outcome, AckOutcome::NotFound);
    }

    #[test]
    fn dead_letter_after_max_attempts_is_never_returned_again() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let q = OutboxQueue::new(&store);
        let id = q.enqueue("cli", "t1", "hi", None).unwrap();

        // Force attempts past the cap and expire the lease so the next
        // poll sees it as eligible.
        store
            .transaction(|tx| {
                tx.execute(
                    "UPDATE outbox_messages
                     SET status = 'leased', attempts = 10, lease_token = 'lease_x',
                         lease_expires_at = 1, next_attempt_at = 0
                     WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            })
            .unwrap();

        let polled = q.poll("cli", 10, 60, 10, None).unwrap();
        assert!(polled.is_empty());

        let (status, attempts, last_error): (String, i64, Option<String>) = store
            .transaction(|tx| {
                tx.query_row(
                    "SELECT status, attempts, last_error FROM outbox_messages WHERE id = ?1",
                    rusqlite::params![id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(status, "dead");
        assert_eq!(attempts, 11);
        assert_eq!(last_error.as_deref(), Some("max attempts exceeded"));

        // And it stays invisible to future polls.
        assert!(q.poll("cli", 10, 60, 10, None).unwrap().is_empty());
    }

    #[test]
    fn expired_lease_is_reclaimed_with_new_token_and_incremented_attempts() {
        let store = Store::open(Path::new(":memory:")).unwrap();
        let q = OutboxQueue::new(&store);
        let id = q.enqueue("cli", "t1", "hi", None).unwrap();
        let first = q.poll("cli", 10, 10, 10, None).unwrap();
        assert_eq!(first.len(), 1);
        let first_token = first[0].lease_token.clone();

        // Expire the lease.
        store
            .transaction(|tx| {
                tx.execute(
                    "UPDATE outbox_messages SET lease_expires_at = 0, next_attempt_at = 0 WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            })
            .unwrap();

        let second = q.poll("cli", 10, 10, 10, None).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].message_id, id);
        assert_ne!(second[0].lease_token, first_token);

        let attempts: i64 = store
            .transaction(|tx| {
                tx.query_row(
                    "SELECT attempts FROM outbox_messages WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(attempts, 2);
    }
}
