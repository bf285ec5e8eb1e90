//! C12 — Processor. Single long-running consumer that turns one inbox
//! message into a reply, persisted turns, an outbox row, and (if
//! enabled) a spawned extraction pass (spec.md §4.12).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cortex_domain::model::InboxMessage;
use cortex_domain::tool::ToolDefinition;
use cortex_store::{CursorStore, HistoryStore, InboxQueue, NewTurn, OutboxQueue, SummaryStore};

use crate::agent_loop::{self, AgentLoopConfig};
use crate::prompt::{build_prompt, PromptInput};
use crate::state::AppState;
use crate::trace::TraceEvent;

pub struct Processor {
    state: AppState,
    stop: Arc<AtomicBool>,
}

impl Processor {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clone of the shutdown flag; flipping it lets the current
    /// in-flight message finish before the loop exits.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub async fn run(self) {
        let busy = Duration::from_millis(self.state.config.processor.poll_busy_ms);
        let idle = Duration::from_millis(self.state.config.processor.poll_idle_ms);

        loop {
            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("processor: stop requested, exiting");
                return;
            }

            let claimed = InboxQueue::new(&self.state.store).claim_next();
            let message = match claimed {
                Ok(Some(m)) => m,
                Ok(None) => {
                    tokio::time::sleep(idle).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "processor: claim_next failed");
                    tokio::time::sleep(idle).await;
                    continue;
                }
            };

            TraceEvent::InboxClaimed {
                id: message.id.clone(),
                topic_key: message.topic_key.clone(),
                attempts: message.attempts,
            }
            .emit();

            if let Err(e) = self.process(&message).await {
                tracing::warn!(inbox_id = %message.id, error = %e, "processor: message failed");
                if let Err(e2) = InboxQueue::new(&self.state.store).complete(&message.id, Some(&e)) {
                    tracing::error!(inbox_id = %message.id, error = %e2, "processor: failed to mark inbox failed");
                }
                TraceEvent::InboxCompleted { id: message.id.clone(), status: "failed" }.emit();
            } else {
                if let Err(e) = InboxQueue::new(&self.state.store).complete(&message.id, None) {
                    tracing::error!(inbox_id = %message.id, error = %e, "processor: failed to mark inbox done");
                }
                TraceEvent::InboxCompleted { id: message.id.clone(), status: "done" }.emit();
            }

            tokio::time::sleep(busy).await;
        }
    }

    async fn process(&self, message: &InboxMessage) -> Result<(), String> {
        let topic = message.topic_key.as_str();

        let (memories, turns, summary) = tokio::join!(
            self.state
                .memory
                .recall_dual(&message.text, topic, &self.state.config.memory.engram_url),
            async { HistoryStore::new(&self.state.store).load_recent(topic, 8) },
            async { SummaryStore::new(&self.state.store).get(topic) },
        );
        let turns = turns.map_err(|e| e.to_string())?;
        let topic_summary = summary.map_err(|e| e.to_string())?.map(|s| s.summary);

        let tool_defs: Vec<ToolDefinition> = self
            .state
            .registry
            .tools()
            .iter()
            .map(|t| ToolDefinition {
                name: t.qualified_name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();
        let tool_names = self.state.registry.tool_names();

        let prompt = build_prompt(PromptInput {
            memories: &memories,
            topic_summary: topic_summary.as_deref(),
            turns: &turns,
            user_text: &message.text,
            tool_names: &tool_names,
        });

        let (response, persisted) = if !tool_defs.is_empty() {
            let result = agent_loop::run(
                prompt,
                &tool_defs,
                &self.state.registry,
                &self.state.llm,
                AgentLoopConfig {
                    model: &self.state.config.llm.model,
                    synapse_url: &self.state.config.llm.synapse_url,
                    tool_timeout_ms: self.state.config.processor.tool_timeout_ms,
                    max_tool_rounds: self.state.config.processor.max_tool_rounds,
                },
            )
            .await
            .map_err(|e| e.to_string())?;

            let mut batch = vec![NewTurn::user(topic, message.text.as_str())];
            batch.extend(
                result
                    .new_turns
                    .iter()
                    .map(|m| NewTurn::from_chat_message(topic, m)),
            );
            (result.response, batch)
        } else {
            let result = self
                .state
                .llm
                .chat(&prompt, &self.state.config.llm.model, &self.state.config.llm.synapse_url, &[])
                .await
                .map_err(|e| e.to_string())?;
            let batch = vec![
                NewTurn::user(topic, message.text.as_str()),
                NewTurn::assistant(topic, result.content.as_str()),
            ];
            (result.content, batch)
        };

        HistoryStore::new(&self.state.store)
            .save_agent_history(persisted)
            .map_err(|e| e.to_string())?;

        if self.state.config.llm.extraction_model.is_some() {
            let cursor_store = CursorStore::new(&self.state.store);
            cursor_store.increment(topic).map_err(|e| e.to_string())?;

            let mut inflight = self.state.extraction_inflight.lock();
            if inflight.insert(topic.to_string()) {
                drop(inflight);
                let state = self.state.clone();
                let topic = topic.to_string();
                tokio::spawn(async move {
                    crate::extraction::run(state, topic).await;
                });
            } else {
                drop(inflight);
                TraceEvent::ExtractionSkippedInFlight { topic_key: topic.to_string() }.emit();
            }
        }

        let outbox_id = OutboxQueue::new(&self.state.store)
            .enqueue(&message.source, topic, &response, None)
            .map_err(|e| e.to_string())?;
        TraceEvent::OutboxEnqueued { message_id: outbox_id, topic_key: topic.to_string() }.emit();

        Ok(())
    }
}
