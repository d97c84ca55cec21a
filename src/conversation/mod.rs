// src/conversation/mod.rs
// Conversation orchestration (C11): the full turn protocol (§4.11). Emotion
// reading is a lexicon scan, not an LLM call — only the reply itself and the
// slow-path extraction go to the LLM.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::affinity::{AffinityService, TurnSignals};
use crate::conflict::ConflictService;
use crate::config::AlgoConfig;
use crate::db::memories::MemoryStore;
use crate::db::types::AffinityState;
use crate::embedding::SharedEmbeddingClient;
use crate::error::CoreError;
use crate::llm::{route_tier, SharedLlmProvider, TierRoutingInput};
use crate::outbox::OutboxWriter;
use crate::retrieval::RetrievalService;
use crate::utils::sha256_hash;

const POSITIVE_WORDS: &[&str] = &[
    "happy", "glad", "love", "great", "wonderful", "thanks", "thank", "good", "excited", "nice",
];
const NEGATIVE_WORDS: &[&str] = &[
    "sad", "angry", "hate", "terrible", "awful", "upset", "furious", "annoyed", "bad", "worried",
];
const CONFIRMATION_WORDS: &[&str] = &["yes", "right", "correct", "exactly", "that's right"];
const CORRECTION_WORDS: &[&str] = &["no that's wrong", "actually no", "that's not right", "incorrect"];

/// Simple bag-of-words valence in [-1, 1]: not a substitute for the LLM, just
/// enough signal to drive tier routing and the affinity update before the
/// reply comes back.
fn analyze_valence(message: &str) -> f64 {
    let lower = message.to_lowercase();
    let pos = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count() as f64;
    let neg = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count() as f64;
    if pos == 0.0 && neg == 0.0 {
        return 0.0;
    }
    ((pos - neg) / (pos + neg)).clamp(-1.0, 1.0)
}

fn looks_like_confirmation(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONFIRMATION_WORDS.iter().any(|w| lower.contains(w))
}

fn looks_like_correction(message: &str) -> bool {
    let lower = message.to_lowercase();
    CORRECTION_WORDS.iter().any(|w| lower.contains(w))
}

fn references_place_or_person(message: &str) -> bool {
    message.split_whitespace().any(|w| {
        w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) && w.len() > 1
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SseFrame {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "text")]
    Text { delta: String },
    #[serde(rename = "memory_pending")]
    MemoryPending,
    #[serde(rename = "clarification")]
    Clarification { question: String },
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error { message: String },
}

pub struct TurnRequest {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    pub idempotency_key: Option<String>,
    /// Set only in evaluation harnesses: forbids fabricating memories the
    /// retrieval step did not actually surface (§4.11 step 9).
    pub evaluation_mode: bool,
}

pub struct ConversationService {
    affinity: Arc<AffinityService>,
    retrieval: Arc<RetrievalService>,
    conflict: Arc<ConflictService>,
    memories: MemoryStore,
    outbox: Arc<OutboxWriter>,
    llm: SharedLlmProvider,
    embedding: SharedEmbeddingClient,
    config: AlgoConfig,
}

impl ConversationService {
    pub fn new(
        affinity: Arc<AffinityService>,
        retrieval: Arc<RetrievalService>,
        conflict: Arc<ConflictService>,
        memories: MemoryStore,
        outbox: Arc<OutboxWriter>,
        llm: SharedLlmProvider,
        embedding: SharedEmbeddingClient,
        config: AlgoConfig,
    ) -> Self {
        Self {
            affinity,
            retrieval,
            conflict,
            memories,
            outbox,
            llm,
            embedding,
            config,
        }
    }

    /// Spawns the turn as a background task and hands back a receiver stream
    /// so the API layer can start emitting SSE frames immediately, matching
    /// this codebase's channel-to-stream bridging idiom for long-running
    /// generation.
    pub fn stream_turn(self: Arc<Self>, req: TurnRequest) -> ReceiverStream<SseFrame> {
        let (tx, rx) = mpsc::channel::<SseFrame>(64);
        tokio::spawn(async move {
            if let Err(e) = self.run_turn(req, tx.clone()).await {
                let _ = tx.send(SseFrame::Error { message: e.to_string() }).await;
            }
            let _ = tx.send(SseFrame::Done).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run_turn(&self, req: TurnRequest, tx: mpsc::Sender<SseFrame>) -> Result<(), CoreError> {
        // Step 1: idempotency replay short-circuits the entire turn.
        if let Some(key) = &req.idempotency_key {
            if let Some((_, _, reply_text)) = self
                .outbox
                .find_idempotent(key, &req.user_id)
                .await
                .map_err(CoreError::from)?
            {
                let _ = tx.send(SseFrame::Start).await;
                let _ = tx.send(SseFrame::Text { delta: reply_text }).await;
                return Ok(());
            }
        }

        let _ = tx.send(SseFrame::Start).await;

        // Step 2: lexicon-based emotion read.
        let valence = analyze_valence(&req.message);
        let memory_confirmation = looks_like_confirmation(&req.message);
        let correction = looks_like_correction(&req.message);

        // Step 3: affinity read (current state informs tier routing + register).
        let (affinity_score, affinity_state) = self
            .affinity
            .current(&req.user_id)
            .await
            .map_err(CoreError::from)?;

        // Step 4: route outstanding clarifications before anything else.
        if let Some(pending) = self
            .conflict
            .pending_clarification(&req.user_id, &req.session_id)
            .await
            .map_err(CoreError::from)?
        {
            if memory_confirmation || correction {
                if let Some(conflict) = self
                    .conflict
                    .get_conflict(&pending.conflict_id)
                    .await
                    .map_err(CoreError::from)?
                {
                    // Confirmation keeps the newer memory (memory_2); a
                    // correction rejects it in favor of the older one.
                    let preferred = if memory_confirmation {
                        conflict.memory_2_id.clone()
                    } else {
                        conflict.memory_1_id.clone()
                    };
                    self.conflict
                        .resolve_with_response(&pending, &req.message, &preferred)
                        .await
                        .map_err(CoreError::from)?;
                }
            } else {
                let timed_out = self
                    .conflict
                    .bump_or_timeout(&pending.id)
                    .await
                    .map_err(CoreError::from)?;
                if !timed_out {
                    let _ = tx
                        .send(SseFrame::Clarification { question: pending.question.clone() })
                        .await;
                    return Ok(());
                }
            }
        }

        // Step 5: tier routing.
        let tier_input = TierRoutingInput {
            message: &req.message,
            has_question_marker: crate::llm::router::has_question_marker(&req.message),
            references_place_or_person: references_place_or_person(&req.message),
            valence,
            affinity_state,
        };
        let tier = route_tier(&tier_input);

        // Step 6: hybrid retrieval.
        let retrieval = self
            .retrieval
            .retrieve(&req.user_id, &req.message, self.config.top_k_max, affinity_score)
            .await
            .map_err(CoreError::from)?;

        // Step 7: conflict detection against the user's recent active memories.
        let recent = self
            .memories
            .recent_active(&req.user_id, 50)
            .await
            .map_err(CoreError::from)?;
        let message_hash = sha256_hash(&req.message);
        let candidate_memory = crate::db::types::Memory {
            id: format!("turn-{}", &message_hash[..12]),
            user_id: req.user_id.clone(),
            content: req.message.clone(),
            embedding: None,
            valence,
            status: crate::db::types::MemoryStatus::Pending,
            conflict_status: crate::db::types::ConflictStatus::Active,
            observed_at: chrono::Utc::now(),
            created_at: chrono::Utc::now(),
            committed_at: None,
            metadata: serde_json::json!({}),
        };
        if let Some(candidate) = self.conflict.detect(&candidate_memory, &recent) {
            if let Some(conflict_id) = self
                .conflict
                .record_conflict(&req.user_id, &candidate)
                .await
                .map_err(CoreError::from)?
            {
                let question = format!(
                    "Earlier you told me something different about {} — which one is right?",
                    candidate.common_topic.join(", ")
                );
                if self
                    .conflict
                    .start_clarification(&req.user_id, &conflict_id, &req.session_id, &question)
                    .await
                    .map_err(CoreError::from)?
                    .is_some()
                {
                    let _ = tx.send(SseFrame::Clarification { question }).await;
                    return Ok(());
                }
            }
        }

        // Step 8: reply prompt construction.
        let prompt = build_prompt(&req, affinity_state, &retrieval, req.evaluation_mode);

        // Step 9: stream the reply.
        let mut stream = self.llm.stream_reply(&prompt, tier).await.map_err(|e| {
            crate::metrics::record_llm_call(tier.as_u8(), false);
            CoreError::StoreTransient(e.to_string())
        })?;
        crate::metrics::record_llm_call(tier.as_u8(), true);

        let mut reply_text = String::new();
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(delta) => {
                    reply_text.push_str(&delta);
                    if tx.send(SseFrame::Text { delta }).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "llm stream interrupted");
                    break;
                }
            }
        }

        // Step 10: affinity update for this turn.
        let signals = TurnSignals {
            user_initiated: true,
            valence,
            memory_confirmation,
            correction,
            silence_days: 0.0,
        };
        self.affinity
            .apply_turn(&req.user_id, signals)
            .await
            .map_err(CoreError::from)?;

        // Step 11: slow-path outbox emission — commit the turn durably and
        // let the worker extract/index it asynchronously. The embedding is
        // computed here rather than left to the worker: it rides along in
        // the outbox payload so the vector sink (C3/C4) has something to
        // write even for an otherwise degraded extraction pass.
        let embedding = match self.embedding.encode(&req.message).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "embedding encode failed, vector sink will skip this turn");
                None
            }
        };

        let reply_hash = sha256_hash(&reply_text);
        let outcome = self
            .outbox
            .write_turn(
                &req.user_id,
                &req.message,
                valence,
                chrono::Utc::now(),
                req.idempotency_key.as_deref(),
                &reply_hash,
                &reply_text,
                embedding,
            )
            .await
            .map_err(CoreError::from)?;

        if !outcome.replayed {
            let _ = tx.send(SseFrame::MemoryPending).await;
        }

        Ok(())
    }
}

/// Builds the reply prompt: affinity-state register tag, retrieved facts and
/// memories, a conflict-handling note when any retrieved facts carry a
/// conflict hint, and — in evaluation mode — an explicit instruction not to
/// fabricate memories the retrieval step didn't surface.
fn build_prompt(
    req: &TurnRequest,
    affinity_state: AffinityState,
    retrieval: &crate::retrieval::RetrievalResult,
    evaluation_mode: bool,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("[register: {}]\n", affinity_state.as_str()));

    if !retrieval.memories.is_empty() {
        prompt.push_str("Relevant memories:\n");
        for m in &retrieval.memories {
            prompt.push_str(&format!("- {}\n", m.content));
        }
    }
    if !retrieval.facts.is_empty() {
        prompt.push_str("Known facts:\n");
        for f in &retrieval.facts {
            let note = if f.conflict_hint { " (possibly contradicted elsewhere)" } else { "" };
            prompt.push_str(&format!(
                "- {} {} {}{}\n",
                f.source_name, f.relation_type, f.target_name, note
            ));
        }
    }
    if evaluation_mode {
        prompt.push_str(
            "Only reference memories and facts listed above; never invent details about the user.\n",
        );
    }
    prompt.push_str(&format!("User: {}\n", req.message));
    prompt
}
