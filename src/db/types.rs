// src/db/types.rs
// Row types for the relational store (C1), mirrored 1:1 onto §3's data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Pending,
    Committed,
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Pending => "pending",
            MemoryStatus::Committed => "committed",
            MemoryStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "committed" => MemoryStatus::Committed,
            "deleted" => MemoryStatus::Deleted,
            _ => MemoryStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Active,
    Deprecated,
    Conflicted,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Active => "active",
            ConflictStatus::Deprecated => "deprecated",
            ConflictStatus::Conflicted => "conflicted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "deprecated" => ConflictStatus::Deprecated,
            "conflicted" => ConflictStatus::Conflicted,
            _ => ConflictStatus::Active,
        }
    }
}

/// A committed user utterance treated as a standalone episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub valence: f64,
    pub status: MemoryStatus,
    pub conflict_status: ConflictStatus,
    pub observed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// Raw row as stored: embedding/metadata are JSON text columns, timestamps
/// are RFC3339 text, matching the teacher's "store as TEXT, parse on read"
/// idiom for anything that isn't a native SQLite type.
#[derive(Debug, FromRow)]
pub struct MemoryRow {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub embedding: Option<String>,
    pub valence: f64,
    pub status: String,
    pub conflict_status: String,
    pub observed_at: String,
    pub created_at: String,
    pub committed_at: Option<String>,
    pub metadata: String,
}

impl MemoryRow {
    pub fn into_memory(self) -> Memory {
        Memory {
            id: self.id,
            user_id: self.user_id,
            content: self.content,
            embedding: self
                .embedding
                .and_then(|s| serde_json::from_str::<Vec<f32>>(&s).ok()),
            valence: self.valence,
            status: MemoryStatus::parse(&self.status),
            conflict_status: ConflictStatus::parse(&self.conflict_status),
            observed_at: parse_ts(&self.observed_at),
            created_at: parse_ts(&self.created_at),
            committed_at: self.committed_at.as_deref().map(parse_ts),
            metadata: serde_json::from_str(&self.metadata).unwrap_or(serde_json::json!({})),
        }
    }
}

pub fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Dlq,
    PendingReview,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Done => "done",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Dlq => "dlq",
            OutboxStatus::PendingReview => "pending_review",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "processing" => OutboxStatus::Processing,
            "done" => OutboxStatus::Done,
            "failed" => OutboxStatus::Failed,
            "dlq" => OutboxStatus::Dlq,
            "pending_review" => OutboxStatus::PendingReview,
            _ => OutboxStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxEventKind {
    Upsert,
    Delete,
}

impl OutboxEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxEventKind::Upsert => "upsert",
            OutboxEventKind::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delete" => OutboxEventKind::Delete,
            _ => OutboxEventKind::Upsert,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OutboxEventRow {
    pub id: String,
    pub event_id: String,
    pub memory_id: String,
    pub kind: String,
    pub payload: String,
    pub status: String,
    pub retry_count: i64,
    pub idempotency_key: Option<String>,
    pub created_at: String,
    pub processing_started_at: Option<String>,
    pub processed_at: Option<String>,
    pub vector_written_at: Option<String>,
    pub graph_written_at: Option<String>,
    pub bridge_written_at: Option<String>,
    pub error_message: Option<String>,
    pub retry_after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxPayload {
    pub user_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AffinityHistoryRow {
    pub id: String,
    pub user_id: String,
    pub old_score: f64,
    pub new_score: f64,
    pub delta: f64,
    pub trigger_event: String,
    pub signals: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityState {
    Stranger,
    Acquaintance,
    Friend,
    CloseFriend,
    BestFriend,
}

impl AffinityState {
    pub fn from_score(score: f64) -> Self {
        if score < 0.0 {
            AffinityState::Stranger
        } else if score < 0.3 {
            AffinityState::Acquaintance
        } else if score < 0.5 {
            AffinityState::Friend
        } else if score < 0.7 {
            AffinityState::CloseFriend
        } else {
            AffinityState::BestFriend
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AffinityState::Stranger => "stranger",
            AffinityState::Acquaintance => "acquaintance",
            AffinityState::Friend => "friend",
            AffinityState::CloseFriend => "close_friend",
            AffinityState::BestFriend => "best_friend",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MemoryConflictRow {
    pub id: String,
    pub user_id: String,
    pub memory_1_id: String,
    pub memory_2_id: String,
    pub conflict_type: String,
    pub common_topic: String,
    pub confidence: f64,
    pub status: String,
    pub resolution_method: Option<String>,
    pub preferred_memory_id: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub metadata: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ClarificationSessionRow {
    pub id: String,
    pub user_id: String,
    pub conflict_id: String,
    pub session_id: String,
    pub question: String,
    pub user_response: Option<String>,
    pub status: String,
    pub turns_waited: i64,
    pub created_at: String,
    pub answered_at: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct GraphEntityRow {
    pub entity_id: String,
    pub user_id: String,
    pub name: String,
    pub normalized_name: String,
    pub entity_type: String,
    pub mention_count: i64,
    pub first_mentioned_at: String,
    pub last_mentioned_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct GraphRelationRow {
    pub id: String,
    pub user_id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub weight: f64,
    pub created_at: String,
    pub last_refreshed_at: String,
}
