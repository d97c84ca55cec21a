// src/db/mod.rs
// Relational store (C1): schema + typed DAOs over SQLite via sqlx, using raw
// `sqlx::query`/`query_as` rather than the compile-time `query!` macros.

pub mod affinity;
pub mod bridge;
pub mod clarifications;
pub mod conflicts;
pub mod deletion_audit;
pub mod id_mapping;
pub mod memories;
pub mod outbox;
pub mod schema;
pub mod types;

pub use schema::init_schema;
