// src/outbox/mod.rs
// Transactional Outbox: C6 writer + C7 worker.

pub mod worker;
pub mod writer;

pub use worker::OutboxWorker;
pub use writer::{OutboxWriter, WriteOutcome};
