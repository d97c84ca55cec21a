// src/llm/mod.rs
// LLM client (C5): tiered reply + extraction, and the tier-routing rules
// orchestration consults per turn (§4.11 step 6).

pub mod provider;
pub mod router;
pub mod types;

pub use provider::{LlmProvider, MockLlmProvider, SharedLlmProvider, TokenStream};
pub use router::{route_tier, TierRoutingInput};
pub use types::{ExtractedEntity, ExtractedRelation, ExtractionResult, Tier};
