// src/llm/router.rs
// Tier routing (§4.11 step 6): a small closed-set state machine over
// structured features, replacing dynamic "route by string matching on
// prompts" with deterministic rules evaluated top-down. Do not reintroduce
// heuristic keyword routing elsewhere.

use crate::db::types::AffinityState;

use super::types::Tier;

pub struct TierRoutingInput<'a> {
    pub message: &'a str,
    pub has_question_marker: bool,
    pub references_place_or_person: bool,
    pub valence: f64,
    pub affinity_state: AffinityState,
}

/// Evaluated top-down; the first matching rule wins.
pub fn route_tier(input: &TierRoutingInput) -> Tier {
    let len = input.message.chars().count();

    if input.has_question_marker && input.references_place_or_person {
        return Tier::One;
    }
    if input.has_question_marker {
        return Tier::Two;
    }
    if input.valence.abs() > 0.6 {
        return Tier::One;
    }
    if matches!(
        input.affinity_state,
        AffinityState::CloseFriend | AffinityState::BestFriend
    ) && len > 50
    {
        return Tier::One;
    }
    if len < 20 {
        return Tier::Three;
    }
    Tier::Two
}

pub fn has_question_marker(message: &str) -> bool {
    message.contains('?') || message.contains('\u{ff1f}')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TierRoutingInput<'static> {
        TierRoutingInput {
            message: "hi",
            has_question_marker: false,
            references_place_or_person: false,
            valence: 0.0,
            affinity_state: AffinityState::Acquaintance,
        }
    }

    #[test]
    fn question_with_entity_is_tier_one() {
        let mut input = base();
        input.message = "who went to Shenyang with me?";
        input.has_question_marker = true;
        input.references_place_or_person = true;
        assert_eq!(route_tier(&input).as_u8(), 1);
    }

    #[test]
    fn plain_question_is_tier_two() {
        let mut input = base();
        input.message = "do you like tea?";
        input.has_question_marker = true;
        assert_eq!(route_tier(&input).as_u8(), 2);
    }

    #[test]
    fn strong_valence_is_tier_one() {
        let mut input = base();
        input.message = "I am furious right now";
        input.valence = -0.9;
        assert_eq!(route_tier(&input).as_u8(), 1);
    }

    #[test]
    fn close_friend_long_message_is_tier_one() {
        let mut input = base();
        input.message = "a".repeat(60).leak();
        input.affinity_state = AffinityState::BestFriend;
        assert_eq!(route_tier(&input).as_u8(), 1);
    }

    #[test]
    fn short_message_is_tier_three() {
        let mut input = base();
        input.message = "ok";
        assert_eq!(route_tier(&input).as_u8(), 3);
    }

    #[test]
    fn default_is_tier_two() {
        let input = TierRoutingInput {
            message: "this is a medium length message about my day",
            ..base()
        };
        assert_eq!(route_tier(&input).as_u8(), 2);
    }
}
