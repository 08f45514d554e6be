//! Interaction depth from movement speed.
//!
//! Speed bands are multiples of the hesitation speed: the slower someone
//! moves in front of a shelf, the deeper the interaction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionDepth {
    /// Nearly still, probably handling a product
    Interaction,
    /// Slow, comparing products
    Consideration,
    /// Looking while moving
    Attention,
    Passage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestLevel {
    High,
    Medium,
    Low,
    PassingBy,
}

impl InteractionDepth {
    pub fn from_speed(move_speed: f64, hesitation_speed: f64) -> Self {
        if move_speed <= hesitation_speed {
            InteractionDepth::Interaction
        } else if move_speed <= hesitation_speed * 2.0 {
            InteractionDepth::Consideration
        } else if move_speed <= hesitation_speed * 3.0 {
            InteractionDepth::Attention
        } else {
            InteractionDepth::Passage
        }
    }

    pub fn interest(self) -> InterestLevel {
        match self {
            InteractionDepth::Interaction => InterestLevel::High,
            InteractionDepth::Consideration => InterestLevel::Medium,
            InteractionDepth::Attention => InterestLevel::Low,
            InteractionDepth::Passage => InterestLevel::PassingBy,
        }
    }
}
