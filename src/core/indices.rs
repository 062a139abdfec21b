use hashbrown::HashMap;

use crate::types::RoundId;

/// Reverse of `Round::child`: the rounds feeding slot 0 and slot 1 of each round.
pub type ParentIndex = HashMap<RoundId, [Option<RoundId>; 2]>;
