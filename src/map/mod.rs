pub mod automaton;
pub mod input;
pub mod mapping;
pub mod record;
pub mod search;
pub mod verify;

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{
    index::fm_index::BiInterval,
    map::{automaton::EditAutomaton, record::EditOperationsTrack},
};

/// How many alignments are reported per read
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportMode {
    BestHit,
    AllHits,
    TopL(u32),
}

impl ReportMode {
    /// Number of alternative alignments to emit besides the primary one
    pub fn alternatives(self) -> usize {
        match self {
            Self::BestHit => 0,
            Self::AllHits => usize::MAX,
            Self::TopL(l) => l as usize,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AlignmentParameters {
    /// Maximum number of edits (mismatches, insertions, deletions) per read
    pub max_edit_distance: u8,
    pub match_score: i32,
    pub mismatch_penalty: i32,
    pub gap_open_penalty: i32,
    pub gap_extension_penalty: i32,
    /// Charged when the search switches extension direction
    pub split_open_penalty: i32,
    /// Indels are not placed within this many bases of the read ends
    pub indel_end_skip: u8,
    /// Band width of the verification aligner
    pub band_width: u8,
    pub report_mode: ReportMode,
    pub chunk_size: usize,
    /// Upper bound on expanded search states per read. Not part of the
    /// original search model; guarantees termination on pathological reads.
    pub max_expanded_states: u32,
}

impl Default for AlignmentParameters {
    fn default() -> Self {
        Self {
            max_edit_distance: 3,
            match_score: 0,
            mismatch_penalty: -3,
            gap_open_penalty: -11,
            gap_extension_penalty: -4,
            split_open_penalty: 0,
            indel_end_skip: 5,
            band_width: 16,
            report_mode: ReportMode::BestHit,
            chunk_size: 250_000,
            max_expanded_states: 1_000_000,
        }
    }
}

/// Simple zero-cost direction enum to increase readability.
/// Also tags the strand of a reported alignment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Reverses the direction from forward to backward and vice-versa
    pub fn reverse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }

    pub fn is_forward(self) -> bool {
        self == Self::Forward
    }
}

/// Stores information about partial alignments on the priority stack.
/// The stack pops states in best-first order: fewest automaton edits,
/// then highest score, then suffix-interval bounds as the deterministic
/// tie-break.
#[derive(Debug)]
pub struct SearchState {
    pub interval: BiInterval,
    pub automaton: EditAutomaton,
    /// Read symbols in `[cursor_b, cursor_f)` have been consumed
    pub cursor_b: u16,
    pub cursor_f: u16,
    pub direction: Direction,
    pub seed: u8,
    pub edits: u8,
    pub score: i32,
}

impl SearchState {
    fn priority_key(&self) -> (u8, i32, u64, u64) {
        (
            self.edits,
            self.score,
            self.interval.lower,
            self.interval.size,
        )
    }
}

impl PartialOrd for SearchState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchState {
    fn cmp(&self, other: &Self) -> Ordering {
        let (edits, score, lower, size) = self.priority_key();
        let (other_edits, other_score, other_lower, other_size) = other.priority_key();
        // Greater means expanded earlier
        other_edits
            .cmp(&edits)
            .then(score.cmp(&other_score))
            .then(other_lower.cmp(&lower))
            .then(other_size.cmp(&size))
    }
}

impl PartialEq for SearchState {
    fn eq(&self, other: &Self) -> bool {
        self.priority_key() == other.priority_key()
    }
}

impl Eq for SearchState {}

/// A subset of `SearchState` to store accepted candidates before
/// verification
#[derive(Debug)]
pub struct HitInterval {
    pub interval: BiInterval,
    pub edits: u8,
    pub score: i32,
    /// Read bases left unconsumed at either end when the candidate was
    /// emitted (non-zero for unique-interval candidates)
    pub unconsumed_left: u16,
    pub unconsumed_right: u16,
}

impl PartialOrd for HitInterval {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HitInterval {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .edits
            .cmp(&self.edits)
            .then(self.score.cmp(&other.score))
            .then(other.interval.lower.cmp(&self.interval.lower))
    }
}

impl PartialEq for HitInterval {
    fn eq(&self, other: &Self) -> bool {
        self.edits == other.edits
            && self.score == other.score
            && self.interval == other.interval
    }
}

impl Eq for HitInterval {}

/// A verified alignment at a concrete locus
#[derive(Debug)]
pub struct VerifiedHit {
    /// Start of the alignment on the forward strand of the concatenated
    /// reference text
    pub position: u64,
    pub strand: Direction,
    pub score: i32,
    pub edit_distance: u16,
    pub edit_operations: EditOperationsTrack,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::automaton::EditAutomaton;

    fn state(edits: u8, score: i32, lower: u64) -> SearchState {
        SearchState {
            interval: BiInterval {
                lower,
                lower_rev: 0,
                size: 1,
            },
            automaton: EditAutomaton::unconstrained(),
            cursor_b: 0,
            cursor_f: 0,
            direction: Direction::Forward,
            seed: 0,
            edits,
            score,
        }
    }

    #[test]
    fn test_priority_order_is_total_and_deterministic() {
        let fewest_edits = state(0, -6, 7);
        let better_score = state(1, 0, 7);
        let worse_score = state(1, -3, 7);
        let tie_break = state(1, -3, 3);

        assert!(fewest_edits > better_score);
        assert!(better_score > worse_score);
        // Equal edits and score: the lower interval bound wins
        assert!(tie_break > worse_score);
        assert_eq!(state(1, -3, 3), state(1, -3, 3));
    }
}
