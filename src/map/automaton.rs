use smallvec::SmallVec;

use crate::index::SENTINEL_RANK;

/// Widest query window the automaton can track: one column per bit of a
/// word, with one bit reserved for the terminal column
pub const AUTOMATON_WINDOW: u16 = 63;

/// Per-symbol match masks over a leg of the read, in traversal order.
/// Bit `j` of `masks[c]` is set when consuming reference symbol `c` advances
/// an alignment path past column `j`. Ambiguous bases set no bit at all, so
/// an `N` can only be crossed by spending an edit.
#[derive(Debug)]
pub struct PatternMasks {
    masks: [u64; 4],
    width: u16,
}

impl PatternMasks {
    /// Builds masks from rank symbols in traversal order. Symbols beyond the
    /// window do not constrain the automaton; acceptance is then decided by
    /// the search engine instead.
    pub fn new<I>(symbols: I, leg_len: u16) -> Self
    where
        I: Iterator<Item = u8>,
    {
        let width = leg_len.min(AUTOMATON_WINDOW);
        let mut masks = [0_u64; 4];
        for (column, symbol) in symbols.take(width as usize).enumerate() {
            if (1..=4).contains(&symbol) {
                masks[usize::from(symbol) - 1] |= 1 << column;
            }
        }
        Self { masks, width }
    }

    pub fn eq_mask(&self, symbol: u8) -> u64 {
        if symbol == SENTINEL_RANK || symbol > 4 {
            return 0;
        }
        self.masks[usize::from(symbol) - 1]
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    /// The acceptance bit, or `None` when the leg overflows the window and
    /// automaton acceptance is not decidable
    pub fn terminal_bit(&self, leg_len: u16) -> Option<u64> {
        (leg_len <= AUTOMATON_WINDOW).then(|| 1 << leg_len)
    }
}

/// Suffix-filter staircase: an alignment path is allowed to carry `d` edits
/// only once it has progressed past the first `d` chunk boundaries of its
/// leg. This is a structural bound derived from the pigeonhole seeding, not
/// a heuristic.
#[derive(Debug)]
pub struct StaircaseFilter {
    masks: SmallVec<[u64; 12]>,
}

impl StaircaseFilter {
    /// `chunk_lengths` are the chunk sizes of the leg in traversal order;
    /// `max_edits` bounds the number of layers ever queried
    pub fn new(chunk_lengths: &[u16], max_edits: u8) -> Self {
        let mut masks = SmallVec::with_capacity(usize::from(max_edits) + 1);
        let mut boundary = 0_u32;
        for d in 0..=u32::from(max_edits) {
            masks.push(if boundary >= 64 {
                0
            } else {
                !0 << boundary
            });
            if let Some(&chunk) = chunk_lengths.get(d as usize) {
                boundary += u32::from(chunk);
            }
        }
        Self { masks }
    }

    /// A filter that never prunes, for legs without chunk structure
    pub fn open(max_edits: u8) -> Self {
        Self {
            masks: std::iter::repeat(!0)
                .take(usize::from(max_edits) + 1)
                .collect(),
        }
    }

    pub fn mask(&self, edits: u8) -> u64 {
        self.masks
            .get(usize::from(edits))
            .copied()
            .unwrap_or_default()
    }
}

/// Result of advancing the automaton by one reference symbol
#[derive(Debug)]
pub enum Transition {
    /// No live state remains; the search branch is pruned
    Dead,
    Live(EditAutomaton),
    /// A path reached the terminal column; `edits` is the lowest accepting
    /// layer
    Accept { edits: u8, automaton: EditAutomaton },
}

/// Bit-parallel banded Levenshtein automaton. One word per edit layer; bit
/// `j` of layer `i` means an alignment path has consumed `j` query columns
/// with exactly `k_offset + i` edits. Layers below the smallest live edit
/// count are trimmed away, sliding `k_offset` upward.
#[derive(Clone, Debug)]
pub struct EditAutomaton {
    layers: SmallVec<[u64; 8]>,
    k_offset: u8,
}

impl EditAutomaton {
    /// Anti-diagonal seeding: with `d` edits spent, up to `d` query columns
    /// may already have been skipped
    pub fn init(max_edits: u8, filter: &StaircaseFilter) -> Self {
        Self::init_with_offset(0, max_edits, filter)
    }

    /// Seeds a fresh automaton whose lowest layer already carries
    /// `base_edits` edits proven elsewhere (e.g. by a finished search leg)
    pub fn init_with_offset(base_edits: u8, max_edits: u8, filter: &StaircaseFilter) -> Self {
        debug_assert!(base_edits <= max_edits);
        let layers = (base_edits..=max_edits)
            .map(|d| (1 << (d - base_edits)) & filter.mask(d))
            .collect();
        Self {
            layers,
            k_offset: base_edits,
        }
    }

    /// A single always-live layer; used where no automaton constraint
    /// applies
    pub fn unconstrained() -> Self {
        Self {
            layers: std::iter::once(1).collect(),
            k_offset: 0,
        }
    }

    /// Smallest number of edits over all live paths
    pub fn min_edits(&self) -> u8 {
        self.k_offset
    }

    /// Advances the automaton by one reference symbol. The recurrence folds
    /// match, substitution, insertion, and deletion moves of every layer
    /// into shift/and/or operations on one word per layer.
    pub fn next_state(
        &self,
        eq_mask: u64,
        filter: &StaircaseFilter,
        terminal_bit: Option<u64>,
        max_edits: u8,
    ) -> Transition {
        let mut next: SmallVec<[u64; 8]> = SmallVec::with_capacity(self.layers.len());
        next.push(((self.layers[0] & eq_mask) << 1) & filter.mask(self.k_offset));
        for i in 1..self.layers.len() {
            let matched = (self.layers[i] & eq_mask) << 1;
            let substituted = self.layers[i - 1] << 1;
            let inserted = self.layers[i - 1];
            let deleted = next[i - 1] << 1;
            next.push(
                (matched | substituted | inserted | deleted)
                    & filter.mask(self.k_offset + i as u8),
            );
        }

        // Lowest accepting layer wins: layers are scanned in edit order
        if let Some(terminal_bit) = terminal_bit {
            for (i, &layer) in next.iter().enumerate() {
                if layer & terminal_bit != 0 {
                    return Transition::Accept {
                        edits: self.k_offset + i as u8,
                        automaton: Self {
                            layers: next,
                            k_offset: self.k_offset,
                        },
                    };
                }
            }
        }

        // Trim dead low layers, sliding the edit-count window upward
        let live_from = match next.iter().position(|&layer| layer != 0) {
            Some(first_live) => first_live,
            None => return Transition::Dead,
        };
        let k_offset = self.k_offset + live_from as u8;
        if k_offset > max_edits {
            return Transition::Dead;
        }
        if live_from > 0 {
            next.drain(..live_from);
        }
        Transition::Live(Self {
            layers: next,
            k_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::base_to_rank,
        sequence::Base,
    };

    fn rank_of(symbol: u8) -> u8 {
        base_to_rank(Base::from_ascii(symbol).unwrap())
    }

    fn masks_for(pattern: &[u8]) -> PatternMasks {
        PatternMasks::new(pattern.iter().map(|&c| rank_of(c)), pattern.len() as u16)
    }

    /// Feeds `text` through the automaton, returning the accepting edit
    /// count if any step accepts
    fn scan(pattern: &[u8], text: &[u8], max_edits: u8) -> Option<u8> {
        let masks = masks_for(pattern);
        let filter = StaircaseFilter::open(max_edits);
        let terminal = masks.terminal_bit(pattern.len() as u16);
        let mut automaton = EditAutomaton::init(max_edits, &filter);
        for &symbol in text {
            match automaton.next_state(masks.eq_mask(rank_of(symbol)), &filter, terminal, max_edits)
            {
                Transition::Dead => return None,
                Transition::Live(next) => automaton = next,
                Transition::Accept { edits, .. } => return Some(edits),
            }
        }
        None
    }

    #[test]
    fn test_exact_match_accepts_with_zero_edits() {
        assert_eq!(scan(b"GATTACA", b"GATTACA", 0), Some(0));
        assert_eq!(scan(b"GATTACA", b"GATTACA", 2), Some(0));
    }

    #[test]
    fn test_substitution_needs_budget() {
        assert_eq!(scan(b"GATTACA", b"GATCACA", 0), None);
        assert_eq!(scan(b"GATTACA", b"GATCACA", 1), Some(1));
        assert_eq!(scan(b"GATTACA", b"GATCACA", 3), Some(1));
    }

    #[test]
    fn test_insertion_and_deletion() {
        // Reference carries one extra symbol
        assert_eq!(scan(b"GATTACA", b"GATTTACA", 1), Some(1));
        // Reference misses one symbol
        assert_eq!(scan(b"GATTACA", b"GATACA", 1), Some(1));
        assert_eq!(scan(b"GATTACA", b"GATACA", 0), None);
    }

    #[test]
    fn test_ambiguous_base_consumes_an_edit() {
        let pattern = masks_for(b"GANTA");
        assert_eq!(pattern.eq_mask(rank_of(b'A')), 0b10010);
        assert_eq!(scan(b"GANTA", b"GACTA", 1), Some(1));
        assert_eq!(scan(b"GANTA", b"GACTA", 0), None);
    }

    #[test]
    fn test_dead_end_reported() {
        let masks = masks_for(b"AAAA");
        let filter = StaircaseFilter::open(0);
        let automaton = EditAutomaton::init(0, &filter);
        assert!(matches!(
            automaton.next_state(masks.eq_mask(rank_of(b'T')), &filter, Some(1 << 4), 0),
            Transition::Dead
        ));
    }

    #[test]
    fn test_trimming_slides_edit_window() {
        let masks = masks_for(b"AAAA");
        let filter = StaircaseFilter::open(2);
        let mut automaton = EditAutomaton::init(2, &filter);
        // A mismatching symbol kills layer 0; the window slides up
        match automaton.next_state(masks.eq_mask(rank_of(b'T')), &filter, None, 2) {
            Transition::Live(next) => automaton = next,
            other => panic!("expected live transition, got {other:?}"),
        }
        assert_eq!(automaton.min_edits(), 1);
        match automaton.next_state(masks.eq_mask(rank_of(b'T')), &filter, None, 2) {
            Transition::Live(next) => automaton = next,
            other => panic!("expected live transition, got {other:?}"),
        }
        assert_eq!(automaton.min_edits(), 2);
        // Budget exhausted: the next mismatch prunes the branch
        assert!(matches!(
            automaton.next_state(masks.eq_mask(rank_of(b'T')), &filter, None, 2),
            Transition::Dead
        ));
    }

    #[test]
    fn test_staircase_filter_masks() {
        let filter = StaircaseFilter::new(&[4, 3, 2], 3);
        assert_eq!(filter.mask(0), !0);
        assert_eq!(filter.mask(1), !0 << 4);
        assert_eq!(filter.mask(2), !0 << 7);
        assert_eq!(filter.mask(3), !0 << 9);
    }

    #[test]
    fn test_staircase_blocks_early_edits() {
        // One chunk of 4: an edit is only allowed past column 4
        let filter = StaircaseFilter::new(&[4], 1);
        let masks = masks_for(b"GATTACA");
        let terminal = masks.terminal_bit(7);
        let mut automaton = EditAutomaton::init(1, &filter);
        // Mismatch in the first chunk: layer 0 dies, and layer 1 may not
        // hold columns below the boundary
        let outcome = automaton.next_state(masks.eq_mask(rank_of(b'C')), &filter, terminal, 1);
        assert!(matches!(outcome, Transition::Dead), "got {outcome:?}");

        // The same mismatch past the boundary survives on layer 1
        for &symbol in b"GATT" {
            match automaton.next_state(masks.eq_mask(rank_of(symbol)), &filter, terminal, 1) {
                Transition::Live(next) => automaton = next,
                other => panic!("expected live transition, got {other:?}"),
            }
        }
        match automaton.next_state(masks.eq_mask(rank_of(b'G')), &filter, terminal, 1) {
            Transition::Live(next) => automaton = next,
            other => panic!("expected live transition, got {other:?}"),
        }
        assert_eq!(automaton.min_edits(), 1);
    }
}
