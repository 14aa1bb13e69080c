use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{
    index::{
        base_to_rank, complement_rank,
        occurrence::{OccurrenceBackend, OccurrenceIndex},
        rank_to_base, ALPHABET_SIZE, SENTINEL_RANK,
    },
    sequence::{Base, PackedSequence},
};

/// The Burrows-Wheeler transform of the indexed text. Base symbols live in
/// the packed planes; the two sentinel rows are kept in a small cache (their
/// lanes are packed as `A` and masked out of occurrence counts). The `less`
/// table holds, per rank symbol, the number of lexicographically smaller
/// symbols in the text.
#[derive(Serialize, Deserialize)]
pub struct Bwt {
    sequence: PackedSequence,
    sentinel_ranks: [u64; 2],
    less: Vec<u64>,
}

impl Default for Bwt {
    fn default() -> Self {
        Self {
            sequence: PackedSequence::new(),
            sentinel_ranks: [u64::MAX; 2],
            less: vec![0; ALPHABET_SIZE as usize + 1],
        }
    }
}

impl Bwt {
    /// Packs a rank-symbol BWT string. Expects exactly two sentinel rows,
    /// one per indexed strand.
    pub fn new(symbols: &[u8]) -> Self {
        let mut sequence = PackedSequence::with_capacity(symbols.len() as u64);
        let mut sentinel_ranks = [u64::MAX; 2];
        let mut counts = vec![0_u64; ALPHABET_SIZE as usize];
        let mut num_sentinels = 0;
        for (row, &symbol) in symbols.iter().enumerate() {
            counts[usize::from(symbol)] += 1;
            if symbol == SENTINEL_RANK {
                assert!(
                    num_sentinels < 2,
                    "more than two sentinel rows in the BWT"
                );
                sentinel_ranks[num_sentinels] = row as u64;
                num_sentinels += 1;
                sequence.push(Base::A);
            } else {
                sequence.push(rank_to_base(symbol));
            }
        }
        let less = counts
            .iter()
            .scan(0, |sum, &count| {
                let below = *sum;
                *sum += count;
                Some(below)
            })
            .chain(std::iter::once(symbols.len() as u64))
            .collect();
        Self {
            sequence,
            sentinel_ranks,
            less,
        }
    }

    pub fn len(&self) -> u64 {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn sequence(&self) -> &PackedSequence {
        &self.sequence
    }

    /// The rank symbol of row `index`
    pub fn symbol_at(&self, index: u64) -> u8 {
        if self.sentinel_ranks.contains(&index) {
            SENTINEL_RANK
        } else {
            base_to_rank(self.sequence.get(index))
        }
    }

    pub fn sentinel_ranks(&self) -> [u64; 2] {
        self.sentinel_ranks
    }

    /// Number of sentinel rows in `[0, index)`
    pub fn sentinels_before(&self, index: u64) -> u64 {
        self.sentinel_ranks
            .iter()
            .filter(|&&row| row < index)
            .count() as u64
    }

    /// `less[symbol]`: the number of symbols in the text that sort below
    /// `symbol`
    pub fn less(&self, symbol: u8) -> u64 {
        self.less[usize::from(symbol)]
    }
}

/// FM-index over the concatenation of the forward strand and its reverse
/// complement, each terminated by a sentinel. The duality of that layout
/// makes one index answer both search directions: extending a match to the
/// right is a backward extension with the complemented symbol on the swapped
/// interval.
pub struct FmIndex {
    bwt: Bwt,
    occ: OccurrenceBackend,
}

impl FmIndex {
    pub fn new(bwt: Bwt, occ: OccurrenceBackend) -> Self {
        Self { bwt, occ }
    }

    pub fn bwt(&self) -> &Bwt {
        &self.bwt
    }

    pub fn len(&self) -> u64 {
        self.bwt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bwt.is_empty()
    }

    /// Length of one strand including its sentinel
    pub fn strand_len(&self) -> u64 {
        self.len() / 2
    }

    /// Number of occurrences of `symbol` in `BWT[0..index)`
    pub fn occurrences(&self, symbol: u8, index: u64) -> u64 {
        self.occ.rank(&self.bwt, symbol, index)
    }

    /// Occurrence count of `symbol` within `BWT[start..end)`
    pub fn count(&self, symbol: u8, start: u64, end: u64) -> u64 {
        self.occurrences(symbol, end) - self.occurrences(symbol, start)
    }

    /// Initialize interval for empty pattern. The interval points at the whole suffix array.
    pub fn init_interval(&self) -> BiInterval {
        BiInterval {
            lower: 0,
            lower_rev: 0,
            size: self.len(),
        }
    }

    /// Backward extension of the interval with a rank symbol. Extending with
    /// `N` (or a sentinel) yields the empty interval: an ambiguous base
    /// matches nothing.
    pub fn backward_ext(&self, interval: &BiInterval, symbol: u8) -> BiInterval {
        if symbol == SENTINEL_RANK || symbol == base_to_rank(Base::N) {
            return BiInterval::empty();
        }
        self.extend_iter(interval)
            .find(|&(base, _)| base == symbol)
            .map(|(_, interval)| interval)
            .expect("extension iterator covers all base symbols")
    }

    pub fn forward_ext(&self, interval: &BiInterval, symbol: u8) -> BiInterval {
        self.backward_ext(&interval.swapped(), complement_rank(symbol))
            .swapped()
    }

    /// Returns an iterator over the base alphabet extending the interval
    pub fn extend_iter<'a>(&'a self, interval: &'a BiInterval) -> FmdExtIterator<'a> {
        FmdExtIterator::new(interval, self)
    }

    /// The suffix link (LF mapping): the rank of the suffix starting one
    /// position earlier in the text. Returns 0 at a sentinel row.
    pub fn suffix_link(&self, rank: u64) -> u64 {
        let symbol = self.bwt.symbol_at(rank);
        if symbol == SENTINEL_RANK {
            return 0;
        }
        self.bwt.less(symbol) + self.occurrences(symbol, rank)
    }
}

/// Extension of a `BiInterval`, implemented as an iterator over the base
/// alphabet in descending symbol order (`T`, `G`, `C`, `A`). The running
/// `lower_rev` accumulation is what keeps the reverse-strand interval in
/// sync; reordering the symbols breaks the duality.
pub struct FmdExtIterator<'a> {
    size: u64,
    lower_rev: u64,
    symbol: u8,
    input_interval: &'a BiInterval,
    fm_index: &'a FmIndex,
}

impl Iterator for FmdExtIterator<'_> {
    type Item = (u8, BiInterval);

    fn next(&mut self) -> Option<Self::Item> {
        if self.symbol < 2 {
            return None;
        }
        self.symbol -= 1;
        Some((self.symbol, self.extend_once_internal()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let hint = usize::from(self.symbol.saturating_sub(1));
        (hint, Some(hint))
    }
}

impl ExactSizeIterator for FmdExtIterator<'_> {}

impl<'a> FmdExtIterator<'a> {
    fn new(interval: &'a BiInterval, fm_index: &'a FmIndex) -> Self {
        // The sentinel class seeds the accumulation; its two occurrences are
        // answered from the cached rows
        Self {
            size: fm_index.count(
                SENTINEL_RANK,
                interval.lower,
                interval.lower + interval.size,
            ),
            lower_rev: interval.lower_rev,
            symbol: 5,
            input_interval: interval,
            fm_index,
        }
    }

    fn extend_once_internal(&mut self) -> BiInterval {
        self.lower_rev += self.size;
        let below = self
            .fm_index
            .occurrences(self.symbol, self.input_interval.lower);
        self.size = self.fm_index.occurrences(
            self.symbol,
            self.input_interval.lower + self.input_interval.size,
        ) - below;

        BiInterval {
            lower: self.fm_index.bwt.less(self.symbol) + below,
            lower_rev: self.lower_rev,
            size: self.size,
        }
    }
}

/// Interval of the suffix array shared by both search directions:
/// `[lower, lower + size)` on the forward index, `[lower_rev, lower_rev +
/// size)` on the reverse complement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BiInterval {
    pub lower: u64,
    pub lower_rev: u64,
    pub size: u64,
}

impl BiInterval {
    pub fn empty() -> Self {
        Self {
            lower: 0,
            lower_rev: 0,
            size: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn forward(&self) -> SuffixInterval {
        SuffixInterval::new(self.lower, self.size)
    }

    pub fn revcomp(&self) -> SuffixInterval {
        SuffixInterval::new(self.lower_rev, self.size)
    }

    #[must_use]
    pub fn swapped(&self) -> Self {
        Self {
            lower: self.lower_rev,
            lower_rev: self.lower,
            size: self.size,
        }
    }
}

/// Inclusive pair of suffix-array ranks sharing a matched pattern. The
/// canonical empty interval has `lower > upper`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuffixInterval {
    pub lower: u64,
    pub upper: u64,
}

impl SuffixInterval {
    fn new(lower: u64, size: u64) -> Self {
        if size == 0 {
            Self { lower: 1, upper: 0 }
        } else {
            Self {
                lower,
                upper: lower + size - 1,
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }

    pub fn hit_count(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.upper - self.lower + 1
        }
    }

    pub fn range(&self) -> Range<u64> {
        if self.is_empty() {
            0..0
        } else {
            self.lower..self.upper + 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{
        indexing::build_in_memory_index,
        occurrence::{BlockOccurrenceTable, WaveletTree},
        suffix_array::{build_suffix_array, RankedText},
    };

    fn ranked_text(reference: &[u8]) -> Vec<u8> {
        let mut ranks: Vec<u8> = reference
            .iter()
            .map(|&c| base_to_rank(Base::from_ascii(c).unwrap()))
            .collect();
        ranks.push(SENTINEL_RANK);
        ranks.extend(
            reference
                .iter()
                .rev()
                .map(|&c| base_to_rank(Base::from_ascii(c).unwrap().complement())),
        );
        ranks.push(SENTINEL_RANK);
        ranks
    }

    #[test]
    fn test_bwt_matches_suffix_array() {
        let ranks = ranked_text(b"GATTACA");
        let suffix_array = build_suffix_array(&RankedText::new(&ranks, ALPHABET_SIZE));
        let (fm_index, _) = build_in_memory_index(b"GATTACA").unwrap();
        let n = ranks.len() as u64;
        for (row, &start) in suffix_array.iter().enumerate() {
            let expected = ranks[((start + n - 1) % n) as usize];
            assert_eq!(fm_index.bwt().symbol_at(row as u64), expected, "row {row}");
        }
    }

    #[test]
    fn test_occurrence_backends_agree_with_naive_scan() {
        let ranks = ranked_text(b"TAGCATCGATCGGGCATNNACGT");
        let suffix_array = build_suffix_array(&RankedText::new(&ranks, ALPHABET_SIZE));
        let n = ranks.len() as u64;
        let bwt_symbols: Vec<u8> = suffix_array
            .iter()
            .map(|&start| ranks[((start + n - 1) % n) as usize])
            .collect();
        let bwt = Bwt::new(&bwt_symbols);
        let block = BlockOccurrenceTable::new(&bwt, 4);
        let wavelet = WaveletTree::new(&bwt);

        for symbol in 0..ALPHABET_SIZE as u8 {
            assert_eq!(block.rank(&bwt, symbol, 0), 0);
            assert_eq!(wavelet.rank(&bwt, symbol, 0), 0);
            for i in 0..=bwt_symbols.len() {
                let naive = bwt_symbols[..i].iter().filter(|&&s| s == symbol).count() as u64;
                assert_eq!(block.rank(&bwt, symbol, i as u64), naive, "block {symbol}/{i}");
                assert_eq!(
                    wavelet.rank(&bwt, symbol, i as u64),
                    naive,
                    "wavelet {symbol}/{i}"
                );
            }
        }
    }

    #[test]
    fn test_backward_search_locates_pattern() {
        let reference = b"CTGATTACAGGTT";
        let ranks = ranked_text(reference);
        let suffix_array = build_suffix_array(&RankedText::new(&ranks, ALPHABET_SIZE));
        let (fm_index, _) = build_in_memory_index(reference).unwrap();

        let pattern = b"ATTACA";
        let mut interval = fm_index.init_interval();
        for &symbol in pattern.iter().rev() {
            let extended =
                fm_index.backward_ext(&interval, base_to_rank(Base::from_ascii(symbol).unwrap()));
            // Narrowing never widens the interval
            assert!(extended.size <= interval.size);
            interval = extended;
        }
        let positions: Vec<u64> = interval
            .forward()
            .range()
            .map(|rank| suffix_array[rank as usize])
            .collect();
        assert_eq!(positions, vec![3]);
    }

    #[test]
    fn test_backward_search_mismatch_yields_empty_interval() {
        let (fm_index, _) = build_in_memory_index(b"AACCGGTT").unwrap();
        let mut interval = fm_index.init_interval();
        for &symbol in b"TGA".iter().rev() {
            interval = fm_index
                .backward_ext(&interval, base_to_rank(Base::from_ascii(symbol).unwrap()));
        }
        assert!(interval.is_empty());
        assert!(interval.forward().is_empty());
        assert_eq!(interval.forward().hit_count(), 0);
        // Ambiguous symbols never match
        assert!(fm_index
            .backward_ext(&fm_index.init_interval(), base_to_rank(Base::N))
            .is_empty());
    }

    #[test]
    fn test_forward_backward_duality() {
        let (fm_index, _) = build_in_memory_index(b"CTGATTACAGGTT").unwrap();
        let pattern = b"GATTACA";

        let mut backward = fm_index.init_interval();
        for &symbol in pattern.iter().rev() {
            backward = fm_index
                .backward_ext(&backward, base_to_rank(Base::from_ascii(symbol).unwrap()));
        }

        let mut forward = fm_index.init_interval();
        for &symbol in pattern.iter() {
            forward =
                fm_index.forward_ext(&forward, base_to_rank(Base::from_ascii(symbol).unwrap()));
        }

        assert_eq!(backward, forward);
        assert_eq!(backward.size, 1);
    }

    #[test]
    fn test_suffix_link_walks_to_previous_position() {
        let reference = b"GATTACA";
        let ranks = ranked_text(reference);
        let suffix_array = build_suffix_array(&RankedText::new(&ranks, ALPHABET_SIZE));
        let (fm_index, _) = build_in_memory_index(reference).unwrap();

        for (rank, &start) in suffix_array.iter().enumerate() {
            if fm_index.bwt().symbol_at(rank as u64) == SENTINEL_RANK {
                assert_eq!(fm_index.suffix_link(rank as u64), 0);
            } else {
                let linked = fm_index.suffix_link(rank as u64);
                assert_eq!(suffix_array[linked as usize], start - 1, "rank {rank}");
            }
        }
    }

    #[test]
    fn test_sparse_suffix_array_reconstruction() {
        let reference = b"TAGCATCGATCGGGCATTACGT";
        let ranks = ranked_text(reference);
        let full = build_suffix_array(&RankedText::new(&ranks, ALPHABET_SIZE));
        let (fm_index, sparse) = build_in_memory_index(reference).unwrap();

        for (rank, &value) in full.iter().enumerate() {
            assert_eq!(
                sparse.get(rank as u64, &fm_index).unwrap(),
                value,
                "rank {rank}"
            );
        }
    }

    #[test]
    fn test_count_shortcut() {
        let (fm_index, _) = build_in_memory_index(b"ACGTACGTACGT").unwrap();
        let n = fm_index.len();
        for symbol in 0..ALPHABET_SIZE as u8 {
            assert_eq!(
                fm_index.count(symbol, 0, n),
                fm_index.occurrences(symbol, n)
            );
        }
        // Both strands contribute: 3 occurrences each of ACGT forward and
        // of its complement on the reverse strand
        assert_eq!(fm_index.count(base_to_rank(Base::A), 0, n), 6);
        assert_eq!(fm_index.count(SENTINEL_RANK, 0, n), 2);
    }
}
