use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    index::fm_index::FmIndex,
    sequence::packed::MAX_SEQUENCE_LENGTH,
};

/// Marker for suffix-array slots that have not been induced yet
const EMPTY: u64 = u64::MAX;

/// Read-only view of a text over a dense rank alphabet `[0, alphabet_size)`.
/// The suffix-array builder compares suffixes against a virtual sentinel that
/// is smaller than every rank and sits behind the last position.
pub trait TextSequence {
    fn len(&self) -> usize;
    fn symbol_at(&self, index: usize) -> u64;
    fn alphabet_size(&self) -> u64;
}

/// Rank-transformed text held as plain bytes (the alphabet is tiny)
pub struct RankedText<'a> {
    symbols: &'a [u8],
    alphabet_size: u64,
}

impl<'a> RankedText<'a> {
    pub fn new(symbols: &'a [u8], alphabet_size: u64) -> Self {
        Self {
            symbols,
            alphabet_size,
        }
    }
}

impl TextSequence for RankedText<'_> {
    fn len(&self) -> usize {
        self.symbols.len()
    }

    fn symbol_at(&self, index: usize) -> u64 {
        u64::from(self.symbols[index])
    }

    fn alphabet_size(&self) -> u64 {
        self.alphabet_size
    }
}

/// Reduced problem built from LMS-substring names during recursion
struct ReducedText<'a> {
    names: &'a [u64],
    alphabet_size: u64,
}

impl TextSequence for ReducedText<'_> {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn symbol_at(&self, index: usize) -> u64 {
        self.names[index]
    }

    fn alphabet_size(&self) -> u64 {
        self.alphabet_size
    }
}

/// Builds the suffix array of `text` by induced sorting (SA-IS) in linear
/// time. Suffix comparisons follow the virtual-sentinel convention, so a
/// shorter suffix that prefixes a longer one sorts first.
pub fn build_suffix_array<T>(text: &T) -> Vec<u64>
where
    T: TextSequence,
{
    let n = text.len();
    match n {
        0 => Vec::new(),
        1 => vec![0],
        _ => sa_is(text),
    }
}

fn sa_is<T>(text: &T) -> Vec<u64>
where
    T: TextSequence,
{
    let n = text.len();
    let types = classify_types(text);
    let lms_positions: Vec<usize> = (1..n).filter(|&i| is_lms(&types, i)).collect();

    let mut sa = vec![EMPTY; n];

    // First pass: sort LMS substrings by placing them unordered at their
    // bucket tails and inducing L- then S-type suffixes around them
    {
        let mut tails = bucket_tails(text);
        for &position in &lms_positions {
            let symbol = text.symbol_at(position) as usize;
            tails[symbol] -= 1;
            sa[tails[symbol] as usize] = position as u64;
        }
    }
    induce(text, &types, &mut sa);

    // The LMS suffixes now appear in the order of their LMS substrings.
    // Name the substrings; equal substrings share a name.
    let mut sorted_lms = Vec::with_capacity(lms_positions.len());
    for &entry in sa.iter() {
        if entry != EMPTY && entry > 0 && is_lms(&types, entry as usize) {
            sorted_lms.push(entry as usize);
        }
    }

    let mut name_of_position = vec![EMPTY; n];
    let mut name_count = 0_u64;
    let mut previous: Option<usize> = None;
    for &position in &sorted_lms {
        if let Some(previous) = previous {
            if !lms_substrings_equal(text, &types, previous, position) {
                name_count += 1;
            }
        }
        name_of_position[position] = name_count;
        previous = Some(position);
    }
    let name_count = name_count + u64::from(!sorted_lms.is_empty());

    if (name_count as usize) < lms_positions.len() {
        // Names collide: solve the reduced problem to rank the LMS suffixes
        let reduced: Vec<u64> = lms_positions
            .iter()
            .map(|&position| name_of_position[position])
            .collect();
        let reduced_sa = build_suffix_array(&ReducedText {
            names: &reduced,
            alphabet_size: name_count,
        });
        sorted_lms = reduced_sa
            .iter()
            .map(|&rank| lms_positions[rank as usize])
            .collect();
    }

    // Final pass: place the now fully sorted LMS suffixes and induce the rest
    sa.iter_mut().for_each(|slot| *slot = EMPTY);
    {
        let mut tails = bucket_tails(text);
        for &position in sorted_lms.iter().rev() {
            let symbol = text.symbol_at(position) as usize;
            tails[symbol] -= 1;
            sa[tails[symbol] as usize] = position as u64;
        }
    }
    induce(text, &types, &mut sa);

    sa
}

/// S-type flags per position. Position `n - 1` is L-type because every
/// non-empty suffix compares greater than the virtual sentinel.
fn classify_types<T>(text: &T) -> Vec<bool>
where
    T: TextSequence,
{
    let n = text.len();
    let mut is_s_type = vec![false; n];
    for i in (0..n - 1).rev() {
        is_s_type[i] = match text.symbol_at(i).cmp(&text.symbol_at(i + 1)) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => is_s_type[i + 1],
        };
    }
    is_s_type
}

fn is_lms(is_s_type: &[bool], position: usize) -> bool {
    position > 0 && is_s_type[position] && !is_s_type[position - 1]
}

fn bucket_sizes<T>(text: &T) -> Vec<u64>
where
    T: TextSequence,
{
    let mut sizes = vec![0_u64; text.alphabet_size() as usize];
    for i in 0..text.len() {
        sizes[text.symbol_at(i) as usize] += 1;
    }
    sizes
}

fn bucket_heads<T>(text: &T) -> Vec<u64>
where
    T: TextSequence,
{
    let mut offset = 0;
    bucket_sizes(text)
        .into_iter()
        .map(|size| {
            let head = offset;
            offset += size;
            head
        })
        .collect()
}

fn bucket_tails<T>(text: &T) -> Vec<u64>
where
    T: TextSequence,
{
    let mut offset = 0;
    bucket_sizes(text)
        .into_iter()
        .map(|size| {
            offset += size;
            offset
        })
        .collect()
}

/// Induces L-type suffixes left-to-right from bucket heads, then S-type
/// suffixes right-to-left from bucket tails. The scan directions and the
/// initial step for the suffix preceding the virtual sentinel are what make
/// the sort correct; changing either silently breaks the ordering.
fn induce<T>(text: &T, is_s_type: &[bool], sa: &mut [u64])
where
    T: TextSequence,
{
    let n = text.len();

    let mut heads = bucket_heads(text);
    // The virtual sentinel's predecessor is induced first
    {
        let symbol = text.symbol_at(n - 1) as usize;
        sa[heads[symbol] as usize] = (n - 1) as u64;
        heads[symbol] += 1;
    }
    for i in 0..n {
        let entry = sa[i];
        if entry != EMPTY && entry > 0 {
            let j = (entry - 1) as usize;
            if !is_s_type[j] {
                let symbol = text.symbol_at(j) as usize;
                sa[heads[symbol] as usize] = j as u64;
                heads[symbol] += 1;
            }
        }
    }

    let mut tails = bucket_tails(text);
    for i in (0..n).rev() {
        let entry = sa[i];
        if entry != EMPTY && entry > 0 {
            let j = (entry - 1) as usize;
            if is_s_type[j] {
                let symbol = text.symbol_at(j) as usize;
                tails[symbol] -= 1;
                sa[tails[symbol] as usize] = j as u64;
            }
        }
    }
}

/// Compares the LMS substrings starting at `a` and `b`. A substring running
/// into the virtual sentinel is unique by construction.
fn lms_substrings_equal<T>(text: &T, is_s_type: &[bool], a: usize, b: usize) -> bool
where
    T: TextSequence,
{
    let n = text.len();
    let mut depth = 0;
    loop {
        let (pa, pb) = (a + depth, b + depth);
        if pa >= n || pb >= n {
            return false;
        }
        if text.symbol_at(pa) != text.symbol_at(pb) {
            return false;
        }
        if depth > 0 {
            let end_a = is_lms(is_s_type, pa);
            let end_b = is_lms(is_s_type, pb);
            if end_a && end_b {
                return true;
            }
            if end_a != end_b {
                return false;
            }
        }
        depth += 1;
    }
}

/// Suffix-array storage tiers. The tier is a storage-width concern chosen by
/// text length, not a semantic one: `U32` covers everything a 32-bit offset
/// can address, `Packed40` stretches to 2^35 entries.
#[derive(Serialize, Deserialize)]
pub enum SuffixArrayStorage {
    U32(Vec<u32>),
    Packed40(PackedArray),
}

impl SuffixArrayStorage {
    pub fn from_values(values: &[u64], text_len: u64) -> Result<Self> {
        if text_len <= u64::from(u32::MAX) {
            Ok(Self::U32(values.iter().map(|&value| value as u32).collect()))
        } else if text_len <= MAX_SEQUENCE_LENGTH {
            let mut packed = PackedArray::with_capacity(values.len() as u64);
            for &value in values {
                packed.push(value);
            }
            Ok(Self::Packed40(packed))
        } else {
            Err(Error::CapacityExceeded {
                length: text_len,
                maximum: MAX_SEQUENCE_LENGTH,
            })
        }
    }

    pub fn get(&self, index: u64) -> u64 {
        match self {
            Self::U32(values) => u64::from(values[index as usize]),
            Self::Packed40(packed) => packed.get(index),
        }
    }

    pub fn len(&self) -> u64 {
        match self {
            Self::U32(values) => values.len() as u64,
            Self::Packed40(packed) => packed.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).map(|index| self.get(index))
    }
}

const PACKED_ENTRY_BITS: u64 = 40;

/// 40-bit entries packed back to back across 64-bit words
#[derive(Serialize, Deserialize)]
pub struct PackedArray {
    len: u64,
    words: Vec<u64>,
}

impl PackedArray {
    pub fn with_capacity(entries: u64) -> Self {
        Self {
            len: 0,
            words: Vec::with_capacity((entries * PACKED_ENTRY_BITS).div_ceil(64) as usize),
        }
    }

    pub fn push(&mut self, value: u64) {
        debug_assert!(value < 1 << PACKED_ENTRY_BITS);
        let bit_offset = self.len * PACKED_ENTRY_BITS;
        let word = (bit_offset / 64) as usize;
        let shift = bit_offset % 64;
        if word == self.words.len() {
            self.words.push(0);
        }
        self.words[word] |= value << shift;
        if shift + PACKED_ENTRY_BITS > 64 {
            self.words.push(value >> (64 - shift));
        }
        self.len += 1;
    }

    pub fn get(&self, index: u64) -> u64 {
        assert!(index < self.len, "index {index} out of bounds");
        let bit_offset = index * PACKED_ENTRY_BITS;
        let word = (bit_offset / 64) as usize;
        let shift = bit_offset % 64;
        let mut value = self.words[word] >> shift;
        if shift + PACKED_ENTRY_BITS > 64 {
            value |= self.words[word + 1] << (64 - shift);
        }
        value & ((1 << PACKED_ENTRY_BITS) - 1)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Sampled suffix array: the ranks whose suffix-array value is a multiple of
/// the sampling rate, plus direct entries for the rows whose BWT symbol is a
/// sentinel (following a suffix link across a sentinel is ambiguous).
/// Unsampled entries are materialized by walking suffix links.
#[derive(Serialize, Deserialize)]
pub struct SparseSuffixArray {
    sampling_rate: u32,
    sampled_ranks: SuffixArrayStorage,
    sampled_values: SuffixArrayStorage,
    extra_rows: BTreeMap<u64, u64>,
    len: u64,
}

impl SparseSuffixArray {
    /// Samples the full suffix array at every value that is a multiple of
    /// `sampling_rate`. `sentinel_ranks` are the rows whose BWT symbol is a
    /// sentinel; their values are kept verbatim.
    pub fn sample(
        suffix_array: &[u64],
        sentinel_ranks: [u64; 2],
        sampling_rate: u32,
    ) -> Result<Self> {
        debug!("Sample suffix array at rate {sampling_rate}");
        let text_len = suffix_array.len() as u64;
        let mut ranks = Vec::new();
        let mut values = Vec::new();
        let mut extra_rows = BTreeMap::new();
        for (rank, &value) in suffix_array.iter().enumerate() {
            if value % u64::from(sampling_rate) == 0 {
                ranks.push(rank as u64);
                values.push(value);
            } else if sentinel_ranks.contains(&(rank as u64)) {
                extra_rows.insert(rank as u64, value);
            }
        }
        Ok(Self {
            sampling_rate,
            sampled_ranks: SuffixArrayStorage::from_values(&ranks, text_len)?,
            sampled_values: SuffixArrayStorage::from_values(&values, text_len)?,
            extra_rows,
            len: text_len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Materializes the suffix-array value at `rank` by following suffix
    /// links until a sampled row is reached. The chain is bounded by the
    /// sampling rate; a longer chain means the index is corrupt.
    pub fn get(&self, rank: u64, fm_index: &FmIndex) -> Result<u64> {
        if rank >= self.len {
            return Err(Error::InvalidIndex(format!(
                "Suffix array rank {rank} out of bounds ({})",
                self.len
            )));
        }
        let mut position = rank;
        for steps in 0..=u64::from(self.sampling_rate) {
            if let Some(index) = binary_search(&self.sampled_ranks, position) {
                return Ok(self.sampled_values.get(index) + steps);
            }
            if let Some(&value) = self.extra_rows.get(&position) {
                return Ok(value + steps);
            }
            position = fm_index.suffix_link(position);
        }
        Err(Error::InvalidIndex(format!(
            "Suffix-link chain from rank {rank} did not reach a sampled row within {} steps",
            self.sampling_rate
        )))
    }
}

fn binary_search(storage: &SuffixArrayStorage, target: u64) -> Option<u64> {
    let mut low = 0;
    let mut high = storage.len();
    while low < high {
        let mid = (low + high) / 2;
        match storage.get(mid).cmp(&target) {
            std::cmp::Ordering::Equal => return Some(mid),
            std::cmp::Ordering::Less => low = mid + 1,
            std::cmp::Ordering::Greater => high = mid,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_suffix_array(text: &[u8]) -> Vec<u64> {
        let mut sa: Vec<u64> = (0..text.len() as u64).collect();
        sa.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
        sa
    }

    fn ranked(text: &[u8]) -> (Vec<u8>, u64) {
        let alphabet_size = u64::from(*text.iter().max().unwrap()) + 1;
        (text.to_vec(), alphabet_size)
    }

    #[test]
    fn test_sa_is_classic_fixture() {
        // The induced-sorting textbook example; no sentinel in the data,
        // ties are broken by the virtual-sentinel convention
        let text = b"mmiissiissiippii";
        let (symbols, alphabet_size) = ranked(text);
        let sa = build_suffix_array(&RankedText::new(&symbols, alphabet_size));
        assert_eq!(sa, naive_suffix_array(text));
    }

    #[test]
    fn test_sa_is_with_repeated_sentinels() {
        // Same shape as the indexed text: two strands joined by equal
        // rank-zero sentinels
        let text = [2, 1, 3, 4, 0, 4, 3, 1, 2, 0];
        let sa = build_suffix_array(&RankedText::new(&text, 5));
        assert_eq!(sa, naive_suffix_array(&text));
    }

    #[test]
    fn test_sa_is_trivial_inputs() {
        assert_eq!(
            build_suffix_array(&RankedText::new(&[], 1)),
            Vec::<u64>::new()
        );
        assert_eq!(build_suffix_array(&RankedText::new(&[3], 4)), vec![0]);
        assert_eq!(build_suffix_array(&RankedText::new(&[1, 1], 2)), vec![1, 0]);
    }

    #[test]
    fn test_sa_is_low_complexity() {
        // Runs of equal symbols exercise the recursion on non-unique names
        let text = b"aaaabaaaabaaaab";
        let (symbols, alphabet_size) = ranked(text);
        let sa = build_suffix_array(&RankedText::new(&symbols, alphabet_size));
        assert_eq!(sa, naive_suffix_array(text));
    }

    #[test]
    fn test_sa_is_adjacent_suffix_order() {
        let text: Vec<u8> = (0..257).map(|i: u32| ((i * 31 + 7) % 5) as u8 + 1).collect();
        let sa = build_suffix_array(&RankedText::new(&text, 6));
        assert_eq!(sa.len(), text.len());
        for window in sa.windows(2) {
            assert!(
                text[window[0] as usize..] < text[window[1] as usize..],
                "suffixes {} and {} out of order",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn test_packed_array_roundtrip() {
        let values = [0, 1, (1 << 40) - 1, 42, 1 << 39, 7, (1 << 40) - 2];
        let mut packed = PackedArray::with_capacity(values.len() as u64);
        for &value in &values {
            packed.push(value);
        }
        assert_eq!(packed.len(), values.len() as u64);
        for (i, &value) in values.iter().enumerate() {
            assert_eq!(packed.get(i as u64), value, "entry {i}");
        }
    }

    #[test]
    fn test_storage_tier_selection() {
        let values = [3, 1, 2, 0];
        assert!(matches!(
            SuffixArrayStorage::from_values(&values, 4).unwrap(),
            SuffixArrayStorage::U32(_)
        ));
        assert!(matches!(
            SuffixArrayStorage::from_values(&values, 1 << 33).unwrap(),
            SuffixArrayStorage::Packed40(_)
        ));
        assert!(SuffixArrayStorage::from_values(&values, 1 << 36).is_err());
    }
}
