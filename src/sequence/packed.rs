use serde::{Deserialize, Serialize};

use crate::{
    errors::{Error, Result},
    sequence::Base,
};

/// Largest sequence length representable by the widest suffix-array storage tier
pub const MAX_SEQUENCE_LENGTH: u64 = 1 << 35;

const LANES_PER_CODE_WORD: u64 = 32;
const FLAGS_PER_WORD: u64 = 64;
/// Every second bit set; one bit per 2-bit code lane
const EVEN_LANES: u64 = 0x5555_5555_5555_5555;

/// Bit-packed DNA sequence over `{A, C, G, T, N}`.
///
/// Three bits per base, split over two word planes: `code_words` holds 2-bit
/// base codes (32 lanes per `u64`), `n_words` holds one ambiguity flag per
/// base (64 per `u64`). Lanes carrying an `N` keep code `00` so that equal
/// sequences are bit-identical, which the on-disk index format relies on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedSequence {
    len: u64,
    code_words: Vec<u64>,
    n_words: Vec<u64>,
}

impl PackedSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bases: u64) -> Self {
        Self {
            len: 0,
            code_words: Vec::with_capacity(bases.div_ceil(LANES_PER_CODE_WORD) as usize),
            n_words: Vec::with_capacity(bases.div_ceil(FLAGS_PER_WORD) as usize),
        }
    }

    /// Encodes an ASCII base string. Symbols outside `{A, C, G, T, N}`
    /// (case-insensitive) are rejected.
    pub fn try_from_ascii(sequence: &[u8]) -> Result<Self> {
        if sequence.len() as u64 > MAX_SEQUENCE_LENGTH {
            return Err(Error::CapacityExceeded {
                length: sequence.len() as u64,
                maximum: MAX_SEQUENCE_LENGTH,
            });
        }
        let mut packed = Self::with_capacity(sequence.len() as u64);
        for (i, &symbol) in sequence.iter().enumerate() {
            let base = Base::from_ascii(symbol).ok_or_else(|| {
                Error::Parse(format!(
                    "Invalid symbol '{}' at position {i}",
                    symbol.escape_ascii()
                ))
            })?;
            packed.push(base);
        }
        Ok(packed)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: u64) -> Base {
        assert!(
            index < self.len,
            "position {index} out of bounds (length {})",
            self.len
        );
        if self.n_flag(index) {
            return Base::N;
        }
        let word = self.code_words[(index / LANES_PER_CODE_WORD) as usize];
        Base::from_code(((word >> (2 * (index % LANES_PER_CODE_WORD))) & 0b11) as u8)
    }

    pub fn set(&mut self, index: u64, base: Base) {
        assert!(
            index < self.len,
            "position {index} out of bounds (length {})",
            self.len
        );
        let code_word = &mut self.code_words[(index / LANES_PER_CODE_WORD) as usize];
        let lane_shift = 2 * (index % LANES_PER_CODE_WORD);
        *code_word &= !(0b11 << lane_shift);
        let flag_word = &mut self.n_words[(index / FLAGS_PER_WORD) as usize];
        let flag_bit = 1 << (index % FLAGS_PER_WORD);
        if base == Base::N {
            *flag_word |= flag_bit;
        } else {
            *flag_word &= !flag_bit;
            *code_word |= u64::from(base.code()) << lane_shift;
        }
    }

    pub fn push(&mut self, base: Base) {
        assert!(
            self.len < MAX_SEQUENCE_LENGTH,
            "sequence length limit of {MAX_SEQUENCE_LENGTH} bases reached"
        );
        if self.len % LANES_PER_CODE_WORD == 0 {
            self.code_words.push(0);
        }
        if self.len % FLAGS_PER_WORD == 0 {
            self.n_words.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, base);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Base> + '_ {
        (0..self.len).map(|i| self.get(i))
    }

    pub fn to_ascii(&self) -> Vec<u8> {
        self.iter().map(Base::to_ascii).collect()
    }

    fn n_flag(&self, index: u64) -> bool {
        (self.n_words[(index / FLAGS_PER_WORD) as usize] >> (index % FLAGS_PER_WORD)) & 1 == 1
    }

    /// The 32 ambiguity flags covering the lanes of code word `word_index`,
    /// packed into the low bits of the return value
    fn n_flags_for_code_word(&self, word_index: usize) -> u32 {
        let flags = self
            .n_words
            .get(word_index / 2)
            .copied()
            .unwrap_or_default();
        (flags >> (32 * (word_index % 2) as u64)) as u32
    }

    /// Exact number of occurrences of `base` within `[start, end)`.
    ///
    /// A/C/G/T are counted by comparing 2-bit code lanes word-at-a-time with
    /// a masked popcount; lanes flagged as `N` never contribute. Boundary
    /// words are masked down to the overlapping lanes.
    pub fn count_range(&self, base: Base, start: u64, end: u64) -> u64 {
        assert!(
            start <= end && end <= self.len,
            "invalid range [{start}, {end}) for length {}",
            self.len
        );
        if start == end {
            return 0;
        }
        if base == Base::N {
            return self.count_flags(start, end);
        }

        let pattern = u64::from(base.code()) * EVEN_LANES;
        let first_word = (start / LANES_PER_CODE_WORD) as usize;
        let last_word = ((end - 1) / LANES_PER_CODE_WORD) as usize;
        let mut count = 0;
        for word_index in first_word..=last_word {
            let word_base = word_index as u64 * LANES_PER_CODE_WORD;
            let from_lane = start.saturating_sub(word_base).min(LANES_PER_CODE_WORD);
            let to_lane = (end - word_base).min(LANES_PER_CODE_WORD);

            let diff = self.code_words[word_index] ^ pattern;
            let matching_lanes = !(diff | (diff >> 1)) & EVEN_LANES;
            let valid = matching_lanes
                & !spread_to_even_bits(self.n_flags_for_code_word(word_index))
                & even_lane_mask(from_lane, to_lane);
            count += u64::from(valid.count_ones());
        }
        count
    }

    fn count_flags(&self, start: u64, end: u64) -> u64 {
        let first_word = (start / FLAGS_PER_WORD) as usize;
        let last_word = ((end - 1) / FLAGS_PER_WORD) as usize;
        let mut count = 0;
        for word_index in first_word..=last_word {
            let word_base = word_index as u64 * FLAGS_PER_WORD;
            let from = start.saturating_sub(word_base).min(FLAGS_PER_WORD);
            let to = (end - word_base).min(FLAGS_PER_WORD);
            let masked = self.n_words[word_index] & bit_mask(from, to);
            count += u64::from(masked.count_ones());
        }
        count
    }

    /// Extracts `[start, end)` into a fresh sequence.
    ///
    /// Both bit planes are copied with word-level shifts, so the result is
    /// identical regardless of how `start` is aligned within a word.
    pub fn subsequence(&self, start: u64, end: u64) -> Self {
        assert!(
            start <= end && end <= self.len,
            "invalid range [{start}, {end}) for length {}",
            self.len
        );
        let len = end - start;
        let mut code_words = shifted_copy(&self.code_words, start * 2, len * 2);
        let mut n_words = shifted_copy(&self.n_words, start, len);
        clear_tail(&mut code_words, len * 2);
        clear_tail(&mut n_words, len);
        let mut subsequence = Self {
            len,
            code_words,
            n_words,
        };
        subsequence.clear_codes_under_flags();
        subsequence
    }

    /// Flips every 2-bit code (`A <-> T`, `C <-> G`), keeping `N` flags and
    /// base order
    pub fn complement(&self) -> Self {
        let mut complemented = self.clone();
        for word in &mut complemented.code_words {
            *word = !*word;
        }
        clear_tail(&mut complemented.code_words, self.len * 2);
        complemented.clear_codes_under_flags();
        complemented
    }

    pub fn reverse(&self) -> Self {
        let mut reversed = Self::with_capacity(self.len);
        for i in (0..self.len).rev() {
            reversed.push(self.get(i));
        }
        reversed
    }

    pub fn reverse_complement(&self) -> Self {
        let mut reversed = Self::with_capacity(self.len);
        for i in (0..self.len).rev() {
            reversed.push(self.get(i).complement());
        }
        reversed
    }

    /// Re-establishes the `N` lanes' canonical `00` code after whole-word
    /// operations
    fn clear_codes_under_flags(&mut self) {
        for word_index in 0..self.code_words.len() {
            let flags = self.n_flags_for_code_word(word_index);
            if flags != 0 {
                let both_bits = spread_to_even_bits(flags) * 0b11;
                self.code_words[word_index] &= !both_bits;
            }
        }
    }
}

/// Mask covering bits `[from, to)` of a word; `to <= 64`
fn bit_mask(from: u64, to: u64) -> u64 {
    debug_assert!(from <= to && to <= 64);
    if from == to {
        return 0;
    }
    (!0 >> (64 - (to - from))) << from
}

/// Even-bit mask covering 2-bit lanes `[from, to)` of a code word; `to <= 32`
fn even_lane_mask(from: u64, to: u64) -> u64 {
    debug_assert!(from <= to && to <= 32);
    if from == to {
        return 0;
    }
    (EVEN_LANES >> (64 - 2 * (to - from))) << (2 * from)
}

/// Interleaves the 32 input bits into the even bit positions of a word
fn spread_to_even_bits(bits: u32) -> u64 {
    let mut spread = u64::from(bits);
    spread = (spread | (spread << 16)) & 0x0000_FFFF_0000_FFFF;
    spread = (spread | (spread << 8)) & 0x00FF_00FF_00FF_00FF;
    spread = (spread | (spread << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    spread = (spread | (spread << 2)) & 0x3333_3333_3333_3333;
    (spread | (spread << 1)) & EVEN_LANES
}

/// Copies `num_bits` bits starting at `bit_offset` into freshly allocated
/// words, realigning across word boundaries
fn shifted_copy(words: &[u64], bit_offset: u64, num_bits: u64) -> Vec<u64> {
    let out_len = num_bits.div_ceil(64) as usize;
    let shift = bit_offset % 64;
    let first = (bit_offset / 64) as usize;
    (0..out_len)
        .map(|i| {
            let low = words.get(first + i).copied().unwrap_or_default();
            if shift == 0 {
                low
            } else {
                let high = words.get(first + i + 1).copied().unwrap_or_default();
                (low >> shift) | (high << (64 - shift))
            }
        })
        .collect()
}

/// Zeroes the bits at and beyond `num_bits` in the final word
fn clear_tail(words: &mut [u64], num_bits: u64) {
    let tail = num_bits % 64;
    if tail != 0 {
        if let Some(last) = words.last_mut() {
            *last &= !0 >> (64 - tail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Vec<u8>, PackedSequence) {
        // Long enough to cross both the 32-lane and the 64-flag word boundary
        let ascii: Vec<u8> = (0..150)
            .map(|i| match i % 7 {
                0 => b'A',
                1 => b'C',
                2 => b'G',
                3 => b'T',
                4 => b'N',
                5 => b'T',
                _ => b'G',
            })
            .collect();
        let packed = PackedSequence::try_from_ascii(&ascii).unwrap();
        (ascii, packed)
    }

    #[test]
    fn test_roundtrip() {
        let (ascii, packed) = fixture();
        assert_eq!(packed.len(), ascii.len() as u64);
        assert_eq!(packed.to_ascii(), ascii);
    }

    #[test]
    fn test_rejects_invalid_symbols() {
        assert!(PackedSequence::try_from_ascii(b"ACGU").is_err());
        assert!(PackedSequence::try_from_ascii(b"AC-T").is_err());
    }

    #[test]
    fn test_set_replaces_flags() {
        let mut packed = PackedSequence::try_from_ascii(b"ANT").unwrap();
        packed.set(1, Base::C);
        assert_eq!(packed.to_ascii(), b"ACT");
        packed.set(0, Base::N);
        assert_eq!(packed.to_ascii(), b"NCT");
        // The N lane keeps a zero code, so re-encoding is bit-identical
        assert_eq!(packed, PackedSequence::try_from_ascii(b"NCT").unwrap());
    }

    #[test]
    fn test_count_range_matches_naive() {
        let (ascii, packed) = fixture();
        for &(start, end) in &[(0, 150), (0, 1), (31, 33), (63, 65), (17, 139), (64, 128)] {
            for base in [Base::A, Base::C, Base::G, Base::T, Base::N] {
                let naive = ascii[start as usize..end as usize]
                    .iter()
                    .filter(|&&c| c == base.to_ascii())
                    .count() as u64;
                assert_eq!(
                    packed.count_range(base, start, end),
                    naive,
                    "base {base:?} in [{start}, {end})"
                );
            }
        }
    }

    #[test]
    fn test_subsequence_any_alignment() {
        let (ascii, packed) = fixture();
        for start in [0, 1, 31, 32, 33, 63, 64, 65, 97] {
            let end = (start + 41).min(ascii.len());
            let sub = packed.subsequence(start as u64, end as u64);
            assert_eq!(sub.to_ascii(), &ascii[start..end]);
            // Bit-identical to a fresh encoding of the same bases
            assert_eq!(sub, PackedSequence::try_from_ascii(&ascii[start..end]).unwrap());
        }
    }

    #[test]
    fn test_complement_involution() {
        let (_, packed) = fixture();
        assert_eq!(packed.complement().complement(), packed);
        assert_eq!(packed.reverse().reverse(), packed);
        assert_eq!(
            packed.reverse_complement().reverse_complement(),
            packed
        );
    }

    #[test]
    fn test_complement_flips_codes() {
        let packed = PackedSequence::try_from_ascii(b"ACGTN").unwrap();
        assert_eq!(packed.complement().to_ascii(), b"TGCAN");
        assert_eq!(packed.reverse_complement().to_ascii(), b"NACGT");
    }

    #[test]
    fn test_serde_roundtrip() {
        let (_, packed) = fixture();
        let bytes = bincode::serialize(&packed).unwrap();
        let restored: PackedSequence = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, packed);
        assert_eq!(restored.len(), packed.len());
    }

    #[test]
    fn test_empty() {
        let packed = PackedSequence::new();
        assert!(packed.is_empty());
        assert_eq!(packed.count_range(Base::A, 0, 0), 0);
        assert_eq!(packed.subsequence(0, 0).len(), 0);
    }
}
