use serde::{Deserialize, Serialize};

use crate::{
    index::{fm_index::Bwt, rank_to_base, ALPHABET_SIZE, SENTINEL_RANK},
    sequence::Base,
};

/// Texts longer than this are indexed with the wavelet tree, which answers
/// rank and symbol queries without touching the packed BWT planes. Shorter
/// texts use the checkpointed table with popcount residuals.
pub const WAVELET_THRESHOLD: u64 = u32::MAX as u64;

/// Default spacing of occurrence checkpoints
pub const OCC_SAMPLING_RATE: u32 = 128;

/// Rank structure over the BWT: `rank(c, i)` is the number of occurrences of
/// the rank symbol `c` in `BWT[0..i)`
pub trait OccurrenceIndex {
    fn rank(&self, bwt: &Bwt, symbol: u8, index: u64) -> u64;
}

/// Used to allow static dispatch. No trait objects needed! Method call speed is not negatively
/// affected by vtable lookups. Every type implementing `OccurrenceIndex` also has to be
/// added as variant to this enum.
#[derive(Serialize, Deserialize)]
pub enum OccurrenceBackend {
    Block(BlockOccurrenceTable),
    Wavelet(WaveletTree),
}

impl From<BlockOccurrenceTable> for OccurrenceBackend {
    fn from(value: BlockOccurrenceTable) -> Self {
        Self::Block(value)
    }
}

impl From<WaveletTree> for OccurrenceBackend {
    fn from(value: WaveletTree) -> Self {
        Self::Wavelet(value)
    }
}

impl OccurrenceIndex for OccurrenceBackend {
    fn rank(&self, bwt: &Bwt, symbol: u8, index: u64) -> u64 {
        match self {
            Self::Block(occ) => occ.rank(bwt, symbol, index),
            Self::Wavelet(occ) => occ.rank(bwt, symbol, index),
        }
    }
}

impl OccurrenceBackend {
    /// Builds the backend appropriate for the text size
    pub fn new(bwt: &Bwt) -> Self {
        if bwt.len() > WAVELET_THRESHOLD {
            WaveletTree::new(bwt).into()
        } else {
            BlockOccurrenceTable::new(bwt, OCC_SAMPLING_RATE).into()
        }
    }
}

/// Cumulative symbol counts at every `sampling_rate`-th position; queries
/// finish the residual with a masked popcount over the packed BWT planes
#[derive(Serialize, Deserialize)]
pub struct BlockOccurrenceTable {
    sampling_rate: u32,
    // Counts of A, C, G, T, N before each checkpoint; the sentinel class is
    // answered from the two cached sentinel rows instead
    checkpoints: Vec<[u64; 5]>,
}

impl OccurrenceIndex for BlockOccurrenceTable {
    fn rank(&self, bwt: &Bwt, symbol: u8, index: u64) -> u64 {
        debug_assert!(index <= bwt.len());
        if symbol == SENTINEL_RANK {
            return bwt.sentinels_before(index);
        }
        let block = index / u64::from(self.sampling_rate);
        let block_start = block * u64::from(self.sampling_rate);
        let base = rank_to_base(symbol);
        let mut count = self.checkpoints[block as usize][usize::from(symbol - 1)]
            + bwt.sequence().count_range(base, block_start, index);
        // Sentinel rows are packed with code `A` and must not count as `A`
        if base == Base::A {
            count -= bwt.sentinels_before(index) - bwt.sentinels_before(block_start);
        }
        count
    }
}

impl BlockOccurrenceTable {
    pub fn new(bwt: &Bwt, sampling_rate: u32) -> Self {
        let mut checkpoints =
            Vec::with_capacity((bwt.len() / u64::from(sampling_rate) + 1) as usize);
        let mut counts = [0_u64; 5];
        for position in 0..bwt.len() {
            if position % u64::from(sampling_rate) == 0 {
                checkpoints.push(counts);
            }
            let symbol = bwt.symbol_at(position);
            if symbol != SENTINEL_RANK {
                counts[usize::from(symbol - 1)] += 1;
            }
        }
        checkpoints.push(counts);
        Self {
            sampling_rate,
            checkpoints,
        }
    }
}

const WAVELET_LEVELS: usize = 3;

/// Balanced wavelet encoding of the BWT over the six-symbol rank alphabet:
/// one rank-indexed bit-vector per bit of the symbol, most significant bit
/// first, with zeros stably partitioned before ones between levels
#[derive(Serialize, Deserialize)]
pub struct WaveletTree {
    levels: Vec<RankBitVector>,
    zeros: [u64; WAVELET_LEVELS],
    len: u64,
}

impl OccurrenceIndex for WaveletTree {
    fn rank(&self, _bwt: &Bwt, symbol: u8, index: u64) -> u64 {
        debug_assert!(u64::from(symbol) < ALPHABET_SIZE);
        let mut begin = 0;
        let mut position = index;
        for (level, bits) in self.levels.iter().enumerate() {
            if (symbol >> (WAVELET_LEVELS - 1 - level)) & 1 == 0 {
                begin = bits.rank_zeros(begin);
                position = bits.rank_zeros(position);
            } else {
                begin = self.zeros[level] + bits.rank_ones(begin);
                position = self.zeros[level] + bits.rank_ones(position);
            }
        }
        position - begin
    }
}

impl WaveletTree {
    pub fn new(bwt: &Bwt) -> Self {
        let symbols: Vec<u8> = (0..bwt.len()).map(|i| bwt.symbol_at(i)).collect();
        Self::from_symbols(&symbols)
    }

    pub fn from_symbols(symbols: &[u8]) -> Self {
        let len = symbols.len() as u64;
        let mut levels = Vec::with_capacity(WAVELET_LEVELS);
        let mut zeros = [0; WAVELET_LEVELS];
        let mut current = symbols.to_vec();
        for level in 0..WAVELET_LEVELS {
            let bits = RankBitVector::from_bits(
                current
                    .iter()
                    .map(|&symbol| (symbol >> (WAVELET_LEVELS - 1 - level)) & 1 == 1),
            );
            // Stable partition: zero-bit symbols keep their order in front
            let mut next = Vec::with_capacity(current.len());
            next.extend(
                current
                    .iter()
                    .filter(|&&symbol| (symbol >> (WAVELET_LEVELS - 1 - level)) & 1 == 0),
            );
            zeros[level] = next.len() as u64;
            next.extend(
                current
                    .iter()
                    .filter(|&&symbol| (symbol >> (WAVELET_LEVELS - 1 - level)) & 1 == 1),
            );
            levels.push(bits);
            current = next;
        }
        Self { levels, zeros, len }
    }

    /// Reads the symbol at `position` by walking the levels forward
    pub fn symbol_at(&self, position: u64) -> u8 {
        assert!(position < self.len, "position {position} out of bounds");
        let mut symbol = 0;
        let mut position = position;
        for (level, bits) in self.levels.iter().enumerate() {
            if bits.get(position) {
                symbol = (symbol << 1) | 1;
                position = self.zeros[level] + bits.rank_ones(position);
            } else {
                symbol <<= 1;
                position = bits.rank_zeros(position);
            }
        }
        symbol
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Words per rank sample
const RANK_SAMPLE_WORDS: u64 = 8;

/// Plain bit-vector with sampled prefix popcounts every eight words
#[derive(Serialize, Deserialize)]
pub struct RankBitVector {
    len: u64,
    words: Vec<u64>,
    samples: Vec<u64>,
}

impl RankBitVector {
    pub fn from_bits<I>(bits: I) -> Self
    where
        I: Iterator<Item = bool>,
    {
        let mut len = 0;
        let mut words: Vec<u64> = Vec::new();
        for bit in bits {
            if len % 64 == 0 {
                words.push(0);
            }
            if bit {
                *words.last_mut().expect("word was just pushed") |= 1 << (len % 64);
            }
            len += 1;
        }
        let mut samples = Vec::with_capacity(words.len() / RANK_SAMPLE_WORDS as usize + 1);
        let mut ones = 0;
        for (i, word) in words.iter().enumerate() {
            if i as u64 % RANK_SAMPLE_WORDS == 0 {
                samples.push(ones);
            }
            ones += u64::from(word.count_ones());
        }
        Self {
            len,
            words,
            samples,
        }
    }

    pub fn get(&self, index: u64) -> bool {
        assert!(index < self.len, "bit {index} out of bounds");
        (self.words[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    /// Number of set bits in `[0, index)`
    pub fn rank_ones(&self, index: u64) -> u64 {
        debug_assert!(index <= self.len);
        if index == 0 {
            return 0;
        }
        let word_index = index / 64;
        let sample_index = word_index / RANK_SAMPLE_WORDS;
        let mut ones = self.samples[sample_index as usize];
        for word in &self.words[(sample_index * RANK_SAMPLE_WORDS) as usize..word_index as usize] {
            ones += u64::from(word.count_ones());
        }
        let tail = index % 64;
        if tail != 0 {
            let masked = self.words[word_index as usize] & (!0 >> (64 - tail));
            ones += u64::from(masked.count_ones());
        }
        ones
    }

    pub fn rank_zeros(&self, index: u64) -> u64 {
        index - self.rank_ones(index)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
