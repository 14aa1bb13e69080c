pub mod fm_index;
pub mod indexing;
pub mod occurrence;
pub mod suffix_array;

mod versioned;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    index::{fm_index::FmIndex, suffix_array::SparseSuffixArray, versioned::VersionedItem},
    sequence::{Base, PackedSequence},
};

/// Rank alphabet of the indexed text: `$`, `A`, `C`, `G`, `T`, `N`
pub const ALPHABET_SIZE: u64 = 6;
pub const SENTINEL_RANK: u8 = 0;

/// Default sampling rate of the sparse suffix array
pub const SA_SAMPLING_RATE: u32 = 32;

pub const REF_FILE_SUFFIX: &str = ".bfp";
pub const SUFFIX_ARRAY_FILE_SUFFIX: &str = ".bfs";
pub const BWT_FILE_SUFFIX: &str = ".bfb";
pub const OCC_FILE_SUFFIX: &str = ".bfo";
pub const BOUNDARIES_FILE_SUFFIX: &str = ".bfn";

pub fn base_to_rank(base: Base) -> u8 {
    match base {
        Base::A => 1,
        Base::C => 2,
        Base::G => 3,
        Base::T => 4,
        Base::N => 5,
    }
}

pub fn rank_to_base(rank: u8) -> Base {
    match rank {
        1 => Base::A,
        2 => Base::C,
        3 => Base::G,
        4 => Base::T,
        5 => Base::N,
        _ => unreachable!("rank {rank} does not denote a base"),
    }
}

pub fn complement_rank(rank: u8) -> u8 {
    match rank {
        1 => 4,
        2 => 3,
        3 => 2,
        4 => 1,
        other => other,
    }
}

/// For multi-identifier reference sequences like the human genome (that is split by chromosome)
/// this struct is used to keep a map of IDs and positions
#[derive(Serialize, Deserialize, Debug)]
pub struct SequenceBoundary {
    pub start: u64,
    pub end: u64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SequenceBoundaries {
    boundaries: Vec<SequenceBoundary>,
}

impl SequenceBoundaries {
    pub fn new(boundaries: Vec<SequenceBoundary>) -> Self {
        Self { boundaries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SequenceBoundary> {
        self.boundaries.iter()
    }

    /// Translates a concatenated-text offset into (target ID, relative
    /// position, contig name). Alignments that straddle a contig boundary
    /// yield `None`.
    pub fn translate(&self, position: u64, aligned_length: u64) -> Option<(u32, u64, &str)> {
        self.boundaries
            .iter()
            .enumerate()
            .find(|(_, boundary)| {
                boundary.start <= position
                    && position + aligned_length.max(1) - 1 <= boundary.end
            })
            .and_then(|(index, boundary)| {
                Some((
                    u32::try_from(index).ok()?,
                    position - boundary.start,
                    boundary.name.as_str(),
                ))
            })
    }
}

pub fn load_index_from_path(reference_path: &str) -> Result<FmIndex> {
    debug!("Load BWT");
    let bwt = VersionedItem::read_from_path(format!("{reference_path}{BWT_FILE_SUFFIX}"))?
        .try_take()?;

    debug!("Load occurrence table");
    let occ = VersionedItem::read_from_path(format!("{reference_path}{OCC_FILE_SUFFIX}"))?
        .try_take()?;

    debug!("Reconstruct index");
    Ok(FmIndex::new(bwt, occ))
}

pub fn load_suffix_array_from_path(reference_path: &str) -> Result<SparseSuffixArray> {
    VersionedItem::read_from_path(format!(
        "{reference_path}{SUFFIX_ARRAY_FILE_SUFFIX}"
    ))?
    .try_take()
}

pub fn load_reference_from_path(reference_path: &str) -> Result<PackedSequence> {
    VersionedItem::read_from_path(format!("{reference_path}{REF_FILE_SUFFIX}"))?.try_take()
}

pub fn load_boundaries_from_path(reference_path: &str) -> Result<SequenceBoundaries> {
    VersionedItem::read_from_path(format!("{reference_path}{BOUNDARIES_FILE_SUFFIX}"))?
        .try_take()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_mapping() {
        for base in [Base::A, Base::C, Base::G, Base::T, Base::N] {
            assert_eq!(rank_to_base(base_to_rank(base)), base);
        }
        // The rank order mirrors complementation when reversed over A..T
        assert_eq!(complement_rank(base_to_rank(Base::A)), base_to_rank(Base::T));
        assert_eq!(complement_rank(base_to_rank(Base::C)), base_to_rank(Base::G));
        assert_eq!(complement_rank(SENTINEL_RANK), SENTINEL_RANK);
        assert_eq!(complement_rank(base_to_rank(Base::N)), base_to_rank(Base::N));
    }

    #[test]
    fn test_boundaries_translate() {
        let boundaries = SequenceBoundaries::new(vec![
            SequenceBoundary {
                start: 0,
                end: 99,
                name: "chr1".into(),
            },
            SequenceBoundary {
                start: 100,
                end: 149,
                name: "chr2".into(),
            },
        ]);
        assert_eq!(boundaries.translate(0, 10), Some((0, 0, "chr1")));
        assert_eq!(boundaries.translate(120, 30), Some((1, 20, "chr2")));
        // Straddles the contig boundary
        assert_eq!(boundaries.translate(95, 10), None);
        assert_eq!(boundaries.translate(150, 1), None);
    }
}
