use std::{
    fs::File,
    io::{BufRead, BufReader},
};

use flate2::read::MultiGzDecoder;
use log::info;
use noodles::fasta;

use crate::{
    errors::{Error, Result},
    index::{
        base_to_rank,
        fm_index::{Bwt, FmIndex},
        occurrence::OccurrenceBackend,
        suffix_array::{build_suffix_array, RankedText, SparseSuffixArray},
        versioned::VersionedItem,
        SequenceBoundaries, SequenceBoundary, ALPHABET_SIZE, BOUNDARIES_FILE_SUFFIX,
        BWT_FILE_SUFFIX, OCC_FILE_SUFFIX, REF_FILE_SUFFIX, SA_SAMPLING_RATE, SENTINEL_RANK,
        SUFFIX_ARRAY_FILE_SUFFIX,
    },
    sequence::{packed::MAX_SEQUENCE_LENGTH, PackedSequence},
};

/// Entry point function to launch the indexing process
pub fn run(reference_path: &str) -> Result<()> {
    info!("Read input reference sequence");
    let (reference, boundaries) = read_reference(reference_path)?;

    info!("Save position map");
    VersionedItem::new(boundaries)
        .write_to_path(format!("{reference_path}{BOUNDARIES_FILE_SUFFIX}"))?;

    let (packed_reference, bwt, occ, sparse_suffix_array) = construct(&reference)?;

    info!("Save packed reference");
    VersionedItem::new(packed_reference)
        .write_to_path(format!("{reference_path}{REF_FILE_SUFFIX}"))?;

    info!("Save compressed suffix array");
    VersionedItem::new(sparse_suffix_array)
        .write_to_path(format!("{reference_path}{SUFFIX_ARRAY_FILE_SUFFIX}"))?;

    info!("Save BWT");
    VersionedItem::new(bwt).write_to_path(format!("{reference_path}{BWT_FILE_SUFFIX}"))?;

    info!("Save occurrence table");
    VersionedItem::new(occ).write_to_path(format!("{reference_path}{OCC_FILE_SUFFIX}"))?;

    info!("Done");
    Ok(())
}

/// Builds all index structures for a reference held in memory. Unit tests
/// and benchmarks use this to skip the on-disk round trip.
pub fn build_in_memory_index(reference: &[u8]) -> Result<(FmIndex, SparseSuffixArray)> {
    let (_, bwt, occ, sparse_suffix_array) = construct(reference)?;
    Ok((FmIndex::new(bwt, occ), sparse_suffix_array))
}

/// Core of the index build: packed reference, suffix array, BWT, occurrence
/// backend, and sampled suffix array over `forward $ revcomp $`
fn construct(
    reference: &[u8],
) -> Result<(PackedSequence, Bwt, OccurrenceBackend, SparseSuffixArray)> {
    if reference.is_empty() {
        return Err(Error::Parse("The reference sequence is empty".into()));
    }
    let text_len = 2 * reference.len() as u64 + 2;
    if text_len > MAX_SEQUENCE_LENGTH {
        return Err(Error::CapacityExceeded {
            length: text_len,
            maximum: MAX_SEQUENCE_LENGTH,
        });
    }

    info!("Pack reference sequence");
    let packed_reference = PackedSequence::try_from_ascii(reference)?;

    info!("Add reverse complement and sentinels to reference");
    let mut ranks = Vec::with_capacity(text_len as usize);
    ranks.extend(packed_reference.iter().map(base_to_rank));
    ranks.push(SENTINEL_RANK);
    ranks.extend(
        packed_reference
            .iter()
            .rev()
            .map(|base| base_to_rank(base.complement())),
    );
    ranks.push(SENTINEL_RANK);

    info!("Generate suffix array");
    let suffix_array = build_suffix_array(&RankedText::new(&ranks, ALPHABET_SIZE));

    info!("Generate BWT");
    let n = ranks.len() as u64;
    let bwt_symbols: Vec<u8> = suffix_array
        .iter()
        .map(|&start| ranks[((start + n - 1) % n) as usize])
        .collect();
    drop(ranks);
    let bwt = Bwt::new(&bwt_symbols);
    drop(bwt_symbols);

    info!("Generate occurrence table");
    let occ = OccurrenceBackend::new(&bwt);

    info!("Compress suffix array");
    let sparse_suffix_array =
        SparseSuffixArray::sample(&suffix_array, bwt.sentinel_ranks(), SA_SAMPLING_RATE)?;

    Ok((packed_reference, bwt, occ, sparse_suffix_array))
}

/// Reads a (possibly gzipped) FASTA file, normalizing bases to uppercase
/// `ACGTN`. Ambiguous IUPAC codes fold to `N` so that rebuilding an index
/// from the same input is byte-identical.
fn read_reference(reference_path: &str) -> Result<(Vec<u8>, SequenceBoundaries)> {
    let mut reader = open_fasta(reference_path)?;

    let mut reference = Vec::new();
    let mut boundaries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let name = String::from_utf8_lossy(record.name().as_ref()).into_owned();
        let start = reference.len() as u64;
        for (offset, &symbol) in record.sequence().as_ref().iter().enumerate() {
            reference.push(normalize_base(symbol).ok_or_else(|| {
                Error::Parse(format!(
                    "Found non-IUPAC symbol '{}' at position {offset} of \"{name}\"",
                    symbol.escape_ascii()
                ))
            })?);
        }
        if reference.len() as u64 == start {
            return Err(Error::Parse(format!("Sequence \"{name}\" is empty")));
        }
        boundaries.push(SequenceBoundary {
            start,
            end: reference.len() as u64 - 1,
            name,
        });
    }
    if boundaries.is_empty() {
        return Err(Error::Parse("No sequences found in the input file".into()));
    }
    Ok((reference, SequenceBoundaries::new(boundaries)))
}

fn open_fasta(reference_path: &str) -> Result<fasta::io::Reader<Box<dyn BufRead>>> {
    let file = File::open(reference_path)?;
    let inner: Box<dyn BufRead> = if reference_path.ends_with(".gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(fasta::io::Reader::new(inner))
}

fn normalize_base(symbol: u8) -> Option<u8> {
    match symbol.to_ascii_uppercase() {
        symbol @ (b'A' | b'C' | b'G' | b'T') => Some(symbol),
        b'U' => Some(b'T'),
        // Ambiguity codes collapse to N
        b'R' | b'Y' | b'K' | b'M' | b'S' | b'W' | b'B' | b'D' | b'H' | b'V' | b'N' => Some(b'N'),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base() {
        assert_eq!(normalize_base(b'a'), Some(b'A'));
        assert_eq!(normalize_base(b'u'), Some(b'T'));
        assert_eq!(normalize_base(b'Y'), Some(b'N'));
        assert_eq!(normalize_base(b'n'), Some(b'N'));
        assert_eq!(normalize_base(b'-'), None);
        assert_eq!(normalize_base(b'$'), None);
    }

    #[test]
    fn test_construct_rejects_degenerate_input() {
        assert!(construct(b"").is_err());
    }

    #[test]
    fn test_index_build_is_deterministic() {
        let reference = b"GATTACAGATTACANNNACGTACGT";
        let (packed_a, bwt_a, _, _) = construct(reference).unwrap();
        let (packed_b, bwt_b, _, _) = construct(reference).unwrap();
        assert_eq!(
            bincode::serialize(&packed_a).unwrap(),
            bincode::serialize(&packed_b).unwrap()
        );
        assert_eq!(
            bincode::serialize(&bwt_a).unwrap(),
            bincode::serialize(&bwt_b).unwrap()
        );
    }
}
