use std::fmt;

use bstr::BString;
use either::Either;
use noodles::sam;

use crate::{map::Direction, sequence};

/// A read to be aligned, decoupled from the input file format
#[derive(Debug, Clone)]
pub struct Record {
    pub name: Option<Vec<u8>>,
    pub sequence: Vec<u8>,
    pub base_qualities: Option<Vec<u8>>,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or(b"*");
        write!(f, "{}", String::from_utf8_lossy(name))
    }
}

/// Variants store the reference base where the read disagrees with it
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EditOperation {
    Match,
    Mismatch(u8),
    /// Base present in the read but not in the reference
    Insertion,
    /// Reference base missing from the read
    Deletion(u8),
    SoftClip,
}

impl From<EditOperation> for sam::alignment::record::cigar::op::Kind {
    fn from(src: EditOperation) -> Self {
        match src {
            EditOperation::Match | EditOperation::Mismatch(_) => Self::Match,
            EditOperation::Insertion => Self::Insertion,
            EditOperation::Deletion(_) => Self::Deletion,
            EditOperation::SoftClip => Self::SoftClip,
        }
    }
}

impl EditOperation {
    fn consumes_reference(self) -> bool {
        matches!(self, Self::Match | Self::Mismatch(_) | Self::Deletion(_))
    }

    fn consumes_read(self) -> bool {
        matches!(
            self,
            Self::Match | Self::Mismatch(_) | Self::Insertion | Self::SoftClip
        )
    }

    fn edit_cost(self) -> u16 {
        match self {
            Self::Match | Self::SoftClip => 0,
            Self::Mismatch(_) | Self::Insertion | Self::Deletion(_) => 1,
        }
    }

    /// Whether two operations belong to the same CIGAR run
    fn same_run(self, other: Self) -> bool {
        sam::alignment::record::cigar::op::Kind::from(self)
            == sam::alignment::record::cigar::op::Kind::from(other)
    }
}

/// Contains edit operations performed in order to align the sequence,
/// one entry per alignment column in read order
#[derive(Debug, Default)]
pub struct EditOperationsTrack(Vec<EditOperation>);

impl EditOperationsTrack {
    pub fn new(operations: Vec<EditOperation>) -> Self {
        Self(operations)
    }

    /// Calculates the amount of positions in the genome
    /// that are covered by this read
    pub fn effective_len(&self) -> u64 {
        self.0
            .iter()
            .filter(|operation| operation.consumes_reference())
            .count() as u64
    }

    pub fn read_len(&self) -> u64 {
        self.0
            .iter()
            .filter(|operation| operation.consumes_read())
            .count() as u64
    }

    pub fn edit_distance(&self) -> u16 {
        self.0.iter().map(|operation| operation.edit_cost()).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Condenses the track into CIGAR operations and the MD tag.
    /// Reads mapping to the reverse strand are reported along the forward
    /// strand, so their tracks are traversed reversed with complemented
    /// reference bases.
    pub fn to_sam_fields(
        &self,
        strand: Direction,
    ) -> (Vec<sam::alignment::record::cigar::op::Op>, BString) {
        use sam::alignment::record::cigar::op::Op;

        let mut cigar = Vec::new();
        let mut md_tag = BString::from(vec![]);
        let mut run_len: usize = 0;
        let mut run_op: Option<EditOperation> = None;
        let mut match_streak: u32 = 0;
        let mut previous: Option<EditOperation> = None;

        let track = match strand {
            Direction::Forward => Either::Left(self.0.iter().copied()),
            Direction::Backward => Either::Right(self.0.iter().rev().copied()),
        };
        for operation in track {
            let operation = match (operation, strand) {
                (EditOperation::Mismatch(base), Direction::Backward) => {
                    EditOperation::Mismatch(sequence::complement(base))
                }
                (EditOperation::Deletion(base), Direction::Backward) => {
                    EditOperation::Deletion(sequence::complement(base))
                }
                (operation, _) => operation,
            };

            match run_op {
                Some(op) if op.same_run(operation) => run_len += 1,
                Some(op) => {
                    cigar.push(Op::new(op.into(), run_len));
                    run_op = Some(operation);
                    run_len = 1;
                }
                None => {
                    run_op = Some(operation);
                    run_len = 1;
                }
            }

            match operation {
                EditOperation::Match => match_streak += 1,
                EditOperation::Mismatch(reference_base) => {
                    md_tag.extend_from_slice(
                        format!("{match_streak}{}", reference_base as char).as_bytes(),
                    );
                    match_streak = 0;
                }
                EditOperation::Deletion(reference_base) => {
                    if matches!(previous, Some(EditOperation::Deletion(_))) {
                        md_tag.extend_from_slice(format!("{}", reference_base as char).as_bytes());
                    } else {
                        md_tag.extend_from_slice(
                            format!("{match_streak}^{}", reference_base as char).as_bytes(),
                        );
                    }
                    match_streak = 0;
                }
                // Insertions and clips are invisible to MD tags
                EditOperation::Insertion | EditOperation::SoftClip => {}
            }
            previous = Some(operation);
        }
        if let Some(op) = run_op {
            cigar.push(Op::new(op.into(), run_len));
        }
        md_tag.extend_from_slice(format!("{match_streak}").as_bytes());

        (cigar, md_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cigar_string(ops: &[sam::alignment::record::cigar::op::Op]) -> String {
        use sam::alignment::record::cigar::op::Kind;
        ops.iter()
            .map(|op| {
                let kind = match op.kind() {
                    Kind::Match => 'M',
                    Kind::Insertion => 'I',
                    Kind::Deletion => 'D',
                    Kind::SoftClip => 'S',
                    _ => '?',
                };
                format!("{}{}", op.len(), kind)
            })
            .collect()
    }

    #[test]
    fn test_effective_and_read_len() {
        let track = EditOperationsTrack::new(vec![
            EditOperation::Match,
            EditOperation::Mismatch(b'C'),
            EditOperation::Insertion,
            EditOperation::Match,
            EditOperation::Deletion(b'A'),
            EditOperation::Deletion(b'G'),
            EditOperation::Match,
        ]);
        assert_eq!(track.effective_len(), 6);
        assert_eq!(track.read_len(), 5);
        assert_eq!(track.edit_distance(), 4);
    }

    #[test]
    fn test_cigar_and_md_forward() {
        let track = EditOperationsTrack::new(vec![
            EditOperation::Match,
            EditOperation::Match,
            EditOperation::Mismatch(b'G'),
            EditOperation::Match,
            EditOperation::Insertion,
            EditOperation::Match,
            EditOperation::Deletion(b'T'),
            EditOperation::Deletion(b'A'),
            EditOperation::Match,
        ]);
        let (cigar, md) = track.to_sam_fields(Direction::Forward);
        assert_eq!(cigar_string(&cigar), "4M1I1M2D1M");
        assert_eq!(md, "2G2^TA1");
    }

    #[test]
    fn test_cigar_and_md_reverse_strand() {
        let track = EditOperationsTrack::new(vec![
            EditOperation::Match,
            EditOperation::Mismatch(b'A'),
            EditOperation::Match,
            EditOperation::Match,
        ]);
        let (cigar, md) = track.to_sam_fields(Direction::Backward);
        assert_eq!(cigar_string(&cigar), "4M");
        // Reversed track: two matches first, then the complemented base
        assert_eq!(md, "2T1");
    }

    #[test]
    fn test_soft_clips_group() {
        let track = EditOperationsTrack::new(vec![
            EditOperation::SoftClip,
            EditOperation::SoftClip,
            EditOperation::Match,
            EditOperation::Match,
        ]);
        let (cigar, md) = track.to_sam_fields(Direction::Forward);
        assert_eq!(cigar_string(&cigar), "2S2M");
        assert_eq!(md, "2");
        assert_eq!(track.edit_distance(), 0);
    }
}
