use crate::map::{
    record::{EditOperation, EditOperationsTrack},
    AlignmentParameters,
};

const NEG_INF: i32 = i32::MIN / 4;

/// Outcome of aligning a read against a decoded reference window
#[derive(Debug)]
pub struct VerifiedAlignment {
    pub score: i32,
    /// Mismatched plus inserted plus deleted bases
    pub edit_distance: u16,
    /// Start and length of the aligned span within the window
    pub ref_start: usize,
    pub ref_len: usize,
    pub edit_operations: EditOperationsTrack,
}

/// Banded affine-gap alignment of the full read against a reference window,
/// with both window ends free. The window is expected to be barely wider
/// than the read, so the dynamic program stays tiny; the band width caps the
/// diagonal excursion on top of that.
///
/// Returns `None` when no alignment places the whole read inside the band.
pub fn verify(
    query: &[u8],
    window: &[u8],
    parameters: &AlignmentParameters,
) -> Option<VerifiedAlignment> {
    let m = query.len();
    let n = window.len();
    if m == 0 || n == 0 {
        return None;
    }

    let gap_open = parameters.gap_open_penalty + parameters.gap_extension_penalty;
    let gap_extend = parameters.gap_extension_penalty;
    let end_skip = usize::from(parameters.indel_end_skip);
    let band = usize::from(parameters.band_width) + n.saturating_sub(m);

    let columns = n + 1;
    let mut h = vec![NEG_INF; (m + 1) * columns];
    let mut ins = vec![NEG_INF; (m + 1) * columns];
    let mut del = vec![NEG_INF; (m + 1) * columns];
    // 0 diagonal, 1 from the insertion matrix, 2 from the deletion matrix
    let mut h_trace = vec![0_u8; (m + 1) * columns];
    // 1 when the gap was extended rather than opened
    let mut ins_trace = vec![0_u8; (m + 1) * columns];
    let mut del_trace = vec![0_u8; (m + 1) * columns];

    // The read may start anywhere in the window
    for j in 0..=n {
        h[j] = 0;
    }

    for i in 1..=m {
        let j_start = i.saturating_sub(band).max(1);
        let j_end = (i + band).min(n);
        if j_start > j_end {
            return None;
        }
        // Indels are suppressed near the read ends
        let gaps_allowed = i > end_skip && m - i > end_skip;

        for j in j_start..=j_end {
            let idx = i * columns + j;
            let up = (i - 1) * columns + j;
            let left = idx - 1;
            let diag = up - 1;

            if gaps_allowed {
                let (ins_score, extended) = open_or_extend(h[up], ins[up], gap_open, gap_extend);
                ins[idx] = ins_score;
                ins_trace[idx] = extended;
                let (del_score, extended) = open_or_extend(h[left], del[left], gap_open, gap_extend);
                del[idx] = del_score;
                del_trace[idx] = extended;
            }

            let diagonal = h[diag].saturating_add(substitution_score(
                query[i - 1],
                window[j - 1],
                parameters,
            ));
            let mut best = diagonal;
            let mut trace = 0;
            if ins[idx] > best {
                best = ins[idx];
                trace = 1;
            }
            if del[idx] > best {
                best = del[idx];
                trace = 2;
            }
            h[idx] = best;
            h_trace[idx] = trace;
        }
    }

    // Free end: the best final cell of the last row wins; ties prefer the
    // leftmost locus for determinism
    let (best_j, best_score) = (1..=n)
        .map(|j| (j, h[m * columns + j]))
        .max_by(|(j_a, score_a), (j_b, score_b)| score_a.cmp(score_b).then(j_b.cmp(j_a)))?;
    if best_score <= NEG_INF / 2 {
        return None;
    }

    // Trace back to the alignment start, collecting per-column operations
    let mut operations = Vec::with_capacity(m + 2);
    let mut i = m;
    let mut j = best_j;
    while i > 0 {
        let idx = i * columns + j;
        match h_trace[idx] {
            0 => {
                operations.push(if query[i - 1] == window[j - 1] && query[i - 1] != b'N' {
                    EditOperation::Match
                } else {
                    EditOperation::Mismatch(window[j - 1])
                });
                i -= 1;
                j -= 1;
            }
            1 => {
                // Gap in the reference: walk up while the gap was extended
                loop {
                    let idx = i * columns + j;
                    operations.push(EditOperation::Insertion);
                    i -= 1;
                    if ins_trace[idx] == 0 {
                        break;
                    }
                }
            }
            _ => {
                // Gap in the read: walk left while the gap was extended
                loop {
                    let idx = i * columns + j;
                    operations.push(EditOperation::Deletion(window[j - 1]));
                    j -= 1;
                    if del_trace[idx] == 0 {
                        break;
                    }
                }
            }
        }
    }
    operations.reverse();

    let track = EditOperationsTrack::new(operations);
    Some(VerifiedAlignment {
        score: best_score,
        edit_distance: track.edit_distance(),
        ref_start: j,
        ref_len: best_j - j,
        edit_operations: track,
    })
}

fn substitution_score(query: u8, reference: u8, parameters: &AlignmentParameters) -> i32 {
    if query == reference && query != b'N' {
        parameters.match_score
    } else {
        parameters.mismatch_penalty
    }
}

fn open_or_extend(h_score: i32, gap_score: i32, gap_open: i32, gap_extend: i32) -> (i32, u8) {
    let opened = h_score.saturating_add(gap_open);
    let extended = gap_score.saturating_add(gap_extend);
    if extended > opened {
        (extended, 1)
    } else {
        (opened, 0)
    }
}
