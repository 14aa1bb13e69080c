use std::collections::{BTreeSet, BinaryHeap};

use log::{debug, trace};
use min_max_heap::MinMaxHeap;
use smallvec::SmallVec;

use crate::{
    errors::Result,
    index::{
        base_to_rank, complement_rank,
        fm_index::{BiInterval, FmIndex},
        suffix_array::SparseSuffixArray,
    },
    map::{
        automaton::{EditAutomaton, PatternMasks, StaircaseFilter, Transition},
        verify::verify,
        AlignmentParameters, Direction, HitInterval, SearchState, VerifiedHit,
    },
    sequence::{Base, PackedSequence},
};

/// Hard cap on stored candidate intervals per read
const HIT_LIMIT: usize = 64;

/// Hard cap on suffix-array loci enumerated during verification per read
const LOCUS_LIMIT: usize = 256;

/// One leg of a seeded search: match masks, staircase filter, and length of
/// the read portion the leg covers
struct LegContext {
    masks: PatternMasks,
    filter: StaircaseFilter,
    len: u16,
}

struct SeedContext {
    backward: LegContext,
    forward: LegContext,
}

/// Finds candidate suffix-array intervals for the pattern within the edit
/// budget. The returned candidates still need `verify_hits()` to become
/// placed alignments.
pub fn search_read(
    pattern: &[u8],
    parameters: &AlignmentParameters,
    fm_index: &FmIndex,
    stack: &mut MinMaxHeap<SearchState>,
) -> BinaryHeap<HitInterval> {
    let mut hits = BinaryHeap::new();
    let max_edits = parameters.max_edit_distance;
    let read_len = pattern.len();
    if read_len == 0 || read_len > u16::MAX as usize {
        return hits;
    }

    // Reads with more ambiguous bases than the edit budget cannot match
    let num_ambiguous = pattern.iter().filter(|&&c| c == b'N' || c == b'n').count();
    if num_ambiguous > usize::from(max_edits) {
        return hits;
    }

    // Remaining Ns are substituted; the edit budget rejects false matches at
    // those positions since N never matches the reference
    let read_ranks: Vec<u8> = pattern
        .iter()
        .map(|&c| match Base::from_ascii(c) {
            Some(Base::N) | None => base_to_rank(Base::A),
            Some(base) => base_to_rank(base),
        })
        .collect();

    let spans = chunk_spans(read_len, max_edits);
    let contexts: SmallVec<[SeedContext; 8]> = spans
        .iter()
        .enumerate()
        .map(|(seed, &(chunk_start, chunk_end))| SeedContext {
            backward: LegContext {
                masks: PatternMasks::new(
                    read_ranks[..chunk_start].iter().rev().copied(),
                    chunk_start as u16,
                ),
                filter: StaircaseFilter::new(
                    &spans[..seed]
                        .iter()
                        .rev()
                        .map(|&(start, end)| (end - start) as u16)
                        .collect::<SmallVec<[u16; 8]>>(),
                    max_edits,
                ),
                len: chunk_start as u16,
            },
            forward: LegContext {
                masks: PatternMasks::new(
                    read_ranks[chunk_end..].iter().copied(),
                    (read_len - chunk_end) as u16,
                ),
                filter: StaircaseFilter::new(
                    &spans[seed + 1..]
                        .iter()
                        .map(|&(start, end)| (end - start) as u16)
                        .collect::<SmallVec<[u16; 8]>>(),
                    max_edits,
                ),
                len: (read_len - chunk_end) as u16,
            },
        })
        .collect();
    let open_filter = StaircaseFilter::open(max_edits);

    // Pigeonhole seeding: each chunk is walked exactly; a chunk that fails
    // outright must contain an edit and seeds nothing
    stack.clear();
    for (seed, &(chunk_start, chunk_end)) in spans.iter().enumerate() {
        let mut interval = fm_index.init_interval();
        for &symbol in read_ranks[chunk_start..chunk_end].iter().rev() {
            interval = fm_index.backward_ext(&interval, symbol);
            if interval.is_empty() {
                break;
            }
        }
        if interval.is_empty() {
            continue;
        }

        if chunk_start == 0 && chunk_end == read_len {
            // Degenerate chunking: the whole read matched exactly
            check_and_push_hit(
                HitInterval {
                    interval,
                    edits: 0,
                    score: score_of(0, false, parameters),
                    unconsumed_left: 0,
                    unconsumed_right: 0,
                },
                &mut hits,
            );
            continue;
        }

        let context = &contexts[seed];
        let (direction, automaton) = if chunk_start > 0 {
            (
                Direction::Backward,
                EditAutomaton::init(max_edits, &context.backward.filter),
            )
        } else {
            (
                Direction::Forward,
                EditAutomaton::init(max_edits, &context.forward.filter),
            )
        };
        stack.push(SearchState {
            interval,
            automaton,
            cursor_b: chunk_start as u16,
            cursor_f: chunk_end as u16,
            direction,
            seed: seed as u8,
            edits: 0,
            score: score_of(0, false, parameters),
        });
    }

    // Best-first expansion
    let mut num_expanded: u32 = 0;
    let mut stack_size_limit_reported = false;
    while let Some(state) = stack.pop_max() {
        // Since we operate on a priority stack, a popped state that cannot
        // reach the reporting bound any more ends the search
        if let Some(allowed) = allowed_edits(&hits, parameters) {
            if state.edits > allowed {
                break;
            }
        }

        num_expanded += 1;
        if num_expanded > parameters.max_expanded_states {
            trace!(
                "State limit exceeded (read length: {} bp). Aborting search with {} candidates.",
                read_len,
                hits.len()
            );
            break;
        }

        // A unique locus is a candidate; the verification aligner finishes
        // the job there
        if state.interval.size == 1 {
            check_and_push_hit(
                HitInterval {
                    interval: state.interval,
                    edits: state.edits,
                    score: state.score,
                    unconsumed_left: state.cursor_b,
                    unconsumed_right: read_len as u16 - state.cursor_f,
                },
                &mut hits,
            );
            if hits.len() >= HIT_LIMIT {
                break;
            }
            continue;
        }

        expand_state(
            &state,
            &contexts[usize::from(state.seed)],
            &open_filter,
            read_len as u16,
            parameters,
            fm_index,
            stack,
            &mut hits,
        );

        if hits.len() >= HIT_LIMIT {
            break;
        }

        // Evict the most penalized frames when the stack outgrows its limit
        while stack.len() > parameters.max_expanded_states as usize {
            if !stack_size_limit_reported {
                trace!(
                    "Stack size limit exceeded (read length: {read_len} bp). Removing highly penalized partial alignments."
                );
                stack_size_limit_reported = true;
            }
            stack.pop_min();
        }
    }

    hits
}

/// Expands one state: an FM extension per base symbol, each coupled to one
/// automaton transition
#[allow(clippy::too_many_arguments)]
fn expand_state(
    state: &SearchState,
    context: &SeedContext,
    open_filter: &StaircaseFilter,
    read_len: u16,
    parameters: &AlignmentParameters,
    fm_index: &FmIndex,
    stack: &mut MinMaxHeap<SearchState>,
    hits: &mut BinaryHeap<HitInterval>,
) {
    let max_edits = parameters.max_edit_distance;
    let switched = state.direction.is_forward() && context.backward.len > 0;

    let (leg, filter, fmd_ext_interval) = match state.direction {
        Direction::Backward => (&context.backward, &context.backward.filter, state.interval),
        Direction::Forward => (
            &context.forward,
            // The forward staircase is anchored at the seed chunk and only
            // holds when there was no backward leg in front of it
            if context.backward.len == 0 {
                &context.forward.filter
            } else {
                open_filter
            },
            state.interval.swapped(),
        ),
    };
    let terminal_bit = leg.masks.terminal_bit(leg.len);

    for (symbol, mut interval_prime) in fm_index.extend_iter(&fmd_ext_interval) {
        if interval_prime.size < 1 {
            continue;
        }
        // Special treatment of forward extension
        let symbol = match state.direction {
            Direction::Forward => {
                interval_prime = interval_prime.swapped();
                complement_rank(symbol)
            }
            Direction::Backward => symbol,
        };

        match state.automaton.next_state(
            leg.masks.eq_mask(symbol),
            filter,
            terminal_bit,
            max_edits,
        ) {
            Transition::Dead => {}
            Transition::Accept { edits, .. } => {
                on_leg_accepted(
                    state,
                    context,
                    open_filter,
                    interval_prime,
                    edits,
                    switched,
                    read_len,
                    parameters,
                    stack,
                    hits,
                );
            }
            Transition::Live(automaton) => {
                let edits = automaton.min_edits();
                let (cursor_b, cursor_f) = match state.direction {
                    Direction::Backward => (state.cursor_b.saturating_sub(1), state.cursor_f),
                    Direction::Forward => (state.cursor_b, (state.cursor_f + 1).min(read_len)),
                };
                check_and_push_stack_frame(
                    SearchState {
                        interval: interval_prime,
                        automaton,
                        cursor_b,
                        cursor_f,
                        direction: state.direction,
                        seed: state.seed,
                        edits,
                        score: score_of(edits, switched, parameters),
                    },
                    parameters,
                    stack,
                    hits,
                );
            }
        }
    }
}

/// A leg reached its terminal column: either the read is fully consumed, or
/// the search turns around into the forward leg
#[allow(clippy::too_many_arguments)]
fn on_leg_accepted(
    state: &SearchState,
    context: &SeedContext,
    open_filter: &StaircaseFilter,
    interval: BiInterval,
    edits: u8,
    switched: bool,
    read_len: u16,
    parameters: &AlignmentParameters,
    stack: &mut MinMaxHeap<SearchState>,
    hits: &mut BinaryHeap<HitInterval>,
) {
    let backward_leg_done = state.direction == Direction::Backward;
    let forward_leg_missing = context.forward.len == 0 || state.cursor_f == read_len;

    if !backward_leg_done || forward_leg_missing {
        // This route through the read graph is finished successfully
        check_and_push_hit(
            HitInterval {
                interval,
                edits,
                score: score_of(edits, switched, parameters),
                unconsumed_left: 0,
                unconsumed_right: 0,
            },
            hits,
        );
        return;
    }

    // Turn around: a fresh automaton continues on the forward leg, seeded at
    // the edits the backward leg has proven
    let forward_filter = if context.backward.len == 0 {
        &context.forward.filter
    } else {
        open_filter
    };
    check_and_push_stack_frame(
        SearchState {
            interval,
            automaton: EditAutomaton::init_with_offset(
                edits,
                parameters.max_edit_distance,
                forward_filter,
            ),
            cursor_b: 0,
            cursor_f: state.cursor_f,
            direction: Direction::Forward,
            seed: state.seed,
            edits,
            score: score_of(edits, true, parameters),
        },
        parameters,
        stack,
        hits,
    );
}

/// Checks stop criteria of stack frames before pushing them onto the stack.
/// Since push operations on heaps are costly, this accelerates the search.
fn check_and_push_stack_frame(
    stack_frame: SearchState,
    parameters: &AlignmentParameters,
    stack: &mut MinMaxHeap<SearchState>,
    hits: &BinaryHeap<HitInterval>,
) {
    if stack_frame.edits > parameters.max_edit_distance {
        return;
    }
    if let Some(allowed) = allowed_edits(hits, parameters) {
        if stack_frame.edits > allowed {
            return;
        }
    }
    stack.push(stack_frame);
}

fn check_and_push_hit(hit: HitInterval, hits: &mut BinaryHeap<HitInterval>) {
    if hit.interval.size > 0 && hits.len() < HIT_LIMIT {
        hits.push(hit);
    }
}

/// The edit bound that still matters given the hits found so far. One edit
/// beyond the best hit is kept in play so that suboptimal hits remain
/// discoverable for mapping-quality estimation.
///
/// Only fully consumed candidates may tighten the bound: a unique-interval
/// candidate carries an optimistic edit count that verification can still
/// raise, so it must not prune branches that need more edits elsewhere.
fn allowed_edits(
    hits: &BinaryHeap<HitInterval>,
    parameters: &AlignmentParameters,
) -> Option<u8> {
    use crate::map::ReportMode;
    hits.peek().and_then(|best| {
        let exactly_scored = best.unconsumed_left == 0 && best.unconsumed_right == 0;
        match parameters.report_mode {
            ReportMode::BestHit if exactly_scored => {
                Some((best.edits + 1).min(parameters.max_edit_distance))
            }
            _ => None,
        }
    })
}

fn score_of(edits: u8, switched: bool, parameters: &AlignmentParameters) -> i32 {
    i32::from(edits) * parameters.mismatch_penalty
        + if switched {
            parameters.split_open_penalty
        } else {
            0
        }
}

/// Partitions the read into `max_edit_distance + 2` contiguous chunks. If
/// the true edit count stays within the budget, at least one chunk matches
/// the reference without edits and seeds the search there.
fn chunk_spans(read_len: usize, max_edits: u8) -> SmallVec<[(usize, usize); 8]> {
    let num_chunks = (usize::from(max_edits) + 2).min(read_len);
    let base_len = read_len / num_chunks;
    let remainder = read_len % num_chunks;
    let mut spans = SmallVec::with_capacity(num_chunks);
    let mut offset = 0;
    for chunk in 0..num_chunks {
        let len = base_len + usize::from(chunk < remainder);
        spans.push((offset, offset + len));
        offset += len;
    }
    spans
}

/// Places candidate intervals on the genome and runs the verification
/// aligner over a decoded reference window around each locus, deduplicating
/// loci so no position is verified twice
pub fn verify_hits(
    pattern: &[u8],
    hits: BinaryHeap<HitInterval>,
    parameters: &AlignmentParameters,
    fm_index: &FmIndex,
    suffix_array: &SparseSuffixArray,
    reference: &PackedSequence,
) -> Result<Vec<VerifiedHit>> {
    let read_len = pattern.len() as u64;
    let max_edits = u64::from(parameters.max_edit_distance);
    let strand_len = fm_index.strand_len();
    let genome_len = reference.len();

    let mut seen_windows = BTreeSet::new();
    let mut seen_loci = BTreeSet::new();
    let mut verified = Vec::new();
    let mut num_enumerated = 0_usize;

    for hit in hits.into_sorted_vec().into_iter().rev() {
        for rank in hit.interval.forward().range() {
            if num_enumerated >= LOCUS_LIMIT {
                debug!("Locus limit reached; dropping further multi-mapping positions");
                return Ok(verified);
            }
            num_enumerated += 1;

            let sa_value = suffix_array.get(rank, fm_index)?;
            let approx_start = sa_value.saturating_sub(u64::from(hit.unconsumed_left));
            let window_start = approx_start.saturating_sub(max_edits);
            let window_end = approx_start + read_len + max_edits;
            if !seen_windows.insert(window_start) {
                continue;
            }

            let placed = if sa_value < strand_len {
                let window_start = window_start.min(genome_len);
                let window_end = window_end.min(genome_len);
                if window_start >= window_end {
                    continue;
                }
                let window = reference
                    .subsequence(window_start, window_end)
                    .to_ascii();
                verify(pattern, &window, parameters).map(|alignment| VerifiedHit {
                    position: window_start + alignment.ref_start as u64,
                    strand: Direction::Forward,
                    score: alignment.score,
                    edit_distance: alignment.edit_distance,
                    edit_operations: alignment.edit_operations,
                })
            } else {
                // Reverse strand: map the window into forward coordinates
                // and decode its reverse complement
                let local_start = window_start.max(strand_len) - strand_len;
                let local_end = (window_end.max(strand_len) - strand_len).min(genome_len);
                if local_start >= local_end {
                    continue;
                }
                let window = reference
                    .subsequence(genome_len - local_end, genome_len - local_start)
                    .reverse_complement()
                    .to_ascii();
                verify(pattern, &window, parameters).map(|alignment| {
                    let rc_start = local_start + alignment.ref_start as u64;
                    VerifiedHit {
                        position: genome_len - rc_start - alignment.ref_len as u64,
                        strand: Direction::Backward,
                        score: alignment.score,
                        edit_distance: alignment.edit_distance,
                        edit_operations: alignment.edit_operations,
                    }
                })
            };

            if let Some(placed) = placed {
                if u64::from(placed.edit_distance) <= max_edits
                    && seen_loci.insert((placed.position, placed.strand.is_forward()))
                {
                    verified.push(placed);
                }
            }
        }
    }

    Ok(verified)
}

/// Orders verified hits best-first: fewest edits, then score, then position
pub fn rank_verified_hits(hits: &mut [VerifiedHit]) {
    hits.sort_by(|a, b| {
        a.edit_distance
            .cmp(&b.edit_distance)
            .then(b.score.cmp(&a.score))
            .then(a.position.cmp(&b.position))
            .then(b.strand.is_forward().cmp(&a.strand.is_forward()))
    });
}
