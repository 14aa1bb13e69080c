use std::{
    cell::RefCell,
    env,
    fs::OpenOptions,
    io::{BufWriter, Write},
    num::NonZeroUsize,
    path::Path,
    time::{Duration, Instant},
};

use bstr::BString;
use clap::crate_version;
use log::{debug, info};
use min_max_heap::MinMaxHeap;
use noodles::sam::{self, alignment::io::Write as SamWrite};
use rayon::prelude::*;

use crate::{
    errors::{Error, Result},
    index::{
        fm_index::FmIndex, load_boundaries_from_path, load_index_from_path,
        load_reference_from_path, load_suffix_array_from_path,
        suffix_array::SparseSuffixArray, SequenceBoundaries,
    },
    map::{
        input::InputSource,
        record::Record,
        search::{rank_verified_hits, search_read, verify_hits},
        AlignmentParameters, Direction, SearchState, VerifiedHit,
    },
    sequence::{self, PackedSequence},
    CRATE_NAME,
};

/// Loads index files and launches the mapping process
pub fn run(
    reads_path: &str,
    reference_path: &str,
    out_file_path: &str,
    force_overwrite: bool,
    alignment_parameters: &AlignmentParameters,
) -> Result<()> {
    let out_file_path = Path::new(out_file_path);

    info!("Load FM-index");
    let fm_index = load_index_from_path(reference_path)?;

    info!("Load suffix array");
    let suffix_array = load_suffix_array_from_path(reference_path)?;

    info!("Load packed reference");
    let reference = load_reference_from_path(reference_path)?;

    info!("Load position map");
    let boundaries = load_boundaries_from_path(reference_path)?;

    let mut out_file = sam::io::Writer::new(BufWriter::new(
        OpenOptions::new()
            .read(false)
            .write(true)
            // If .create_new(true) is set, .create() and .truncate() are ignored
            .create_new(!force_overwrite)
            .create(true)
            .truncate(true)
            .open(out_file_path)?,
    ));

    info!("Map reads");
    let mut input_source = InputSource::from_path(reads_path)?;
    let out_header = create_sam_header(&boundaries)?;
    out_file.write_header(&out_header)?;
    run_inner(
        &mut input_source,
        &fm_index,
        &suffix_array,
        &reference,
        &boundaries,
        alignment_parameters,
        &out_header,
        &mut out_file,
    )?;

    info!("Done");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_inner<W>(
    input_source: &mut InputSource,
    fm_index: &FmIndex,
    suffix_array: &SparseSuffixArray,
    reference: &PackedSequence,
    boundaries: &SequenceBoundaries,
    alignment_parameters: &AlignmentParameters,
    out_header: &sam::Header,
    out_file: &mut sam::io::Writer<W>,
) -> Result<()>
where
    W: Write,
{
    thread_local! {
        static STACK_BUF: RefCell<MinMaxHeap<SearchState>> = RefCell::new(MinMaxHeap::new());
    }

    for chunk in input_source.task_queue(alignment_parameters.chunk_size) {
        debug!("Map chunk of records");
        let sam_records = chunk
            .records
            .into_par_iter()
            .map(|record| -> Result<sam::alignment::RecordBuf> {
                STACK_BUF.with(|stack_buf| {
                    let start = Instant::now();
                    let hits = search_read(
                        &record.sequence,
                        alignment_parameters,
                        fm_index,
                        &mut stack_buf.borrow_mut(),
                    );
                    let mut verified = verify_hits(
                        &record.sequence,
                        hits,
                        alignment_parameters,
                        fm_index,
                        suffix_array,
                        reference,
                    )?;
                    rank_verified_hits(&mut verified);
                    let duration = start.elapsed();

                    create_sam_record(
                        record,
                        verified,
                        boundaries,
                        alignment_parameters,
                        Some(&duration),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Write chunk of SAM records to output file");
        for record in &sam_records {
            out_file.write_alignment_record(out_header, record)?;
        }
    }
    Ok(())
}

/// Creates a basic SAM header with mandatory fields pre-populated
pub fn create_sam_header(boundaries: &SequenceBoundaries) -> Result<sam::Header> {
    use sam::header::record::value::{map, Map};

    let mut builder = sam::Header::builder();

    let mut header_record = Map::<map::Header>::new(map::header::Version::new(1, 6));
    header_record.other_fields_mut().insert(
        map::header::tag::SORT_ORDER,
        map::header::sort_order::UNSORTED.into(),
    );
    builder = builder.set_header(header_record);

    for boundary in boundaries.iter() {
        builder = builder.add_reference_sequence(
            boundary.name.as_bytes(),
            Map::<map::ReferenceSequence>::new(
                usize::try_from(boundary.end - boundary.start + 1)
                    .ok()
                    .and_then(|length| NonZeroUsize::try_from(length).ok())
                    .ok_or_else(|| {
                        Error::InvalidIndex(
                            "Could not create header. Reference sequence length is invalid."
                                .into(),
                        )
                    })?,
            ),
        );
    }

    let cmdline = {
        let mut out = env::args().fold(String::new(), |acc, part| acc + &part + " ");
        let _ = out.pop();
        out
    };
    let program = Map::<map::Program>::builder()
        .insert(map::program::tag::NAME, CRATE_NAME)
        .insert(map::program::tag::VERSION, crate_version!())
        .insert(map::program::tag::COMMAND_LINE, cmdline)
        .build()
        .expect("@PG entry is generated internally");
    let mut header = builder.build();
    header
        .programs_mut()
        .add(CRATE_NAME, program)
        .map_err(|e| Error::Parse(format!("Invalid @PG entry: {e}")))?;

    Ok(header)
}

/// Create and return a SAM record of either the best verified hit or an
/// unmapped read
fn create_sam_record(
    input_record: Record,
    verified: Vec<VerifiedHit>,
    boundaries: &SequenceBoundaries,
    alignment_parameters: &AlignmentParameters,
    duration: Option<&Duration>,
) -> Result<sam::alignment::RecordBuf> {
    // The best-scoring alignment whose coordinates fall inside one contig is
    // reported in the record; later ones become alternative hits
    let primary = verified.iter().position(|hit| {
        boundaries
            .translate(hit.position, hit.edit_operations.effective_len())
            .is_some()
    });

    let Some(primary) = primary else {
        if !verified.is_empty() {
            debug!(
                "Hits of read \"{input_record}\" could not be mapped to valid coordinates. Reporting it as unmapped."
            );
        }
        return create_unmapped_record(input_record, duration);
    };

    let best = &verified[primary];
    let (tid, relative_pos, _contig) = boundaries
        .translate(best.position, best.edit_operations.effective_len())
        .expect("the primary hit was chosen to be translatable");
    let mapq = estimate_mapping_quality(&verified, primary);
    let (cigar, md_tag) = best.edit_operations.to_sam_fields(best.strand);

    let mut flags = sam::alignment::record::Flags::empty();
    if best.strand == Direction::Backward {
        flags.insert(sam::alignment::record::Flags::REVERSE_COMPLEMENTED);
    }

    let mut bam_builder = sam::alignment::RecordBuf::builder()
        .set_flags(flags)
        .set_reference_sequence_id(usize::try_from(tid).expect("target IDs fit usize"))
        .set_alignment_start(
            usize::try_from(relative_pos + 1)
                .ok()
                .and_then(|pos| pos.try_into().ok())
                .ok_or_else(|| Error::InvalidIndex("Could not compute valid coordinate".into()))?,
        )
        .set_mapping_quality(mapq.try_into().expect("MAPQ is below the ceiling"))
        .set_cigar(cigar.into());

    if let Some(read_name) = &input_record.name {
        bam_builder = bam_builder.set_name(BString::from(read_name.as_slice()));
    }

    // Some fields are reported along the forward strand and need to be
    // reversed for reverse-strand hits
    match best.strand {
        Direction::Forward => {
            bam_builder = bam_builder.set_sequence(sam::alignment::record_buf::Sequence::from(
                input_record.sequence.clone(),
            ));
            if let Some(base_qualities) = &input_record.base_qualities {
                bam_builder = bam_builder.set_quality_scores(base_qualities.clone().into());
            }
        }
        Direction::Backward => {
            bam_builder = bam_builder.set_sequence(sam::alignment::record_buf::Sequence::from(
                sequence::revcomp(&input_record.sequence),
            ));
            if let Some(base_qualities) = &input_record.base_qualities {
                bam_builder = bam_builder.set_quality_scores(
                    base_qualities.iter().rev().copied().collect::<Vec<_>>().into(),
                );
            }
        }
    }

    let mut aux_data: Vec<(
        sam::alignment::record::data::field::Tag,
        sam::alignment::record_buf::data::field::Value,
    )> = Vec::new();
    aux_data.push((
        sam::alignment::record::data::field::tag::Tag::ALIGNMENT_SCORE,
        sam::alignment::record_buf::data::field::Value::Int32(best.score),
    ));
    aux_data.push((
        sam::alignment::record::data::field::tag::Tag::EDIT_DISTANCE,
        sam::alignment::record_buf::data::field::Value::Int32(i32::from(best.edit_distance)),
    ));
    aux_data.push((
        sam::alignment::record::data::field::Tag::MISMATCHED_POSITIONS,
        sam::alignment::record_buf::data::field::Value::String(md_tag),
    ));

    // Alternative alignments (BWA-style auxiliary fields)
    let alternatives = collect_alternatives(
        &verified,
        primary,
        boundaries,
        alignment_parameters.report_mode.alternatives(),
    );
    let num_best = verified
        .iter()
        .filter(|hit| hit.edit_distance == best.edit_distance)
        .count();
    aux_data.push((
        (*b"X0").into(),
        sam::alignment::record_buf::data::field::Value::Int32(
            num_best.try_into().unwrap_or(i32::MAX),
        ),
    ));
    aux_data.push((
        (*b"X1").into(),
        sam::alignment::record_buf::data::field::Value::Int32(
            (verified.len() - num_best).try_into().unwrap_or(i32::MAX),
        ),
    ));
    if !alternatives.is_empty() {
        aux_data.push((
            (*b"XA").into(),
            sam::alignment::record_buf::data::field::Value::String(alternatives.into()),
        ));
    }
    aux_data.push((
        (*b"XT").into(),
        sam::alignment::record_buf::data::field::Value::Character(
            match num_best {
                1 => 'U',
                _ => 'R',
            }
            .try_into()
            .expect("Char is guaranteed to be ASCII"),
        ),
    ));
    if let Some(duration) = duration {
        // Time needed for mapping the read
        aux_data.push((
            (*b"XD").into(),
            sam::alignment::record_buf::data::field::Value::Float(duration.as_secs_f32()),
        ));
    }

    bam_builder = bam_builder.set_data(aux_data.into_iter().collect());

    Ok(bam_builder.build())
}

fn create_unmapped_record(
    input_record: Record,
    duration: Option<&Duration>,
) -> Result<sam::alignment::RecordBuf> {
    let mut bam_builder = sam::alignment::RecordBuf::builder()
        .set_flags(sam::alignment::record::Flags::UNMAPPED)
        .set_sequence(sam::alignment::record_buf::Sequence::from(
            input_record.sequence.clone(),
        ));
    if let Some(read_name) = &input_record.name {
        bam_builder = bam_builder.set_name(BString::from(read_name.as_slice()));
    }
    if let Some(base_qualities) = &input_record.base_qualities {
        bam_builder = bam_builder.set_quality_scores(base_qualities.clone().into());
    }
    let mut aux_data: Vec<(
        sam::alignment::record::data::field::Tag,
        sam::alignment::record_buf::data::field::Value,
    )> = Vec::new();
    if let Some(duration) = duration {
        aux_data.push((
            (*b"XD").into(),
            sam::alignment::record_buf::data::field::Value::Float(duration.as_secs_f32()),
        ));
    }
    bam_builder = bam_builder.set_data(aux_data.into_iter().collect());
    Ok(bam_builder.build())
}

/// Formats alternative hits the BWA way: `chr,{+,-}pos,CIGAR,NM;`
fn collect_alternatives(
    verified: &[VerifiedHit],
    primary: usize,
    boundaries: &SequenceBoundaries,
    limit: usize,
) -> BString {
    let mut out = BString::from(vec![]);
    for hit in verified
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != primary)
        .map(|(_, hit)| hit)
        .take(limit)
    {
        let Some((_, relative_pos, contig_name)) =
            boundaries.translate(hit.position, hit.edit_operations.effective_len())
        else {
            continue;
        };
        let (cigar, _) = hit.edit_operations.to_sam_fields(hit.strand);
        let cigar_string = {
            let cigar = cigar
                .into_iter()
                .collect::<sam::alignment::record_buf::Cigar>();
            let mut buf = Vec::new();
            sam::io::writer::record::write_cigar(&mut buf, &cigar)
                .expect("Generated internally. Should be correct.");
            buf
        };
        out.extend_from_slice(
            format!(
                "{},{}{},{},{};",
                contig_name,
                match hit.strand {
                    Direction::Forward => '+',
                    Direction::Backward => '-',
                },
                relative_pos + 1,
                String::from_utf8_lossy(&cigar_string),
                hit.edit_distance,
            )
            .as_bytes(),
        );
    }
    out
}

/// Estimate mapping quality based on the number of hits for a particular
/// read and the score gap towards suboptimal alignments
fn estimate_mapping_quality(verified: &[VerifiedHit], primary: usize) -> u8 {
    const MAX_MAPQ: u8 = 37;

    let best = &verified[primary];
    let num_best = verified
        .iter()
        .filter(|hit| hit.edit_distance == best.edit_distance)
        .count();
    if num_best > 1 {
        // Multi-mapping
        return 0;
    }
    if verified.len() == 1 {
        // Unique mapping
        return MAX_MAPQ;
    }

    // Pseudo-unique mapping: weigh the best hit against the suboptimal ones
    let prob_best = (best.score as f32).exp2();
    let weighted_suboptimal = verified
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != primary)
        .fold(0.0_f32, |acc, (_, hit)| acc + (hit.score as f32).exp2());
    let alignment_probability =
        (prob_best / (prob_best + weighted_suboptimal)).clamp(0.0, 1.0);

    (-10.0 * (1.0 - alignment_probability).log10())
        .min(f32::from(MAX_MAPQ))
        .round() as u8
}
