use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use flate2::read::MultiGzDecoder;
use log::error;
use noodles::{fasta, fastq};

use crate::{
    errors::{Error, Result},
    map::record::Record,
};

/// Phred offset of FASTQ quality strings
const QUALITY_OFFSET: u8 = 33;

/// Read input decoupled from the file format. FASTA input yields records
/// without base qualities.
pub enum InputSource {
    Fastq(fastq::io::Reader<Box<dyn BufRead>>),
    Fasta(fasta::io::Reader<Box<dyn BufRead>>),
}

impl InputSource {
    pub fn from_path(path: &str) -> Result<Self> {
        let stem = path.strip_suffix(".gz").unwrap_or(path);
        if stem.ends_with(".fq") || stem.ends_with(".fastq") {
            Ok(Self::Fastq(fastq::io::Reader::new(open_buffered(path)?)))
        } else if stem.ends_with(".fa") || stem.ends_with(".fasta") || stem.ends_with(".fna") {
            Ok(Self::Fasta(fasta::io::Reader::new(open_buffered(path)?)))
        } else {
            Err(Error::InvalidInputType)
        }
    }

    /// Groups the input into chunks that are mapped in parallel
    pub fn task_queue(&mut self, chunk_size: usize) -> TaskQueue<'_> {
        TaskQueue {
            source: self,
            chunk_size,
            chunk_id: 0,
        }
    }

    fn next_record(&mut self) -> Option<Result<Record>> {
        match self {
            Self::Fastq(reader) => reader.records().next().map(|record| {
                let record = record?;
                Ok(Record {
                    name: Some(record.name().to_vec()),
                    sequence: record.sequence().to_ascii_uppercase(),
                    base_qualities: Some(
                        record
                            .quality_scores()
                            .iter()
                            .map(|&quality| quality.saturating_sub(QUALITY_OFFSET))
                            .collect(),
                    ),
                })
            }),
            Self::Fasta(reader) => reader.records().next().map(|record| {
                let record = record?;
                Ok(Record {
                    name: Some(record.name().to_vec()),
                    sequence: record.sequence().as_ref().to_ascii_uppercase(),
                    base_qualities: None,
                })
            }),
        }
    }
}

fn open_buffered(path: &str) -> Result<Box<dyn BufRead>> {
    if !Path::new(path).exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "The given input file could not be found",
        )
        .into());
    }
    let file = File::open(path)?;
    Ok(if path.ends_with(".gz") {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// A chunk of reads to be mapped together
pub struct ReadChunk {
    pub chunk_id: usize,
    pub records: Vec<Record>,
}

/// Keeps track of the processing state of chunks of reads.
/// Very basic error checking, reporting, and recovery happens here.
pub struct TaskQueue<'a> {
    source: &'a mut InputSource,
    chunk_size: usize,
    chunk_id: usize,
}

impl Iterator for TaskQueue<'_> {
    type Item = ReadChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let mut records = Vec::with_capacity(self.chunk_size);
        let mut consecutive_errors = 0;
        while records.len() < self.chunk_size {
            match self.source.next_record() {
                Some(Ok(record)) => {
                    consecutive_errors = 0;
                    if let Some(base_qualities) = &record.base_qualities {
                        if base_qualities.len() != record.sequence.len() {
                            error!(
                                "Skip record \"{record}\" due to different length of sequence and quality strings"
                            );
                            continue;
                        }
                    }
                    records.push(record);
                }
                // One malformed record must not halt a whole run, but a
                // stream that only yields errors must not spin forever
                Some(Err(e)) => {
                    error!("Skip record due to an error: {e}");
                    consecutive_errors += 1;
                    if consecutive_errors > 100 {
                        error!("Giving up on unreadable input stream");
                        break;
                    }
                }
                None => break,
            }
        }
        self.chunk_id += 1;

        if records.is_empty() {
            None
        } else {
            Some(ReadChunk {
                chunk_id: self.chunk_id - 1,
                records,
            })
        }
    }
}
