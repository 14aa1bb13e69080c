use core::fmt;
use std::{error, io, result};

/// Internally, we only use this Error type and a newtype wrapper around
/// `std::result::Result<T, E>` where `E` is fixed. When an additional input file type machinery is
/// added, additional `From<E> for Error` impls might be needed to allow to plug in a
/// `Record`-yielding `Iterator` that returns `Result<T, E>` on calls to its `next()` method.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Parse(String),
    InvalidInputType,
    InvalidIndex(String),
    IndexVersionMismatch { running: u8, on_disk: u8 },
    CapacityExceeded { length: u64, maximum: u64 },
    ContigBoundaryOverlap,
}

impl fmt::Display for Error {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {err}"),
            Error::Parse(err) => write!(f, "Parse error: {err}"),
            Error::InvalidInputType => write!(
                f,
                "Please specify a path to an input file that ends with \".fq\", \".fastq\", \".fa\", or \".fasta\" (optionally gzipped)"
            ),
            Error::InvalidIndex(err) => write!(f, "Index is invalid: {err}"),
            Error::IndexVersionMismatch { running, on_disk } => write!(
                f,
                "The provided index (version {on_disk}) is incompatible with this build (version {running}). Please re-create the index."
            ),
            Error::CapacityExceeded { length, maximum } => write!(
                f,
                "Sequence length {length} exceeds the maximum of {maximum} bases"
            ),
            Error::ContigBoundaryOverlap => {
                write!(f, "Alignment position overlaps a contig boundary")
            }
        }
    }
}

impl From<io::Error> for Error {
    #[cold]
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<bincode::Error> for Error {
    #[cold]
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(e) => Error::Io(e),
            _ => Error::InvalidIndex("Invalid encoding".to_string()),
        }
    }
}

impl error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;
