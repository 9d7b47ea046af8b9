//! Errors from reading instrument files.

use std::path::PathBuf;

use thiserror::Error;

use super::Dataset;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Output {array_type} array did not have expected {expected_len} elements on axis {axis_num}")]
    BadArraySize {
        array_type: &'static str,
        expected_len: usize,
        axis_num: usize,
    },

    #[error("Sweep {sweep} requested, but there are only {num_sweeps} sweeps")]
    SweepOutOfRange { sweep: usize, num_sweeps: usize },

    #[error("{} doesn't contain any complete sweeps", file.display())]
    NoSweeps { file: PathBuf },

    #[error("{dataset} files are not dynamic spectra and can't be read sweep by sweep")]
    NotSpectral { dataset: Dataset },

    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error(transparent)]
    Time(#[from] crate::time::TimeError),

    #[error(transparent)]
    Kronos(#[from] super::kronos::KronosError),

    #[error(transparent)]
    RadioJove(#[from] super::radiojove::RadioJoveError),

    #[error(transparent)]
    Nda(#[from] super::nda::NdaError),

    #[error(transparent)]
    Callisto(#[from] super::ecallisto::CallistoError),

    #[error(transparent)]
    Fits(#[from] super::fits::FitsError),

    #[error(transparent)]
    Pds3(#[from] super::pds3::Pds3Error),

    #[error(transparent)]
    Cdf(#[from] super::cdf::CdfError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("{} doesn't exist", file.display())]
    Missing { file: PathBuf },

    #[error("Couldn't work out which dataset {} belongs to", file.display())]
    Unknown { file: PathBuf },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// Errors shared by all of the record-oriented binary readers.
#[derive(Error, Debug)]
pub enum BinaryError {
    #[error("{}: record starting at byte {offset} declares {leading} bytes but ends with {trailing}", file.display())]
    RecordLength {
        file: PathBuf,
        offset: u64,
        leading: u32,
        trailing: u32,
    },

    #[error("{}: record starting at byte {offset} is truncated (wanted {wanted} bytes, {available} available)", file.display())]
    Truncated {
        file: PathBuf,
        offset: u64,
        wanted: usize,
        available: usize,
    },

    #[error("{}: expected magic word {expected:#010x} at byte {offset}, got {got:#010x}", file.display())]
    BadMagic {
        file: PathBuf,
        offset: u64,
        expected: u32,
        got: u32,
    },

    #[error("{}: record starting at byte {offset} has {actual} bytes, but its header implies {expected}", file.display())]
    InconsistentRecord {
        file: PathBuf,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("{}: header field {field} has an invalid value {value}", file.display())]
    BadHeaderValue {
        file: PathBuf,
        field: &'static str,
        value: i64,
    },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
