//! Readers and converters for the data files of space-physics radio
//! instruments: Wind/Waves, Cassini/Kronos, RadioJOVE, the Nançay Decameter
//! Array, STEREO/Waves, Interball/Polrad, e-Callisto, PDS3 products and ISTP
//! CDF files.

pub mod averaging;
pub mod read;
pub mod time;
pub mod write;

pub use read::{open_reader, DataRead, Dataset};

use std::{collections::BTreeMap, path::PathBuf};

use hifitime::{Duration, Epoch};
use vec1::Vec1;

/// What a reader knows about its file, independent of the instrument.
#[derive(Debug, Clone)]
pub struct DataContext {
    /// The file on disk.
    pub file: PathBuf,

    /// The start time of each sweep, in file order. Files are usually, but
    /// not necessarily, time ordered.
    pub timestamps: Vec1<Epoch>,

    /// The median spacing of consecutive sweeps. `None` if there is only one
    /// sweep.
    pub time_res: Option<Duration>,

    /// The frequency grid \[kHz\]: the ascending union of every sweep's
    /// frequencies. Sweeps are read onto this grid.
    pub freqs_khz: Vec1<f64>,

    /// The names of the quantities measured in each sweep (e.g. "LH" and
    /// "RH"). Each is a row of a read sweep.
    pub fields: Vec1<String>,

    /// Decoded header values that are worth reporting.
    pub metadata: BTreeMap<String, String>,
}

impl DataContext {
    pub fn num_sweeps(&self) -> usize {
        self.timestamps.len()
    }
}
