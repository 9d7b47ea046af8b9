//! Cassini/RPWS/HFR "Kronos" files.
//!
//! Each level is a flat little-endian array of fixed-size records, one per
//! measurement. Level-1 and level-2 records carry their own time and
//! frequency; level-3 records (polarisation products) don't, and are matched
//! one-to-one with the records of the level-2 file of the same name.


use std::{
    collections::BTreeMap,
    io::Cursor,
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt};
use itertools::Itertools;
use log::{debug, trace, warn};
use ndarray::prelude::*;
use thiserror::Error;

use super::{binary::fixed_records, fill_sweep, DataRead, Dataset, ReadError};
use crate::{
    time::{epoch_from_t97, epoch_from_ydh},
    DataContext,
};

#[derive(Error, Debug)]
pub enum KronosError {
    #[error("{} needs its level-2 companion {}, which doesn't exist", file.display(), companion.display())]
    MissingCompanion { file: PathBuf, companion: PathBuf },

    #[error("{} and its companion {} don't describe the same measurements: {reason}", file.display(), companion.display())]
    CompanionMismatch {
        file: PathBuf,
        companion: PathBuf,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KronosLevel {
    /// Calibrated auto- and cross-correlations.
    N1,

    /// As N1, plus integration time and bandwidth.
    N2,

    /// Polarisation products from a 2-antenna direction finding.
    N3d,

    /// Polarisation products including linear polarisation.
    N3e,
}

impl KronosLevel {
    pub fn record_size(self) -> usize {
        match self {
            KronosLevel::N1 => 37,
            KronosLevel::N2 => 45,
            KronosLevel::N3d => 32,
            KronosLevel::N3e => 40,
        }
    }

    /// The names of the measured quantities, in record order.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            KronosLevel::N1 | KronosLevel::N2 => &["AUTO_X", "AUTO_Z", "CROSS_R", "CROSS_I"],
            KronosLevel::N3d => &["S", "V", "TH", "PH", "SNX", "SNZ"],
            KronosLevel::N3e => &["S", "Q", "U", "V", "TH", "PH", "SNX", "SNZ"],
        }
    }

    fn has_time(self) -> bool {
        matches!(self, KronosLevel::N1 | KronosLevel::N2)
    }

    fn dataset(self) -> Dataset {
        match self {
            KronosLevel::N1 => Dataset::KronosN1,
            KronosLevel::N2 => Dataset::KronosN2,
            KronosLevel::N3d => Dataset::KronosN3d,
            KronosLevel::N3e => Dataset::KronosN3e,
        }
    }
}

/// The antenna (or antenna pair) a level-1/2 measurement was made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Antenna {
    ExPlus,
    ExMinus,
    DipoleX,
    Ez,
    Unknown(i8),
}

impl From<i8> for Antenna {
    fn from(code: i8) -> Antenna {
        match code {
            0 => Antenna::ExPlus,
            1 => Antenna::ExMinus,
            2 => Antenna::DipoleX,
            3 => Antenna::Ez,
            c => Antenna::Unknown(c),
        }
    }
}

/// A decoded record. Level-3 records get `t97` and `freq_khz` from their
/// level-2 companion.
#[derive(Debug, Clone, PartialEq)]
pub struct KronosRecord {
    /// Hour of the measurement, as `YYYYDDDHH`.
    pub ydh: i32,

    /// Index of the measurement within its hour.
    pub num: i32,

    pub t97: f64,

    pub freq_khz: f32,

    /// Integration time \[s\] (level 2 only).
    pub dt: Option<f32>,

    /// Bandwidth \[kHz\] (level 2 only).
    pub df: Option<f32>,

    /// Level 1 and 2 only.
    pub antenna: Option<Antenna>,

    /// The measured quantities, named by [`KronosLevel::fields`].
    pub values: Vec<f32>,
}

fn decode_record(level: KronosLevel, bytes: &[u8]) -> std::io::Result<KronosRecord> {
    let mut r = Cursor::new(bytes);
    let ydh = r.read_i32::<LittleEndian>()?;
    let num = r.read_i32::<LittleEndian>()?;
    let mut record = KronosRecord {
        ydh,
        num,
        t97: f64::NAN,
        freq_khz: f32::NAN,
        dt: None,
        df: None,
        antenna: None,
        values: vec![],
    };
    if level.has_time() {
        record.t97 = r.read_f64::<LittleEndian>()?;
        record.freq_khz = r.read_f32::<LittleEndian>()?;
        if level == KronosLevel::N2 {
            record.dt = Some(r.read_f32::<LittleEndian>()?);
            record.df = Some(r.read_f32::<LittleEndian>()?);
        }
    }
    let mut values = vec![0.0; level.fields().len()];
    r.read_f32_into::<LittleEndian>(&mut values)?;
    record.values = values;
    if level.has_time() {
        record.antenna = Some(Antenna::from(r.read_i8()?));
    }
    Ok(record)
}

fn read_records(file: &Path, level: KronosLevel) -> Result<Vec<KronosRecord>, ReadError> {
    let data = std::fs::read(file)?;
    let records = fixed_records(&data, level.record_size(), file, false)?
        .map(|chunk| decode_record(level, chunk))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        "{}: {} level {level:?} records",
        file.display(),
        records.len()
    );
    Ok(records)
}

/// The level-2 file with the same stem as `file`, in either case.
fn companion_of(file: &Path) -> Result<PathBuf, KronosError> {
    let lower = file.with_extension("n2");
    if lower.exists() {
        return Ok(lower);
    }
    let upper = file.with_extension("N2");
    if upper.exists() {
        return Ok(upper);
    }
    Err(KronosError::MissingCompanion {
        file: file.to_path_buf(),
        companion: lower,
    })
}

/// Copy time and frequency from the level-2 records onto the level-3 ones.
fn join_companion(
    file: &Path,
    companion: &Path,
    records: &mut [KronosRecord],
    n2: &[KronosRecord],
) -> Result<(), KronosError> {
    let mismatch = |reason: String| KronosError::CompanionMismatch {
        file: file.to_path_buf(),
        companion: companion.to_path_buf(),
        reason,
    };
    if records.len() != n2.len() {
        return Err(mismatch(format!(
            "{} records vs. {}",
            records.len(),
            n2.len()
        )));
    }
    for (i, (r, c)) in records.iter_mut().zip(n2).enumerate() {
        if r.num != c.num || r.ydh != c.ydh {
            return Err(mismatch(format!(
                "record {i} is measurement {}/{} vs. {}/{}",
                r.ydh, r.num, c.ydh, c.num
            )));
        }
        r.t97 = c.t97;
        r.freq_khz = c.freq_khz;
    }
    Ok(())
}

/// Split records into sweeps: a sweep ends when the frequency stops
/// increasing. Returns the index ranges of the sweeps.
fn sweep_ranges(records: &[KronosRecord]) -> Vec<std::ops::Range<usize>> {
    let mut ranges = vec![];
    let mut start = 0;
    for i in 1..records.len() {
        if records[i].freq_khz <= records[i - 1].freq_khz {
            ranges.push(start..i);
            start = i;
        }
    }
    if !records.is_empty() {
        ranges.push(start..records.len());
    }
    ranges
}

struct KronosSweep {
    freqs_khz: Vec<f64>,
    /// One row per field, parallel to `freqs_khz`.
    rows: Vec<Vec<f32>>,
}

pub struct KronosReader {
    context: DataContext,

    level: KronosLevel,

    records: Vec<KronosRecord>,

    sweeps: Vec<KronosSweep>,
}

impl KronosReader {
    pub fn new<P: AsRef<Path>>(file: P, level: KronosLevel) -> Result<KronosReader, ReadError> {
        let file = file.as_ref();
        debug!("Using Kronos {level:?} file: {}", file.display());
        let mut records = read_records(file, level)?;

        let mut metadata = BTreeMap::new();
        if !level.has_time() {
            let companion = companion_of(file)?;
            debug!("Level-2 companion: {}", companion.display());
            let n2 = read_records(&companion, KronosLevel::N2)?;
            join_companion(file, &companion, &mut records, &n2)?;
            metadata.insert(
                "COMPANION".to_string(),
                companion.display().to_string(),
            );
        }

        match records
            .iter()
            .enumerate()
            .find_map(|(i, r)| epoch_from_ydh(r.ydh).ok().map(|hour| (i, hour)))
        {
            Some((0, hour)) => {
                metadata.insert("FIRST_HOUR".to_string(), hour.to_string());
            }
            Some((i, hour)) => {
                warn!(
                    "{}: the first {i} records have an invalid ydh, FIRST_HOUR is from record {i}",
                    file.display()
                );
                metadata.insert("FIRST_HOUR".to_string(), hour.to_string());
            }
            None => warn!("{}: no record has a valid ydh", file.display()),
        }
        let antennas = records
            .iter()
            .filter_map(|r| r.antenna)
            .unique()
            .map(|a| format!("{a:?}"))
            .join(",");
        if !antennas.is_empty() {
            metadata.insert("ANTENNAS".to_string(), antennas);
        }

        let mut timestamps = vec![];
        let mut sweeps = vec![];
        for range in sweep_ranges(&records) {
            let sweep = &records[range];
            timestamps.push(epoch_from_t97(sweep[0].t97));
            let freqs_khz = sweep.iter().map(|r| f64::from(r.freq_khz)).collect();
            let rows = (0..level.fields().len())
                .map(|field| sweep.iter().map(|r| r.values[field]).collect())
                .collect();
            sweeps.push(KronosSweep { freqs_khz, rows });
        }
        if sweeps.iter().any(|s| s.freqs_khz.iter().any(|f| f.is_nan())) {
            warn!("{}: some records have no frequency", file.display());
        }
        trace!("{} sweeps", sweeps.len());

        let context = DataContext::new(
            file,
            timestamps,
            sweeps.iter().map(|s| s.freqs_khz.as_slice()),
            level.fields().iter().map(|f| f.to_string()).collect(),
            metadata,
        )?;

        Ok(KronosReader {
            context,
            level,
            records,
            sweeps,
        })
    }

    pub fn level(&self) -> KronosLevel {
        self.level
    }

    /// Every record of the file, in file order.
    pub fn records(&self) -> &[KronosRecord] {
        &self.records
    }
}

impl DataRead for KronosReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        self.level.dataset()
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        super::check_sweep_index(&self.context, sweep)?;
        let s = &self.sweeps[sweep];
        let rows = s.rows.iter().map(|r| r.as_slice()).collect::<Vec<_>>();
        fill_sweep(data_fq, &self.context, sweep, &s.freqs_khz, &rows)
    }
}
