//! STEREO/Waves level-2 binary files (LFR and HFR receivers).

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    io::{self, Cursor, Read},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt};
use hifitime::Epoch;
use itertools::Itertools;
use log::{debug, trace};
use ndarray::prelude::*;

use super::{
    binary::{read_f32s, FortranRecords},
    fill_sweep, BinaryError, DataRead, Dataset, ReadError,
};
use crate::{time::epoch_from_calendar, DataContext};

const FIELDS: [&str; 6] = ["AGC1", "AGC2", "AUTO1", "AUTO2", "CROSS_R", "CROSS_I"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Spacecraft {
    Ahead,
    Behind,
}

impl Spacecraft {
    /// Work out the spacecraft from a file name like `sta_wav_...`.
    pub fn from_file_name(file: &Path) -> Option<Spacecraft> {
        let name = file.file_name()?.to_str()?.to_lowercase();
        if name.starts_with("sta") {
            Some(Spacecraft::Ahead)
        } else if name.starts_with("stb") {
            Some(Spacecraft::Behind)
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Spacecraft::Ahead => "STEREO-A",
            Spacecraft::Behind => "STEREO-B",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StereoReceiver {
    Lfr,
    Hfr1,
    Hfr2,
    Unknown(i16),
}

impl From<i16> for StereoReceiver {
    fn from(code: i16) -> StereoReceiver {
        match code {
            0 => StereoReceiver::Lfr,
            1 => StereoReceiver::Hfr1,
            2 => StereoReceiver::Hfr2,
            c => StereoReceiver::Unknown(c),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StereoHeader {
    pub year: i16,
    pub month: i16,
    pub day: i16,
    pub hour: i16,
    pub minute: i16,
    pub second: i16,
    pub second_frac: f32,
    pub receiver: StereoReceiver,
    pub mode: i16,
    pub nfreq: i16,
    pub spare: i16,
}

impl StereoHeader {
    pub const SIZE: usize = 24;

    fn read<R: Read>(r: &mut R) -> io::Result<StereoHeader> {
        Ok(StereoHeader {
            year: r.read_i16::<BigEndian>()?,
            month: r.read_i16::<BigEndian>()?,
            day: r.read_i16::<BigEndian>()?,
            hour: r.read_i16::<BigEndian>()?,
            minute: r.read_i16::<BigEndian>()?,
            second: r.read_i16::<BigEndian>()?,
            second_frac: r.read_f32::<BigEndian>()?,
            receiver: StereoReceiver::from(r.read_i16::<BigEndian>()?),
            mode: r.read_i16::<BigEndian>()?,
            nfreq: r.read_i16::<BigEndian>()?,
            spare: r.read_i16::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StereoSweep {
    pub header: StereoHeader,
    pub time: Epoch,
    pub freqs_khz: Vec<f64>,
    /// One row per field, in the order of the record.
    pub rows: Vec<Vec<f32>>,
}

fn decode_sweep(file: &Path, offset: u64, payload: &[u8]) -> Result<StereoSweep, ReadError> {
    let mut cursor = Cursor::new(payload);
    let header = StereoHeader::read(&mut cursor).map_err(|_| BinaryError::Truncated {
        file: file.to_path_buf(),
        offset,
        wanted: StereoHeader::SIZE,
        available: payload.len(),
    })?;
    let nfreq = usize::try_from(header.nfreq).map_err(|_| BinaryError::BadHeaderValue {
        file: file.to_path_buf(),
        field: "NFREQ",
        value: header.nfreq.into(),
    })?;
    let expected = StereoHeader::SIZE + 4 * nfreq * (FIELDS.len() + 1);
    if expected != payload.len() {
        return Err(BinaryError::InconsistentRecord {
            file: file.to_path_buf(),
            offset,
            expected,
            actual: payload.len(),
        }
        .into());
    }

    let freqs_khz = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?
        .into_iter()
        .map(f64::from)
        .collect();
    let rows = FIELDS
        .iter()
        .map(|_| read_f32s::<BigEndian, _>(&mut cursor, nfreq))
        .collect::<Result<Vec<_>, _>>()?;
    let time = epoch_from_calendar(
        header.year.into(),
        header.month.into(),
        header.day.into(),
        header.hour.into(),
        header.minute.into(),
        header.second.into(),
        header.second_frac.into(),
    )?;
    trace!("Sweep at {time}: {:?}, {nfreq} frequencies", header.receiver);

    Ok(StereoSweep {
        header,
        time,
        freqs_khz,
        rows,
    })
}

pub struct StereoWavesReader {
    context: DataContext,

    spacecraft: Option<Spacecraft>,

    sweeps: Vec<StereoSweep>,
}

impl StereoWavesReader {
    pub fn new<P: AsRef<Path>>(file: P) -> Result<StereoWavesReader, ReadError> {
        let file = file.as_ref();
        debug!("Using STEREO/Waves file: {}", file.display());
        let spacecraft = Spacecraft::from_file_name(file);
        let sweeps = FortranRecords::open(file)?
            .map(|r| {
                let (offset, payload) = r?;
                decode_sweep(file, offset, &payload)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut metadata = BTreeMap::new();
        if let Some(sc) = spacecraft {
            metadata.insert("SPACECRAFT".to_string(), sc.name().to_string());
        }
        metadata.insert(
            "RECEIVER".to_string(),
            sweeps
                .iter()
                .map(|s| format!("{:?}", s.header.receiver).to_uppercase())
                .unique()
                .join(","),
        );

        let context = DataContext::new(
            file,
            sweeps.iter().map(|s| s.time).collect(),
            sweeps.iter().map(|s| s.freqs_khz.as_slice()),
            FIELDS.iter().map(|f| f.to_string()).collect(),
            metadata,
        )?;

        Ok(StereoWavesReader {
            context,
            spacecraft,
            sweeps,
        })
    }

    pub fn spacecraft(&self) -> Option<Spacecraft> {
        self.spacecraft
    }

    pub fn sweeps(&self) -> &[StereoSweep] {
        &self.sweeps
    }
}

impl DataRead for StereoWavesReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        Dataset::StereoWavesL2
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        super::check_sweep_index(&self.context, sweep)?;
        let s = &self.sweeps[sweep];
        let rows = s.rows.iter().map(|r| r.as_slice()).collect::<Vec<_>>();
        fill_sweep(data_fq, &self.context, sweep, &s.freqs_khz, &rows)
    }
}
