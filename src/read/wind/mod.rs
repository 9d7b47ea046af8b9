//! Wind/Waves level-2 binary files (RAD1, RAD2 and TNR receivers).
//!
//! Both products are big-endian "Fortran sequential" files with one sweep per
//! record. Each record starts with a fixed header whose counts describe the
//! size of the blocks that follow.

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
    binary::{column_means, read_f32s, FortranRecords},
    fill_sweep, BinaryError, DataRead, Dataset, ReadError,
};
use crate::{time::epoch_from_calendar, DataContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavesProduct {
    /// Full-resolution sweeps with every S/SP (and Z) sample.
    HighResolution,

    /// Sweeps averaged over 60 seconds, with minima and maxima.
    Averaged60s,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavesReceiver {
    Tnr,
    Rad1,
    Rad2,
    Unknown(i16),
}

impl WavesReceiver {
    pub fn from_code(code: i16) -> WavesReceiver {
        match code {
            0 => WavesReceiver::Tnr,
            1 => WavesReceiver::Rad1,
            2 => WavesReceiver::Rad2,
            c => WavesReceiver::Unknown(c),
        }
    }

    pub fn name(self) -> String {
        match self {
            WavesReceiver::Tnr => "TNR".to_string(),
            WavesReceiver::Rad1 => "RAD1".to_string(),
            WavesReceiver::Rad2 => "RAD2".to_string(),
            WavesReceiver::Unknown(c) => format!("UNKNOWN({c})"),
        }
    }
}

/// The time fields common to both products' headers.
#[derive(Debug, Clone, PartialEq)]
pub struct WavesTime {
    pub p_field: i8,
    pub julian_day_b1: i8,
    pub julian_day_b2: i8,
    pub julian_day_b3: i8,
    pub msec_of_day: i32,
    pub receiver_code: i16,
    pub julian_sec: u32,
    pub year: i16,
    pub month: i16,
    pub day: i16,
    pub hour: i16,
    pub minute: i16,
    pub second: i16,
    pub julian_sec_frac: f32,
}

impl WavesTime {
    fn read<R: Read>(r: &mut R) -> io::Result<WavesTime> {
        Ok(WavesTime {
            p_field: r.read_i8()?,
            julian_day_b1: r.read_i8()?,
            julian_day_b2: r.read_i8()?,
            julian_day_b3: r.read_i8()?,
            msec_of_day: r.read_i32::<BigEndian>()?,
            receiver_code: r.read_i16::<BigEndian>()?,
            julian_sec: r.read_u32::<BigEndian>()?,
            year: r.read_i16::<BigEndian>()?,
            month: r.read_i16::<BigEndian>()?,
            day: r.read_i16::<BigEndian>()?,
            hour: r.read_i16::<BigEndian>()?,
            minute: r.read_i16::<BigEndian>()?,
            second: r.read_i16::<BigEndian>()?,
            julian_sec_frac: r.read_f32::<BigEndian>()?,
        })
    }

    fn epoch(&self) -> Result<Epoch, crate::time::TimeError> {
        epoch_from_calendar(
            self.year.into(),
            self.month.into(),
            self.day.into(),
            self.hour.into(),
            self.minute.into(),
            self.second.into(),
            self.julian_sec_frac.into(),
        )
    }

    pub fn receiver(&self) -> WavesReceiver {
        WavesReceiver::from_code(self.receiver_code)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HresHeader {
    pub time: WavesTime,
    pub isweep: i32,
    pub iunit: i16,
    pub npbs: i16,
    pub sun_angle: f32,
    pub spin_rate: f32,
    pub kspin: i16,
    pub mode: i16,
    pub listfr: i16,
    pub nfreq: i16,
    pub ical: i16,
    pub ianten: i16,
    pub ipola: i16,
    pub idipxy: i16,
    pub sdurcy: f32,
    pub sdurpa: f32,
    pub npalcy: i16,
    pub nfrpal: i16,
    pub npalif: i16,
    pub nspalf: i16,
    pub nzpalf: i16,
}

impl HresHeader {
    pub const SIZE: usize = 80;

    fn read<R: Read>(r: &mut R) -> io::Result<HresHeader> {
        Ok(HresHeader {
            time: WavesTime::read(r)?,
            isweep: r.read_i32::<BigEndian>()?,
            iunit: r.read_i16::<BigEndian>()?,
            npbs: r.read_i16::<BigEndian>()?,
            sun_angle: r.read_f32::<BigEndian>()?,
            spin_rate: r.read_f32::<BigEndian>()?,
            kspin: r.read_i16::<BigEndian>()?,
            mode: r.read_i16::<BigEndian>()?,
            listfr: r.read_i16::<BigEndian>()?,
            nfreq: r.read_i16::<BigEndian>()?,
            ical: r.read_i16::<BigEndian>()?,
            ianten: r.read_i16::<BigEndian>()?,
            ipola: r.read_i16::<BigEndian>()?,
            idipxy: r.read_i16::<BigEndian>()?,
            sdurcy: r.read_f32::<BigEndian>()?,
            sdurpa: r.read_f32::<BigEndian>()?,
            npalcy: r.read_i16::<BigEndian>()?,
            nfrpal: r.read_i16::<BigEndian>()?,
            npalif: r.read_i16::<BigEndian>()?,
            nspalf: r.read_i16::<BigEndian>()?,
            nzpalf: r.read_i16::<BigEndian>()?,
        })
    }
}

/// A high-resolution sweep. Sample blocks are step-major: the value for step
/// `s` at frequency `f` is at `s * freqs_khz.len() + f`.
#[derive(Debug, Clone)]
pub struct HresSweep {
    pub header: HresHeader,
    pub time: Epoch,
    pub freqs_khz: Vec<f64>,
    /// S/SP intensities.
    pub vspal: Vec<f32>,
    /// S/SP sample times, seconds after the sweep start.
    pub tspal: Vec<f32>,
    /// Z intensities (empty unless the sweep has Z samples).
    pub vzpal: Vec<f32>,
    pub tzpal: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AveragedHeader {
    pub time: WavesTime,
    pub iunit: i16,
    pub nfreq: i16,
    pub x_gse: f32,
    pub y_gse: f32,
    pub z_gse: f32,
}

impl AveragedHeader {
    pub const SIZE: usize = 46;

    fn read<R: Read>(r: &mut R) -> io::Result<AveragedHeader> {
        Ok(AveragedHeader {
            time: WavesTime::read(r)?,
            iunit: r.read_i16::<BigEndian>()?,
            nfreq: r.read_i16::<BigEndian>()?,
            x_gse: r.read_f32::<BigEndian>()?,
            y_gse: r.read_f32::<BigEndian>()?,
            z_gse: r.read_f32::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AveragedSweep {
    pub header: AveragedHeader,
    pub time: Epoch,
    pub freqs_khz: Vec<f64>,
    pub intensity_mean: Vec<f32>,
    pub intensity_min: Vec<f32>,
    pub intensity_max: Vec<f32>,
}

#[derive(Debug, Clone)]
pub enum WavesSweeps {
    HighResolution(Vec<HresSweep>),
    Averaged60s(Vec<AveragedSweep>),
}

pub struct WindWavesReader {
    context: DataContext,

    product: WavesProduct,

    sweeps: WavesSweeps,

    /// Per-sweep means over the S/SP and Z steps of high-resolution data.
    hres_means: Vec<(Vec<f32>, Vec<f32>)>,
}

fn count(file: &Path, field: &'static str, value: i16) -> Result<usize, BinaryError> {
    usize::try_from(value).map_err(|_| BinaryError::BadHeaderValue {
        file: file.to_path_buf(),
        field,
        value: value.into(),
    })
}

fn to_f64(freqs: Vec<f32>) -> Vec<f64> {
    freqs.into_iter().map(f64::from).collect()
}

fn decode_hres(file: &Path, offset: u64, payload: &[u8]) -> Result<HresSweep, ReadError> {
    let truncated = || BinaryError::Truncated {
        file: file.to_path_buf(),
        offset,
        wanted: HresHeader::SIZE,
        available: payload.len(),
    };
    let mut cursor = Cursor::new(payload);
    let header = HresHeader::read(&mut cursor).map_err(|_| truncated())?;
    let npalif = count(file, "NPALIF", header.npalif)?;
    let nspalf = count(file, "NSPALF", header.nspalf)?;
    let nzpalf = count(file, "NZPALF", header.nzpalf)?;

    let expected = HresHeader::SIZE + 4 * (npalif + 2 * npalif * nspalf + 2 * npalif * nzpalf);
    if expected != payload.len() {
        return Err(BinaryError::InconsistentRecord {
            file: file.to_path_buf(),
            offset,
            expected,
            actual: payload.len(),
        }
        .into());
    }

    let freqs = read_f32s::<BigEndian, _>(&mut cursor, npalif)?;
    let vspal = read_f32s::<BigEndian, _>(&mut cursor, npalif * nspalf)?;
    let tspal = read_f32s::<BigEndian, _>(&mut cursor, npalif * nspalf)?;
    let vzpal = read_f32s::<BigEndian, _>(&mut cursor, npalif * nzpalf)?;
    let tzpal = read_f32s::<BigEndian, _>(&mut cursor, npalif * nzpalf)?;
    let time = header.time.epoch()?;
    trace!(
        "Sweep {} at {time}: {npalif} frequencies, {nspalf} S/SP steps, {nzpalf} Z steps",
        header.isweep
    );

    Ok(HresSweep {
        header,
        time,
        freqs_khz: to_f64(freqs),
        vspal,
        tspal,
        vzpal,
        tzpal,
    })
}

fn decode_averaged(file: &Path, offset: u64, payload: &[u8]) -> Result<AveragedSweep, ReadError> {
    let mut cursor = Cursor::new(payload);
    let header = AveragedHeader::read(&mut cursor).map_err(|_| BinaryError::Truncated {
        file: file.to_path_buf(),
        offset,
        wanted: AveragedHeader::SIZE,
        available: payload.len(),
    })?;
    let nfreq = count(file, "NFREQ", header.nfreq)?;

    let expected = AveragedHeader::SIZE + 4 * 4 * nfreq;
    if expected != payload.len() {
        return Err(BinaryError::InconsistentRecord {
            file: file.to_path_buf(),
            offset,
            expected,
            actual: payload.len(),
        }
        .into());
    }

    let freqs = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?;
    let intensity_mean = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?;
    let intensity_min = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?;
    let intensity_max = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?;
    let time = header.time.epoch()?;

    Ok(AveragedSweep {
        header,
        time,
        freqs_khz: to_f64(freqs),
        intensity_mean,
        intensity_min,
        intensity_max,
    })
}

impl WindWavesReader {
    pub fn new<P: AsRef<Path>>(file: P, product: WavesProduct) -> Result<WindWavesReader, ReadError> {
        let file = file.as_ref();
        debug!("Using Wind/Waves file ({product:?}): {}", file.display());
        let records = FortranRecords::open(file)?;

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "PRODUCT".to_string(),
            match product {
                WavesProduct::HighResolution => "L2 high resolution",
                WavesProduct::Averaged60s => "L2 60-second averages",
            }
            .to_string(),
        );

        let (sweeps, hres_means, fields) = match product {
            WavesProduct::HighResolution => {
                let sweeps = records
                    .map(|r| {
                        let (offset, payload) = r?;
                        decode_hres(file, offset, &payload)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let means = sweeps
                    .iter()
                    .map(|s| {
                        (
                            column_means(&s.vspal, s.freqs_khz.len()),
                            column_means(&s.vzpal, s.freqs_khz.len()),
                        )
                    })
                    .collect();
                let mut fields = vec!["VSPAL".to_string()];
                if sweeps.iter().any(|s| s.header.nzpalf > 0) {
                    fields.push("VZPAL".to_string());
                }
                (WavesSweeps::HighResolution(sweeps), means, fields)
            }

            WavesProduct::Averaged60s => {
                let sweeps = records
                    .map(|r| {
                        let (offset, payload) = r?;
                        decode_averaged(file, offset, &payload)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let fields = ["INTENSITY_MEAN", "INTENSITY_MIN", "INTENSITY_MAX"]
                    .map(String::from)
                    .to_vec();
                (WavesSweeps::Averaged60s(sweeps), vec![], fields)
            }
        };

        // (time, receiver, unit, frequencies) of every sweep.
        let summary: Vec<(Epoch, WavesReceiver, i16, &[f64])> = match &sweeps {
            WavesSweeps::HighResolution(s) => s
                .iter()
                .map(|s| {
                    (
                        s.time,
                        s.header.time.receiver(),
                        s.header.iunit,
                        s.freqs_khz.as_slice(),
                    )
                })
                .collect(),
            WavesSweeps::Averaged60s(s) => s
                .iter()
                .map(|s| {
                    (
                        s.time,
                        s.header.time.receiver(),
                        s.header.iunit,
                        s.freqs_khz.as_slice(),
                    )
                })
                .collect(),
        };
        metadata.insert(
            "RECEIVER".to_string(),
            summary.iter().map(|s| s.1.name()).unique().join(","),
        );
        metadata.insert(
            "IUNIT".to_string(),
            summary.iter().map(|s| s.2).unique().join(","),
        );

        let context = DataContext::new(
            file,
            summary.iter().map(|s| s.0).collect(),
            summary.iter().map(|s| s.3),
            fields,
            metadata,
        )?;

        Ok(WindWavesReader {
            context,
            product,
            sweeps,
            hres_means,
        })
    }

    pub fn product(&self) -> WavesProduct {
        self.product
    }

    /// The fully decoded sweeps.
    pub fn sweeps(&self) -> &WavesSweeps {
        &self.sweeps
    }
}

impl DataRead for WindWavesReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        match self.product {
            WavesProduct::HighResolution => Dataset::WindWavesL2Hres,
            WavesProduct::Averaged60s => Dataset::WindWavesL260s,
        }
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        super::check_sweep_index(&self.context, sweep)?;
        match &self.sweeps {
            WavesSweeps::HighResolution(sweeps) => {
                let s = &sweeps[sweep];
                let (mean_s, mean_z) = &self.hres_means[sweep];
                let rows = if self.context.fields.len() == 2 {
                    vec![mean_s.as_slice(), mean_z.as_slice()]
                } else {
                    vec![mean_s.as_slice()]
                };
                fill_sweep(data_fq, &self.context, sweep, &s.freqs_khz, &rows)
            }

            WavesSweeps::Averaged60s(sweeps) => {
                let s = &sweeps[sweep];
                fill_sweep(
                    data_fq,
                    &self.context,
                    sweep,
                    &s.freqs_khz,
                    &[
                        s.intensity_mean.as_slice(),
                        s.intensity_min.as_slice(),
                        s.intensity_max.as_slice(),
                    ],
                )
            }
        }
    }
}
