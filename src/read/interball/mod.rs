//! Interball-2 Polrad RSPN2 spectra.
//!
//! The files are a plain big-endian sequence of records, each with a short
//! header declaring how many frequencies follow.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
    path::Path,
};

use byteorder::{BigEndian, ReadBytesExt};
use hifitime::Epoch;
use itertools::Itertools;
use log::{debug, trace, warn};
use ndarray::prelude::*;

use super::{binary::read_f32s, fill_sweep, DataRead, Dataset, ReadError};
use crate::{time::epoch_from_doy, DataContext};

const FIELDS: [&str; 3] = ["EX", "EY", "EZ"];

#[derive(Debug, Clone, PartialEq)]
pub struct PolradHeader {
    pub year: u16,
    pub doy: u16,
    pub msec_of_day: u32,
    pub mode: u16,
    pub nfreq: u16,
}

impl PolradHeader {
    pub const SIZE: usize = 12;

    fn read<R: Read>(r: &mut R) -> std::io::Result<PolradHeader> {
        Ok(PolradHeader {
            year: r.read_u16::<BigEndian>()?,
            doy: r.read_u16::<BigEndian>()?,
            msec_of_day: r.read_u32::<BigEndian>()?,
            mode: r.read_u16::<BigEndian>()?,
            nfreq: r.read_u16::<BigEndian>()?,
        })
    }

    fn record_len(&self) -> usize {
        PolradHeader::SIZE + 4 * usize::from(self.nfreq) * (FIELDS.len() + 1)
    }
}

#[derive(Debug, Clone)]
pub struct PolradSweep {
    pub header: PolradHeader,
    pub time: Epoch,
    pub freqs_khz: Vec<f64>,
    pub ex: Vec<f32>,
    pub ey: Vec<f32>,
    pub ez: Vec<f32>,
}

pub struct PolradReader {
    context: DataContext,

    sweeps: Vec<PolradSweep>,
}

impl PolradReader {
    pub fn new<P: AsRef<Path>>(file: P) -> Result<PolradReader, ReadError> {
        let file = file.as_ref();
        debug!("Using Interball Polrad file: {}", file.display());
        let data = std::fs::read(file)?;

        let mut sweeps = vec![];
        let mut offset = 0;
        while offset < data.len() {
            let rest = &data[offset..];
            let mut cursor = Cursor::new(rest);
            let header = match PolradHeader::read(&mut cursor) {
                Ok(h) if h.record_len() <= rest.len() => h,
                _ => {
                    warn!(
                        "{}: ignoring {} trailing bytes of an incomplete record",
                        file.display(),
                        rest.len()
                    );
                    break;
                }
            };
            let nfreq = usize::from(header.nfreq);
            let freqs_khz = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?
                .into_iter()
                .map(f64::from)
                .collect();
            let ex = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?;
            let ey = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?;
            let ez = read_f32s::<BigEndian, _>(&mut cursor, nfreq)?;
            let time = epoch_from_doy(
                header.year.into(),
                header.doy.into(),
                header.msec_of_day,
            )?;
            trace!("Record at byte {offset}: {time}, {nfreq} frequencies");
            offset += header.record_len();
            sweeps.push(PolradSweep {
                header,
                time,
                freqs_khz,
                ex,
                ey,
                ez,
            });
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "MODE".to_string(),
            sweeps.iter().map(|s| s.header.mode).unique().join(","),
        );
        let context = DataContext::new(
            file,
            sweeps.iter().map(|s| s.time).collect(),
            sweeps.iter().map(|s| s.freqs_khz.as_slice()),
            FIELDS.iter().map(|f| f.to_string()).collect(),
            metadata,
        )?;

        Ok(PolradReader { context, sweeps })
    }

    pub fn sweeps(&self) -> &[PolradSweep] {
        &self.sweeps
    }
}

impl DataRead for PolradReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        Dataset::InterballPolrad
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        super::check_sweep_index(&self.context, sweep)?;
        let s = &self.sweeps[sweep];
        fill_sweep(
            data_fq,
            &self.context,
            sweep,
            &s.freqs_khz,
            &[s.ex.as_slice(), s.ey.as_slice(), s.ez.as_slice()],
        )
    }
}
