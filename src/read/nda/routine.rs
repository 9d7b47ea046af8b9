use std::{collections::BTreeMap, path::Path};

use hifitime::{Duration, Epoch};
use log::{debug, trace};
use ndarray::prelude::*;
use regex::{Regex, RegexBuilder};

use super::NdaError;
use crate::{
    read::{
        binary::fixed_records, fill_sweep, linspace, BinaryError, DataRead, Dataset, ReadError,
    },
    time::epoch_from_calendar,
    DataContext,
};

const HEADER_SIZE: usize = 405;
const NUM_CHANNELS: usize = 400;
const SWEEP_SIZE: usize = 2 * NUM_CHANNELS;
const DEFAULT_FREQ_RANGE_MHZ: (f64, f64) = (10.0, 40.0);
const DEFAULT_PERIOD_MS: f64 = 1000.0;

lazy_static::lazy_static! {
    static ref DATE: Regex = Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4}|\d{2})").unwrap();

    static ref TIME: Regex = Regex::new(r"(\d{1,2}):(\d{2}):(\d{2})").unwrap();

    static ref FREQ_RANGE: Regex =
        RegexBuilder::new(r"(\d+(?:\.\d*)?)\s*-\s*(\d+(?:\.\d*)?)\s*MHz")
            .case_insensitive(true).build().unwrap();

    static ref PERIOD: Regex =
        RegexBuilder::new(r"(\d+(?:\.\d*)?)\s*ms")
            .case_insensitive(true).build().unwrap();
}

/// What can be gleaned from the free-form ASCII header of a Routine file.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineHeader {
    pub text: String,
    pub start: Epoch,
    pub freq_min_mhz: f64,
    pub freq_max_mhz: f64,
    pub period: Duration,
}

fn capture<T: std::str::FromStr>(caps: &regex::Captures, i: usize) -> Option<T> {
    caps.get(i).and_then(|m| m.as_str().parse().ok())
}

impl RoutineHeader {
    pub fn parse(file: &Path, bytes: &[u8]) -> Result<RoutineHeader, ReadError> {
        let text = String::from_utf8_lossy(bytes)
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string();
        let missing = |what| NdaError::MissingHeaderField {
            file: file.to_path_buf(),
            what,
        };

        let (day, month, year): (i32, i32, &str) = DATE
            .captures(&text)
            .and_then(|c| Some((capture(&c, 1)?, capture(&c, 2)?, c.get(3)?.as_str())))
            .ok_or_else(|| missing("date"))?;
        let year = match (year.len(), year.parse::<i32>()) {
            (2, Ok(y)) if y >= 70 => 1900 + y,
            (2, Ok(y)) => 2000 + y,
            (_, Ok(y)) => y,
            (_, Err(_)) => return Err(missing("date").into()),
        };
        let (hour, minute, second): (i32, i32, i32) = TIME
            .captures(&text)
            .and_then(|c| Some((capture(&c, 1)?, capture(&c, 2)?, capture(&c, 3)?)))
            .ok_or_else(|| missing("time"))?;
        let start = epoch_from_calendar(year, month, day, hour, minute, second, 0.0)?;

        let (freq_min_mhz, freq_max_mhz): (f64, f64) = FREQ_RANGE
            .captures(&text)
            .and_then(|c| Some((capture(&c, 1)?, capture(&c, 2)?)))
            .unwrap_or(DEFAULT_FREQ_RANGE_MHZ);
        let period_ms: f64 = PERIOD
            .captures(&text)
            .and_then(|c| capture(&c, 1))
            .unwrap_or(DEFAULT_PERIOD_MS);

        Ok(RoutineHeader {
            text,
            start,
            freq_min_mhz,
            freq_max_mhz,
            period: Duration::from_milliseconds(period_ms),
        })
    }
}

pub struct RoutineReader {
    context: DataContext,

    header: RoutineHeader,

    freqs_khz: Vec<f64>,

    /// (LH, RH) per sweep.
    sweeps: Vec<(Vec<f32>, Vec<f32>)>,
}

impl RoutineReader {
    pub fn new<P: AsRef<Path>>(file: P) -> Result<RoutineReader, ReadError> {
        let file = file.as_ref();
        debug!("Using NDA Routine file: {}", file.display());
        let data = std::fs::read(file)?;
        let header_bytes = data.get(..HEADER_SIZE).ok_or(BinaryError::Truncated {
            file: file.to_path_buf(),
            offset: 0,
            wanted: HEADER_SIZE,
            available: data.len(),
        })?;
        let header = RoutineHeader::parse(file, header_bytes)?;
        debug!(
            "Start {}, {} - {} MHz, one sweep every {}",
            header.start, header.freq_min_mhz, header.freq_max_mhz, header.period
        );

        let freqs_khz = linspace(
            header.freq_min_mhz * 1e3,
            header.freq_max_mhz * 1e3,
            NUM_CHANNELS,
        );
        let sweeps = fixed_records(&data[HEADER_SIZE..], SWEEP_SIZE, file, true)?
            .map(|sweep| {
                let (lh, rh) = sweep.split_at(NUM_CHANNELS);
                (
                    lh.iter().copied().map(f32::from).collect(),
                    rh.iter().copied().map(f32::from).collect(),
                )
            })
            .collect::<Vec<(Vec<f32>, Vec<f32>)>>();
        trace!("{} sweeps", sweeps.len());

        let timestamps = (0..sweeps.len())
            .map(|k| header.start + header.period * k as f64)
            .collect();
        let mut metadata = BTreeMap::new();
        metadata.insert("HEADER".to_string(), header.text.clone());
        let context = DataContext::new(
            file,
            timestamps,
            [freqs_khz.as_slice()],
            vec!["LH".to_string(), "RH".to_string()],
            metadata,
        )?;

        Ok(RoutineReader {
            context,
            header,
            freqs_khz,
            sweeps,
        })
    }

    pub fn header(&self) -> &RoutineHeader {
        &self.header
    }
}

impl DataRead for RoutineReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        Dataset::NdaRoutine
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        crate::read::check_sweep_index(&self.context, sweep)?;
        let (lh, rh) = &self.sweeps[sweep];
        fill_sweep(
            data_fq,
            &self.context,
            sweep,
            &self.freqs_khz,
            &[lh.as_slice(), rh.as_slice()],
        )
    }
}
