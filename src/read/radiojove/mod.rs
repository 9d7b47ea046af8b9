//! Radio-SkyPipe spectrograph (`.sps`) files recorded by RadioJOVE stations.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    io::{self, Cursor, Read},
    path::{Path, PathBuf},
};

use byteorder::{LittleEndian, ReadBytesExt};
use hifitime::Epoch;
use log::{debug, trace, warn};
use ndarray::prelude::*;
use thiserror::Error;

use super::{
    binary::{fixed_records, fixed_str},
    fill_sweep, linspace, BinaryError, DataRead, Dataset, ReadError,
};
use crate::{time::epoch_from_ole, DataContext};

const NOTE_BLOCK_START: &[u8] = b"*[[*";
const NOTE_BLOCK_END: &[u8] = b"*]]*";

#[derive(Error, Debug)]
pub enum RadioJoveError {
    #[error("{}: version string '{version}' doesn't start with *SPS; is this a spectrograph file?", file.display())]
    BadVersion { file: PathBuf, version: String },

    #[error("{}: the header notes don't specify {key}", file.display())]
    MissingNoteKey { file: PathBuf, key: &'static str },

    #[error("{}: couldn't parse the value of note {key} ('{value}')", file.display())]
    BadNoteValue {
        file: PathBuf,
        key: &'static str,
        value: String,
    },
}

/// The fixed part of an SPS header.
#[derive(Debug, Clone, PartialEq)]
pub struct SpsHeader {
    pub version: String,
    /// OLE date of the first record.
    pub start: f64,
    /// OLE date of the last record.
    pub stop: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub chart_max: f64,
    pub chart_min: f64,
    pub timezone: i16,
    pub source: String,
    pub author: String,
    pub obs_name: String,
    pub obs_location: String,
    pub num_channels: i16,
    pub note_length: i32,
}

impl SpsHeader {
    pub const SIZE: usize = 156;

    fn read<R: Read>(r: &mut R) -> io::Result<SpsHeader> {
        fn text<R: Read>(r: &mut R, len: usize) -> io::Result<String> {
            let mut buf = vec![0; len];
            r.read_exact(&mut buf)?;
            Ok(fixed_str(&buf))
        }

        Ok(SpsHeader {
            version: text(r, 10)?,
            start: r.read_f64::<LittleEndian>()?,
            stop: r.read_f64::<LittleEndian>()?,
            latitude: r.read_f64::<LittleEndian>()?,
            longitude: r.read_f64::<LittleEndian>()?,
            chart_max: r.read_f64::<LittleEndian>()?,
            chart_min: r.read_f64::<LittleEndian>()?,
            timezone: r.read_i16::<LittleEndian>()?,
            source: text(r, 10)?,
            author: text(r, 20)?,
            obs_name: text(r, 20)?,
            obs_location: text(r, 40)?,
            num_channels: r.read_i16::<LittleEndian>()?,
            note_length: r.read_i32::<LittleEndian>()?,
        })
    }
}

/// The header notes, split into free text and `*[[*`..`*]]*` metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpsNotes {
    pub text: String,
    /// Upper-cased keys to their (possibly empty) values.
    pub metadata: BTreeMap<String, String>,
}

impl SpsNotes {
    pub fn parse(bytes: &[u8]) -> SpsNotes {
        let mut notes = SpsNotes::default();
        let mut text = vec![];
        let mut rest = bytes;
        loop {
            match find(rest, NOTE_BLOCK_START) {
                None => {
                    text.extend_from_slice(rest);
                    break;
                }
                Some(start) => {
                    text.extend_from_slice(&rest[..start]);
                    let block = &rest[start + NOTE_BLOCK_START.len()..];
                    let (block, after) = match find(block, NOTE_BLOCK_END) {
                        Some(end) => (&block[..end], &block[end + NOTE_BLOCK_END.len()..]),
                        None => (block, &[][..]),
                    };
                    notes.parse_block(block);
                    rest = after;
                }
            }
        }
        notes.text = fixed_str(&text);
        notes
    }

    fn parse_block(&mut self, block: &[u8]) {
        for entry in block.split(|&b| b == 0xFF || b == b'\n' || b == b'\r') {
            let entry = fixed_str(entry);
            if entry.is_empty() {
                continue;
            }
            let (key, value) = match entry.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (entry.as_str(), ""),
            };
            let key = key.to_uppercase();
            trace!("Note {key} = '{value}'");
            if let Some(old) = self.metadata.insert(key.clone(), value.to_string()) {
                warn!("Note {key} given more than once; '{old}' replaced by '{value}'");
            }
        }
    }

    fn require_f64(&self, file: &Path, key: &'static str) -> Result<f64, RadioJoveError> {
        let value = self
            .metadata
            .get(key)
            .ok_or_else(|| RadioJoveError::MissingNoteKey {
                file: file.to_path_buf(),
                key,
            })?;
        value.parse().map_err(|_| RadioJoveError::BadNoteValue {
            file: file.to_path_buf(),
            key,
            value: value.clone(),
        })
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub struct SpsReader {
    context: DataContext,

    header: SpsHeader,

    notes: SpsNotes,

    /// Per channel, from channel 0 (the highest frequency) down.
    freqs_khz: Vec<f64>,

    /// Counts of each sweep, per channel.
    counts: Vec<Vec<f32>>,
}

impl SpsReader {
    pub fn new<P: AsRef<Path>>(file: P) -> Result<SpsReader, ReadError> {
        let file = file.as_ref();
        debug!("Using RadioJOVE SPS file: {}", file.display());
        let data = std::fs::read(file)?;
        let mut cursor = Cursor::new(data.as_slice());
        let header = SpsHeader::read(&mut cursor).map_err(|_| BinaryError::Truncated {
            file: file.to_path_buf(),
            offset: 0,
            wanted: SpsHeader::SIZE,
            available: data.len(),
        })?;
        debug!("{header:?}");
        if !header.version.starts_with("*SPS") {
            return Err(RadioJoveError::BadVersion {
                file: file.to_path_buf(),
                version: header.version,
            }
            .into());
        }
        let bad_header = |field, value: i64| BinaryError::BadHeaderValue {
            file: file.to_path_buf(),
            field,
            value,
        };
        let num_channels = usize::try_from(header.num_channels)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| bad_header("nchannels", header.num_channels.into()))?;
        let note_length = usize::try_from(header.note_length)
            .map_err(|_| bad_header("note_length", header.note_length.into()))?;

        let notes_end = SpsHeader::SIZE + note_length;
        let notes_bytes = data
            .get(SpsHeader::SIZE..notes_end)
            .ok_or(BinaryError::Truncated {
                file: file.to_path_buf(),
                offset: SpsHeader::SIZE as u64,
                wanted: note_length,
                available: data.len() - SpsHeader::SIZE,
            })?;
        let notes = SpsNotes::parse(notes_bytes);
        let low_hz = notes.require_f64(file, "LOWF")?;
        let high_hz = notes.require_f64(file, "HIF")?;
        let freqs_khz = linspace(high_hz / 1e3, low_hz / 1e3, num_channels);

        let record_len = 8 + 2 * num_channels;
        let records = fixed_records(&data[notes_end..], record_len, file, true)?;
        let mut timestamps = Vec::with_capacity(records.len());
        let mut counts = Vec::with_capacity(records.len());
        for record in records {
            let mut r = Cursor::new(record);
            timestamps.push(epoch_from_ole(r.read_f64::<LittleEndian>()?));
            let mut sweep = vec![0; num_channels];
            r.read_u16_into::<LittleEndian>(&mut sweep)?;
            counts.push(sweep.into_iter().map(f32::from).collect());
        }

        let mut metadata = notes.metadata.clone();
        for (key, value) in [
            ("SOURCE", &header.source),
            ("AUTHOR", &header.author),
            ("OBSERVATORY", &header.obs_name),
            ("LOCATION", &header.obs_location),
        ] {
            if !value.is_empty() {
                metadata.insert(key.to_string(), value.clone());
            }
        }
        metadata.insert("LATITUDE".to_string(), header.latitude.to_string());
        metadata.insert("LONGITUDE".to_string(), header.longitude.to_string());

        let context = DataContext::new(
            file,
            timestamps,
            [freqs_khz.as_slice()],
            vec!["COUNTS".to_string()],
            metadata,
        )?;

        Ok(SpsReader {
            context,
            header,
            notes,
            freqs_khz,
            counts,
        })
    }

    pub fn header(&self) -> &SpsHeader {
        &self.header
    }

    pub fn notes(&self) -> &SpsNotes {
        &self.notes
    }

    /// The start time of the recording from the header, which may differ
    /// from the first record's time.
    pub fn header_start(&self) -> Epoch {
        epoch_from_ole(self.header.start)
    }
}

impl DataRead for SpsReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        Dataset::RadioJoveSps
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        super::check_sweep_index(&self.context, sweep)?;
        fill_sweep(
            data_fq,
            &self.context,
            sweep,
            &self.freqs_khz,
            &[self.counts[sweep].as_slice()],
        )
    }
}
