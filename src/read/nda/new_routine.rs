use std::{
    collections::BTreeMap,
    io::{self, Cursor, Read},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace};
use ndarray::prelude::*;

use super::{NdaError, NEW_ROUTINE_HEADER_MAGIC, NEW_ROUTINE_RECORD_MAGIC};
use crate::{
    read::{binary::fixed_records, fill_sweep, BinaryError, DataRead, Dataset, ReadError},
    time::epoch_from_unix,
    DataContext,
};

/// The fixed leading part of a NewRoutine header. Headers can be longer
/// than this; the rest is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRoutineHeader {
    pub header_size: u32,
    pub num_freqs: u32,
    pub num_pols: u32,
    pub freq_min_mhz: f32,
    pub freq_max_mhz: f32,
}

impl NewRoutineHeader {
    pub const MIN_SIZE: u32 = 24;

    /// Read the header after its magic word.
    fn read<R: Read>(r: &mut R) -> io::Result<NewRoutineHeader> {
        Ok(NewRoutineHeader {
            header_size: r.read_u32::<LittleEndian>()?,
            num_freqs: r.read_u32::<LittleEndian>()?,
            num_pols: r.read_u32::<LittleEndian>()?,
            freq_min_mhz: r.read_f32::<LittleEndian>()?,
            freq_max_mhz: r.read_f32::<LittleEndian>()?,
        })
    }

    /// Channel centre frequencies \[kHz\].
    pub fn freqs_khz(&self) -> Vec<f64> {
        let min = f64::from(self.freq_min_mhz) * 1e3;
        let max = f64::from(self.freq_max_mhz) * 1e3;
        let n = self.num_freqs as usize;
        let width = (max - min) / n as f64;
        (0..n).map(|i| min + (i as f64 + 0.5) * width).collect()
    }

    pub fn field_names(&self) -> Vec<String> {
        match self.num_pols {
            2 => vec!["LL".to_string(), "RR".to_string()],
            4 => ["LL", "RR", "RE", "IM"].map(String::from).to_vec(),
            n => (0..n).map(|i| format!("POL{i}")).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct NewRoutineRecord {
    index: u32,
    /// Polarisation-major: one row of `num_freqs` values per polarisation.
    values: Vec<f32>,
}

pub struct NewRoutineReader {
    context: DataContext,

    header: NewRoutineHeader,

    freqs_khz: Vec<f64>,

    records: Vec<NewRoutineRecord>,
}

impl NewRoutineReader {
    pub fn new<P: AsRef<Path>>(file: P) -> Result<NewRoutineReader, ReadError> {
        let file = file.as_ref();
        debug!("Using NDA NewRoutine file: {}", file.display());
        let data = std::fs::read(file)?;
        let truncated_header = || BinaryError::Truncated {
            file: file.to_path_buf(),
            offset: 0,
            wanted: NewRoutineHeader::MIN_SIZE as usize,
            available: data.len(),
        };

        let mut cursor = Cursor::new(data.as_slice());
        let magic = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| truncated_header())?;
        if magic != NEW_ROUTINE_HEADER_MAGIC {
            return Err(BinaryError::BadMagic {
                file: file.to_path_buf(),
                offset: 0,
                expected: NEW_ROUTINE_HEADER_MAGIC,
                got: magic,
            }
            .into());
        }
        let header = NewRoutineHeader::read(&mut cursor).map_err(|_| truncated_header())?;
        debug!("{header:?}");
        if header.header_size < NewRoutineHeader::MIN_SIZE {
            return Err(NdaError::HeaderTooSmall {
                file: file.to_path_buf(),
                header_size: header.header_size,
                min: NewRoutineHeader::MIN_SIZE,
            }
            .into());
        }
        for (field, value) in [("nfreq", header.num_freqs), ("npol", header.num_pols)] {
            if value == 0 {
                return Err(BinaryError::BadHeaderValue {
                    file: file.to_path_buf(),
                    field,
                    value: value.into(),
                }
                .into());
            }
        }

        let header_size = header.header_size as usize;
        let body = data.get(header_size..).ok_or(BinaryError::Truncated {
            file: file.to_path_buf(),
            offset: 0,
            wanted: header_size,
            available: data.len(),
        })?;
        let num_values = (header.num_freqs as usize)
            .checked_mul(header.num_pols as usize)
            .ok_or_else(|| BinaryError::BadHeaderValue {
                file: file.to_path_buf(),
                field: "nfreq * npol",
                value: i64::from(header.num_freqs),
            })?;
        let record_len = num_values
            .checked_mul(4)
            .and_then(|n| n.checked_add(16))
            .ok_or_else(|| BinaryError::BadHeaderValue {
                file: file.to_path_buf(),
                field: "nfreq * npol",
                value: i64::from(header.num_freqs),
            })?;
        // Checked before freqs_khz() allocates anything.
        if record_len > body.len() {
            return Err(BinaryError::Truncated {
                file: file.to_path_buf(),
                offset: header_size as u64,
                wanted: record_len,
                available: body.len(),
            }
            .into());
        }

        let mut timestamps = vec![];
        let mut records = vec![];
        for (i, bytes) in fixed_records(body, record_len, file, true)?.enumerate() {
            let offset = (header_size + i * record_len) as u64;
            let mut r = Cursor::new(bytes);
            let magic = r.read_u32::<LittleEndian>()?;
            if magic != NEW_ROUTINE_RECORD_MAGIC {
                return Err(BinaryError::BadMagic {
                    file: file.to_path_buf(),
                    offset,
                    expected: NEW_ROUTINE_RECORD_MAGIC,
                    got: magic,
                }
                .into());
            }
            let index = r.read_u32::<LittleEndian>()?;
            let time = r.read_f64::<LittleEndian>()?;
            let mut values = vec![0.0; num_values];
            r.read_f32_into::<LittleEndian>(&mut values)?;
            trace!("Record {index} at byte {offset}: t = {time}");
            timestamps.push(epoch_from_unix(time));
            records.push(NewRoutineRecord { index, values });
        }

        let freqs_khz = header.freqs_khz();
        let mut metadata = BTreeMap::new();
        metadata.insert("NFREQ".to_string(), header.num_freqs.to_string());
        metadata.insert("NPOL".to_string(), header.num_pols.to_string());
        if let (Some(first), Some(last)) = (records.first(), records.last()) {
            metadata.insert(
                "RECORD_INDICES".to_string(),
                format!("{}-{}", first.index, last.index),
            );
        }
        let context = DataContext::new(
            file,
            timestamps,
            [freqs_khz.as_slice()],
            header.field_names(),
            metadata,
        )?;

        Ok(NewRoutineReader {
            context,
            header,
            freqs_khz,
            records,
        })
    }

    pub fn header(&self) -> &NewRoutineHeader {
        &self.header
    }

    /// The index each record was written with.
    pub fn record_indices(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.index).collect()
    }
}

impl DataRead for NewRoutineReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        Dataset::NdaNewRoutine
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        crate::read::check_sweep_index(&self.context, sweep)?;
        let rows = self.records[sweep]
            .values
            .chunks_exact(self.freqs_khz.len())
            .collect::<Vec<_>>();
        fill_sweep(data_fq, &self.context, sweep, &self.freqs_khz, &rows)
    }
}
