//! NASA Common Data Format (version 3) files laid out the ISTP way.
//!
//! Only uncompressed, single-file CDFs with IEEE encodings are read. A
//! spectral variable is a record-varying 1-D numeric variable whose
//! `DEPEND_0` attribute names its time variable and whose `DEPEND_1` names
//! its frequency variable. All spectral variables sharing the first such pair
//! become the fields of a sweep.

mod file;

pub use file::{Attribute, AttributeEntry, CdfFile, CdfType, Encoding, Values, Variable};

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use hifitime::Epoch;
use itertools::Itertools;
use log::{debug, warn};
use ndarray::prelude::*;
use thiserror::Error;

use super::{check_sweep_index, fill_sweep, BinaryError, DataRead, Dataset, ReadError};
use crate::{
    time::{epoch_from_cdf_epoch, epoch_from_cdf_epoch16, epoch_from_tt2000},
    DataContext,
};

#[derive(Error, Debug)]
pub enum CdfError {
    #[error("{}: only version 3 CDFs are supported (magic word {magic:#010x})", file.display())]
    UnsupportedVersion { file: PathBuf, magic: u32 },

    #[error("{}: compressed CDFs aren't supported", file.display())]
    CompressedFile { file: PathBuf },

    #[error("{}: variable {variable} is compressed, which isn't supported", file.display())]
    Compressed { file: PathBuf, variable: String },

    #[error("{}: data encoding {encoding} isn't supported", file.display())]
    UnsupportedEncoding { file: PathBuf, encoding: i32 },

    #[error("{}: multi-file CDFs aren't supported", file.display())]
    MultiFile { file: PathBuf },

    #[error("{}: expected a {expected} at byte {offset}, found record type {found}", file.display())]
    UnexpectedRecord {
        file: PathBuf,
        offset: u64,
        expected: &'static str,
        found: i32,
    },

    #[error("{}: record at byte {offset} has an invalid size {size}", file.display())]
    BadRecordSize { file: PathBuf, offset: u64, size: i64 },

    #[error("{}: record at byte {offset} ends before its fields do", file.display())]
    ShortRecord { file: PathBuf, offset: u64 },

    #[error("{}: record at byte {offset} has an invalid {field} ({value})", file.display())]
    BadField {
        file: PathBuf,
        offset: u64,
        field: &'static str,
        value: i64,
    },

    #[error("{}: the chain of records loops back to byte {offset}", file.display())]
    Cycle { file: PathBuf, offset: u64 },

    #[error("{}: {what} has unsupported data type {code}", file.display())]
    UnsupportedDataType {
        file: PathBuf,
        what: String,
        code: i32,
    },

    #[error("{}: no variable has both a DEPEND_0 and a DEPEND_1", file.display())]
    NoSpectralVariables { file: PathBuf },

    #[error("{}: no variable is named {name}", file.display())]
    NoSuchVariable { file: PathBuf, name: String },

    #[error("{}: variable {variable} isn't numeric", file.display())]
    NotNumeric { file: PathBuf, variable: String },

    #[error("{}: time variable {variable} is {data_type:?}, not EPOCH, EPOCH16 or TT2000", file.display())]
    UnsupportedTimeType {
        file: PathBuf,
        variable: String,
        data_type: CdfType,
    },

    #[error("{}: variable {variable} has {got} values, expected {expected}", file.display())]
    ValueCountMismatch {
        file: PathBuf,
        variable: String,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Binary(#[from] BinaryError),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

/// kHz per frequency unit.
fn khz_per_unit(unit: &str) -> Option<f64> {
    match unit.trim().to_ascii_lowercase().as_str() {
        "hz" => Some(1e-3),
        "khz" => Some(1.0),
        "mhz" => Some(1e3),
        "ghz" => Some(1e6),
        _ => None,
    }
}

fn read_times(cdf: &CdfFile, file: &Path, variable: &Variable) -> Result<Vec<Epoch>, ReadError> {
    let unsupported = || CdfError::UnsupportedTimeType {
        file: file.to_path_buf(),
        variable: variable.name.clone(),
        data_type: variable.data_type,
    };
    if variable.values_per_record() != 1 {
        return Err(unsupported().into());
    }
    let times = match cdf.read_variable(variable)? {
        Values::Real(ms) if variable.data_type == CdfType::Epoch => ms
            .into_iter()
            .map(epoch_from_cdf_epoch)
            .collect::<Result<Vec<_>, _>>()?,
        Values::Epoch16(v) => v
            .into_iter()
            .map(|(s, ps)| epoch_from_cdf_epoch16(s, ps))
            .collect::<Result<Vec<_>, _>>()?,
        Values::Int(ns) if variable.data_type == CdfType::TimeTt2000 => {
            ns.into_iter().map(epoch_from_tt2000).collect()
        }
        _ => return Err(unsupported().into()),
    };
    Ok(times)
}

pub struct CdfReader {
    context: DataContext,

    cdf: CdfFile,

    /// One set of frequencies [kHz] for the whole file, or one per sweep.
    freqs_khz: Vec<Vec<f64>>,

    /// Channels per sweep.
    num_freqs: usize,

    /// All sweeps of each field, sweep-major.
    values: Vec<Vec<f32>>,
}

impl CdfReader {
    pub fn new<P: AsRef<Path>>(file: P) -> Result<CdfReader, ReadError> {
        let file = file.as_ref();
        debug!("Using CDF file: {}", file.display());
        let cdf = CdfFile::open(file)?;

        let text_attribute = |v: &Variable, name: &str| {
            cdf.variable_attribute(v, name)
                .and_then(Values::as_str)
                .map(|s| s.to_string())
        };
        let spectral = cdf
            .variables
            .iter()
            .filter(|v| v.record_variance && v.dims.len() == 1 && v.data_type.is_numeric())
            .filter(|v| {
                text_attribute(v, "VAR_TYPE").map_or(true, |t| t.eq_ignore_ascii_case("data"))
            })
            .filter_map(|v| {
                Some((
                    v,
                    text_attribute(v, "DEPEND_0")?,
                    text_attribute(v, "DEPEND_1")?,
                ))
            })
            .collect::<Vec<_>>();
        let (time_name, freq_name) = match spectral.first() {
            Some((_, t, f)) => (t.clone(), f.clone()),
            None => {
                return Err(CdfError::NoSpectralVariables {
                    file: file.to_path_buf(),
                }
                .into())
            }
        };
        let (fields, others): (Vec<_>, Vec<_>) = spectral
            .iter()
            .partition(|(_, t, f)| *t == time_name && *f == freq_name);
        for (v, t, f) in others {
            debug!("Skipping {} (depends on {t} and {f})", v.name);
        }
        let fields = fields.into_iter().map(|(v, _, _)| *v).collect::<Vec<_>>();
        let num_freqs = fields[0].dims[0];

        let lookup = |name: &str| {
            cdf.variable(name).ok_or_else(|| CdfError::NoSuchVariable {
                file: file.to_path_buf(),
                name: name.to_string(),
            })
        };
        let time_var = lookup(&time_name)?;
        let timestamps = read_times(&cdf, file, time_var)?;
        let num_sweeps = timestamps.len();

        let freq_var = lookup(&freq_name)?;
        let not_numeric = |v: &Variable| CdfError::NotNumeric {
            file: file.to_path_buf(),
            variable: v.name.clone(),
        };
        let mismatch = |v: &Variable, expected: usize, got: usize| CdfError::ValueCountMismatch {
            file: file.to_path_buf(),
            variable: v.name.clone(),
            expected,
            got,
        };
        let khz_per = match text_attribute(freq_var, "UNITS") {
            Some(unit) => khz_per_unit(&unit).unwrap_or_else(|| {
                warn!("{freq_name}: unknown frequency unit '{unit}', assuming kHz");
                1.0
            }),
            None => {
                warn!("{freq_name} has no UNITS, assuming kHz");
                1.0
            }
        };
        let freqs = cdf
            .read_variable(freq_var)?
            .to_f64()
            .ok_or_else(|| not_numeric(freq_var))?;
        let expected_freqs = if freq_var.record_variance {
            num_sweeps * num_freqs
        } else {
            num_freqs
        };
        if freq_var.values_per_record() != num_freqs || freqs.len() != expected_freqs {
            return Err(mismatch(freq_var, expected_freqs, freqs.len()).into());
        }
        let freqs_khz = freqs
            .chunks(num_freqs)
            .map(|c| c.iter().map(|f| f * khz_per).collect())
            .collect::<Vec<Vec<f64>>>();

        let mut values = Vec::with_capacity(fields.len());
        for v in &fields {
            if v.dims[0] != num_freqs {
                return Err(mismatch(v, num_freqs, v.dims[0]).into());
            }
            let fill = cdf
                .variable_attribute(v, "FILLVAL")
                .and_then(Values::to_f64)
                .and_then(|f| f.first().map(|&f| f as f32));
            let data = cdf.read_variable(v)?.to_f64().ok_or_else(|| not_numeric(v))?;
            if data.len() != num_sweeps * num_freqs {
                return Err(mismatch(v, num_sweeps * num_freqs, data.len()).into());
            }
            values.push(
                data.into_iter()
                    .map(|x| x as f32)
                    .map(|x| if Some(x) == fill { f32::NAN } else { x })
                    .collect::<Vec<_>>(),
            );
        }

        let mut metadata = BTreeMap::new();
        for attribute in cdf.global_attributes() {
            let value = attribute.entries.iter().map(|e| e.value.to_string()).join("; ");
            if !value.is_empty() {
                metadata.insert(attribute.name.clone(), value);
            }
        }
        let (version, release, increment) = cdf.version;
        metadata.insert(
            "CDF_VERSION".to_string(),
            format!("{version}.{release}.{increment}"),
        );
        metadata.insert("TIME_VARIABLE".to_string(), time_name);
        metadata.insert("FREQUENCY_VARIABLE".to_string(), freq_name);

        let context = DataContext::new(
            file,
            timestamps,
            freqs_khz.iter().map(|f| f.as_slice()),
            fields.iter().map(|v| v.name.clone()).collect(),
            metadata,
        )?;

        Ok(CdfReader {
            context,
            cdf,
            freqs_khz,
            num_freqs,
            values,
        })
    }

    pub fn cdf(&self) -> &CdfFile {
        &self.cdf
    }
}

impl DataRead for CdfReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        Dataset::Cdf
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        check_sweep_index(&self.context, sweep)?;
        let freqs = if self.freqs_khz.len() == 1 {
            &self.freqs_khz[0]
        } else {
            &self.freqs_khz[sweep]
        };
        let range = sweep * self.num_freqs..(sweep + 1) * self.num_freqs;
        let rows = self
            .values
            .iter()
            .map(|v| &v[range.clone()])
            .collect::<Vec<_>>();
        fill_sweep(data_fq, &self.context, sweep, freqs, &rows)
    }
}
