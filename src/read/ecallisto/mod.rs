//! e-Callisto spectrometer FITS files.
//!
//! The primary HDU holds the dynamic spectrum as an image with time along
//! NAXIS1 and channels along NAXIS2. The axes themselves are in a one-row
//! binary table in the first extension. Files without that table fall back
//! to the primary header's linear axis keys (CDELT1 for time,
//! CRVAL2/CDELT2/CRPIX2 for frequency).


use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use fitsio::hdu::HduInfo;
use hifitime::{Duration, Epoch};
use log::{debug, warn};
use ndarray::prelude::*;
use thiserror::Error;

use super::{
    fill_sweep,
    fits::{
        fits_get_image, fits_get_image_size, fits_get_optional_key, fits_get_required_key,
        fits_open, fits_open_hdu, read_cell_array,
    },
    DataRead, Dataset, ReadError,
};
use crate::{time::epoch_from_calendar, DataContext};

#[derive(Error, Debug)]
pub enum CallistoError {
    #[error("{}: expected a 2D primary image, but its shape is {shape:?}", file.display())]
    BadShape { file: PathBuf, shape: Vec<usize> },

    #[error("{}: couldn't parse DATE-OBS '{value}'", file.display())]
    BadDate { file: PathBuf, value: String },

    #[error("{}: couldn't parse TIME-OBS '{value}'", file.display())]
    BadTime { file: PathBuf, value: String },

    #[error("{}: there's no axis table and no CDELT1, so sample times are unknown", file.display())]
    NoTimeAxis { file: PathBuf },

    #[error("{}: there's no axis table and no CRVAL2/CDELT2, so channel frequencies are unknown", file.display())]
    NoFrequencyAxis { file: PathBuf },

    #[error("{}: the {axis} axis has {actual} values, but the image has {expected}", file.display())]
    AxisLength {
        file: PathBuf,
        axis: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Parse `YYYY/MM/DD` or `YYYY-MM-DD`.
fn parse_date(value: &str) -> Option<(i32, i32, i32)> {
    let mut parts = value.trim().split(|c: char| c == '/' || c == '-');
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    match parts.next() {
        Some(_) => None,
        None => Some((year, month, day)),
    }
}

/// Parse `HH:MM:SS[.fff]` into whole hours, minutes, seconds and the
/// fraction of a second.
fn parse_time(value: &str) -> Option<(i32, i32, i32, f64)> {
    let mut parts = value.trim().split(':');
    let hour = parts.next()?.parse().ok()?;
    let minute = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(0.0..61.0).contains(&seconds) {
        return None;
    }
    let whole = seconds.trunc();
    Some((hour, minute, whole as i32, seconds - whole))
}

/// Channel frequencies \[MHz\] from the linear axis keys of the primary
/// header. `None` unless CRVAL2 and CDELT2 are both given and CTYPE2 (if
/// any) describes a frequency.
fn linear_freqs_mhz(
    ctype2: Option<&str>,
    crval2: Option<f64>,
    cdelt2: Option<f64>,
    crpix2: Option<f64>,
    num_chans: usize,
) -> Option<Vec<f64>> {
    if let Some(ctype) = ctype2 {
        if !ctype.to_lowercase().contains("freq") {
            return None;
        }
    }
    let (crval, cdelt) = (crval2?, cdelt2?);
    // FITS pixels are 1-indexed.
    let crpix = crpix2.unwrap_or(1.0);
    Some(
        (0..num_chans)
            .map(|i| crval + (i as f64 + 1.0 - crpix) * cdelt)
            .collect(),
    )
}

pub struct CallistoReader {
    context: DataContext,

    /// Channel frequencies \[kHz\], in image order.
    freqs_khz: Vec<f64>,

    /// The image, one row per channel.
    image: Array2<f32>,
}

impl CallistoReader {
    pub fn new<P: AsRef<Path>>(file: P) -> Result<CallistoReader, ReadError> {
        let file = file.as_ref();
        debug!("Using e-Callisto file: {}", file.display());
        let mut fptr = fits_open(file)?;
        let primary = fits_open_hdu(&mut fptr, 0)?;
        let shape = fits_get_image_size(&fptr, &primary)?.clone();
        let (num_chans, num_times) = match shape.as_slice() {
            [c, t] => (*c, *t),
            _ => {
                return Err(CallistoError::BadShape {
                    file: file.to_path_buf(),
                    shape,
                }
                .into())
            }
        };
        debug!("{num_chans} channels, {num_times} samples");

        let date: String = fits_get_required_key(&mut fptr, &primary, "DATE-OBS")?;
        let (year, month, day) = parse_date(&date).ok_or_else(|| CallistoError::BadDate {
            file: file.to_path_buf(),
            value: date.clone(),
        })?;
        let time: String = fits_get_required_key(&mut fptr, &primary, "TIME-OBS")?;
        let (hour, minute, second, frac) =
            parse_time(&time).ok_or_else(|| CallistoError::BadTime {
                file: file.to_path_buf(),
                value: time.clone(),
            })?;
        let start = epoch_from_calendar(year, month, day, hour, minute, second, frac)?;

        let mut metadata = BTreeMap::new();
        for key in ["INSTRUME", "OBJECT", "ORIGIN"] {
            if let Some(value) = fits_get_optional_key::<String>(&mut fptr, &primary, key)? {
                metadata.insert(key.to_string(), value);
            }
        }
        let cdelt1: Option<f64> = fits_get_optional_key(&mut fptr, &primary, "CDELT1")?;
        let ctype2: Option<String> = fits_get_optional_key(&mut fptr, &primary, "CTYPE2")?;
        let crval2: Option<f64> = fits_get_optional_key(&mut fptr, &primary, "CRVAL2")?;
        let cdelt2: Option<f64> = fits_get_optional_key(&mut fptr, &primary, "CDELT2")?;
        let crpix2: Option<f64> = fits_get_optional_key(&mut fptr, &primary, "CRPIX2")?;
        let image: Vec<f32> = fits_get_image(&mut fptr, &primary)?;
        // Only ever fails if cfitsio disagrees with itself about the size.
        let image = Array2::from_shape_vec((num_chans, num_times), image).map_err(|_| {
            CallistoError::BadShape {
                file: file.to_path_buf(),
                shape: shape.clone(),
            }
        })?;

        let axes = match fptr.hdu(1) {
            Ok(hdu) if matches!(hdu.info, HduInfo::TableInfo { .. }) => Some(hdu),
            _ => None,
        };
        let offsets = match &axes {
            Some(hdu) => read_cell_array(&mut fptr, hdu, "TIME", 0)?,
            None => {
                warn!("{}: no axis table; using CDELT1 for sample times", file.display());
                let dt = cdelt1.ok_or_else(|| CallistoError::NoTimeAxis {
                    file: file.to_path_buf(),
                })?;
                (0..num_times).map(|i| i as f64 * dt).collect()
            }
        };
        let freqs_mhz = match &axes {
            Some(hdu) => read_cell_array(&mut fptr, hdu, "FREQUENCY", 0)?,
            None => {
                let freqs =
                    linear_freqs_mhz(ctype2.as_deref(), crval2, cdelt2, crpix2, num_chans)
                        .ok_or_else(|| CallistoError::NoFrequencyAxis {
                            file: file.to_path_buf(),
                        })?;
                warn!(
                    "{}: no axis table; using CRVAL2/CDELT2 for channel frequencies",
                    file.display()
                );
                freqs
            }
        };
        for (axis, expected, actual) in [
            ("TIME", num_times, offsets.len()),
            ("FREQUENCY", num_chans, freqs_mhz.len()),
        ] {
            if expected != actual {
                return Err(CallistoError::AxisLength {
                    file: file.to_path_buf(),
                    axis,
                    expected,
                    actual,
                }
                .into());
            }
        }

        let timestamps = offsets
            .iter()
            .map(|&s| start + Duration::from_seconds(s))
            .collect::<Vec<Epoch>>();
        let freqs_khz = freqs_mhz.iter().map(|f| f * 1e3).collect::<Vec<_>>();
        let context = DataContext::new(
            file,
            timestamps,
            [freqs_khz.as_slice()],
            vec!["INTENSITY".to_string()],
            metadata,
        )?;

        Ok(CallistoReader {
            context,
            freqs_khz,
            image,
        })
    }
}

impl DataRead for CallistoReader {
    fn get_data_context(&self) -> &DataContext {
        &self.context
    }

    fn get_dataset(&self) -> Dataset {
        Dataset::ECallisto
    }

    fn read(&self, data_fq: ArrayViewMut2<f32>, sweep: usize) -> Result<(), ReadError> {
        super::check_sweep_index(&self.context, sweep)?;
        let column = self.image.column(sweep).to_vec();
        fill_sweep(data_fq, &self.context, sweep, &self.freqs_khz, &[column.as_slice()])
    }
}
