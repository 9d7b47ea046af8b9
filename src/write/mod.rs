//! Writing dynamic spectra to FITS.

mod error;
#[cfg(test)]
mod tests;

pub use error::WriteError;

use std::path::Path;

use crossbeam_channel::Receiver;
use crossbeam_utils::atomic::AtomicCell;
use fitsio::{
    images::{ImageDescription, ImageType},
    tables::{ColumnDataType, ColumnDescription},
    FitsFile,
};
use hifitime::Epoch;
use indicatif::ProgressBar;
use log::{debug, trace};
use ndarray::prelude::*;
use vec1::Vec1;

use crate::{
    averaging::{nan_mean, Timeblock},
    DataContext, Dataset,
};

/// Receive sweeps from another thread, average them into timeblocks and
/// write the result as a FITS dynamic-spectrum cube. This function is
/// intended to be run concurrently with a reading thread, and must receive
/// the sweeps of `timeblocks` in order.
///
/// The primary HDU is an `f32` image with dimensions (field, timeblock,
/// frequency). The "TIME" table has the MJD (UTC) of each timeblock's centre
/// and how many sweeps went into it; the "FREQ" table has the frequency grid.
///
/// # Arguments
///
/// * `output` - the file to write. It is replaced if it exists.
/// * `context` - the context of the reader producing the sweeps.
/// * `dataset` - the dataset of the input, recorded in the header.
/// * `timeblocks` - how the incoming sweeps are grouped.
/// * `rx` - the channel to receive sweeps from. Each sweep is a (field,
///   frequency) array.
/// * `error` - a thread-safe [`bool`] to indicate if an error has occurred.
///   Receiving `true` signals that we should not continue, as another thread
///   has experienced an error.
/// * `progress_bar` - an optional progress bar to increment with writing
///   progress.
pub fn write_dynspec(
    output: &Path,
    context: &DataContext,
    dataset: Dataset,
    timeblocks: &Vec1<Timeblock>,
    rx: Receiver<(Array2<f32>, Epoch)>,
    error: &AtomicCell<bool>,
    progress_bar: Option<ProgressBar>,
) -> Result<(), WriteError> {
    let num_fields = context.fields.len();
    let num_freqs = context.freqs_khz.len();
    let expected_sweeps = timeblocks.last().range.end;
    let mut cube = Array3::from_elem((num_fields, timeblocks.len(), num_freqs), f32::NAN);

    // The sweeps of the timeblock being received, and the index of that
    // timeblock.
    let mut block_sweeps: Vec<Array2<f32>> = vec![];
    let mut i_timeblock = 0;
    let mut received = 0;

    for (data_fq, timestamp) in rx.iter() {
        // Should we continue?
        if error.load() {
            return Ok(());
        }
        trace!("Received sweep {received} ({timestamp})");
        if data_fq.dim() != (num_fields, num_freqs) {
            return Err(WriteError::BadSweepShape {
                expected: (num_fields, num_freqs),
                got: data_fq.dim(),
            });
        }
        block_sweeps.push(data_fq);
        received += 1;

        let this_timeblock = &timeblocks[i_timeblock];
        if block_sweeps.len() == this_timeblock.range.len() {
            debug!(
                "Averaging timeblock {i_timeblock} ({} sweeps)",
                block_sweeps.len()
            );
            let mut stacked = Array3::zeros((block_sweeps.len(), num_fields, num_freqs));
            for (mut row, sweep) in stacked.outer_iter_mut().zip(block_sweeps.iter()) {
                row.assign(sweep);
            }
            cube.slice_mut(s![.., i_timeblock, ..])
                .assign(&nan_mean(stacked.view()));
            block_sweeps.clear();

            if let Some(progress_bar) = progress_bar.as_ref() {
                progress_bar.inc(1);
            }
            i_timeblock += 1;
            if i_timeblock == timeblocks.len() {
                break;
            }
        }
    }

    if error.load() {
        return Ok(());
    }
    if received < expected_sweeps {
        return Err(WriteError::MissingSweeps {
            expected: expected_sweeps,
            received,
        });
    }

    write_fits(output, context, dataset, timeblocks, cube)?;
    if let Some(progress_bar) = progress_bar.as_ref() {
        progress_bar.abandon_with_message("Finished writing");
    }
    debug!("Finished writing {}", output.display());
    Ok(())
}

fn write_fits(
    output: &Path,
    context: &DataContext,
    dataset: Dataset,
    timeblocks: &Vec1<Timeblock>,
    cube: Array3<f32>,
) -> Result<(), WriteError> {
    let fits_err = |err: fitsio::errors::Error| WriteError::Fits {
        file: output.to_path_buf(),
        err: Box::new(err),
    };
    if output.exists() {
        std::fs::remove_file(output)?;
    }

    let (num_fields, num_timeblocks, num_freqs) = cube.dim();
    let dim = [num_fields, num_timeblocks, num_freqs];
    let image_description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &dim,
    };
    let mut fptr = FitsFile::create(output)
        .with_custom_primary(&image_description)
        .open()
        .map_err(fits_err)?;
    let hdu = fptr.primary_hdu().map_err(fits_err)?;
    hdu.write_image(&mut fptr, &cube.into_raw_vec())
        .map_err(fits_err)?;

    hdu.write_key(&mut fptr, "DATASET", dataset.to_string())
        .map_err(fits_err)?;
    hdu.write_key(&mut fptr, "ORIGIN", "maser").map_err(fits_err)?;
    hdu.write_key(&mut fptr, "NFIELD", num_fields as i64)
        .map_err(fits_err)?;
    for (i, field) in context.fields.iter().enumerate() {
        hdu.write_key(&mut fptr, &format!("FIELD{}", i + 1), field.as_str())
            .map_err(fits_err)?;
    }
    if let Some(source) = context.file.file_name().and_then(|n| n.to_str()) {
        hdu.write_key(&mut fptr, "SOURCE", source)
            .map_err(fits_err)?;
    }

    // Timeblock centres ("TIME" HDU).
    {
        let mjd_col = ColumnDescription::new("MJD")
            .with_type(ColumnDataType::Double)
            .create()
            .map_err(fits_err)?;
        let nsweep_col = ColumnDescription::new("NSWEEP")
            .with_type(ColumnDataType::Int)
            .create()
            .map_err(fits_err)?;
        let hdu = fptr
            .create_table("TIME", &[mjd_col, nsweep_col])
            .map_err(fits_err)?;
        hdu.write_col(
            &mut fptr,
            "MJD",
            &timeblocks
                .iter()
                .map(|tb| tb.median.to_mjd_utc_days())
                .collect::<Vec<_>>(),
        )
        .map_err(fits_err)?;
        hdu.write_col(
            &mut fptr,
            "NSWEEP",
            &timeblocks
                .iter()
                .map(|tb| tb.range.len() as i32)
                .collect::<Vec<_>>(),
        )
        .map_err(fits_err)?;
    }

    // The frequency grid ("FREQ" HDU).
    {
        let freq_col = ColumnDescription::new("FREQ_KHZ")
            .with_type(ColumnDataType::Double)
            .create()
            .map_err(fits_err)?;
        let hdu = fptr.create_table("FREQ", &[freq_col]).map_err(fits_err)?;
        hdu.write_col(&mut fptr, "FREQ_KHZ", &context.freqs_khz.to_vec())
            .map_err(fits_err)?;
    }

    Ok(())
}
