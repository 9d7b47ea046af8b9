//! Helper functions for reading FITS files.

mod error;

pub use error::FitsError;

use std::{ffi::CString, fmt::Display, path::Path};

use fitsio::{hdu::*, FitsFile};

/// Open a fits file.
#[track_caller]
pub(crate) fn fits_open<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    FitsFile::open(file.as_ref()).map_err(|e| {
        let caller = std::panic::Location::caller();
        FitsError::Open {
            fits_error: Box::new(e),
            fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }
    })
}

/// Open a fits file's HDU.
#[track_caller]
pub(crate) fn fits_open_hdu<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<FitsHdu, FitsError> {
    fits_fptr.hdu(hdu_description).map_err(|e| {
        let caller = std::panic::Location::caller();
        FitsError::Fitsio {
            fits_error: Box::new(e),
            fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
            hdu_description: format!("{hdu_description}").into_boxed_str(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }
    })
}

#[track_caller]
fn fitsio_error(fits_fptr: &FitsFile, hdu: &FitsHdu, e: fitsio::errors::Error) -> FitsError {
    let caller = std::panic::Location::caller();
    FitsError::Fitsio {
        fits_error: Box::new(e),
        fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
        hdu_description: format!("{}", hdu.number + 1).into_boxed_str(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    }
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword that may
/// or may not exist, pull out the value of the keyword, parsing it into the
/// desired type.
#[track_caller]
pub(crate) fn fits_get_optional_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<T>, FitsError> {
    let unparsed_value: String = match hdu.read_key(fits_fptr, keyword) {
        Ok(key_value) => key_value,
        Err(fitsio::errors::Error::Fits(fe)) if matches!(fe.status, 202 | 204) => {
            return Ok(None)
        }
        Err(e) => return Err(fitsio_error(fits_fptr, hdu, e)),
    };

    match unparsed_value.trim().parse() {
        Ok(parsed_value) => Ok(Some(parsed_value)),
        Err(_) => {
            let caller = std::panic::Location::caller();
            Err(FitsError::Parse {
                key: keyword.to_string().into_boxed_str(),
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

/// Given a FITS file pointer, a HDU that belongs to it, and a keyword, pull out
/// the value of the keyword, parsing it into the desired type.
#[track_caller]
pub(crate) fn fits_get_required_key<T: std::str::FromStr>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<T, FitsError> {
    match fits_get_optional_key(fits_fptr, hdu, keyword) {
        Ok(Some(value)) => Ok(value),
        Ok(None) => {
            let caller = std::panic::Location::caller();
            Err(FitsError::MissingKey {
                key: keyword.to_string().into_boxed_str(),
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
        Err(error) => Err(error),
    }
}

/// Get the size of the image on the supplied HDU, slowest-varying axis
/// first (i.e. `[NAXIS2, NAXIS1]` for a 2D image).
#[track_caller]
pub(crate) fn fits_get_image_size<'a>(
    fits_fptr: &FitsFile,
    hdu: &'a FitsHdu,
) -> Result<&'a Vec<usize>, FitsError> {
    match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => Ok(shape),
        _ => {
            let caller = std::panic::Location::caller();
            Err(FitsError::NotImage {
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            })
        }
    }
}

/// Given a FITS file pointer and a HDU, read the associated image.
#[track_caller]
pub(crate) fn fits_get_image<T: fitsio::images::ReadImage>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
) -> Result<T, FitsError> {
    fits_get_image_size(fits_fptr, hdu)?;
    hdu.read_image(fits_fptr)
        .map_err(|e| fitsio_error(fits_fptr, hdu, e))
}

/// The number of elements in each cell of a table column, or `None` if the
/// HDU isn't a table or doesn't have the column.
pub(crate) fn fits_get_col_repeat(hdu: &FitsHdu, col_name: &str) -> Option<usize> {
    match &hdu.info {
        HduInfo::TableInfo {
            column_descriptions,
            ..
        } => column_descriptions
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(col_name))
            .map(|c| c.data_type.repeat),
        _ => None,
    }
}

/// Read a single (possibly vector) cell of a table column as doubles. fitsio
/// only reads whole scalar columns, so this goes through cfitsio directly.
#[track_caller]
pub(crate) fn read_cell_array(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    col_name: &str,
    row: i64,
) -> Result<Vec<f64>, FitsError> {
    let n_elem = match fits_get_col_repeat(hdu, col_name) {
        Some(n) => n,
        None => {
            let caller = std::panic::Location::caller();
            return Err(FitsError::MissingColumn {
                column: col_name.to_string().into_boxed_str(),
                fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
                hdu_num: hdu.number + 1,
                source_file: caller.file(),
                source_line: caller.line(),
                source_column: caller.column(),
            });
        }
    };
    // Make the HDU current; cfitsio reads from whichever HDU that is.
    fits_fptr
        .hdu(hdu.number)
        .map_err(|e| fitsio_error(fits_fptr, hdu, e))?;

    // Column names come from the file, so they can't contain NULs.
    let keyword = CString::new(col_name).unwrap_or_default();
    let mut array: Vec<f64> = vec![0.0; n_elem];
    let mut status = 0;
    unsafe {
        // With the column name, get the column number.
        let mut col_num = -1;
        // ffgcno = fits_get_colnum
        fitsio_sys::ffgcno(
            fits_fptr.as_raw(),
            0,
            keyword.as_ptr() as *mut _,
            &mut col_num,
            &mut status,
        );
        if status == 0 {
            // Now get the specified row from that column.
            // ffgcv = fits_read_col
            fitsio_sys::ffgcv(
                fits_fptr.as_raw(),
                82, // TDOUBLE (fitsio.h)
                col_num,
                row + 1,
                1,
                n_elem as i64,
                std::ptr::null_mut(),
                array.as_mut_ptr().cast(),
                &mut 0,
                &mut status,
            );
        }
    }
    fitsio::errors::check_status(status).map_err(|e| fitsio_error(fits_fptr, hdu, e))?;

    Ok(array)
}
