// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions for writing FITS files.
//!
//! The `fitsio` crate writes floats with a fixed number of decimals, which is
//! lossy. Everything that isn't an integer or a string is therefore written as
//! a raw header record with the shortest decimal text that round-trips.

use std::{panic::Location, path::Path, ptr};

use fitsio::{
    hdu::{FitsHdu, HduInfo},
    images::ImageDescription,
    FitsFile,
};
use num_complex::Complex;

use crate::io::read::fits::{
    fits_c_string, fits_check_status, fits_open_hdu, fitsio_error, FitsError,
};

/// Create a new fits file whose primary HDU is an image with the supplied
/// description. The file must not already exist.
#[track_caller]
pub(crate) fn fits_create<P: AsRef<Path>>(
    file: P,
    primary: &ImageDescription,
) -> Result<FitsFile, FitsError> {
    let caller = Location::caller();
    FitsFile::create(file.as_ref())
        .with_custom_primary(primary)
        .open()
        .map_err(|e| FitsError::Open {
            fits_error: Box::new(e),
            fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        })
}

/// Given a FITS file pointer and a HDU, write the image.
#[track_caller]
pub(crate) fn fits_write_image<T: fitsio::images::WriteImage>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    data: &[T],
) -> Result<(), FitsError> {
    let caller = Location::caller();
    match &hdu.info {
        HduInfo::ImageInfo { .. } => hdu
            .write_image(fits_fptr, data)
            .map_err(|e| fitsio_error(fits_fptr, hdu.number + 1, e, caller)),
        _ => Err(FitsError::NotImage {
            fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
            hdu_num: hdu.number + 1,
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }),
    }
}

/// Write an integer-valued key.
#[track_caller]
pub(crate) fn fits_write_int_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: i64,
) -> Result<(), FitsError> {
    let caller = Location::caller();
    hdu.write_key(fits_fptr, keyword, value)
        .map_err(|e| fitsio_error(fits_fptr, hdu.number + 1, e, caller))
}

/// Write a real-valued key without losing precision.
#[track_caller]
pub(crate) fn fits_write_float_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: f64,
) -> Result<(), FitsError> {
    fits_write_record(fits_fptr, hdu, &format_card(keyword, &format_float(value)))
}

/// Write a logical key.
#[track_caller]
pub(crate) fn fits_write_bool_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: bool,
) -> Result<(), FitsError> {
    let value = if value { "T" } else { "F" };
    fits_write_record(fits_fptr, hdu, &format_card(keyword, value))
}

/// Write a complex-valued key as `(re, im)`.
#[track_caller]
pub(crate) fn fits_write_complex_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: Complex<f64>,
) -> Result<(), FitsError> {
    let value = format!("({}, {})", format_float(value.re), format_float(value.im));
    fits_write_record(fits_fptr, hdu, &format_card(keyword, &value))
}

/// Write a string key. Strings longer than a single card can hold are spread
/// over CONTINUE cards.
#[track_caller]
pub(crate) fn fits_write_string_key(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
    value: &str,
) -> Result<(), FitsError> {
    fits_open_hdu(fits_fptr, hdu.number)?;
    let key_name = fits_c_string(fits_fptr, keyword)?;
    let value = fits_c_string(fits_fptr, value)?;
    let mut status = 0;
    unsafe {
        // ffpkls = fits_write_key_longstr
        fitsio_sys::ffpkls(
            fits_fptr.as_raw(), /* I - FITS file pointer        */
            key_name.as_ptr(),  /* I - name of keyword to write */
            value.as_ptr(),     /* I - keyword value            */
            ptr::null(),        /* I - keyword comment          */
            &mut status,        /* IO - error status            */
        );
    }
    fits_check_status(fits_fptr, hdu, status)
}

/// Write a HISTORY card. cfitsio spreads text longer than a card over several
/// cards.
#[track_caller]
pub(crate) fn fits_write_history(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    text: &str,
) -> Result<(), FitsError> {
    fits_open_hdu(fits_fptr, hdu.number)?;
    let history = fits_c_string(fits_fptr, text)?;
    let mut status = 0;
    unsafe {
        // ffphis = fits_write_history
        fitsio_sys::ffphis(
            fits_fptr.as_raw(), /* I - FITS file pointer  */
            history.as_ptr(),   /* I - history string     */
            &mut status,        /* IO - error status      */
        );
    }
    fits_check_status(fits_fptr, hdu, status)
}

/// Write a COMMENT card.
#[track_caller]
pub(crate) fn fits_write_comment(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    text: &str,
) -> Result<(), FitsError> {
    fits_open_hdu(fits_fptr, hdu.number)?;
    let comment = fits_c_string(fits_fptr, text)?;
    let mut status = 0;
    unsafe {
        // ffpcom = fits_write_comment
        fitsio_sys::ffpcom(
            fits_fptr.as_raw(), /* I - FITS file pointer   */
            comment.as_ptr(),   /* I - comment string      */
            &mut status,        /* IO - error status       */
        );
    }
    fits_check_status(fits_fptr, hdu, status)
}

/// Append a fully-formed header record to the HDU.
#[track_caller]
fn fits_write_record(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    card: &str,
) -> Result<(), FitsError> {
    fits_open_hdu(fits_fptr, hdu.number)?;
    let card = fits_c_string(fits_fptr, card)?;
    let mut status = 0;
    unsafe {
        // ffprec = fits_write_record
        fitsio_sys::ffprec(
            fits_fptr.as_raw(), /* I - FITS file pointer  */
            card.as_ptr(),      /* I - card to write      */
            &mut status,        /* IO - error status      */
        );
    }
    fits_check_status(fits_fptr, hdu, status)
}

/// Fixed-format value card: the keyword padded to 8 columns, the value
/// indicator, and the value right-justified to column 30.
fn format_card(keyword: &str, value: &str) -> String {
    format!("{keyword:<8}= {value:>20}")
}

/// The shortest decimal text that parses back to exactly `value`. FITS wants
/// an upper-case exponent and a decimal point in every real number.
pub(crate) fn format_float(value: f64) -> String {
    let s = format!("{value:?}").to_uppercase();
    match s.split_once('E') {
        Some((mantissa, exponent)) if !mantissa.contains('.') => {
            format!("{mantissa}.0E{exponent}")
        }
        _ => s,
    }
}
