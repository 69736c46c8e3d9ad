// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions for reading FITS files.

mod error;

pub use error::FitsError;

use std::{
    ffi::{CStr, CString},
    fmt::Display,
    os::raw::{c_char, c_int},
    panic::Location,
    path::Path,
    ptr,
};

use fitsio::{hdu::*, FitsFile};

/// The size of the buffers handed to cfitsio when reading a header card. This
/// is larger than any of FLEN_KEYWORD, FLEN_VALUE or FLEN_COMMENT.
const CARD_BUFFER_LEN: usize = 81;

/// A single header record, as cfitsio sees it.
#[derive(Debug, Clone)]
pub(crate) struct HeaderCard {
    /// The keyword name, e.g. "TELESCOP" or "HISTORY".
    pub(crate) name: String,
    /// The raw value text. Strings keep their enclosing quotes; commentary
    /// cards (HISTORY, COMMENT, blank) have an empty value.
    pub(crate) value: String,
    /// The comment text. For commentary cards this is the card's contents.
    pub(crate) comment: String,
}

pub(crate) fn fitsio_error(
    fits_fptr: &FitsFile,
    hdu_description: impl Display,
    e: fitsio::errors::Error,
    caller: &'static Location<'static>,
) -> FitsError {
    FitsError::Fitsio {
        fits_error: Box::new(e),
        fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
        hdu_description: format!("{hdu_description}").into_boxed_str(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    }
}

/// Convert a Rust string for cfitsio consumption.
#[track_caller]
pub(crate) fn fits_c_string(fits_fptr: &FitsFile, text: &str) -> Result<CString, FitsError> {
    CString::new(text).map_err(|_| {
        let caller = Location::caller();
        FitsError::Nul {
            text: text.into(),
            fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }
    })
}

/// Check a cfitsio status code returned by a raw `fitsio_sys` call.
#[track_caller]
pub(crate) fn fits_check_status(
    fits_fptr: &FitsFile,
    hdu: &FitsHdu,
    status: c_int,
) -> Result<(), FitsError> {
    let caller = Location::caller();
    fitsio::errors::check_status(status)
        .map_err(|e| fitsio_error(fits_fptr, hdu.number + 1, e, caller))
}

/// Open a fits file.
#[track_caller]
pub(crate) fn fits_open<P: AsRef<Path>>(file: P) -> Result<FitsFile, FitsError> {
    let caller = Location::caller();
    FitsFile::open(file.as_ref()).map_err(|e| FitsError::Open {
        fits_error: Box::new(e),
        fits_filename: file.as_ref().to_path_buf().into_boxed_path(),
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    })
}

/// Open a fits file's HDU. This also makes the HDU the "current" HDU, which
/// matters for raw cfitsio calls.
#[track_caller]
pub(crate) fn fits_open_hdu<T: DescribesHdu + Display + Copy>(
    fits_fptr: &mut FitsFile,
    hdu_description: T,
) -> Result<FitsHdu, FitsError> {
    let caller = Location::caller();
    fits_fptr
        .hdu(hdu_description)
        .map_err(|e| fitsio_error(fits_fptr, hdu_description, e, caller))
}

/// Open a named HDU that may or may not exist.
#[track_caller]
pub(crate) fn fits_open_optional_hdu(
    fits_fptr: &mut FitsFile,
    extname: &str,
) -> Result<Option<FitsHdu>, FitsError> {
    let caller = Location::caller();
    match fits_fptr.hdu(extname) {
        Ok(hdu) => Ok(Some(hdu)),
        // Status code 301 means "unavailable".
        Err(fitsio::errors::Error::Fits(fitsio::errors::FitsError { status: 301, .. })) => {
            Ok(None)
        }
        Err(e) => Err(fitsio_error(fits_fptr, extname, e, caller)),
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
    let caller = Location::caller();
    let unparsed_value: String = match hdu.read_key(fits_fptr, keyword) {
        Ok(key_value) => key_value,
        Err(e) => match &e {
            fitsio::errors::Error::Fits(fe) => match fe.status {
                202 | 204 => return Ok(None),
                _ => return Err(fitsio_error(fits_fptr, hdu.number + 1, e, caller)),
            },
            _ => return Err(fitsio_error(fits_fptr, hdu.number + 1, e, caller)),
        },
    };

    match unparsed_value.trim().parse() {
        Ok(parsed_value) => Ok(Some(parsed_value)),
        Err(_) => Err(FitsError::Parse {
            key: keyword.into(),
            value: unparsed_value.into_boxed_str(),
            fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
            hdu_num: hdu.number + 1,
            source_file: caller.file(),
            source_line: caller.line(),
            source_column: caller.column(),
        }),
    }
}

/// Get a column from a fits file's HDU.
#[track_caller]
pub(crate) fn fits_get_col<T: fitsio::tables::ReadsCol>(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Vec<T>, FitsError> {
    let caller = Location::caller();
    hdu.read_col(fits_fptr, keyword)
        .map_err(|e| fitsio_error(fits_fptr, hdu.number + 1, e, caller))
}

/// Given a FITS file pointer, and a keyword to a long string keyword that may
/// or may not exist, pull out the long string of the keyword. This deals with
/// FITSs CONTINUE mechanism by calling a low level fits function.
#[track_caller]
pub(crate) fn fits_get_optional_key_long_string(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
    keyword: &str,
) -> Result<Option<String>, FitsError> {
    let caller = Location::caller();
    // Make sure the right HDU is current before going to cfitsio.
    fits_open_hdu(fits_fptr, hdu.number)?;
    let keyword_ffi = fits_c_string(fits_fptr, keyword)?;
    let long_string_error = |fits_fptr: &FitsFile| FitsError::LongString {
        key: keyword.into(),
        fits_filename: fits_fptr.file_path().to_path_buf().into_boxed_path(),
        hdu_num: hdu.number + 1,
        source_file: caller.file(),
        source_line: caller.line(),
        source_column: caller.column(),
    };

    let mut status = 0;
    let mut long_string_ptr = ptr::null_mut();
    unsafe {
        // ffgkls = fits_read_key_longstr
        fitsio_sys::ffgkls(
            fits_fptr.as_raw(),
            keyword_ffi.as_ptr(),
            &mut long_string_ptr,
            ptr::null_mut(),
            &mut status,
        );
    }
    match status {
        0 => {
            let long_string = unsafe {
                let s = CStr::from_ptr(long_string_ptr)
                    .to_str()
                    .map(|s| s.to_string());
                // Free the cfitsio-allocated string. The status code passed
                // isn't useful.
                // fffree = fits_free_memory
                fitsio_sys::fffree(long_string_ptr.cast(), &mut 0);
                s
            };
            long_string
                .map(Some)
                .map_err(|_| long_string_error(&*fits_fptr))
        }
        202 | 204 => Ok(None),
        _ => Err(long_string_error(&*fits_fptr)),
    }
}

/// Get the size of the image on the supplied FITS file pointer and HDU. The
/// dimensions are ordered slowest-varying first, i.e. `NAXISn` comes first and
/// `NAXIS1` last.
#[track_caller]
pub(crate) fn fits_get_image_size<'a>(
    fits_fptr: &FitsFile,
    hdu: &'a FitsHdu,
) -> Result<&'a [usize], FitsError> {
    match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => Ok(shape),
        _ => {
            let caller = Location::caller();
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
    let caller = Location::caller();
    match &hdu.info {
        HduInfo::ImageInfo { .. } => hdu
            .read_image(fits_fptr)
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

/// Read every header record of the supplied HDU, in order.
#[track_caller]
pub(crate) fn fits_get_header_cards(
    fits_fptr: &mut FitsFile,
    hdu: &FitsHdu,
) -> Result<Vec<HeaderCard>, FitsError> {
    fits_open_hdu(fits_fptr, hdu.number)?;

    let mut status = 0;
    let mut num_keys = 0;
    let mut num_more_keys = 0;
    unsafe {
        // ffghsp = fits_get_hdrspace
        fitsio_sys::ffghsp(
            fits_fptr.as_raw(), /* I - FITS file pointer                     */
            &mut num_keys,      /* O - returned number of existing keywords  */
            &mut num_more_keys, /* O - how many more keywords will fit       */
            &mut status,        /* IO - error status                         */
        );
    }
    fits_check_status(fits_fptr, hdu, status)?;

    let mut cards = Vec::with_capacity(num_keys.max(0) as usize);
    for i_key in 1..=num_keys {
        let mut name = [0 as c_char; CARD_BUFFER_LEN];
        let mut value = [0 as c_char; CARD_BUFFER_LEN];
        let mut comment = [0 as c_char; CARD_BUFFER_LEN];
        unsafe {
            // ffgkyn = fits_read_keyn
            fitsio_sys::ffgkyn(
                fits_fptr.as_raw(),    /* I - FITS file pointer             */
                i_key,                 /* I - number of the keyword to read */
                name.as_mut_ptr(),     /* O - name of the keyword           */
                value.as_mut_ptr(),    /* O - keyword value                 */
                comment.as_mut_ptr(),  /* O - keyword comment               */
                &mut status,           /* IO - error status                 */
            );
        }
        fits_check_status(fits_fptr, hdu, status)?;

        let to_string = |buf: &[c_char]| unsafe {
            CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
        };
        cards.push(HeaderCard {
            name: to_string(&name[..]),
            value: to_string(&value[..]),
            comment: to_string(&comment[..]),
        });
    }

    Ok(cards)
}
