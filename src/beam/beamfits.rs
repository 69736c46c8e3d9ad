// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write beamfits files.
//!
//! The primary image holds the electric field with axes (FITS order, fastest
//! first) complex part, frequency, spectral window, pixel, basis vector and
//! feed. A "COORDS" image holds the pixel locations and basis vectors stacked
//! on its fastest axis.

use std::path::Path;

use fitsio::{
    hdu::FitsHdu,
    images::{ImageDescription, ImageType},
    FitsFile,
};
use log::{debug, trace};
use ndarray::{prelude::*, Zip};
use num_complex::Complex;
use vec1::Vec1;

use super::{
    BeamPattern, BeamfitsReadError, BeamfitsReadOptions, BeamfitsWriteError,
    BeamfitsWriteOptions, CoordinateSystem,
};
use crate::{
    axis::{AxisDescriptor, AxisProbe, Tolerance},
    error::{ConsistencyError, SchemaError},
    io::{
        read::fits::*,
        write::{fits_create, fits_write_image, fits_write_string_key},
    },
    keywords::{
        read_history_and_extra_keywords, stamp_history, validate_extra_keywords,
        write_extra_keywords, write_history,
    },
    version_string, Decoded,
};

const FORMAT: &str = "beamfits";
const PRIMARY: &str = "primary";
const COORDS: &str = "COORDS";

const FREQ_TOL: Tolerance = Tolerance {
    rtol: 0.0,
    atol: 1e-3,
};

// FITS axis numbers of the primary image.
const COMPLEX_AXIS: usize = 1;
const FREQ_AXIS: usize = 2;
const SPW_AXIS: usize = 3;
const PIXEL_AXIS: usize = 4;
const BASIS_AXIS: usize = 5;
const FEED_AXIS: usize = 6;

// FITS axis numbers of the COORDS image.
const COORDS_ARRAY_AXIS: usize = 1;
const COORDS_PIXEL_AXIS: usize = 2;
const COORDS_COORD_AXIS: usize = 3;

/// Primary header keys that map to fields of [`BeamPattern`].
const HEADER_KEYS: [&str; 7] = [
    "TELESCOP", "FEED", "FEEDVER", "MODEL", "MODELVER", "COORDSYS", "FEEDLIST",
];

/// An axis that just enumerates things.
fn index_axis(ctype: &str) -> AxisDescriptor {
    AxisDescriptor::fixed(ctype, "Integer", 1.0, 1.0)
}

/// Format a list the way it's stored in a header, e.g. "[x, y]".
fn format_list<S: AsRef<str>>(items: &[S]) -> String {
    let items: Vec<&str> = items.iter().map(|s| s.as_ref()).collect();
    format!("[{}]", items.join(", "))
}

/// The inverse of [`format_list`]. Quotes around items are tolerated.
fn parse_list(s: &str) -> Vec<String> {
    let s = s.trim();
    let s = s.strip_prefix('[').unwrap_or(s);
    let s = s.strip_suffix(']').unwrap_or(s);
    s.split(',')
        .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Write a beam pattern to a beamfits file.
pub fn write<P: AsRef<Path>>(
    beam: &BeamPattern,
    file: P,
    options: &BeamfitsWriteOptions,
) -> Result<(), BeamfitsWriteError> {
    let file = file.as_ref();

    if options.run_check {
        beam.check(options.run_check_acceptability)?;
    }
    // A file that can't be read back is never written, checks or not.
    let system = CoordinateSystem::validate(&beam.coordinate_system, beam.num_axes)?;
    validate_extra_keywords(&beam.extra_keywords, FORMAT)?;

    let freq_increment = match &beam.freq_array[..] {
        [f0, f1, ..] => f1 - f0,
        _ => 1.0,
    };
    let freq_axis =
        AxisDescriptor::from_samples("FREQ", "Hz", &beam.freq_array, freq_increment, FREQ_TOL)?;
    let spws: Vec<f64> = beam.spw_array.iter().map(|&s| s as f64 + 1.0).collect();
    let spw_axis = AxisDescriptor::from_samples("IF", "Integer", &spws, 1.0, Tolerance::EXACT)?;

    let re = beam.efield_array.mapv(|c| c.re);
    let im = beam.efield_array.mapv(|c| c.im);
    let primary_data = ndarray::stack(Axis(5), &[re.view(), im.view()]).map_err(|_| {
        ConsistencyError::BadShape {
            thing: "efield_array",
            expected: re.shape().to_vec(),
            actual: im.shape().to_vec(),
        }
    })?;
    let coords_data = ndarray::stack(
        Axis(2),
        &[
            beam.pixel_location_array.view(),
            beam.basis_vector_array.view(),
        ],
    )
    .map_err(|_| ConsistencyError::BadShape {
        thing: "basis_vector_array",
        expected: beam.pixel_location_array.shape().to_vec(),
        actual: beam.basis_vector_array.shape().to_vec(),
    })?;

    if file.exists() {
        if options.clobber {
            debug!("Overwriting {}", file.display());
            std::fs::remove_file(file)?;
        } else {
            return Err(BeamfitsWriteError::FileExists {
                file: file.display().to_string(),
            });
        }
    }

    debug!("Writing {system} beamfits file {}", file.display());
    let mut fptr = fits_create(
        file,
        &ImageDescription {
            data_type: ImageType::Double,
            dimensions: primary_data.shape(),
        },
    )?;
    let hdu = fits_open_hdu(&mut fptr, 0)?;
    let header = [
        beam.telescope_name.clone(),
        beam.feed_name.clone(),
        beam.feed_version.clone(),
        beam.model_name.clone(),
        beam.model_version.clone(),
        system.to_string(),
        format_list(&beam.feed_array[..]),
    ];
    for (key, value) in HEADER_KEYS.iter().zip(header.iter()) {
        fits_write_string_key(&mut fptr, &hdu, key, value)?;
    }

    index_axis("COMPLEX").write(&mut fptr, &hdu, COMPLEX_AXIS)?;
    freq_axis.write(&mut fptr, &hdu, FREQ_AXIS)?;
    spw_axis.write(&mut fptr, &hdu, SPW_AXIS)?;
    index_axis("PIXIND").write(&mut fptr, &hdu, PIXEL_AXIS)?;
    index_axis("VECIND").write(&mut fptr, &hdu, BASIS_AXIS)?;
    index_axis("FEEDIND").write(&mut fptr, &hdu, FEED_AXIS)?;

    write_extra_keywords(&mut fptr, &hdu, &beam.extra_keywords)?;
    let mut history = beam.history.clone();
    stamp_history(&mut history, &version_string());
    write_history(&mut fptr, &hdu, &history)?;
    fits_write_image(&mut fptr, &hdu, &primary_data.iter().copied().collect::<Vec<_>>())?;

    trace!("Writing the {COORDS} image");
    let coords_hdu = fptr.create_image(
        COORDS,
        &ImageDescription {
            data_type: ImageType::Double,
            dimensions: coords_data.shape(),
        },
    )?;
    fits_write_string_key(&mut fptr, &coords_hdu, "COORLIST", &format_list(system.axes()))?;
    index_axis("ARRAYNUM").write(&mut fptr, &coords_hdu, COORDS_ARRAY_AXIS)?;
    index_axis("PIXIND").write(&mut fptr, &coords_hdu, COORDS_PIXEL_AXIS)?;
    index_axis("COORDIND").write(&mut fptr, &coords_hdu, COORDS_COORD_AXIS)?;
    fits_write_image(
        &mut fptr,
        &coords_hdu,
        &coords_data.iter().copied().collect::<Vec<_>>(),
    )?;

    Ok(())
}

/// Read a beamfits file. Beamfits has a single schema generation, so there
/// are never compatibility warnings.
pub fn read<P: AsRef<Path>>(
    file: P,
    options: &BeamfitsReadOptions,
) -> Result<Decoded<BeamPattern>, BeamfitsReadError> {
    let file = file.as_ref();
    let file_str = file.display().to_string();
    debug!("Reading beamfits file {file_str}");

    let mut fptr = fits_open(file)?;
    let hdu = fits_open_hdu(&mut fptr, 0)?;
    let mut read_key = |key: &str| -> Result<String, BeamfitsReadError> {
        let value = fits_get_optional_key_long_string(&mut fptr, &hdu, key)?.ok_or_else(|| {
            SchemaError::MissingKey {
                file: file_str.clone(),
                table: PRIMARY,
                key: key.to_string(),
            }
        })?;
        trace!("{key} = {value}");
        Ok(value)
    };
    let telescope_name = read_key("TELESCOP")?;
    let feed_name = read_key("FEED")?;
    let feed_version = read_key("FEEDVER")?;
    let model_name = read_key("MODEL")?;
    let model_version = read_key("MODELVER")?;
    let coordinate_system = read_key("COORDSYS")?;
    let feed_list = read_key("FEEDLIST")?;

    let size = fits_get_image_size(&fptr, &hdu)?.to_vec();
    if size.len() != 6 || size[5] != 2 {
        let mut expected = size.clone();
        expected.resize(6, 1);
        expected[5] = 2;
        return Err(ConsistencyError::BadShape {
            thing: "primary image",
            expected,
            actual: size,
        }
        .into());
    }
    let (num_feeds, num_axes, num_pixels, num_spws, num_freqs) =
        (size[0], size[1], size[2], size[3], size[4]);
    let system = CoordinateSystem::validate(&coordinate_system, num_axes)?;
    debug!("{file_str} holds a {system} beam with {num_feeds} feeds and {num_pixels} pixels");

    let feed_array = parse_list(&feed_list);
    if feed_array.len() != num_feeds {
        return Err(ConsistencyError::CountMismatch {
            thing: "the number of FEEDLIST entries",
            expected: num_feeds,
            actual: feed_array.len(),
        }
        .into());
    }

    let freq = read_axis(&mut fptr, &hdu, PRIMARY, FREQ_AXIS, &file_str)?;
    let spw = read_axis(&mut fptr, &hdu, PRIMARY, SPW_AXIS, &file_str)?;
    let freq_array = to_vec1("freq_array", freq.samples(num_freqs))?;
    let spw_numbers = spw
        .spw_numbers(num_spws)
        .ok_or_else(|| SchemaError::BadValue {
            file: file_str.clone(),
            table: PRIMARY,
            key: "CRVAL3",
            value: spw.crval.to_string(),
            reason: "spectral windows are numbered from 1",
        })?;
    let spw_array = to_vec1("spw_array", spw_numbers)?;

    let data: Vec<f64> = fits_get_image(&mut fptr, &hdu)?;
    let primary_data = Array6::from_shape_vec(
        (num_feeds, num_axes, num_pixels, num_spws, num_freqs, 2),
        data,
    )
    .map_err(|_| ConsistencyError::BadShape {
        thing: "primary image",
        expected: size.clone(),
        actual: size.clone(),
    })?;
    let efield_array = Zip::from(primary_data.index_axis(Axis(5), 0))
        .and(primary_data.index_axis(Axis(5), 1))
        .map_collect(|&re, &im| Complex::new(re, im));

    let (pixel_location_array, basis_vector_array) =
        read_coords(&mut fptr, &file_str, system, num_axes, num_pixels)?;

    let (mut history, extra_keywords) =
        read_history_and_extra_keywords(&mut fptr, &hdu, |key| HEADER_KEYS.contains(&key))?;
    stamp_history(&mut history, &version_string());

    let beam = BeamPattern {
        telescope_name,
        feed_name,
        feed_version,
        model_name,
        model_version,
        coordinate_system,
        feed_array: to_vec1("feed_array", feed_array)?,
        num_feeds,
        num_axes,
        num_pixels,
        num_spws,
        num_freqs,
        freq_array,
        spw_array,
        efield_array,
        pixel_location_array,
        basis_vector_array,
        history,
        extra_keywords,
    };

    if options.run_check {
        beam.check(options.run_check_acceptability)?;
    }

    Ok(Decoded {
        value: beam,
        warnings: vec![],
    })
}

/// Read the COORDS image, checking it against the primary image and the
/// coordinate system.
fn read_coords(
    fptr: &mut FitsFile,
    file: &str,
    system: CoordinateSystem,
    num_axes: usize,
    num_pixels: usize,
) -> Result<(Array2<f64>, Array2<f64>), BeamfitsReadError> {
    let hdu = fits_open_optional_hdu(fptr, COORDS)?.ok_or_else(|| SchemaError::MissingTable {
        file: file.to_string(),
        table: COORDS,
    })?;
    trace!("Reading the {COORDS} image");

    let coord_list = fits_get_optional_key_long_string(fptr, &hdu, "COORLIST")?
        .map(|s| parse_list(&s))
        .ok_or_else(|| SchemaError::MissingKey {
            file: file.to_string(),
            table: COORDS,
            key: "COORLIST".to_string(),
        })?;
    if coord_list.iter().map(|s| s.as_str()).ne(system.axes().iter().copied()) {
        return Err(ConsistencyError::CoordListMismatch {
            coordinate_system: system.to_string(),
            expected: system.axes().iter().map(|s| s.to_string()).collect(),
            actual: coord_list,
        }
        .into());
    }

    let size = fits_get_image_size(fptr, &hdu)?.to_vec();
    if size.len() != 3 || size[2] != 2 {
        return Err(ConsistencyError::BadShape {
            thing: "COORDS image",
            expected: vec![num_axes, num_pixels, 2],
            actual: size,
        }
        .into());
    }
    // NAXIS3 is the number of coordinates, NAXIS2 the number of pixels.
    if size[0] != num_axes {
        return Err(ConsistencyError::CountMismatch {
            thing: "the number of coordinates in the COORDS image",
            expected: num_axes,
            actual: size[0],
        }
        .into());
    }
    if size[1] != num_pixels {
        return Err(ConsistencyError::CountMismatch {
            thing: "the number of pixels in the COORDS image",
            expected: num_pixels,
            actual: size[1],
        }
        .into());
    }

    let data: Vec<f64> = fits_get_image(fptr, &hdu)?;
    let coords = Array3::from_shape_vec((num_axes, num_pixels, 2), data).map_err(|_| {
        ConsistencyError::BadShape {
            thing: "COORDS image",
            expected: vec![num_axes, num_pixels, 2],
            actual: size.clone(),
        }
    })?;
    Ok((
        coords.index_axis(Axis(2), 0).to_owned(),
        coords.index_axis(Axis(2), 1).to_owned(),
    ))
}

/// Read an axis descriptor; every key must be present.
fn read_axis(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    table: &'static str,
    axis: usize,
    file: &str,
) -> Result<AxisDescriptor, BeamfitsReadError> {
    let probe = AxisProbe::read(fptr, hdu, axis)?;
    let require = |found: Option<f64>, key: &str| {
        found.ok_or_else(|| SchemaError::MissingKey {
            file: file.to_string(),
            table,
            key: format!("{key}{axis}"),
        })
    };
    let crval = require(probe.crval, "CRVAL")?;
    let cdelt = require(probe.cdelt, "CDELT")?;
    let crpix = require(probe.crpix, "CRPIX")?;
    Ok(probe.into_descriptor(crval, cdelt, crpix))
}

fn to_vec1<T>(thing: &'static str, v: Vec<T>) -> Result<Vec1<T>, ConsistencyError> {
    let actual = v.len();
    Vec1::try_from_vec(v).map_err(|_| ConsistencyError::CountMismatch {
        thing,
        expected: 1,
        actual,
    })
}
