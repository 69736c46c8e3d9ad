// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Code to read and write calfits files.
//!
//! A calfits file has a primary image with dimensions (FITS order, fastest
//! first) of image array, Jones, time, frequency, spectral window and
//! antenna. Gain files stack the real part, imaginary part, flags, optional
//! input flags and quality on the image array axis; delay files stack delay
//! and quality, with flags going into a separate "FLAGS" image. The
//! "ANTENNAS" table maps antenna indices to names and numbers, and an
//! optional "TOTQLTY" image holds a quality metric over all antennas.

use std::{path::Path, str::FromStr};

use fitsio::{
    hdu::{FitsHdu, HduInfo},
    images::{ImageDescription, ImageType},
    tables::{ColumnDataType, ColumnDescription},
    FitsFile,
};
use log::{debug, trace};
use ndarray::{prelude::*, Zip};
use num_complex::Complex;
use vec1::Vec1;

use super::{
    CalData, CalType, CalfitsReadError, CalfitsReadOptions, CalfitsWriteError,
    CalfitsWriteOptions, CalibrationSolution,
};
use crate::{
    axis::{AxisDescriptor, AxisProbe, Tolerance},
    error::{ConsistencyError, SamplingError, SchemaError, UnsupportedValueError},
    io::{
        read::fits::*,
        write::{
            fits_create, fits_write_float_key, fits_write_image, fits_write_int_key,
            fits_write_string_key, format_float,
        },
    },
    keywords::{
        read_history_and_extra_keywords, stamp_history, validate_extra_keywords,
        write_extra_keywords, write_history,
    },
    legacy::{CalTable, Fallback, LegacyDetector},
    version_string, Decoded,
};

const FORMAT: &str = "calfits";
const ANTENNAS: &str = "ANTENNAS";
const FLAGS: &str = "FLAGS";
const TOTQLTY: &str = "TOTQLTY";

const FREQ_TOL: Tolerance = Tolerance {
    rtol: 0.0,
    atol: 1e-3,
};
/// One millisecond, in days.
const TIME_TOL: Tolerance = Tolerance {
    rtol: 0.0,
    atol: 1e-3 / 86400.0,
};

// FITS axis numbers of the primary image and the FLAGS image.
const ARRAY_AXIS: usize = 1;
const JONES_AXIS: usize = 2;
const TIME_AXIS: usize = 3;
const FREQ_AXIS: usize = 4;
const SPW_AXIS: usize = 5;
const ANT_AXIS: usize = 6;

// FITS axis numbers of the TOTQLTY image.
const TOTQLTY_JONES_AXIS: usize = 1;
const TOTQLTY_TIME_AXIS: usize = 2;
const TOTQLTY_FREQ_AXIS: usize = 3;
const TOTQLTY_SPW_AXIS: usize = 4;

/// The scalars stored in the primary header.
#[derive(Debug, Clone, Default)]
struct CalHeader {
    telescope_name: String,
    gain_convention: String,
    x_orientation: String,
    cal_type: String,
    num_times: usize,
    num_freqs: usize,
    num_ants_data: usize,
    num_jones: usize,
    num_ants_telescope: usize,
    num_spws: usize,
    integration_time: f64,
    channel_width: f64,
    freq_range: Option<[f64; 2]>,
    time_range: Option<[f64; 2]>,
    observer: Option<String>,
    git_origin_cal: Option<String>,
    git_hash_cal: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Presence {
    Required,
    Optional,
    RequiredFor(CalType),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ScalarKind {
    Int,
    Float,
    Str,
    Range,
}

#[derive(Debug, Clone, PartialEq)]
enum ScalarValue {
    Int(usize),
    Float(f64),
    Str(String),
    Range([f64; 2]),
}

/// How a header key maps to a field of [`CalHeader`]. The same table is used
/// for reading and writing.
struct HeaderScalar {
    key: &'static str,
    kind: ScalarKind,
    presence: Presence,
    get: fn(&CalHeader) -> Option<ScalarValue>,
    /// Set the field from the raw header text; on failure, say why.
    set: fn(&mut CalHeader, &str) -> Result<(), &'static str>,
}

fn header_scalars() -> [HeaderScalar; 17] {
    use Presence::*;
    use ScalarKind::*;

    [
        HeaderScalar {
            key: "TELESCOP",
            kind: Str,
            presence: Required,
            get: |h| Some(ScalarValue::Str(h.telescope_name.clone())),
            set: |h, v| {
                h.telescope_name = v.to_string();
                Ok(())
            },
        },
        HeaderScalar {
            key: "GNCONVEN",
            kind: Str,
            presence: Required,
            get: |h| Some(ScalarValue::Str(h.gain_convention.clone())),
            set: |h, v| {
                h.gain_convention = v.to_string();
                Ok(())
            },
        },
        HeaderScalar {
            key: "NTIMES",
            kind: Int,
            presence: Required,
            get: |h| Some(ScalarValue::Int(h.num_times)),
            set: |h, v| {
                h.num_times = parse_count(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "NFREQS",
            kind: Int,
            presence: Required,
            get: |h| Some(ScalarValue::Int(h.num_freqs)),
            set: |h, v| {
                h.num_freqs = parse_count(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "NANTSDAT",
            kind: Int,
            presence: Required,
            get: |h| Some(ScalarValue::Int(h.num_ants_data)),
            set: |h, v| {
                h.num_ants_data = parse_count(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "NJONES",
            kind: Int,
            presence: Required,
            get: |h| Some(ScalarValue::Int(h.num_jones)),
            set: |h, v| {
                h.num_jones = parse_count(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "CALTYPE",
            kind: Str,
            presence: Required,
            get: |h| Some(ScalarValue::Str(h.cal_type.clone())),
            set: |h, v| {
                h.cal_type = v.to_string();
                Ok(())
            },
        },
        HeaderScalar {
            key: "INTTIME",
            kind: Float,
            presence: Required,
            get: |h| Some(ScalarValue::Float(h.integration_time)),
            set: |h, v| {
                h.integration_time = parse_float(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "CHWIDTH",
            kind: Float,
            presence: Required,
            get: |h| Some(ScalarValue::Float(h.channel_width)),
            set: |h, v| {
                h.channel_width = parse_float(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "NANTSTEL",
            kind: Int,
            presence: Required,
            get: |h| Some(ScalarValue::Int(h.num_ants_telescope)),
            set: |h, v| {
                h.num_ants_telescope = parse_count(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "NSPWS",
            kind: Int,
            presence: Required,
            get: |h| Some(ScalarValue::Int(h.num_spws)),
            set: |h, v| {
                h.num_spws = parse_count(v)?;
                Ok(())
            },
        },
        HeaderScalar {
            key: "XORIENT",
            kind: Str,
            presence: Required,
            get: |h| Some(ScalarValue::Str(h.x_orientation.clone())),
            set: |h, v| {
                h.x_orientation = v.to_string();
                Ok(())
            },
        },
        HeaderScalar {
            key: "FRQRANGE",
            kind: Range,
            presence: RequiredFor(CalType::Delay),
            get: |h| h.freq_range.map(ScalarValue::Range),
            set: |h, v| {
                h.freq_range = Some(parse_range(v)?);
                Ok(())
            },
        },
        HeaderScalar {
            key: "TMERANGE",
            kind: Range,
            presence: Required,
            get: |h| h.time_range.map(ScalarValue::Range),
            set: |h, v| {
                h.time_range = Some(parse_range(v)?);
                Ok(())
            },
        },
        HeaderScalar {
            key: "OBSERVER",
            kind: Str,
            presence: Optional,
            get: |h| h.observer.clone().map(ScalarValue::Str),
            set: |h, v| {
                h.observer = Some(v.to_string());
                Ok(())
            },
        },
        HeaderScalar {
            key: "ORIGCAL",
            kind: Str,
            presence: Optional,
            get: |h| h.git_origin_cal.clone().map(ScalarValue::Str),
            set: |h, v| {
                h.git_origin_cal = Some(v.to_string());
                Ok(())
            },
        },
        HeaderScalar {
            key: "HASHCAL",
            kind: Str,
            presence: Optional,
            get: |h| h.git_hash_cal.clone().map(ScalarValue::Str),
            set: |h, v| {
                h.git_hash_cal = Some(v.to_string());
                Ok(())
            },
        },
    ]
}

fn parse_count(v: &str) -> Result<usize, &'static str> {
    match v.trim().parse() {
        Ok(0) | Err(_) => Err("expected a positive integer"),
        Ok(n) => Ok(n),
    }
}

fn parse_float(v: &str) -> Result<f64, &'static str> {
    v.trim()
        .replace('D', "E")
        .parse()
        .map_err(|_| "expected a number")
}

fn parse_range(v: &str) -> Result<[f64; 2], &'static str> {
    const REASON: &str = "expected two comma-separated numbers";
    let (start, end) = v.split_once(',').ok_or(REASON)?;
    match (parse_float(start), parse_float(end)) {
        (Ok(start), Ok(end)) => Ok([start, end]),
        _ => Err(REASON),
    }
}

fn format_range([start, end]: [f64; 2]) -> String {
    format!("{},{}", format_float(start), format_float(end))
}

fn is_header_scalar(key: &str) -> bool {
    header_scalars().iter().any(|s| s.key == key)
}

/// The descriptors of the physical axes.
struct CalAxes {
    jones: AxisDescriptor,
    time: AxisDescriptor,
    freq: AxisDescriptor,
    spw: AxisDescriptor,
}

impl CalAxes {
    fn from_solution(cal: &CalibrationSolution) -> Result<CalAxes, SamplingError> {
        let jones: Vec<f64> = cal.jones_array.iter().map(|&j| j as f64).collect();
        let spws: Vec<f64> = cal.spw_array.iter().map(|&s| s as f64 + 1.0).collect();
        Ok(CalAxes {
            jones: AxisDescriptor::from_samples("JONES", "Integer", &jones, -1.0, Tolerance::EXACT)?,
            time: AxisDescriptor::from_samples(
                "TIME",
                "JD",
                &cal.time_array,
                cal.integration_time / 86400.0,
                TIME_TOL,
            )?,
            freq: AxisDescriptor::from_samples(
                "FREQS",
                "Hz",
                &cal.freq_array,
                cal.channel_width,
                FREQ_TOL,
            )?,
            spw: AxisDescriptor::from_samples("IF", "Integer", &spws, 1.0, Tolerance::EXACT)?,
        })
    }
}

/// Write a calibration solution to a calfits file.
pub fn write<P: AsRef<Path>>(
    cal: &CalibrationSolution,
    file: P,
    options: &CalfitsWriteOptions,
) -> Result<(), CalfitsWriteError> {
    let file = file.as_ref();
    let data = cal
        .data
        .as_ref()
        .ok_or_else(|| UnsupportedValueError::UnknownCalType {
            value: "<unset>".to_string(),
        })?;
    let cal_type = data.cal_type();

    if options.run_check {
        cal.check(options.run_check_acceptability)?;
    }
    validate_extra_keywords(&cal.extra_keywords, FORMAT)?;
    let axes = CalAxes::from_solution(cal)?;
    let header = header_from_solution(cal, cal_type, options.spoof_nonessential)?;

    let to_float = |a: &Array5<bool>| a.mapv(|f| if f { 1.0 } else { 0.0 });
    let (primary_data, flags_data) = match data {
        CalData::Gain { gain_array } => {
            let re = gain_array.mapv(|c| c.re);
            let im = gain_array.mapv(|c| c.im);
            let flags = to_float(&cal.flag_array);
            let input_flags = cal.input_flag_array.as_ref().map(to_float);
            let mut arrays = vec![re.view(), im.view(), flags.view()];
            if let Some(input_flags) = &input_flags {
                arrays.push(input_flags.view());
            }
            arrays.push(cal.quality_array.view());
            (stack_arrays("gain_array", &arrays)?, None)
        }
        CalData::Delay { delay_array } => {
            let primary =
                stack_arrays("delay_array", &[delay_array.view(), cal.quality_array.view()])?;
            let to_int = |a: &Array5<bool>| a.mapv(i32::from);
            let flags = to_int(&cal.flag_array);
            let input_flags = cal.input_flag_array.as_ref().map(to_int);
            let mut arrays = vec![flags.view()];
            if let Some(input_flags) = &input_flags {
                arrays.push(input_flags.view());
            }
            (primary, Some(stack_arrays("flag_array", &arrays)?))
        }
    };

    if file.exists() {
        if options.clobber {
            debug!("Overwriting {}", file.display());
            std::fs::remove_file(file)?;
        } else {
            return Err(CalfitsWriteError::FileExists {
                file: file.display().to_string(),
            });
        }
    }

    debug!("Writing {cal_type} calfits file {}", file.display());
    let mut fptr = fits_create(
        file,
        &ImageDescription {
            data_type: ImageType::Double,
            dimensions: primary_data.shape(),
        },
    )?;
    let hdu = fits_open_hdu(&mut fptr, 0)?;
    write_header_scalars(&mut fptr, &hdu, &header)?;
    write_axes(&mut fptr, &hdu, &axes, primary_data.shape()[5])?;
    write_extra_keywords(&mut fptr, &hdu, &cal.extra_keywords)?;
    let mut history = cal.history.clone();
    stamp_history(&mut history, &version_string());
    write_history(&mut fptr, &hdu, &history)?;
    fits_write_image(&mut fptr, &hdu, &flatten(&primary_data))?;

    write_antennas(&mut fptr, cal)?;

    if let Some(flags_data) = flags_data {
        trace!("Writing the {FLAGS} image");
        let hdu = fptr.create_image(
            FLAGS,
            &ImageDescription {
                data_type: ImageType::Long,
                dimensions: flags_data.shape(),
            },
        )?;
        write_axes(&mut fptr, &hdu, &axes, flags_data.shape()[5])?;
        fits_write_image(&mut fptr, &hdu, &flatten(&flags_data))?;
    }

    if let Some(total_quality) = &cal.total_quality_array {
        trace!("Writing the {TOTQLTY} image");
        let hdu = fptr.create_image(
            TOTQLTY,
            &ImageDescription {
                data_type: ImageType::Double,
                dimensions: total_quality.shape(),
            },
        )?;
        axes.jones.write(&mut fptr, &hdu, TOTQLTY_JONES_AXIS)?;
        axes.time.write(&mut fptr, &hdu, TOTQLTY_TIME_AXIS)?;
        // Delays have no frequency dependence.
        if cal_type == CalType::Gain {
            axes.freq.write(&mut fptr, &hdu, TOTQLTY_FREQ_AXIS)?;
        }
        axes.spw.write(&mut fptr, &hdu, TOTQLTY_SPW_AXIS)?;
        fits_write_image(&mut fptr, &hdu, &flatten(total_quality))?;
    }

    Ok(())
}

fn header_from_solution(
    cal: &CalibrationSolution,
    cal_type: CalType,
    spoof_nonessential: bool,
) -> Result<CalHeader, SchemaError> {
    let spoof_range = |parameter: &'static str, range: Option<[f64; 2]>, samples: &Vec1<f64>| {
        match range {
            Some(r) => Ok(Some(r)),
            None if spoof_nonessential => {
                debug!("Spoofing {parameter} from the data");
                let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
                let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Ok(Some([min, max]))
            }
            None => Err(SchemaError::MissingParameter {
                parameter,
                format: FORMAT,
            }),
        }
    };

    let freq_range = match cal_type {
        CalType::Delay => spoof_range("freq_range", cal.freq_range, &cal.freq_array)?,
        CalType::Gain => cal.freq_range,
    };
    let time_range = spoof_range("time_range", cal.time_range, &cal.time_array)?;

    Ok(CalHeader {
        telescope_name: cal.telescope_name.clone(),
        gain_convention: cal.gain_convention.clone(),
        x_orientation: cal.x_orientation.clone(),
        cal_type: cal_type.to_string(),
        num_times: cal.num_times,
        num_freqs: cal.num_freqs,
        num_ants_data: cal.num_ants_data,
        num_jones: cal.num_jones,
        num_ants_telescope: cal.num_ants_telescope,
        num_spws: cal.num_spws,
        integration_time: cal.integration_time,
        channel_width: cal.channel_width,
        freq_range,
        time_range,
        observer: cal.observer.clone(),
        git_origin_cal: cal.git_origin_cal.clone(),
        git_hash_cal: cal.git_hash_cal.clone(),
    })
}

/// Stack same-shaped arrays along a new trailing axis.
fn stack_arrays<A: Clone>(
    thing: &'static str,
    arrays: &[ArrayView5<A>],
) -> Result<Array6<A>, ConsistencyError> {
    ndarray::stack(Axis(5), arrays).map_err(|_| {
        let expected = arrays[0].shape().to_vec();
        let actual = arrays
            .iter()
            .map(|a| a.shape())
            .find(|s| *s != expected.as_slice())
            .unwrap_or_default()
            .to_vec();
        ConsistencyError::BadShape {
            thing,
            expected,
            actual,
        }
    })
}

/// Image data in row-major order, i.e. the order FITS wants.
fn flatten<A: Copy, D: Dimension>(array: &Array<A, D>) -> Vec<A> {
    array.iter().copied().collect()
}

fn write_header_scalars(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    header: &CalHeader,
) -> Result<(), FitsError> {
    for scalar in header_scalars() {
        match (scalar.get)(header) {
            Some(ScalarValue::Int(v)) => fits_write_int_key(fptr, hdu, scalar.key, v as i64)?,
            Some(ScalarValue::Float(v)) => fits_write_float_key(fptr, hdu, scalar.key, v)?,
            Some(ScalarValue::Str(v)) => fits_write_string_key(fptr, hdu, scalar.key, &v)?,
            Some(ScalarValue::Range(v)) => {
                fits_write_string_key(fptr, hdu, scalar.key, &format_range(v))?
            }
            None => (),
        }
    }
    Ok(())
}

/// Write the descriptors of a primary-like image; `num_arrays` is the length
/// of the image array axis.
fn write_axes(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    axes: &CalAxes,
    num_arrays: usize,
) -> Result<(), FitsError> {
    AxisDescriptor::fixed("Narrays", "Integer", num_arrays as f64, 1.0).write(fptr, hdu, ARRAY_AXIS)?;
    axes.jones.write(fptr, hdu, JONES_AXIS)?;
    axes.time.write(fptr, hdu, TIME_AXIS)?;
    axes.freq.write(fptr, hdu, FREQ_AXIS)?;
    axes.spw.write(fptr, hdu, SPW_AXIS)?;
    AxisDescriptor::fixed("ANTAXIS", "Integer", 1.0, -1.0).write(fptr, hdu, ANT_AXIS)?;
    Ok(())
}

fn write_antennas(fptr: &mut FitsFile, cal: &CalibrationSolution) -> Result<(), CalfitsWriteError> {
    trace!("Writing the {ANTENNAS} table");
    let name_col = ColumnDescription::new("ANTNAME")
        .with_type(ColumnDataType::String)
        .that_repeats(8)
        .create()?;
    let index_col = ColumnDescription::new("ANTINDEX")
        .with_type(ColumnDataType::Double)
        .create()?;
    let arr_col = ColumnDescription::new("ANTARR")
        .with_type(ColumnDataType::Double)
        .create()?;
    let hdu = fptr.create_table(ANTENNAS, &[name_col, index_col, arr_col])?;

    let numbers: Vec<f64> = cal.antenna_numbers.iter().map(|&n| n as f64).collect();
    // The table has a row per telescope antenna; pad the antennas with data.
    let num_rows = cal.antenna_numbers.len().max(cal.ant_array.len());
    let ant_array: Vec<f64> = cal
        .ant_array
        .iter()
        .map(|&a| a as f64)
        .chain(std::iter::repeat(-1.0))
        .take(num_rows)
        .collect();
    hdu.write_col(fptr, "ANTNAME", &cal.antenna_names)?;
    hdu.write_col(fptr, "ANTINDEX", &numbers)?;
    hdu.write_col(fptr, "ANTARR", &ant_array)?;
    Ok(())
}

/// Read a calfits file, returning the solution and any compatibility warnings.
pub fn read<P: AsRef<Path>>(
    file: P,
    options: &CalfitsReadOptions,
) -> Result<Decoded<CalibrationSolution>, CalfitsReadError> {
    let file = file.as_ref();
    let file_str = file.display().to_string();
    debug!("Reading calfits file {file_str}");
    let mut detector = LegacyDetector::new(file_str.clone(), options.strict_fits);

    let mut fptr = fits_open(file)?;
    let hdu = fits_open_hdu(&mut fptr, 0)?;
    let header = read_header_scalars(&mut fptr, &hdu, &file_str)?;
    let cal_type =
        CalType::from_str(&header.cal_type).map_err(|_| UnsupportedValueError::UnknownCalType {
            value: header.cal_type.clone(),
        })?;
    debug!("{file_str} holds {cal_type} solutions");
    for scalar in header_scalars() {
        if scalar.presence == Presence::RequiredFor(cal_type) && (scalar.get)(&header).is_none() {
            return Err(SchemaError::MissingKey {
                file: file_str,
                table: CalTable::Primary.name(),
                key: scalar.key.to_string(),
            }
            .into());
        }
    }

    // The frequency axis of delays is degenerate.
    let solution_freqs = match cal_type {
        CalType::Gain => header.num_freqs,
        CalType::Delay => 1,
    };
    let solution_shape = [
        header.num_ants_data,
        header.num_spws,
        solution_freqs,
        header.num_times,
        header.num_jones,
    ];
    let num_arrays: &[usize] = match cal_type {
        CalType::Gain => &[4, 5],
        CalType::Delay => &[2],
    };
    let primary_data = read_image6(&mut fptr, &hdu, "primary image", &solution_shape, num_arrays)?;

    let primary_axes = read_primary_axes(&mut fptr, &hdu, &mut detector)?;
    let jones_array = to_vec1(
        "jones_array",
        primary_axes
            .jones
            .samples(header.num_jones)
            .into_iter()
            .map(|j| j.round() as i32)
            .collect(),
    )?;
    let time_array = to_vec1("time_array", primary_axes.time.samples(header.num_times))?;
    let spw_numbers = primary_axes
        .spw
        .spw_numbers(header.num_spws)
        .ok_or_else(|| SchemaError::BadValue {
            file: file_str.clone(),
            table: CalTable::Primary.name(),
            key: "CRVAL5",
            value: primary_axes.spw.crval.to_string(),
            reason: "spectral windows are numbered from 1",
        })?;
    let spw_array = to_vec1("spw_array", spw_numbers)?;

    let (antenna_names, antenna_numbers, ant_array) =
        read_antennas(&mut fptr, &file_str, header.num_ants_data)?;

    let (data, quality_array, flag_array, input_flag_array, freq_array) = match cal_type {
        CalType::Gain => {
            let freq_array = to_vec1("freq_array", primary_axes.freq.samples(header.num_freqs))?;
            let plane = |i: usize| primary_data.index_axis(Axis(5), i);
            let gain_array = Zip::from(plane(0))
                .and(plane(1))
                .map_collect(|&re, &im| Complex::new(re, im));
            let flag_array = plane(2).mapv(|f| f != 0.0);
            let (input_flag_array, quality_array) = if primary_data.len_of(Axis(5)) == 5 {
                (Some(plane(3).mapv(|f| f != 0.0)), plane(4).to_owned())
            } else {
                (None, plane(3).to_owned())
            };
            (
                CalData::Gain { gain_array },
                quality_array,
                flag_array,
                input_flag_array,
                freq_array,
            )
        }

        CalType::Delay => {
            let flags_hdu = fits_open_optional_hdu(&mut fptr, FLAGS)?.ok_or_else(|| {
                SchemaError::MissingTable {
                    file: file_str.clone(),
                    table: FLAGS,
                }
            })?;
            let flag_shape = [
                header.num_ants_data,
                header.num_spws,
                header.num_freqs,
                header.num_times,
                header.num_jones,
            ];
            let flags_data =
                read_image6(&mut fptr, &flags_hdu, "FLAGS image", &flag_shape, &[1, 2])?;

            check_aux_axes(
                &mut fptr,
                &flags_hdu,
                CalTable::Flags,
                [JONES_AXIS, TIME_AXIS, SPW_AXIS],
                &primary_axes,
                &header,
                &mut detector,
            )?;
            let freq = read_axis(
                &mut fptr,
                &flags_hdu,
                CalTable::Flags,
                FREQ_AXIS,
                &mut detector,
                Some(&primary_axes.freq),
            )?;
            compare_axes(
                CalTable::Flags,
                "frequency",
                &primary_axes.freq,
                &freq,
                header.num_freqs,
                FREQ_TOL,
            )?;

            let plane = |i: usize| flags_data.index_axis(Axis(5), i);
            let input_flag_array = if flags_data.len_of(Axis(5)) == 2 {
                Some(plane(1).mapv(|f| f != 0.0))
            } else {
                None
            };
            (
                CalData::Delay {
                    delay_array: primary_data.index_axis(Axis(5), 0).to_owned(),
                },
                primary_data.index_axis(Axis(5), 1).to_owned(),
                plane(0).mapv(|f| f != 0.0),
                input_flag_array,
                to_vec1("freq_array", primary_axes.freq.samples(header.num_freqs))?,
            )
        }
    };

    let total_quality_array = match fits_open_optional_hdu(&mut fptr, TOTQLTY)? {
        None => None,
        Some(tq_hdu) => {
            trace!("Reading the {TOTQLTY} image");
            let shape = &solution_shape[1..];
            let size = fits_get_image_size(&fptr, &tq_hdu)?.to_vec();
            if size != shape {
                return Err(ConsistencyError::BadShape {
                    thing: "TOTQLTY image",
                    expected: shape.to_vec(),
                    actual: size,
                }
                .into());
            }
            let data: Vec<f64> = fits_get_image(&mut fptr, &tq_hdu)?;

            check_aux_axes(
                &mut fptr,
                &tq_hdu,
                CalTable::TotalQuality,
                [TOTQLTY_JONES_AXIS, TOTQLTY_TIME_AXIS, TOTQLTY_SPW_AXIS],
                &primary_axes,
                &header,
                &mut detector,
            )?;
            if cal_type == CalType::Gain {
                let freq = read_axis(
                    &mut fptr,
                    &tq_hdu,
                    CalTable::TotalQuality,
                    TOTQLTY_FREQ_AXIS,
                    &mut detector,
                    Some(&primary_axes.freq),
                )?;
                compare_axes(
                    CalTable::TotalQuality,
                    "frequency",
                    &primary_axes.freq,
                    &freq,
                    header.num_freqs,
                    FREQ_TOL,
                )?;
            }

            let array = Array4::from_shape_vec(
                (shape[0], shape[1], shape[2], shape[3]),
                data,
            )
            .map_err(|_| ConsistencyError::BadShape {
                thing: "TOTQLTY image",
                expected: shape.to_vec(),
                actual: size.clone(),
            })?;
            Some(array)
        }
    };

    let (mut history, extra_keywords) =
        read_history_and_extra_keywords(&mut fptr, &hdu, is_header_scalar)?;
    stamp_history(&mut history, &version_string());

    let solution = CalibrationSolution {
        telescope_name: header.telescope_name,
        gain_convention: header.gain_convention,
        x_orientation: header.x_orientation,
        num_spws: header.num_spws,
        num_freqs: header.num_freqs,
        num_times: header.num_times,
        num_jones: header.num_jones,
        num_ants_data: header.num_ants_data,
        num_ants_telescope: header.num_ants_telescope,
        data: Some(data),
        quality_array,
        flag_array,
        input_flag_array,
        total_quality_array,
        freq_array,
        time_array,
        jones_array,
        spw_array,
        integration_time: header.integration_time,
        channel_width: header.channel_width,
        freq_range: header.freq_range,
        time_range: header.time_range,
        observer: header.observer,
        git_origin_cal: header.git_origin_cal,
        git_hash_cal: header.git_hash_cal,
        history,
        antenna_names,
        antenna_numbers,
        ant_array,
        extra_keywords,
    };

    if options.run_check {
        solution.check(options.run_check_acceptability)?;
    }

    Ok(Decoded {
        value: solution,
        warnings: detector.into_warnings(),
    })
}

fn read_header_scalars(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    file: &str,
) -> Result<CalHeader, CalfitsReadError> {
    let mut header = CalHeader::default();
    for scalar in header_scalars() {
        let value = match scalar.kind {
            ScalarKind::Str => fits_get_optional_key_long_string(fptr, hdu, scalar.key)?,
            _ => fits_get_optional_key::<String>(fptr, hdu, scalar.key)?,
        };
        match value {
            Some(value) => {
                trace!("{} = {value}", scalar.key);
                (scalar.set)(&mut header, &value).map_err(|reason| SchemaError::BadValue {
                    file: file.to_string(),
                    table: CalTable::Primary.name(),
                    key: scalar.key,
                    value: value.clone(),
                    reason,
                })?;
            }
            None if scalar.presence == Presence::Required => {
                return Err(SchemaError::MissingKey {
                    file: file.to_string(),
                    table: CalTable::Primary.name(),
                    key: scalar.key.to_string(),
                }
                .into())
            }
            // Checked once the calibration type is known.
            None => (),
        }
    }
    Ok(header)
}

/// Read a six-dimensional image, checking its shape. The last dimension (the
/// image array axis) may take any of the supplied lengths.
fn read_image6(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    thing: &'static str,
    shape: &[usize; 5],
    num_arrays: &[usize],
) -> Result<Array6<f64>, CalfitsReadError> {
    let size = fits_get_image_size(fptr, hdu)?.to_vec();
    let num_arrays = size
        .last()
        .copied()
        .filter(|n| size.len() == 6 && num_arrays.contains(n))
        .unwrap_or(num_arrays[0]);
    let mut expected = shape.to_vec();
    expected.push(num_arrays);
    if size != expected {
        return Err(ConsistencyError::BadShape {
            thing,
            expected,
            actual: size,
        }
        .into());
    }

    let data: Vec<f64> = fits_get_image(fptr, hdu)?;
    let [a, b, c, d, e] = *shape;
    Array6::from_shape_vec((a, b, c, d, e, num_arrays), data).map_err(|_| {
        ConsistencyError::BadShape {
            thing,
            expected,
            actual: size,
        }
        .into()
    })
}

fn read_primary_axes(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    detector: &mut LegacyDetector,
) -> Result<CalAxes, CalfitsReadError> {
    Ok(CalAxes {
        jones: read_axis(fptr, hdu, CalTable::Primary, JONES_AXIS, detector, None)?,
        time: read_axis(fptr, hdu, CalTable::Primary, TIME_AXIS, detector, None)?,
        freq: read_axis(fptr, hdu, CalTable::Primary, FREQ_AXIS, detector, None)?,
        spw: read_axis(fptr, hdu, CalTable::Primary, SPW_AXIS, detector, None)?,
    })
}

/// Read an axis descriptor, falling back on the compatibility table for
/// missing keys. `primary` is the corresponding primary image descriptor, if
/// this is an auxiliary image.
fn read_axis(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    table: CalTable,
    axis: usize,
    detector: &mut LegacyDetector,
    primary: Option<&AxisDescriptor>,
) -> Result<AxisDescriptor, CalfitsReadError> {
    let probe = AxisProbe::read(fptr, hdu, axis)?;

    let mut resolve = |found: Option<f64>,
                       key: &'static str,
                       from_primary: fn(&AxisDescriptor) -> f64|
     -> Result<f64, SchemaError> {
        if let Some(v) = found {
            return Ok(v);
        }
        match detector.reconcile(table, key, axis)? {
            Fallback::Value(v) => Ok(v),
            Fallback::PrimaryAxis => primary.map(from_primary).ok_or_else(|| {
                SchemaError::MissingKey {
                    file: fptr.file_path().display().to_string(),
                    table: table.name(),
                    key: format!("{key}{axis}"),
                }
            }),
        }
    };
    let crpix = resolve(probe.crpix, "CRPIX", |d| d.crpix)?;
    let crval = resolve(probe.crval, "CRVAL", |d| d.crval)?;
    let cdelt = resolve(probe.cdelt, "CDELT", |d| d.cdelt)?;

    Ok(probe.into_descriptor(crval, cdelt, crpix))
}

/// Read the Jones, time and spectral window axes of an auxiliary image (their
/// FITS axis numbers are given in that order) and check them against the
/// primary image's.
fn check_aux_axes(
    fptr: &mut FitsFile,
    hdu: &FitsHdu,
    table: CalTable,
    [jones_axis, time_axis, spw_axis]: [usize; 3],
    primary: &CalAxes,
    header: &CalHeader,
    detector: &mut LegacyDetector,
) -> Result<(), CalfitsReadError> {
    let jones = read_axis(fptr, hdu, table, jones_axis, detector, Some(&primary.jones))?;
    compare_axes(table, "jones", &primary.jones, &jones, header.num_jones, Tolerance::EXACT)?;
    let time = read_axis(fptr, hdu, table, time_axis, detector, Some(&primary.time))?;
    compare_axes(table, "time", &primary.time, &time, header.num_times, TIME_TOL)?;
    let spw = read_axis(fptr, hdu, table, spw_axis, detector, Some(&primary.spw))?;
    compare_axes(table, "spw", &primary.spw, &spw, header.num_spws, Tolerance::EXACT)?;
    Ok(())
}

/// Fail if an auxiliary image's axis doesn't describe the same samples as the
/// primary image's.
fn compare_axes(
    table: CalTable,
    axis: &'static str,
    primary: &AxisDescriptor,
    other: &AxisDescriptor,
    len: usize,
    tol: Tolerance,
) -> Result<(), ConsistencyError> {
    let primary = primary.samples(len);
    let other = other.samples(len);
    if primary
        .iter()
        .zip(other.iter())
        .all(|(&p, &o)| tol.is_close(o, p))
    {
        Ok(())
    } else {
        Err(ConsistencyError::AxisMismatch {
            table: table.name(),
            axis,
            primary,
            other,
        })
    }
}

fn read_antennas(
    fptr: &mut FitsFile,
    file: &str,
    num_ants_data: usize,
) -> Result<(Vec<String>, Vec<i32>, Vec<i32>), CalfitsReadError> {
    let hdu = fits_open_optional_hdu(fptr, ANTENNAS)?.ok_or_else(|| SchemaError::MissingTable {
        file: file.to_string(),
        table: ANTENNAS,
    })?;
    let has_ant_arr = match &hdu.info {
        HduInfo::TableInfo {
            column_descriptions,
            ..
        } => column_descriptions.iter().any(|c| c.name == "ANTARR"),
        _ => false,
    };

    let names: Vec<String> = fits_get_col(fptr, &hdu, "ANTNAME")?;
    let names = names.into_iter().map(|n| n.trim_end().to_string()).collect();
    let numbers: Vec<f64> = fits_get_col(fptr, &hdu, "ANTINDEX")?;
    let numbers: Vec<i32> = numbers.into_iter().map(|n| n.round() as i32).collect();

    let ant_array: Vec<i32> = if has_ant_arr {
        let ant_arr: Vec<f64> = fits_get_col(fptr, &hdu, "ANTARR")?;
        ant_arr.into_iter().map(|a| a.round() as i32).collect()
    } else {
        debug!("{file} has no ANTARR column; assuming the first {num_ants_data} antennas have data");
        numbers.clone()
    };
    // Rows beyond the antennas with data are padding.
    if ant_array.len() < num_ants_data {
        return Err(ConsistencyError::CountMismatch {
            thing: "ANTARR rows",
            expected: num_ants_data,
            actual: ant_array.len(),
        }
        .into());
    }
    let ant_array = ant_array.into_iter().take(num_ants_data).collect();

    Ok((names, numbers, ant_array))
}

fn to_vec1<T>(thing: &'static str, v: Vec<T>) -> Result<Vec1<T>, ConsistencyError> {
    let actual = v.len();
    Vec1::try_from_vec(v).map_err(|_| ConsistencyError::CountMismatch {
        thing,
        expected: 1,
        actual,
    })
}
