// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    ffi::CString,
    path::{Path, PathBuf},
};

use approx::assert_abs_diff_eq;
use fitsio::FitsFile;
use ndarray::prelude::*;
use num_complex::Complex;
use tempfile::TempDir;
use vec1::vec1;

use super::*;
use crate::{
    error::{ConsistencyError, SamplingError, SchemaError, UnsupportedValueError},
    keywords::{stamp_history, ExtraKeywords, KeywordValue},
    legacy::{CalTable, LegacyFormat},
    version_string, CheckError,
};

const NUM_ANTS_DATA: usize = 3;
const NUM_SPWS: usize = 1;
const NUM_FREQS: usize = 4;
const NUM_TIMES: usize = 2;
const NUM_JONES: usize = 2;

fn tmp_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Couldn't make tmp dir");
    let path = dir.path().join("test.calfits");
    (dir, path)
}

fn make_solution(cal_type: CalType) -> CalibrationSolution {
    let full = (NUM_ANTS_DATA, NUM_SPWS, NUM_FREQS, NUM_TIMES, NUM_JONES);
    let solution_freqs = match cal_type {
        CalType::Gain => NUM_FREQS,
        CalType::Delay => 1,
    };
    let solution = (NUM_ANTS_DATA, NUM_SPWS, solution_freqs, NUM_TIMES, NUM_JONES);

    let data = match cal_type {
        CalType::Gain => CalData::Gain {
            gain_array: Array5::from_shape_fn(full, |(a, _, f, t, j)| {
                Complex::new(
                    1.0 + a as f64 * 0.25 + f as f64 * 0.125,
                    0.5 - t as f64 * 0.25 + j as f64 * 0.0625,
                )
            }),
        },
        CalType::Delay => CalData::Delay {
            delay_array: Array5::from_shape_fn(solution, |(a, _, _, t, j)| {
                1e-9 * (a + 1) as f64 + 1e-10 * t as f64 - 1e-11 * j as f64
            }),
        },
    };

    CalibrationSolution {
        telescope_name: "MWA".to_string(),
        gain_convention: "divide".to_string(),
        x_orientation: "east".to_string(),
        num_spws: NUM_SPWS,
        num_freqs: NUM_FREQS,
        num_times: NUM_TIMES,
        num_jones: NUM_JONES,
        num_ants_data: NUM_ANTS_DATA,
        num_ants_telescope: 5,
        data: Some(data),
        quality_array: Array5::from_shape_fn(solution, |(a, _, f, t, _)| (a + f + t) as f64 * 0.5),
        flag_array: Array5::from_shape_fn(full, |(a, _, f, _, _)| a == 1 && f == 2),
        input_flag_array: None,
        total_quality_array: None,
        freq_array: vec1![150e6, 150e6 + 40e3, 150e6 + 2.0 * 40e3, 150e6 + 3.0 * 40e3],
        time_array: vec1![2457698.5, 2457698.5 + 10.0 / 86400.0],
        jones_array: vec1![-5, -6],
        spw_array: vec1![0],
        integration_time: 10.0,
        channel_width: 40e3,
        freq_range: Some([150e6, 150.12e6]),
        time_range: Some([2457698.5, 2457698.6]),
        observer: Some("Someone".to_string()),
        git_origin_cal: Some("https://example.com/calibration.git".to_string()),
        git_hash_cal: Some("4ab2c6e".to_string()),
        history: "Made in a test.".to_string(),
        antenna_names: (0..5).map(|i| format!("ant{i}")).collect(),
        antenna_numbers: vec![0, 1, 2, 3, 4],
        ant_array: vec![0, 2, 4],
        extra_keywords: ExtraKeywords::new(),
    }
}

fn with_extras(mut cal: CalibrationSolution) -> CalibrationSolution {
    let solution_freqs = cal.quality_array.len_of(Axis(2));
    cal.input_flag_array = Some(Array5::from_shape_fn(
        (NUM_ANTS_DATA, NUM_SPWS, NUM_FREQS, NUM_TIMES, NUM_JONES),
        |(_, _, f, t, _)| f == 0 && t == 1,
    ));
    cal.total_quality_array = Some(Array4::from_shape_fn(
        (NUM_SPWS, solution_freqs, NUM_TIMES, NUM_JONES),
        |(_, f, t, j)| 1.0 + f as f64 + 0.5 * t as f64 + 0.25 * j as f64,
    ));
    cal
}

/// What a solution looks like after being written and read back.
fn stamped(cal: &CalibrationSolution) -> CalibrationSolution {
    let mut cal = cal.clone();
    stamp_history(&mut cal.history, &version_string());
    cal
}

fn write_and_read(cal: &CalibrationSolution) -> CalibrationSolution {
    let (_dir, path) = tmp_path();
    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    assert!(result.is_ok(), "{:?}", result.err());
    let result = CalibrationSolution::read_calfits(&path, &CalfitsReadOptions::default());
    assert!(result.is_ok(), "{:?}", result.err());
    result.unwrap()
}

/// Open a written file for tampering, making the HDU current.
fn edit_hdu(file: &Path, hdu: &str) -> FitsFile {
    let mut fptr = FitsFile::edit(file).unwrap();
    match hdu {
        "primary" => fptr.hdu(0).unwrap(),
        name => fptr.hdu(name).unwrap(),
    };
    fptr
}

fn delete_key(file: &Path, hdu: &str, key: &str) {
    let mut fptr = edit_hdu(file, hdu);
    let key = CString::new(key).unwrap();
    let mut status = 0;
    unsafe {
        // ffdkey = fits_delete_key
        fitsio_sys::ffdkey(fptr.as_raw(), key.as_ptr(), &mut status);
    }
    assert_eq!(status, 0, "Couldn't delete {key:?}");
}

fn update_float_key(file: &Path, hdu: &str, key: &str, value: f64) {
    let mut fptr = edit_hdu(file, hdu);
    let key = CString::new(key).unwrap();
    let comment = CString::new("&").unwrap();
    let mut status = 0;
    unsafe {
        // ffukyd = fits_update_key_dbl
        fitsio_sys::ffukyd(
            fptr.as_raw(),
            key.as_ptr(),
            value,
            -15,
            comment.as_ptr(),
            &mut status,
        );
    }
    assert_eq!(status, 0, "Couldn't update {key:?}");
}

fn update_string_key(file: &Path, hdu: &str, key: &str, value: &str) {
    let mut fptr = edit_hdu(file, hdu);
    let key = CString::new(key).unwrap();
    let value = CString::new(value).unwrap();
    let comment = CString::new("&").unwrap();
    let mut status = 0;
    unsafe {
        // ffukys = fits_update_key_str
        fitsio_sys::ffukys(
            fptr.as_raw(),
            key.as_ptr(),
            value.as_ptr(),
            comment.as_ptr(),
            &mut status,
        );
    }
    assert_eq!(status, 0, "Couldn't update {key:?}");
}

#[test]
fn test_gain_round_trip() {
    let cal = make_solution(CalType::Gain);
    let from_disk = write_and_read(&cal);
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_gain_round_trip_with_input_flags_and_total_quality() {
    let cal = with_extras(make_solution(CalType::Gain));
    let from_disk = write_and_read(&cal);
    assert!(from_disk.input_flag_array.is_some());
    assert!(from_disk.total_quality_array.is_some());
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_delay_round_trip() {
    let cal = make_solution(CalType::Delay);
    let from_disk = write_and_read(&cal);
    assert_eq!(from_disk.cal_type(), Some(CalType::Delay));
    assert_eq!(from_disk.quality_array.dim(), (3, 1, 1, 2, 2));
    assert_eq!(from_disk.flag_array.dim(), (3, 1, 4, 2, 2));
    assert_eq!(from_disk, stamped(&cal));

    let cal = with_extras(make_solution(CalType::Delay));
    let from_disk = write_and_read(&cal);
    assert_eq!(
        from_disk.total_quality_array.as_ref().map(|a| a.dim()),
        Some((1, 1, 2, 2))
    );
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_single_sample_axes() {
    let mut cal = make_solution(CalType::Gain);
    cal.num_freqs = 1;
    cal.num_times = 1;
    cal.num_jones = 1;
    cal.freq_array = vec1![182e6];
    cal.time_array = vec1![2457698.5];
    cal.time_range = Some([2457698.5, 2457698.5]);
    cal.jones_array = vec1![-5];
    cal.data = Some(CalData::Gain {
        gain_array: Array5::from_elem((3, 1, 1, 1, 1), Complex::new(1.0, -1.0)),
    });
    cal.quality_array = Array5::ones((3, 1, 1, 1, 1));
    cal.flag_array = Array5::from_elem((3, 1, 1, 1, 1), false);

    let from_disk = write_and_read(&cal);
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_times_use_measured_spacing_when_not_integration_time() {
    let mut cal = make_solution(CalType::Gain);
    // Times 30 seconds apart, but 10 second integrations.
    cal.time_array = vec1![2457698.5, 2457698.5 + 30.0 / 86400.0];
    let from_disk = write_and_read(&cal);
    assert_abs_diff_eq!(
        from_disk.time_array[1],
        cal.time_array[1],
        epsilon = 1e-3 / 86400.0
    );
}

#[test]
fn test_extra_keywords_round_trip() {
    let mut cal = make_solution(CalType::Gain);
    let long_note = "A rather long note about this calibration, which does not fit on a single header card and so must be continued.";
    cal.extra_keywords.insert("OBSID".to_string(), 1061316296i64.into());
    cal.extra_keywords.insert("DOIT".to_string(), true.into());
    cal.extra_keywords.insert("RATIO".to_string(), 0.1f64.into());
    cal.extra_keywords.insert("TINY".to_string(), (-1.25e-20f64).into());
    cal.extra_keywords
        .insert("CPLX".to_string(), Complex::new(1.5, -2.25).into());
    cal.extra_keywords.insert("NOTE".to_string(), long_note.into());
    cal.extra_keywords.insert(
        "COMMENT".to_string(),
        "First line of the comment, which is longer than seventy-two characters so needs two cards.\nSecond line of the comment.".into(),
    );
    cal.history = "Made in a test, with a history line that is longer than seventy-two characters.\nAnd a short one.".to_string();

    let from_disk = write_and_read(&cal);
    assert_eq!(from_disk.extra_keywords, cal.extra_keywords);
    assert_eq!(
        from_disk.extra_keywords.get("NOTE"),
        Some(&KeywordValue::String(long_note.to_string()))
    );
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_long_extra_keyword_keys_are_truncated() {
    let mut cal = make_solution(CalType::Gain);
    cal.extra_keywords
        .insert("calibrator".to_string(), "3C444".into());
    cal.extra_keywords.insert("obsid".to_string(), 5i64.into());

    let from_disk = write_and_read(&cal);
    assert_eq!(
        from_disk.extra_keywords.get("CALIBRAT"),
        Some(&KeywordValue::String("3C444".to_string()))
    );
    assert_eq!(from_disk.extra_keywords.get("OBSID"), Some(&KeywordValue::Int(5)));
    assert!(from_disk.extra_keywords.get("calibrator").is_none());
}

#[test]
fn test_composite_extra_keywords_are_refused() {
    let (_dir, path) = tmp_path();
    let mut cal = make_solution(CalType::Gain);
    cal.extra_keywords.insert(
        "DIPOLES".to_string(),
        KeywordValue::List(vec![1i64.into(), 2i64.into()]),
    );
    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    assert!(matches!(
        result,
        Err(CalfitsWriteError::UnsupportedValue(
            UnsupportedValueError::CompositeKeyword { .. }
        ))
    ));
    assert!(!path.exists());
}

#[test]
fn test_non_uniform_axes_are_refused_before_writing() {
    let (_dir, path) = tmp_path();

    let mut cal = make_solution(CalType::Gain);
    cal.num_jones = 3;
    cal.jones_array = vec1![-5, -6, -8];
    cal.data = Some(CalData::Gain {
        gain_array: Array5::zeros((3, 1, 4, 2, 3)),
    });
    cal.quality_array = Array5::zeros((3, 1, 4, 2, 3));
    cal.flag_array = Array5::from_elem((3, 1, 4, 2, 3), false);
    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    match result {
        Err(CalfitsWriteError::Sampling(SamplingError::NonUniform { axis, .. })) => {
            assert_eq!(axis, "JONES")
        }
        other => panic!("Expected a NonUniform error, got {other:?}"),
    }
    assert!(!path.exists());

    let mut cal = make_solution(CalType::Gain);
    cal.freq_array = vec1![150e6, 150.04e6, 150.08e6, 150.2e6];
    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    match result {
        Err(CalfitsWriteError::Sampling(SamplingError::NonUniform { axis, .. })) => {
            assert_eq!(axis, "FREQS")
        }
        other => panic!("Expected a NonUniform error, got {other:?}"),
    }
    assert!(!path.exists());

    let mut cal = make_solution(CalType::Delay);
    cal.num_times = 3;
    cal.time_array = vec1![2457698.5, 2457698.6, 2457698.65];
    cal.quality_array = Array5::zeros((3, 1, 1, 3, 2));
    cal.flag_array = Array5::from_elem((3, 1, 4, 3, 2), false);
    cal.data = Some(CalData::Delay {
        delay_array: Array5::zeros((3, 1, 1, 3, 2)),
    });
    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    match result {
        Err(CalfitsWriteError::Sampling(SamplingError::NonUniform { axis, .. })) => {
            assert_eq!(axis, "TIME")
        }
        other => panic!("Expected a NonUniform error, got {other:?}"),
    }
    assert!(!path.exists());
}

#[test]
fn test_unset_cal_type_is_refused() {
    let (_dir, path) = tmp_path();
    let mut cal = make_solution(CalType::Gain);
    cal.data = None;
    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    assert!(matches!(
        result,
        Err(CalfitsWriteError::UnsupportedValue(
            UnsupportedValueError::UnknownCalType { .. }
        ))
    ));
    assert!(!path.exists());
}

#[test]
fn test_unknown_cal_type_on_read() {
    let (_dir, path) = tmp_path();
    let cal = make_solution(CalType::Gain);
    cal.write_calfits(&path, &CalfitsWriteOptions::default())
        .unwrap();
    update_string_key(&path, "primary", "CALTYPE", "bandpass");

    let result = CalibrationSolution::read_calfits(&path, &CalfitsReadOptions::default());
    match result {
        Err(CalfitsReadError::UnsupportedValue(UnsupportedValueError::UnknownCalType {
            value,
        })) => assert_eq!(value, "bandpass"),
        other => panic!("Expected an UnknownCalType error, got {other:?}"),
    }
}

#[test]
fn test_missing_ranges_and_spoofing() {
    let (_dir, path) = tmp_path();
    let mut cal = make_solution(CalType::Delay);
    cal.freq_range = None;
    cal.time_range = None;

    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    assert!(matches!(
        result,
        Err(CalfitsWriteError::Schema(SchemaError::MissingParameter {
            parameter: "freq_range",
            ..
        }))
    ));
    assert!(!path.exists());

    cal.write_calfits(
        &path,
        &CalfitsWriteOptions {
            spoof_nonessential: true,
            ..Default::default()
        },
    )
    .unwrap();
    let from_disk =
        CalibrationSolution::read_calfits(&path, &CalfitsReadOptions::default()).unwrap();
    assert_eq!(from_disk.freq_range, Some([150e6, 150e6 + 3.0 * 40e3]));
    assert_eq!(
        from_disk.time_range,
        Some([2457698.5, 2457698.5 + 10.0 / 86400.0])
    );

    // Gain solutions don't need a frequency range.
    let mut cal = make_solution(CalType::Gain);
    cal.freq_range = None;
    let from_disk = write_and_read(&cal);
    assert_eq!(from_disk.freq_range, None);
}

#[test]
fn test_clobber() {
    let (_dir, path) = tmp_path();
    let cal = make_solution(CalType::Gain);
    cal.write_calfits(&path, &CalfitsWriteOptions::default())
        .unwrap();

    let result = cal.write_calfits(&path, &CalfitsWriteOptions::default());
    assert!(matches!(result, Err(CalfitsWriteError::FileExists { .. })));

    let result = cal.write_calfits(
        &path,
        &CalfitsWriteOptions {
            clobber: true,
            ..Default::default()
        },
    );
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_check_catches_bad_shapes_and_values() {
    let mut cal = make_solution(CalType::Gain);
    cal.flag_array = Array5::from_elem((3, 1, 4, 2, 1), false);
    assert!(matches!(
        cal.check(false),
        Err(CheckError::Consistency(ConsistencyError::BadShape {
            thing: "flag_array",
            ..
        }))
    ));

    let mut cal = make_solution(CalType::Gain);
    cal.antenna_names.pop();
    assert!(matches!(
        cal.check(false),
        Err(CheckError::Consistency(ConsistencyError::CountMismatch {
            thing: "antenna_names",
            ..
        }))
    ));

    let mut cal = make_solution(CalType::Gain);
    cal.gain_convention = "add".to_string();
    assert!(cal.check(false).is_ok());
    assert!(matches!(
        cal.check(true),
        Err(CheckError::Consistency(ConsistencyError::Unacceptable {
            parameter: "gain_convention",
            ..
        }))
    ));

    let mut cal = make_solution(CalType::Gain);
    cal.time_range = Some([2457698.6, 2457698.5]);
    assert!(matches!(
        cal.check(true),
        Err(CheckError::Consistency(ConsistencyError::Unacceptable {
            parameter: "time_range",
            ..
        }))
    ));
}

#[test]
fn test_mismatched_total_quality_axes_are_always_rejected() {
    for strict_fits in [false, true] {
        let (_dir, path) = tmp_path();
        let cal = with_extras(make_solution(CalType::Gain));
        cal.write_calfits(&path, &CalfitsWriteOptions::default())
            .unwrap();
        update_float_key(&path, "TOTQLTY", "CDELT3", 1e6);

        let result = CalibrationSolution::read_calfits(
            &path,
            &CalfitsReadOptions {
                strict_fits,
                ..Default::default()
            },
        );
        match result {
            Err(CalfitsReadError::Consistency(ConsistencyError::AxisMismatch {
                table,
                axis,
                ..
            })) => {
                assert_eq!(table, "TOTQLTY");
                assert_eq!(axis, "frequency");
            }
            other => panic!("Expected an AxisMismatch error, got {other:?}"),
        }
    }
}

#[test]
fn test_mismatched_flags_axes_are_rejected() {
    for strict_fits in [false, true] {
        let (_dir, path) = tmp_path();
        let cal = make_solution(CalType::Delay);
        cal.write_calfits(&path, &CalfitsWriteOptions::default())
            .unwrap();
        update_float_key(&path, "FLAGS", "CRVAL2", -1.0);

        let result = CalibrationSolution::read_calfits(
            &path,
            &CalfitsReadOptions {
                strict_fits,
                ..Default::default()
            },
        );
        match result {
            Err(CalfitsReadError::Consistency(ConsistencyError::AxisMismatch {
                table,
                axis,
                primary,
                other,
            })) => {
                assert_eq!(table, "FLAGS");
                assert_eq!(axis, "jones");
                assert_eq!(primary, vec![-5.0, -6.0]);
                assert_eq!(other, vec![-1.0, -2.0]);
            }
            other => panic!("Expected an AxisMismatch error, got {other:?}"),
        }
    }

    // Delay frequencies are described by both images, too.
    let (_dir, path) = tmp_path();
    let cal = make_solution(CalType::Delay);
    cal.write_calfits(&path, &CalfitsWriteOptions::default())
        .unwrap();
    update_float_key(&path, "FLAGS", "CRVAL4", 9e8);
    match calfits::read(&path, &CalfitsReadOptions::default()) {
        Err(CalfitsReadError::Consistency(ConsistencyError::AxisMismatch {
            table,
            axis,
            primary,
            other,
        })) => {
            assert_eq!(table, "FLAGS");
            assert_eq!(axis, "frequency");
            assert_abs_diff_eq!(primary[0], 150e6);
            assert_abs_diff_eq!(other[0], 9e8);
        }
        other => panic!("Expected an AxisMismatch error, got {other:?}"),
    }
}

/// Write a file, delete a key and read it in both modes. Returns the warnings
/// from the lenient read.
fn read_with_missing_key(
    cal: &CalibrationSolution,
    hdu: &str,
    key: &str,
) -> (CalibrationSolution, Vec<crate::CompatibilityWarning>) {
    // Show the compatibility warnings with `RUST_LOG=warn`.
    let _ = env_logger::builder().is_test(true).try_init();
    let (_dir, path) = tmp_path();
    cal.write_calfits(&path, &CalfitsWriteOptions::default())
        .unwrap();
    delete_key(&path, hdu, key);

    let result = calfits::read(
        &path,
        &CalfitsReadOptions {
            strict_fits: true,
            ..Default::default()
        },
    );
    match result {
        Err(CalfitsReadError::Schema(SchemaError::MissingKey { key: k, .. })) => {
            assert_eq!(k, key)
        }
        other => panic!("Expected a MissingKey error, got {other:?}"),
    }

    let result = calfits::read(&path, &CalfitsReadOptions::default());
    assert!(result.is_ok(), "{:?}", result.err());
    let decoded = result.unwrap();
    (decoded.value, decoded.warnings)
}

#[test]
fn test_missing_reference_pixel() {
    let cal = make_solution(CalType::Gain);
    let (from_disk, warnings) = read_with_missing_key(&cal, "primary", "CRPIX4");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].table, CalTable::Primary);
    assert_eq!(warnings[0].key, "CRPIX4");
    assert_eq!(warnings[0].format, LegacyFormat::OldCalfits);
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_missing_spw_reference_value() {
    let mut cal = make_solution(CalType::Gain);
    // Old files always start at the first spectral window.
    cal.spw_array = vec1![3];
    let (from_disk, warnings) = read_with_missing_key(&cal, "primary", "CRVAL5");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].format, LegacyFormat::OldCalfits);
    assert_eq!(from_disk.spw_array, vec1![0]);
}

#[test]
fn test_spectral_windows_are_numbered_from_one() {
    let (_dir, path) = tmp_path();
    let cal = make_solution(CalType::Gain);
    cal.write_calfits(&path, &CalfitsWriteOptions::default())
        .unwrap();
    update_float_key(&path, "primary", "CRVAL5", 0.0);
    let result = CalibrationSolution::read_calfits(&path, &CalfitsReadOptions::default());
    match result {
        Err(CalfitsReadError::Schema(SchemaError::BadValue { table, key, value, .. })) => {
            assert_eq!(table, "primary");
            assert_eq!(key, "CRVAL5");
            assert_eq!(value, "0");
        }
        other => panic!("Expected a bad value, got {other:?}"),
    }
}

#[test]
fn test_missing_flags_spw_reference_value() {
    let cal = make_solution(CalType::Delay);
    let (from_disk, warnings) = read_with_missing_key(&cal, "FLAGS", "CRVAL5");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].table, CalTable::Flags);
    assert_eq!(warnings[0].format, LegacyFormat::OldDelayCalfits);
    assert!(warnings[0].to_string().contains("for delay files"));
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_missing_total_quality_spw_reference_value() {
    let cal = with_extras(make_solution(CalType::Delay));
    let (from_disk, warnings) = read_with_missing_key(&cal, "TOTQLTY", "CRVAL4");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].table, CalTable::TotalQuality);
    assert_eq!(warnings[0].format, LegacyFormat::OldCalfits);
    assert_eq!(from_disk, stamped(&cal));
}

#[test]
fn test_missing_required_scalar() {
    let (_dir, path) = tmp_path();
    let cal = make_solution(CalType::Gain);
    cal.write_calfits(&path, &CalfitsWriteOptions::default())
        .unwrap();
    delete_key(&path, "primary", "NJONES");
    let result = CalibrationSolution::read_calfits(&path, &CalfitsReadOptions::default());
    match result {
        Err(CalfitsReadError::Schema(SchemaError::MissingKey { key, table, .. })) => {
            assert_eq!(key, "NJONES");
            assert_eq!(table, "primary");
        }
        other => panic!("Expected a MissingKey error, got {other:?}"),
    }

    // Delay files need a frequency range.
    let (_dir, path) = tmp_path();
    let cal = make_solution(CalType::Delay);
    cal.write_calfits(&path, &CalfitsWriteOptions::default())
        .unwrap();
    delete_key(&path, "primary", "FRQRANGE");
    let result = CalibrationSolution::read_calfits(&path, &CalfitsReadOptions::default());
    assert!(matches!(
        result,
        Err(CalfitsReadError::Schema(SchemaError::MissingKey { ref key, .. })) if key == "FRQRANGE"
    ));
}

#[test]
fn test_history_is_not_stamped_twice() {
    let mut cal = make_solution(CalType::Gain);
    cal.history = format!("Made in a test.\n{}", version_string());
    let from_disk = write_and_read(&cal);
    assert_eq!(from_disk.history, cal.history);
    assert_eq!(from_disk.history.matches(&version_string()).count(), 1);

    // Read it again after writing what was read.
    let from_disk = write_and_read(&from_disk);
    assert_eq!(from_disk.history, cal.history);
}

#[test]
fn test_empty_history_becomes_the_stamp() {
    let mut cal = make_solution(CalType::Gain);
    cal.history = String::new();
    let from_disk = write_and_read(&cal);
    assert_eq!(from_disk.history, version_string());
}
