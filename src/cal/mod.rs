// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration solutions (gains or delays) and the calfits format.

pub mod calfits;
mod error;
#[cfg(test)]
mod tests;

pub use error::{CalfitsReadError, CalfitsWriteError};

use std::path::Path;

use ndarray::prelude::*;
use num_complex::Complex;
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use crate::{
    error::{CheckError, ConsistencyError},
    keywords::{check_extra_keywords, ExtraKeywords},
};

/// The physical quantity held by a calibration solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
pub enum CalType {
    #[strum(serialize = "gain")]
    Gain,

    #[strum(serialize = "delay")]
    Delay,
}

/// The solutions themselves. Every array has dimensions of (Nants_data,
/// Nspws, Nfreqs, Ntimes, Njones); delays don't depend on frequency, so the
/// frequency dimension of a delay array is 1.
#[derive(Debug, Clone, PartialEq)]
pub enum CalData {
    Gain { gain_array: Array5<Complex<f64>> },
    Delay { delay_array: Array5<f64> },
}

impl CalData {
    pub fn cal_type(&self) -> CalType {
        match self {
            CalData::Gain { .. } => CalType::Gain,
            CalData::Delay { .. } => CalType::Delay,
        }
    }
}

/// Options when writing a calfits file.
#[derive(Debug, Clone, Copy)]
pub struct CalfitsWriteOptions {
    /// Derive missing non-essential parameters (the frequency and time
    /// ranges) from the data instead of refusing to write.
    pub spoof_nonessential: bool,

    /// Check the solution before writing.
    pub run_check: bool,

    /// Also check that values are physically sensible.
    pub run_check_acceptability: bool,

    /// Overwrite an existing file.
    pub clobber: bool,
}

impl Default for CalfitsWriteOptions {
    fn default() -> Self {
        CalfitsWriteOptions {
            spoof_nonessential: false,
            run_check: true,
            run_check_acceptability: true,
            clobber: false,
        }
    }
}

/// Options when reading a calfits file.
#[derive(Debug, Clone, Copy)]
pub struct CalfitsReadOptions {
    /// Refuse files that need old-format keys to be defaulted.
    pub strict_fits: bool,

    /// Check the solution after reading.
    pub run_check: bool,

    /// Also check that values are physically sensible.
    pub run_check_acceptability: bool,
}

impl Default for CalfitsReadOptions {
    fn default() -> Self {
        CalfitsReadOptions {
            strict_fits: false,
            run_check: true,
            run_check_acceptability: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSolution {
    /// The name of the telescope the solutions are for.
    pub telescope_name: String,

    /// Whether the gains should be divided out of ("divide") or multiplied
    /// into ("multiply") the data.
    pub gain_convention: String,

    /// The orientation of the X dipole; "east" or "north".
    pub x_orientation: String,

    pub num_spws: usize,
    pub num_freqs: usize,
    pub num_times: usize,
    pub num_jones: usize,
    pub num_ants_data: usize,
    pub num_ants_telescope: usize,

    /// The gains or delays. `None` if the kind of solution has not been set;
    /// such a solution can't be written.
    pub data: Option<CalData>,

    /// The quality of each solution. Same dimensions as the solutions.
    pub quality_array: Array5<f64>,

    /// Flags for each solution. For delays this still has the full frequency
    /// dimension.
    pub flag_array: Array5<bool>,

    /// The flags that went into calibration. Same dimensions as
    /// `flag_array`.
    pub input_flag_array: Option<Array5<bool>>,

    /// A quality metric over all antennas, with dimensions (Nspws, Nfreqs,
    /// Ntimes, Njones). The frequency dimension is 1 for delays.
    pub total_quality_array: Option<Array4<f64>>,

    /// The centre frequencies of each channel \[Hz\]. These are shared by all
    /// spectral windows.
    pub freq_array: Vec1<f64>,

    /// \[Julian date\]
    pub time_array: Vec1<f64>,

    /// Polarisation codes; -5 to -8 are linear (XX, YY, XY, YX) and -1 to -4
    /// circular (RR, LL, RL, LR).
    pub jones_array: Vec1<i32>,

    /// Zero-indexed spectral window numbers.
    pub spw_array: Vec1<usize>,

    /// \[seconds\]
    pub integration_time: f64,

    /// \[Hz\]
    pub channel_width: f64,

    /// The frequencies the solutions are valid for \[Hz\]. Required for
    /// delays.
    pub freq_range: Option<[f64; 2]>,

    /// The times the solutions are valid for \[Julian date\].
    pub time_range: Option<[f64; 2]>,

    pub observer: Option<String>,

    /// The git origin of the calibration software.
    pub git_origin_cal: Option<String>,

    /// The git hash of the calibration software.
    pub git_hash_cal: Option<String>,

    pub history: String,

    /// The names of all antennas of the telescope. Nants_telescope long.
    pub antenna_names: Vec<String>,

    /// The numbers of all antennas of the telescope. Nants_telescope long.
    pub antenna_numbers: Vec<i32>,

    /// The antenna numbers with data, in the order of the first dimension of
    /// the solution arrays. Nants_data long.
    pub ant_array: Vec<i32>,

    pub extra_keywords: ExtraKeywords,
}

impl CalibrationSolution {
    /// The kind of solution, if set.
    pub fn cal_type(&self) -> Option<CalType> {
        self.data.as_ref().map(|d| d.cal_type())
    }

    /// Read a calfits file. Compatibility warnings are logged; use
    /// [`calfits::read`] to get them as well.
    pub fn read_calfits<P: AsRef<Path>>(
        file: P,
        options: &CalfitsReadOptions,
    ) -> Result<CalibrationSolution, CalfitsReadError> {
        calfits::read(file, options).map(|decoded| decoded.value)
    }

    /// Write a calfits file.
    pub fn write_calfits<P: AsRef<Path>>(
        &self,
        file: P,
        options: &CalfitsWriteOptions,
    ) -> Result<(), CalfitsWriteError> {
        calfits::write(self, file, options)
    }

    /// Check that the parts of this solution agree with each other. If
    /// `run_check_acceptability` is true, also check that values are sensible.
    pub fn check(&self, run_check_acceptability: bool) -> Result<(), CheckError> {
        let counts = [
            ("freq_array", self.num_freqs, self.freq_array.len()),
            ("time_array", self.num_times, self.time_array.len()),
            ("jones_array", self.num_jones, self.jones_array.len()),
            ("spw_array", self.num_spws, self.spw_array.len()),
            ("ant_array", self.num_ants_data, self.ant_array.len()),
            ("antenna_names", self.num_ants_telescope, self.antenna_names.len()),
            ("antenna_numbers", self.num_ants_telescope, self.antenna_numbers.len()),
        ];
        for (thing, expected, actual) in counts {
            if expected != actual {
                return Err(ConsistencyError::CountMismatch {
                    thing,
                    expected,
                    actual,
                }
                .into());
            }
        }
        if self.num_ants_data > self.num_ants_telescope {
            return Err(ConsistencyError::Unacceptable {
                parameter: "Nants_data",
                reason: format!(
                    "there are more antennas with data ({}) than antennas in the telescope ({})",
                    self.num_ants_data, self.num_ants_telescope
                ),
            }
            .into());
        }

        let full = [
            self.num_ants_data,
            self.num_spws,
            self.num_freqs,
            self.num_times,
            self.num_jones,
        ];
        let solution_freqs = match self.cal_type() {
            Some(CalType::Delay) => 1,
            _ => self.num_freqs,
        };
        let solution = [
            self.num_ants_data,
            self.num_spws,
            solution_freqs,
            self.num_times,
            self.num_jones,
        ];

        match &self.data {
            Some(CalData::Gain { gain_array }) => check_shape("gain_array", &full, gain_array.shape())?,
            Some(CalData::Delay { delay_array }) => {
                check_shape("delay_array", &solution, delay_array.shape())?
            }
            None => (),
        }
        check_shape("quality_array", &solution, self.quality_array.shape())?;
        check_shape("flag_array", &full, self.flag_array.shape())?;
        if let Some(input_flag_array) = &self.input_flag_array {
            check_shape("input_flag_array", &full, input_flag_array.shape())?;
        }
        if let Some(total_quality_array) = &self.total_quality_array {
            check_shape(
                "total_quality_array",
                &solution[1..],
                total_quality_array.shape(),
            )?;
        }

        check_extra_keywords(&self.extra_keywords);

        if run_check_acceptability {
            self.check_acceptability()?;
        }

        Ok(())
    }

    fn check_acceptability(&self) -> Result<(), ConsistencyError> {
        let unacceptable = |parameter, reason: String| {
            Err(ConsistencyError::Unacceptable { parameter, reason })
        };

        if !["divide", "multiply"].contains(&self.gain_convention.as_str()) {
            return unacceptable(
                "gain_convention",
                format!(
                    "'{}' is not one of 'divide' or 'multiply'",
                    self.gain_convention
                ),
            );
        }
        if !["east", "north"].contains(&self.x_orientation.to_lowercase().as_str()) {
            return unacceptable(
                "x_orientation",
                format!("'{}' is not one of 'east' or 'north'", self.x_orientation),
            );
        }
        if let Some(&j) = self.jones_array.iter().find(|&&j| !(-8..=-1).contains(&j)) {
            return unacceptable(
                "jones_array",
                format!("{j} is not a polarisation code between -8 and -1"),
            );
        }
        if !(self.integration_time > 0.0) {
            return unacceptable(
                "integration_time",
                format!("{} is not positive", self.integration_time),
            );
        }
        if !(self.channel_width > 0.0) {
            return unacceptable(
                "channel_width",
                format!("{} is not positive", self.channel_width),
            );
        }
        for (parameter, range) in [("freq_range", self.freq_range), ("time_range", self.time_range)]
        {
            if let Some([start, end]) = range {
                if start > end {
                    return unacceptable(
                        parameter,
                        format!("the start ({start}) is after the end ({end})"),
                    );
                }
            }
        }

        Ok(())
    }
}

fn check_shape(
    thing: &'static str,
    expected: &[usize],
    actual: &[usize],
) -> Result<(), ConsistencyError> {
    if expected != actual {
        return Err(ConsistencyError::BadShape {
            thing,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}
