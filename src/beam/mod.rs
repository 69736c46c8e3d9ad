// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Far-field antenna beam patterns and the beamfits format.

pub mod beamfits;
mod error;

pub use error::{BeamfitsReadError, BeamfitsWriteError};

use std::{path::Path, str::FromStr};

use itertools::Itertools;
use ndarray::prelude::*;
use num_complex::Complex;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use crate::{
    error::{CheckError, ConsistencyError},
    keywords::{check_extra_keywords, ExtraKeywords},
};

/// The pixel coordinate systems a beam can be described in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
pub enum CoordinateSystem {
    /// Azimuth and zenith angle.
    #[strum(serialize = "az_za")]
    AzZa,

    /// Orthographic projection with the zenith at the centre.
    #[strum(serialize = "orthoslant_zenith")]
    OrthoslantZenith,

    #[strum(serialize = "healpix")]
    Healpix,
}

impl CoordinateSystem {
    /// The names of the coordinate axes, in order.
    pub fn axes(self) -> &'static [&'static str] {
        match self {
            CoordinateSystem::AzZa => &["azimuth", "zen_angle"],
            CoordinateSystem::OrthoslantZenith => &["zenorth_x", "zenorth_y"],
            CoordinateSystem::Healpix => &["hpx_inds"],
        }
    }

    pub fn num_axes(self) -> usize {
        self.axes().len()
    }

    /// Find a coordinate system by name.
    pub fn lookup(name: &str) -> Result<CoordinateSystem, ConsistencyError> {
        CoordinateSystem::from_str(name).map_err(|_| ConsistencyError::UnknownCoordinateSystem {
            name: name.to_string(),
            known: CoordinateSystem::iter().join(", "),
        })
    }

    /// Check that a number of basis vectors is right for the named
    /// coordinate system.
    pub fn validate(name: &str, num_axes: usize) -> Result<CoordinateSystem, ConsistencyError> {
        let system = CoordinateSystem::lookup(name)?;
        if system.num_axes() != num_axes {
            return Err(ConsistencyError::NaxesMismatch {
                coordinate_system: name.to_string(),
                expected: system.num_axes(),
                actual: num_axes,
            });
        }
        Ok(system)
    }
}

/// Options when writing a beamfits file.
#[derive(Debug, Clone, Copy)]
pub struct BeamfitsWriteOptions {
    pub run_check: bool,
    pub run_check_acceptability: bool,
    pub clobber: bool,
}

impl Default for BeamfitsWriteOptions {
    fn default() -> Self {
        BeamfitsWriteOptions {
            run_check: true,
            run_check_acceptability: true,
            clobber: false,
        }
    }
}

/// Options when reading a beamfits file.
#[derive(Debug, Clone, Copy)]
pub struct BeamfitsReadOptions {
    pub run_check: bool,
    pub run_check_acceptability: bool,
}

impl Default for BeamfitsReadOptions {
    fn default() -> Self {
        BeamfitsReadOptions {
            run_check: true,
            run_check_acceptability: true,
        }
    }
}

/// The electric-field response of a feed, sampled on pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamPattern {
    pub telescope_name: String,
    pub feed_name: String,
    pub feed_version: String,
    pub model_name: String,
    pub model_version: String,

    /// The name of a [`CoordinateSystem`].
    pub coordinate_system: String,

    /// Feed labels, e.g. "x" and "y".
    pub feed_array: Vec1<String>,

    pub num_feeds: usize,
    /// The number of basis vectors; this is set by the coordinate system.
    pub num_axes: usize,
    pub num_pixels: usize,
    pub num_spws: usize,
    pub num_freqs: usize,

    /// \[Hz\]. Shared by all spectral windows.
    pub freq_array: Vec1<f64>,

    /// Zero-indexed spectral window numbers.
    pub spw_array: Vec1<usize>,

    /// The electric field with dimensions (Nfeeds, Naxes, Npixels, Nspws,
    /// Nfreqs).
    pub efield_array: Array5<Complex<f64>>,

    /// The coordinates of each pixel, with dimensions (Naxes, Npixels).
    pub pixel_location_array: Array2<f64>,

    /// The basis vectors at each pixel, with dimensions (Naxes, Npixels).
    pub basis_vector_array: Array2<f64>,

    pub history: String,
    pub extra_keywords: ExtraKeywords,
}

impl BeamPattern {
    /// Read a beamfits file.
    pub fn read_beamfits<P: AsRef<Path>>(
        file: P,
        options: &BeamfitsReadOptions,
    ) -> Result<BeamPattern, BeamfitsReadError> {
        beamfits::read(file, options).map(|decoded| decoded.value)
    }

    /// Write a beamfits file.
    pub fn write_beamfits<P: AsRef<Path>>(
        &self,
        file: P,
        options: &BeamfitsWriteOptions,
    ) -> Result<(), BeamfitsWriteError> {
        beamfits::write(self, file, options)
    }

    pub fn check(&self, run_check_acceptability: bool) -> Result<(), CheckError> {
        CoordinateSystem::validate(&self.coordinate_system, self.num_axes)?;

        let counts = [
            ("feed_array", self.num_feeds, self.feed_array.len()),
            ("freq_array", self.num_freqs, self.freq_array.len()),
            ("spw_array", self.num_spws, self.spw_array.len()),
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

        let efield_shape = [
            self.num_feeds,
            self.num_axes,
            self.num_pixels,
            self.num_spws,
            self.num_freqs,
        ];
        let coords_shape = [self.num_axes, self.num_pixels];
        for (thing, expected, actual) in [
            ("efield_array", &efield_shape[..], self.efield_array.shape()),
            ("pixel_location_array", &coords_shape[..], self.pixel_location_array.shape()),
            ("basis_vector_array", &coords_shape[..], self.basis_vector_array.shape()),
        ] {
            if expected != actual {
                return Err(ConsistencyError::BadShape {
                    thing,
                    expected: expected.to_vec(),
                    actual: actual.to_vec(),
                }
                .into());
            }
        }

        check_extra_keywords(&self.extra_keywords);

        if run_check_acceptability {
            if let Some(&f) = self.freq_array.iter().find(|&&f| !(f > 0.0)) {
                return Err(ConsistencyError::Unacceptable {
                    parameter: "freq_array",
                    reason: format!("{f} Hz is not a positive frequency"),
                }
                .into());
            }
        }

        Ok(())
    }
}
