// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! FITS axis descriptors.
//!
//! Every axis of every image in a calfits or beamfits file is described by a
//! type tag (`CTYPEn`), a unit (`CUNITn`), a reference value (`CRVALn`), an
//! increment (`CDELTn`) and a reference pixel (`CRPIXn`). Only evenly-spaced
//! axes can be described this way.

use fitsio::{hdu::FitsHdu, FitsFile};
use itertools::Itertools;

use crate::{
    error::SamplingError,
    io::{
        read::fits::{fits_get_optional_key, FitsError},
        write::{fits_write_float_key, fits_write_string_key},
    },
};

/// How close two floats must be to be considered equal. Two values `a` and `b`
/// are close when `|a - b| <= atol + rtol * |b|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    pub const EXACT: Tolerance = Tolerance {
        rtol: 0.0,
        atol: 0.0,
    };

    pub fn is_close(self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.atol + self.rtol * b.abs()
    }
}

/// The description of a single regularly-sampled axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisDescriptor {
    pub ctype: String,
    pub cunit: String,
    pub crval: f64,
    pub cdelt: f64,
    /// One-based, as in FITS.
    pub crpix: f64,
}

impl AxisDescriptor {
    /// An axis that doesn't describe physical samples, e.g. the axis that
    /// stacks real and imaginary parts.
    pub fn fixed(ctype: &str, cunit: &str, crval: f64, cdelt: f64) -> AxisDescriptor {
        AxisDescriptor {
            ctype: ctype.to_string(),
            cunit: cunit.to_string(),
            crval,
            cdelt,
            crpix: 1.0,
        }
    }

    /// Derive a descriptor from the samples along an axis.
    ///
    /// The samples must be evenly spaced within `tol`. If the measured spacing
    /// is close to `preferred_increment` (e.g. the channel width for a
    /// frequency axis), the preferred increment is used; this is also the
    /// increment given to an axis with only one sample.
    pub fn from_samples(
        ctype: &'static str,
        cunit: &str,
        samples: &[f64],
        preferred_increment: f64,
        tol: Tolerance,
    ) -> Result<AxisDescriptor, SamplingError> {
        let first = *samples.first().ok_or(SamplingError::Empty { axis: ctype })?;

        let cdelt = match samples
            .iter()
            .tuple_windows()
            .map(|(a, b)| b - a)
            .minmax_by(|a, b| a.total_cmp(b))
            .into_option()
        {
            // A single sample.
            None => preferred_increment,
            Some((min_spacing, max_spacing)) => {
                if !tol.is_close(min_spacing, max_spacing) {
                    return Err(SamplingError::NonUniform {
                        axis: ctype,
                        min_spacing,
                        max_spacing,
                    });
                }
                if tol.is_close(min_spacing, preferred_increment) {
                    preferred_increment
                } else {
                    samples[1] - samples[0]
                }
            }
        };

        Ok(AxisDescriptor {
            ctype: ctype.to_string(),
            cunit: cunit.to_string(),
            crval: first,
            cdelt,
            crpix: 1.0,
        })
    }

    /// Reconstruct the sample values along this axis.
    pub fn samples(&self, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| self.crval + self.cdelt * (i as f64 + 1.0 - self.crpix))
            .collect()
    }

    /// Zero-based spectral window numbers from an axis that counts them from
    /// one. `None` if any window would come before the first.
    pub(crate) fn spw_numbers(&self, len: usize) -> Option<Vec<usize>> {
        self.samples(len)
            .into_iter()
            .map(|s| {
                let s = s.round();
                (s >= 1.0).then(|| s as usize - 1)
            })
            .collect()
    }

    /// Write the keys describing FITS axis number `axis` (one-based).
    #[track_caller]
    pub(crate) fn write(
        &self,
        fits_fptr: &mut FitsFile,
        hdu: &FitsHdu,
        axis: usize,
    ) -> Result<(), FitsError> {
        fits_write_string_key(fits_fptr, hdu, &format!("CTYPE{axis}"), &self.ctype)?;
        if !self.cunit.is_empty() {
            fits_write_string_key(fits_fptr, hdu, &format!("CUNIT{axis}"), &self.cunit)?;
        }
        fits_write_float_key(fits_fptr, hdu, &format!("CRPIX{axis}"), self.crpix)?;
        fits_write_float_key(fits_fptr, hdu, &format!("CRVAL{axis}"), self.crval)?;
        fits_write_float_key(fits_fptr, hdu, &format!("CDELT{axis}"), self.cdelt)?;
        Ok(())
    }
}

/// The axis keys of a header, as found. Any of them may be missing; what to do
/// about a missing key is up to the caller.
#[derive(Debug, Clone, Default)]
pub(crate) struct AxisProbe {
    pub(crate) ctype: Option<String>,
    pub(crate) cunit: Option<String>,
    pub(crate) crval: Option<f64>,
    pub(crate) cdelt: Option<f64>,
    pub(crate) crpix: Option<f64>,
}

impl AxisProbe {
    #[track_caller]
    pub(crate) fn read(
        fits_fptr: &mut FitsFile,
        hdu: &FitsHdu,
        axis: usize,
    ) -> Result<AxisProbe, FitsError> {
        let ctype = fits_get_optional_key::<String>(fits_fptr, hdu, &format!("CTYPE{axis}"))?;
        let cunit = fits_get_optional_key::<String>(fits_fptr, hdu, &format!("CUNIT{axis}"))?;
        let crval = fits_get_optional_key(fits_fptr, hdu, &format!("CRVAL{axis}"))?;
        let cdelt = fits_get_optional_key(fits_fptr, hdu, &format!("CDELT{axis}"))?;
        let crpix = fits_get_optional_key(fits_fptr, hdu, &format!("CRPIX{axis}"))?;
        Ok(AxisProbe {
            ctype: ctype.map(|s| s.trim().to_string()),
            cunit: cunit.map(|s| s.trim().to_string()),
            crval,
            cdelt,
            crpix,
        })
    }

    /// Build a descriptor once the reference value, increment and reference
    /// pixel are known.
    pub(crate) fn into_descriptor(self, crval: f64, cdelt: f64, crpix: f64) -> AxisDescriptor {
        AxisDescriptor {
            ctype: self.ctype.unwrap_or_default(),
            cunit: self.cunit.unwrap_or_default(),
            crval,
            cdelt,
            crpix,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn preferred_increment_is_used_when_close() {
        let freqs = [100e6, 100.1e6, 100.2e6, 100.3e6];
        let tol = Tolerance {
            rtol: 0.0,
            atol: 1e-3,
        };
        let d = AxisDescriptor::from_samples("FREQS", "Hz", &freqs, 0.1e6, tol).unwrap();
        assert_abs_diff_eq!(d.crval, 100e6);
        assert_abs_diff_eq!(d.cdelt, 0.1e6);
        assert_abs_diff_eq!(d.crpix, 1.0);
        for (&expected, result) in freqs.iter().zip(d.samples(4)) {
            assert_abs_diff_eq!(expected, result, epsilon = 1e-3);
        }

        // When the preferred increment doesn't agree, the measured one wins.
        let d = AxisDescriptor::from_samples("FREQS", "Hz", &freqs, 40e3, tol).unwrap();
        assert_abs_diff_eq!(d.cdelt, 0.1e6, epsilon = 1e-3);
    }

    #[test]
    fn single_sample_takes_preferred_increment() {
        let d = AxisDescriptor::from_samples("JONES", "Integer", &[-5.0], -1.0, Tolerance::EXACT)
            .unwrap();
        assert_eq!(d.crval, -5.0);
        assert_eq!(d.cdelt, -1.0);
        assert_eq!(d.samples(1), vec![-5.0]);
    }

    #[test]
    fn non_uniform_samples_are_rejected() {
        let result =
            AxisDescriptor::from_samples("JONES", "Integer", &[-5.0, -6.0, -8.0], -1.0, Tolerance::EXACT);
        match result {
            Err(SamplingError::NonUniform {
                axis,
                min_spacing,
                max_spacing,
            }) => {
                assert_eq!(axis, "JONES");
                assert_eq!(min_spacing, -2.0);
                assert_eq!(max_spacing, -1.0);
            }
            other => panic!("Expected a NonUniform error, got {other:?}"),
        }

        let result = AxisDescriptor::from_samples("TIME", "JD", &[], 1.0, Tolerance::EXACT);
        assert!(matches!(result, Err(SamplingError::Empty { axis: "TIME" })));
    }

    #[test]
    fn samples_respect_reference_pixel() {
        let d = AxisDescriptor {
            ctype: "FREQS".to_string(),
            cunit: "Hz".to_string(),
            crval: 10.0,
            cdelt: 2.0,
            crpix: 2.0,
        };
        assert_eq!(d.samples(3), vec![8.0, 10.0, 12.0]);
    }

    #[test]
    fn spw_numbers_start_at_one() {
        let mut d = AxisDescriptor::fixed("IF", "Integer", 1.0, 1.0);
        assert_eq!(d.spw_numbers(3), Some(vec![0, 1, 2]));
        d.crval = 0.0;
        assert_eq!(d.spw_numbers(3), None);
        d.crval = 2.0;
        d.cdelt = -1.0;
        assert_eq!(d.spw_numbers(2), Some(vec![1, 0]));
        assert_eq!(d.spw_numbers(3), None);
    }
}
