// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Reading and writing radio-telescope calibration solutions (calfits) and
antenna beam patterns (beamfits).
 */

pub mod axis;
pub mod beam;
pub mod cal;
pub mod error;
pub(crate) mod io;
pub mod keywords;
pub mod legacy;

// Re-exports.
pub use axis::{AxisDescriptor, Tolerance};
pub use beam::{beamfits, BeamPattern, BeamfitsReadOptions, BeamfitsWriteOptions, CoordinateSystem};
pub use cal::{
    calfits, CalData, CalType, CalfitsReadOptions, CalfitsWriteOptions, CalibrationSolution,
};
pub use error::{
    CheckError, ConsistencyError, SamplingError, SchemaError, UnsupportedValueError,
};
pub use io::read::fits::FitsError;
pub use keywords::{ExtraKeywords, KeywordValue};
pub use legacy::{CompatibilityWarning, LegacyFormat, COMPATIBILITY_TABLE};

// External re-exports.
pub use num_complex::Complex;
pub use vec1::Vec1;

#[allow(dead_code)]
mod built_info {
    // Add build-time information from the "built" crate.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// A decoded object along with any compatibility warnings raised while
/// decoding it.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub value: T,
    pub warnings: Vec<CompatibilityWarning>,
}

/// The text added to the history of everything this crate reads or writes.
pub fn version_string() -> String {
    let mut s = format!(
        "Read/written with {} version: {}.",
        built_info::PKG_NAME,
        built_info::PKG_VERSION
    );
    if let Some(hash) = built_info::GIT_COMMIT_HASH_SHORT {
        s.push_str(&format!(" Git hash: {hash}."));
    }
    s
}
