// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error types shared by the calfits and beamfits codecs.
//!
//! Each codec has its own read and write error enums; the types here describe
//! *why* a file or object was rejected, independent of which codec noticed.

use thiserror::Error;

/// A header scalar, table or parameter is missing or carries a value the
/// format does not know about.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("{file}: the {table} table is missing the key {key}")]
    MissingKey {
        file: String,
        table: &'static str,
        key: String,
    },

    #[error("{file}: couldn't find the {table} table")]
    MissingTable { file: String, table: &'static str },

    #[error("The parameter '{parameter}' must be set to write a {format} file (or enable spoofing of non-essential parameters)")]
    MissingParameter {
        parameter: &'static str,
        format: &'static str,
    },

    #[error("{file}: the value '{value}' of key {key} in the {table} table couldn't be understood: {reason}")]
    BadValue {
        file: String,
        table: &'static str,
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Two parts of a file (or of an in-memory object) disagree with each other.
#[derive(Error, Debug)]
pub enum ConsistencyError {
    #[error("{axis} values are different in the {table} table than in the primary table. The primary table has {primary:?}, {table} has {other:?}")]
    AxisMismatch {
        table: &'static str,
        axis: &'static str,
        primary: Vec<f64>,
        other: Vec<f64>,
    },

    #[error("Based on the declared dimensions, expected {thing} to have shape {expected:?}, but it had shape {actual:?} instead")]
    BadShape {
        thing: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Expected {thing} to be {expected}, but it was {actual}")]
    CountMismatch {
        thing: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("The coordinate system '{name}' is not known; known coordinate systems are: {known}")]
    UnknownCoordinateSystem { name: String, known: String },

    #[error("Naxes ({actual}) does not match the number of axes of the '{coordinate_system}' coordinate system ({expected})")]
    NaxesMismatch {
        coordinate_system: String,
        expected: usize,
        actual: usize,
    },

    #[error("The coordinate axis list {actual:?} does not match the '{coordinate_system}' coordinate system, which has axes {expected:?}")]
    CoordListMismatch {
        coordinate_system: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("The parameter '{parameter}' has an unacceptable value: {reason}")]
    Unacceptable {
        parameter: &'static str,
        reason: String,
    },
}

/// An axis can't be described by a reference value and a fixed increment.
#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("The {axis} values are not evenly spaced (spacings range from {min_spacing} to {max_spacing}); only evenly spaced axes can be written")]
    NonUniform {
        axis: &'static str,
        min_spacing: f64,
        max_spacing: f64,
    },

    #[error("The {axis} axis has no values; at least one is needed to describe it")]
    Empty { axis: &'static str },
}

/// A value that the flat key/value header model can't represent, or a
/// calibration kind the format can't store.
#[derive(Error, Debug)]
pub enum UnsupportedValueError {
    #[error("Unknown calibration type '{value}'. Do not know how to store parameters")]
    UnknownCalType { value: String },

    #[error("Extra keyword {key} is a {kind}. Only strings and numbers are supported in {format}")]
    CompositeKeyword {
        key: String,
        kind: &'static str,
        format: &'static str,
    },
}

/// The result of checking a domain object before writing or after reading.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
}
