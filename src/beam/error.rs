// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with reading or writing beamfits files.

use thiserror::Error;

use crate::{
    error::{CheckError, ConsistencyError, SamplingError, SchemaError, UnsupportedValueError},
    io::read::fits::FitsError,
};

#[derive(Error, Debug)]
pub enum BeamfitsReadError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum BeamfitsWriteError {
    #[error("{file} already exists and clobbering was not requested")]
    FileExists { file: String },

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Sampling(#[from] SamplingError),

    #[error(transparent)]
    UnsupportedValue(#[from] UnsupportedValueError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Fits(#[from] FitsError),

    #[error(transparent)]
    Fitsio(#[from] fitsio::errors::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
