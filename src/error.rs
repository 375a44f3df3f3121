// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all gridder-related errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridderError {
    #[error("{0}")]
    Engine(#[from] crate::engine::EngineError),

    #[error("{0}")]
    Kernel(#[from] crate::kernel::KernelError),

    #[error("{0}")]
    Resample(#[from] crate::resample::ResampleError),

    #[error("{0}")]
    Sensitivity(#[from] crate::sensitivity::SensitivityError),

    #[error("{0}")]
    Params(#[from] crate::params::ParamsError),
}
