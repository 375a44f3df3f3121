// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with visibility resampling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResampleError {
    #[error("No kernel was cached for chan {chan}, pol {pol} when resampling")]
    MissingKernel { chan: usize, pol: usize },

    #[error("The kernel for chan {chan}, pol {pol} has a zero integral; cannot degrid with it")]
    DegenerateKernel { chan: usize, pol: usize },
}
