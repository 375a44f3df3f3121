// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with aperture kernels.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    /// The synthesis library could not produce a requested kernel. There is
    /// no safe default aperture, so this aborts the gridding cycle.
    #[error("No aperture kernel is available for chan {chan}, pol {pol}: {reason}")]
    Unavailable {
        chan: usize,
        pol: usize,
        reason: String,
    },

    #[error(
        "A kernel footprint must be square with side 2*support+1; got {ny}x{nx} with support {support}"
    )]
    BadFootprint {
        ny: usize,
        nx: usize,
        support: usize,
    },
}
