// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The uv-plane grids that visibilities are resampled onto.

use marlu::{c64, UVW};
use ndarray::prelude::*;

use crate::constants::VEL_C;
use crate::params::GridderParams;

/// A complex 4-D uv grid with axes `(pol, chan, v, u)`.
///
/// Two instances exist per gridding cycle: the science grid (visibility
/// data) and the weight grid (kernel self-energy). Both are exclusively
/// owned by the engine; they are reset when a cycle is initialised and
/// consumed when it is finalised.
#[derive(Debug, Clone)]
pub struct VisGrid {
    pub(crate) data: Array4<c64>,

    /// uv-plane pixels per wavelength along u.
    u_scale: f64,

    /// uv-plane pixels per wavelength along v.
    v_scale: f64,
}

impl VisGrid {
    pub(crate) fn from_params(params: &GridderParams) -> VisGrid {
        VisGrid {
            data: Array4::zeros((params.n_pols, params.n_chans(), params.ny, params.nx)),
            u_scale: params.nx as f64 * params.cell_size_rad,
            v_scale: params.ny as f64 * params.cell_size_rad,
        }
    }

    pub fn n_pols(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_chans(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn ny(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn nx(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    /// A view of the raw gridded values.
    pub fn values(&self) -> ArrayView4<c64> {
        self.data.view()
    }

    pub(crate) fn reset(&mut self) {
        self.data.fill(c64::new(0.0, 0.0));
    }

    /// Convert a uvw coordinate \[metres\] at a sky frequency to fractional
    /// uv-pixel coordinates `(u_pix, v_pix)`, with the grid origin at the
    /// centre pixel `(nx / 2, ny / 2)`.
    pub(crate) fn uv_to_pixels(&self, uvw: UVW, freq_hz: f64) -> (f64, f64) {
        let one_on_lambda = freq_hz / VEL_C;
        let u_pix = uvw.u * one_on_lambda * self.u_scale + (self.nx() / 2) as f64;
        let v_pix = uvw.v * one_on_lambda * self.v_scale + (self.ny() / 2) as f64;
        (u_pix, v_pix)
    }

    /// The uv coordinate \[wavelengths\] of a grid pixel along u.
    pub(crate) fn pixel_to_u(&self, iu: i64) -> f64 {
        (iu - (self.nx() / 2) as i64) as f64 / self.u_scale
    }

    /// The uv coordinate \[wavelengths\] of a grid pixel along v.
    pub(crate) fn pixel_to_v(&self, iv: i64) -> f64 {
        (iv - (self.ny() / 2) as i64) as f64 / self.v_scale
    }

    /// Is a kernel support window centred on `(iu, iv)` entirely on the
    /// grid?
    pub(crate) fn window_fits(&self, iu: i64, iv: i64, support: usize) -> bool {
        let s = support as i64;
        iu - s >= 0
            && iv - s >= 0
            && iu + s < self.nx() as i64
            && iv + s < self.ny() as i64
    }
}
