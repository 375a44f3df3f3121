// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Aperture (convolution) kernels, their synthesis contract, rotation and
//! caching.
//!
//! [`KernelFactory`] is the seam to the external physical-optics synthesis
//! library: it produces a reference kernel at some sky-rotation angle.
//! [`KernelRotator`] resamples that reference to the angle a visibility row
//! needs, and [`KernelCache`] keeps both the reference and the most recent
//! rotated copy so that nothing is recomputed until the angle drifts past
//! the configured tolerance.

mod cache;
mod error;
mod rotate;

pub use cache::{KernelCache, KernelSet, PatternState};
pub use error::KernelError;
pub use rotate::KernelRotator;

use marlu::c64;
use ndarray::prelude::*;

/// A small complex aperture footprint used to anti-alias gridding and
/// encode direction-dependent effects.
///
/// The footprint synthesised by the factory is kept as the immutable
/// `reference`; `values` is the copy resampled to `angle`. Rotated copies
/// are always produced from the reference (never from a previously rotated
/// copy), so repeated rotation does not accumulate interpolation error.
#[derive(Debug, Clone)]
pub struct ConvolutionKernel {
    /// The footprint at the angle it was synthesised.
    reference: Array2<c64>,

    /// The sky-rotation angle `reference` was synthesised at \[radians\].
    ref_angle: f64,

    /// The footprint resampled to `angle`.
    values: Array2<c64>,

    /// The sky-rotation angle `values` is valid at \[radians\].
    angle: f64,

    /// Half-width of the support window; the footprint side is
    /// `2 * support + 1` uv cells.
    support: usize,

    /// Sum of `values`.
    integral: c64,

    /// The autocorrelation of `values`: the "self-energy" footprint
    /// deposited into the weight grid. Its Fourier transform is the
    /// aperture's power pattern, so it is conjugate-symmetric by
    /// construction. Side `4 * support + 1`.
    self_energy: Array2<c64>,

    /// Sum of `self_energy` (real to rounding; the imaginary part of an
    /// autocorrelation sum cancels).
    self_energy_sum: f64,
}

impl ConvolutionKernel {
    /// Wrap a synthesised footprint. `values` must be square with side
    /// `2 * support + 1`.
    pub fn new(values: Array2<c64>, support: usize, angle: f64) -> Result<ConvolutionKernel, KernelError> {
        let (ny, nx) = values.dim();
        if ny != 2 * support + 1 || nx != 2 * support + 1 {
            return Err(KernelError::BadFootprint { ny, nx, support });
        }
        let integral = values.sum();
        let self_energy = autocorrelate(&values);
        let self_energy_sum = self_energy.sum().re;
        Ok(ConvolutionKernel {
            reference: values.clone(),
            ref_angle: angle,
            values,
            angle,
            support,
            integral,
            self_energy,
            self_energy_sum,
        })
    }

    /// The footprint at [`ConvolutionKernel::angle`].
    pub fn values(&self) -> ArrayView2<c64> {
        self.values.view()
    }

    /// The reference-angle footprint.
    pub fn reference(&self) -> ArrayView2<c64> {
        self.reference.view()
    }

    pub fn support(&self) -> usize {
        self.support
    }

    /// The angle the current footprint is valid at \[radians\].
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// The angle the reference footprint was synthesised at \[radians\].
    pub fn ref_angle(&self) -> f64 {
        self.ref_angle
    }

    /// The kernel integral (sum of the current footprint).
    pub fn integral(&self) -> c64 {
        self.integral
    }

    /// Half-width of the self-energy footprint (`2 * support`).
    pub fn weight_support(&self) -> usize {
        2 * self.support
    }

    /// The self-energy (autocorrelation) footprint.
    pub fn self_energy(&self) -> ArrayView2<c64> {
        self.self_energy.view()
    }

    /// The integral of the self-energy footprint.
    pub fn self_energy_sum(&self) -> f64 {
        self.self_energy_sum
    }

    /// Replace the current footprint with one resampled to `angle`,
    /// refreshing the derived quantities. Used by the rotator.
    pub(crate) fn set_rotated(&mut self, values: Array2<c64>, angle: f64) {
        self.integral = values.sum();
        self.self_energy = autocorrelate(&values);
        self.self_energy_sum = self.self_energy.sum().re;
        self.values = values;
        self.angle = angle;
    }
}

/// The discrete autocorrelation `a[d] = Σ_x v[x + d] conj(v[x])` over the
/// footprint, zero-padded outside the support.
fn autocorrelate(values: &Array2<c64>) -> Array2<c64> {
    let side = values.nrows() as i64;
    let out_side = (2 * side - 1) as usize;
    let mut out = Array2::zeros((out_side, out_side));
    for dy in -(side - 1)..side {
        for dx in -(side - 1)..side {
            let mut acc = c64::new(0.0, 0.0);
            for y in 0..side {
                let sy = y + dy;
                if sy < 0 || sy >= side {
                    continue;
                }
                for x in 0..side {
                    let sx = x + dx;
                    if sx < 0 || sx >= side {
                        continue;
                    }
                    acc += values[(sy as usize, sx as usize)]
                        * values[(y as usize, x as usize)].conj();
                }
            }
            out[((dy + side - 1) as usize, (dx + side - 1) as usize)] = acc;
        }
    }
    out
}

/// The contract with the external aperture-synthesis library: produce a
/// reference kernel for a channel/polarisation at a sky-rotation angle.
/// Antenna typing is folded into the factory instance; a heterogeneous
/// array supplies one factory per antenna type.
pub trait KernelFactory: Send + Sync {
    fn reference_kernel(
        &self,
        chan: usize,
        pol: usize,
        freq_hz: f64,
        angle: f64,
    ) -> Result<ConvolutionKernel, KernelError>;
}

/// A trivial [`KernelFactory`]: a flat, unit-integral pillbox footprint,
/// identical for every channel and polarisation. Useful for tests and for
/// gridding without direction-dependent corrections.
pub struct PillboxKernelFactory {
    pub support: usize,
}

impl KernelFactory for PillboxKernelFactory {
    fn reference_kernel(
        &self,
        _chan: usize,
        _pol: usize,
        _freq_hz: f64,
        angle: f64,
    ) -> Result<ConvolutionKernel, KernelError> {
        let side = 2 * self.support + 1;
        let value = c64::new(1.0 / (side * side) as f64, 0.0);
        ConvolutionKernel::new(Array2::from_elem((side, side), value), self.support, angle)
    }
}
