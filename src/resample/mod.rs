// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resampling visibility samples onto (and off) the uv grids.
//!
//! [`VisResampler`] is the external resampling contract: deposit weighted
//! visibility contributions between a sample and the science grid using a
//! kernel, and the adjoint, extracting model visibilities per row.
//! [`ConvolutionalResampler`] is the nearest-cell convolutional
//! implementation used by default. [`WeightGridAccumulator`] runs the same
//! machinery in "self-energy" mode: no data multiplication, uvw pinned to
//! the grid centre, so the Fourier transform of its grid is the synthesised
//! aperture's power pattern.

mod error;

pub use error::ResampleError;

use std::f64::consts::TAU;

use marlu::{c64, UVW};
use ndarray::prelude::*;

use crate::grid::VisGrid;
use crate::kernel::KernelSet;

/// One visibility row's contribution, as seen by the resampler.
#[derive(Clone, Copy)]
pub struct RowSample<'a> {
    /// uvw coordinate \[metres\].
    pub uvw: UVW,

    /// Pointing offset `(l, m)` \[radians\] for this row's baseline.
    pub pointing: [f64; 2],

    /// `(pol, chan)` complex values.
    pub data: ArrayView2<'a, c64>,

    /// `(pol, chan)` flags; `true` excludes the sample.
    pub flags: ArrayView2<'a, bool>,

    /// `(pol, chan)` weights.
    pub weights: ArrayView2<'a, f64>,
}

/// The resampling contract between the engine and the gridding machinery.
pub trait VisResampler: Send + Sync {
    /// Deposit one row's unflagged (pol, chan) samples into the grid,
    /// weighting by the kernel support, and accumulate
    /// `weight × kernel integral` into `sum_weight`.
    fn accumulate(
        &self,
        grid: &mut VisGrid,
        sum_weight: &mut Array2<f64>,
        freqs_hz: &[f64],
        sample: &RowSample,
        kernels: KernelSet,
    ) -> Result<(), ResampleError>;

    /// The adjoint: extract model visibilities for one row from the grid,
    /// writing into `model` (`(pol, chan)`). Flagged or off-grid samples
    /// are left at zero.
    fn sample_from_grid(
        &self,
        grid: &VisGrid,
        freqs_hz: &[f64],
        uvw: UVW,
        pointing: [f64; 2],
        flags: ArrayView2<bool>,
        model: ArrayViewMut2<c64>,
        kernels: KernelSet,
    ) -> Result<(), ResampleError>;
}

/// Nearest-cell convolutional resampling: each sample lands on the grid
/// cell nearest its (u, v), spread over the kernel's support window, with
/// the pointing-offset correction applied as the uv-plane phase gradient
/// equivalent to the image-plane offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConvolutionalResampler;

impl VisResampler for ConvolutionalResampler {
    fn accumulate(
        &self,
        grid: &mut VisGrid,
        sum_weight: &mut Array2<f64>,
        freqs_hz: &[f64],
        sample: &RowSample,
        kernels: KernelSet,
    ) -> Result<(), ResampleError> {
        let (n_pols, n_chans) = sample.data.dim();

        for chan in 0..n_chans {
            let (u_pix, v_pix) = grid.uv_to_pixels(sample.uvw, freqs_hz[chan]);
            let iu = u_pix.round() as i64;
            let iv = v_pix.round() as i64;

            for pol in 0..n_pols {
                if sample.flags[(pol, chan)] {
                    continue;
                }
                let weight = sample.weights[(pol, chan)];
                if weight == 0.0 {
                    continue;
                }
                let kernel = kernels
                    .get(chan, pol)
                    .ok_or(ResampleError::MissingKernel { chan, pol })?;
                let support = kernel.support() as i64;
                if !grid.window_fits(iu, iv, kernel.support()) {
                    // Off-grid samples are dropped, like rows failing the
                    // on-grid check in any gridder.
                    continue;
                }

                let value = sample.data[(pol, chan)] * weight;
                let taps = phased_footprint(grid, iu, iv, support, kernel.values(), sample.pointing);
                let (y0, x0) = ((iv - support) as usize, (iu - support) as usize);
                for ((ty, tx), k) in taps.indexed_iter() {
                    grid.data[(pol, chan, y0 + ty, x0 + tx)] += value * k;
                }
                sum_weight[(pol, chan)] += weight * kernel.integral().re;
            }
        }
        Ok(())
    }

    fn sample_from_grid(
        &self,
        grid: &VisGrid,
        freqs_hz: &[f64],
        uvw: UVW,
        pointing: [f64; 2],
        flags: ArrayView2<bool>,
        mut model: ArrayViewMut2<c64>,
        kernels: KernelSet,
    ) -> Result<(), ResampleError> {
        let (n_pols, n_chans) = model.dim();

        for chan in 0..n_chans {
            let (u_pix, v_pix) = grid.uv_to_pixels(uvw, freqs_hz[chan]);
            let iu = u_pix.round() as i64;
            let iv = v_pix.round() as i64;

            for pol in 0..n_pols {
                if flags[(pol, chan)] {
                    continue;
                }
                let kernel = kernels
                    .get(chan, pol)
                    .ok_or(ResampleError::MissingKernel { chan, pol })?;
                let support = kernel.support() as i64;
                if !grid.window_fits(iu, iv, kernel.support()) {
                    continue;
                }
                let integral = kernel.integral();
                if integral.norm_sqr() == 0.0 {
                    return Err(ResampleError::DegenerateKernel { chan, pol });
                }

                let taps = phased_footprint(grid, iu, iv, support, kernel.values(), pointing);
                let (y0, x0) = ((iv - support) as usize, (iu - support) as usize);
                let mut acc = c64::new(0.0, 0.0);
                for ((ty, tx), k) in taps.indexed_iter() {
                    acc += grid.data[(pol, chan, y0 + ty, x0 + tx)] * k.conj();
                }
                model[(pol, chan)] = acc / integral.conj();
            }
        }
        Ok(())
    }
}

/// Deposits kernel self-energy (not multiplied by visibility data) into the
/// weight grid, with uvw pinned to the grid centre, and accumulates the
/// matching sum of kernel weights.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightGridAccumulator;

impl WeightGridAccumulator {
    pub fn accumulate(
        &self,
        grid: &mut VisGrid,
        sum_cf_weight: &mut Array2<f64>,
        sample: &RowSample,
        kernels: KernelSet,
    ) -> Result<(), ResampleError> {
        let (n_pols, n_chans) = sample.flags.dim();
        let iu = (grid.nx() / 2) as i64;
        let iv = (grid.ny() / 2) as i64;
        let (ny, nx) = (grid.ny() as i64, grid.nx() as i64);

        for chan in 0..n_chans {
            for pol in 0..n_pols {
                if sample.flags[(pol, chan)] {
                    continue;
                }
                let weight = sample.weights[(pol, chan)];
                if weight == 0.0 {
                    continue;
                }
                let kernel = kernels
                    .get(chan, pol)
                    .ok_or(ResampleError::MissingKernel { chan, pol })?;
                let support = kernel.weight_support() as i64;

                let footprint = kernel.self_energy();
                for dv in -support..=support {
                    let y = iv + dv;
                    if y < 0 || y >= ny {
                        continue;
                    }
                    for du in -support..=support {
                        let x = iu + du;
                        if x < 0 || x >= nx {
                            continue;
                        }
                        let k = footprint[((dv + support) as usize, (du + support) as usize)];
                        grid.data[(pol, chan, y as usize, x as usize)] += k * weight;
                    }
                }
                sum_cf_weight[(pol, chan)] += weight * kernel.self_energy_sum();
            }
        }
        Ok(())
    }
}

/// The kernel footprint with the pointing-offset phase gradient folded in,
/// over the support window centred on grid cell `(iu, iv)`. With no offset
/// the footprint is used as-is.
fn phased_footprint(
    grid: &VisGrid,
    iu: i64,
    iv: i64,
    support: i64,
    footprint: ArrayView2<c64>,
    pointing: [f64; 2],
) -> Array2<c64> {
    let mut taps = footprint.to_owned();
    if pointing != [0.0, 0.0] {
        for ((ty, tx), k) in taps.indexed_iter_mut() {
            *k *= pointing_phasor(
                grid,
                iu - support + tx as i64,
                iv - support + ty as i64,
                pointing,
            );
        }
    }
    taps
}

/// The uv-plane phase gradient encoding an image-plane pointing offset:
/// `exp(2πi (u l₀ + v m₀))` at the uv coordinate of a grid cell.
fn pointing_phasor(grid: &VisGrid, iu: i64, iv: i64, pointing: [f64; 2]) -> c64 {
    let phase = TAU * (grid.pixel_to_u(iu) * pointing[0] + grid.pixel_to_v(iv) * pointing[1]);
    c64::new(0.0, phase).exp()
}
