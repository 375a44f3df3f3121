// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Building sensitivity (primary-beam) images from gridded kernel weights.
//!
//! The weight grid accumulated during gridding holds kernel self-energy;
//! Fourier-transforming it to the image domain and normalising by the sum
//! of kernel weights yields the telescope's direction-dependent power
//! pattern, one real image per pattern qualifier.

use log::warn;
use ndarray::{parallel::prelude::*, prelude::*};
use rustfft::FftDirection;
use thiserror::Error;

use crate::fft::PlaneFft;
use crate::grid::VisGrid;

/// A real, non-negative 4-D sensitivity image with axes
/// `(pol, chan, y, x)`.
pub type SensitivityImage = Array4<f64>;

/// The strategy producing a sensitivity image from the weight grid at the
/// end of a gridding cycle. Injected into the engine at construction;
/// `build` is a pure function of its two inputs.
pub trait SensitivityImageBuilder: Send + Sync {
    fn build(
        &self,
        weight_grid: &VisGrid,
        sum_cf_weight: &Array2<f64>,
    ) -> Result<SensitivityImage, SensitivityError>;
}

/// The wide-band builder: transforms the weight grid, normalises each
/// (pol, chan) plane by its sum of kernel weights (undoing the FFT's 1/N
/// scaling), optionally averages the parallel-hand polarisation planes, and
/// publishes the real part. The imaginary part of a conjugate-symmetric
/// weight grid's transform is rounding noise and is discarded; small
/// negative excursions are clamped to zero.
#[derive(Debug, Clone, Copy)]
pub struct WidebandSensitivityBuilder {
    /// Average the first two polarisation planes (the parallel hands) and
    /// write the result back to both, as instruments with a dual-hand
    /// basis require. Ignored with a single polarisation plane.
    pub average_parallel_hands: bool,
}

impl Default for WidebandSensitivityBuilder {
    fn default() -> WidebandSensitivityBuilder {
        WidebandSensitivityBuilder {
            average_parallel_hands: true,
        }
    }
}

impl SensitivityImageBuilder for WidebandSensitivityBuilder {
    fn build(
        &self,
        weight_grid: &VisGrid,
        sum_cf_weight: &Array2<f64>,
    ) -> Result<SensitivityImage, SensitivityError> {
        let (n_pols, n_chans, ny, nx) = weight_grid.values().dim();

        if sum_cf_weight.iter().all(|&w| w == 0.0) {
            return Err(SensitivityError::DivideByZeroWeight);
        }

        let mut work = weight_grid.values().to_owned();
        let fft = PlaneFft::new(ny, nx, FftDirection::Inverse);

        // Each (pol, chan) plane is independent; the raw inverse transform
        // followed by the sum-of-weights division leaves the pattern
        // peaking at unity. A plane with zero weight is left at zero
        // rather than aborting the others.
        work.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(pol, mut pol_planes)| {
                for (chan, mut plane) in pol_planes.axis_iter_mut(Axis(0)).enumerate() {
                    let sum_wt = sum_cf_weight[(pol, chan)];
                    if sum_wt == 0.0 {
                        warn!(
                            "Sum of weights for pol {pol}, chan {chan} is zero; \
                             its sensitivity plane is left at zero"
                        );
                        plane.fill(marlu::c64::new(0.0, 0.0));
                        continue;
                    }
                    fft.process(plane.view_mut());
                    plane.mapv_inplace(|v| v / sum_wt);
                }
            });

        if self.average_parallel_hands && n_pols >= 2 {
            for chan in 0..n_chans {
                let (p0, p1) = (
                    work.slice(s![0, chan, .., ..]).to_owned(),
                    work.slice(s![1, chan, .., ..]).to_owned(),
                );
                let mean = (&p0 + &p1) / 2.0;
                work.slice_mut(s![0, chan, .., ..]).assign(&mean);
                work.slice_mut(s![1, chan, .., ..]).assign(&mean);
            }
        }

        Ok(work.mapv(|v| v.re.max(0.0)))
    }
}

/// A flat pattern of ones: gridding without primary-beam correction.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitSensitivityBuilder;

impl SensitivityImageBuilder for UnitSensitivityBuilder {
    fn build(
        &self,
        weight_grid: &VisGrid,
        _sum_cf_weight: &Array2<f64>,
    ) -> Result<SensitivityImage, SensitivityError> {
        Ok(Array4::ones(weight_grid.values().dim()))
    }
}

#[derive(Error, Debug)]
pub enum SensitivityError {
    /// Normalisation was requested but no (pol, chan) plane accumulated any
    /// weight.
    #[error("Sum of weights is zero for every (pol, chan) plane; cannot normalise the sensitivity pattern")]
    DivideByZeroWeight,
}
