// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Centred 2-D FFTs over grid planes.
//!
//! The grids and images in this crate keep their origin at the centre pixel
//! `(n / 2)`, so every transform here is wrapped in the usual
//! ifftshift/fftshift pair. Transforms are unnormalised; callers apply
//! their own scaling.

use std::sync::Arc;

use marlu::c64;
use ndarray::prelude::*;
use rustfft::{Fft, FftDirection, FftPlanner};

/// Planned row/column transforms for one plane shape. `process` borrows
/// `self` immutably so one instance can serve parallel per-plane loops.
pub(crate) struct PlaneFft {
    ny: usize,
    nx: usize,
    row: Arc<dyn Fft<f64>>,
    col: Arc<dyn Fft<f64>>,
}

impl PlaneFft {
    pub(crate) fn new(ny: usize, nx: usize, direction: FftDirection) -> PlaneFft {
        let mut planner = FftPlanner::new();
        let row = planner.plan_fft(nx, direction);
        let col = planner.plan_fft(ny, direction);
        PlaneFft { ny, nx, row, col }
    }

    /// Transform one `(ny, nx)` plane in place, with the origin at the
    /// centre pixel on both sides of the transform.
    pub(crate) fn process(&self, mut plane: ArrayViewMut2<c64>) {
        let (ny, nx) = plane.dim();
        debug_assert_eq!((ny, nx), (self.ny, self.nx));

        // Gather into a scratch buffer, moving the origin from the centre
        // pixel to index 0 (ifftshift).
        let mut buf = vec![c64::new(0.0, 0.0); ny * nx];
        for ((y, x), &v) in plane.indexed_iter() {
            let dy = (y + ny - ny / 2) % ny;
            let dx = (x + nx - nx / 2) % nx;
            buf[dy * nx + dx] = v;
        }

        let mut scratch = vec![
            c64::new(0.0, 0.0);
            self.row
                .get_inplace_scratch_len()
                .max(self.col.get_inplace_scratch_len())
        ];
        for row in buf.chunks_exact_mut(nx) {
            self.row.process_with_scratch(row, &mut scratch);
        }
        let mut col = vec![c64::new(0.0, 0.0); ny];
        for x in 0..nx {
            for (y, c) in col.iter_mut().enumerate() {
                *c = buf[y * nx + x];
            }
            self.col.process_with_scratch(&mut col, &mut scratch);
            for (y, c) in col.iter().enumerate() {
                buf[y * nx + x] = *c;
            }
        }

        // Scatter back with the zero-frequency bin restored to the centre
        // pixel (fftshift).
        for ((y, x), v) in plane.indexed_iter_mut() {
            let sy = (y + ny - ny / 2) % ny;
            let sx = (x + nx - nx / 2) % nx;
            *v = buf[sy * nx + sx];
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn delta_at_centre_transforms_flat() {
        // A unit impulse at the centre pixel is the transform origin, so
        // its spectrum is flat and real.
        let mut plane = Array2::zeros((8, 8));
        plane[(4, 4)] = c64::new(1.0, 0.0);
        PlaneFft::new(8, 8, FftDirection::Forward).process(plane.view_mut());
        for v in plane.iter() {
            assert_abs_diff_eq!(v.re, 1.0, epsilon = 1e-12);
            assert_abs_diff_eq!(v.im, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn forward_then_inverse_round_trips() {
        let mut plane = Array2::from_shape_fn((8, 6), |(y, x)| {
            c64::new((y * 6 + x) as f64, -(x as f64))
        });
        let original = plane.clone();
        PlaneFft::new(8, 6, FftDirection::Forward).process(plane.view_mut());
        PlaneFft::new(8, 6, FftDirection::Inverse).process(plane.view_mut());
        // rustfft transforms are unnormalised; undo the n factor.
        plane.mapv_inplace(|v| v / 48.0);
        for (a, b) in plane.iter().zip(original.iter()) {
            assert_abs_diff_eq!(a.re, b.re, epsilon = 1e-10);
            assert_abs_diff_eq!(a.im, b.im, epsilon = 1e-10);
        }
    }
}
