// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image-domain rotation of complex kernel footprints.

use marlu::c64;
use ndarray::prelude::*;

use super::ConvolutionKernel;

/// Below this delta a rotation is treated as a copy of the reference.
const NO_ROTATION_EPS: f64 = 1e-12;

/// Produces a kernel valid at the current sky-rotation angle from a cached
/// reference kernel.
///
/// Rotation always resamples the kernel's reference footprint by the total
/// angle from the reference, so `rotate(+θ)` followed by `rotate(-θ)`
/// reproduces the reference exactly rather than twice-interpolated values.
/// The computation is pure and re-entrant safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelRotator;

impl KernelRotator {
    /// A copy of `kernel` rotated by `delta_rad` from its current angle.
    pub fn rotate(&self, kernel: &ConvolutionKernel, delta_rad: f64) -> ConvolutionKernel {
        let mut rotated = kernel.clone();
        self.rotate_to(&mut rotated, kernel.angle() + delta_rad);
        rotated
    }

    /// Rotate `kernel` in place so its footprint is valid at
    /// `target_angle_rad`.
    pub(crate) fn rotate_to(&self, kernel: &mut ConvolutionKernel, target_angle_rad: f64) {
        let total = target_angle_rad - kernel.ref_angle();
        let values = resample_rotated(&kernel.reference(), total);
        kernel.set_rotated(values, target_angle_rad);
    }
}

/// Rotate a square complex array about its centre pixel by `angle_rad`
/// (anticlockwise), sampling bilinearly from the source. Samples falling
/// outside the source are zero.
fn resample_rotated(src: &ArrayView2<c64>, angle_rad: f64) -> Array2<c64> {
    let n = src.nrows();
    if angle_rad.abs() < NO_ROTATION_EPS {
        return src.to_owned();
    }

    let centre = (n as f64 - 1.0) / 2.0;
    let (sin, cos) = angle_rad.sin_cos();
    Array2::from_shape_fn((n, n), |(y, x)| {
        // Rotate the output coordinate back into the source frame.
        let dx = x as f64 - centre;
        let dy = y as f64 - centre;
        let sx = cos * dx + sin * dy + centre;
        let sy = -sin * dx + cos * dy + centre;
        bilinear(src, sy, sx)
    })
}

fn bilinear(src: &ArrayView2<c64>, y: f64, x: f64) -> c64 {
    let n = src.nrows() as i64;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let mut acc = c64::new(0.0, 0.0);
    for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
        for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
            let w = wy * wx;
            if w == 0.0 {
                continue;
            }
            let iy = y0 as i64 + dy;
            let ix = x0 as i64 + dx;
            if iy < 0 || iy >= n || ix < 0 || ix >= n {
                continue;
            }
            acc += src[(iy as usize, ix as usize)] * w;
        }
    }
    acc
}
