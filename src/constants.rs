// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.

pub use marlu::constants::VEL_C;

/// The default sky-rotation (parallactic-angle) delta beyond which cached
/// rotated kernels are considered stale and re-rotated from their reference
/// copies \[radians\]. 0.1 degrees.
pub const DEFAULT_ROTATION_TOLERANCE_RAD: f64 = 0.1 * std::f64::consts::PI / 180.0;

/// The default sensitivity-pattern floor. Image pixels where the normalised
/// pattern falls below this value are blanked rather than divided by a
/// near-zero beam.
pub const DEFAULT_PB_LIMIT: f64 = 0.05;
