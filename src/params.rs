// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Parameters controlling a gridding engine.

use thiserror::Error;

use crate::constants::{DEFAULT_PB_LIMIT, DEFAULT_ROTATION_TOLERANCE_RAD};

/// Validated parameters for a [`GriddingEngine`](crate::GriddingEngine).
///
/// The image shape, uv-cell scaling and polarisation/channel axes are fixed
/// for the lifetime of an engine; a new engine must be built to change them.
#[derive(Debug, Clone)]
pub struct GridderParams {
    /// Number of image/grid pixels along u (and x).
    pub nx: usize,

    /// Number of image/grid pixels along v (and y).
    pub ny: usize,

    /// Angular size of an image pixel \[radians\].
    pub cell_size_rad: f64,

    /// Sky frequency of each channel \[Hz\]. The length of this vector
    /// defines the channel axis of the grids.
    pub freqs_hz: Vec<f64>,

    /// Number of polarisation planes.
    pub n_pols: usize,

    /// The "pattern qualifier" labelling this engine's kernel and
    /// sensitivity caches (e.g. one per wide-band expansion term).
    pub qualifier: String,

    /// Sky-rotation delta beyond which cached rotated kernels are refreshed
    /// \[radians\].
    pub rotation_tolerance_rad: f64,

    /// Sensitivity-pattern floor; image pixels below this are blanked when
    /// normalising.
    pub pb_limit: f64,
}

impl GridderParams {
    /// Parameters for an `nx` × `ny` image with sensible defaults for the
    /// rotation tolerance and sensitivity floor.
    pub fn new(
        nx: usize,
        ny: usize,
        cell_size_rad: f64,
        freqs_hz: Vec<f64>,
        n_pols: usize,
        qualifier: impl Into<String>,
    ) -> GridderParams {
        GridderParams {
            nx,
            ny,
            cell_size_rad,
            freqs_hz,
            n_pols,
            qualifier: qualifier.into(),
            rotation_tolerance_rad: DEFAULT_ROTATION_TOLERANCE_RAD,
            pb_limit: DEFAULT_PB_LIMIT,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ParamsError> {
        if self.nx == 0 || self.ny == 0 {
            return Err(ParamsError::EmptyImage {
                nx: self.nx,
                ny: self.ny,
            });
        }
        if !(self.cell_size_rad > 0.0) {
            return Err(ParamsError::BadCellSize(self.cell_size_rad));
        }
        if self.freqs_hz.is_empty() {
            return Err(ParamsError::NoChannels);
        }
        if self.freqs_hz.iter().any(|f| !(*f > 0.0)) {
            return Err(ParamsError::BadFrequency);
        }
        if self.n_pols == 0 {
            return Err(ParamsError::NoPols);
        }
        if !(self.rotation_tolerance_rad >= 0.0) {
            return Err(ParamsError::BadTolerance(self.rotation_tolerance_rad));
        }
        if !(self.pb_limit >= 0.0) {
            return Err(ParamsError::BadPbLimit(self.pb_limit));
        }
        Ok(())
    }

    /// The number of channels (the length of [`GridderParams::freqs_hz`]).
    pub fn n_chans(&self) -> usize {
        self.freqs_hz.len()
    }
}

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("Requested a {nx}x{ny} image; both axes must be non-zero")]
    EmptyImage { nx: usize, ny: usize },

    #[error("Image cell size must be positive, got {0} rad")]
    BadCellSize(f64),

    #[error("No channel frequencies were supplied")]
    NoChannels,

    #[error("All channel frequencies must be positive")]
    BadFrequency,

    #[error("The number of polarisation planes must be non-zero")]
    NoPols,

    #[error("The rotation tolerance must be non-negative, got {0} rad")]
    BadTolerance(f64),

    #[error("The sensitivity-pattern floor must be non-negative, got {0}")]
    BadPbLimit(f64),
}
