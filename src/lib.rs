// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Wide-band, direction-dependent convolutional gridding and degridding for
radio-interferometric imaging.

The [`GriddingEngine`] converts calibrated visibility samples into a
frequency- and polarisation-indexed image-plane grid (and the adjoint,
producing model visibilities from an image), while concurrently estimating
the telescope's direction-dependent sensitivity pattern ("primary beam")
needed to flatten the resulting image to true sky brightness.

Aperture kernels vary with sky rotation, per-antenna pointing error,
frequency and polarisation; the [`KernelCache`] avoids re-synthesising or
re-rotating them unless the sky-rotation angle drifts past a configured
tolerance.
 */

pub mod chunk;
pub mod constants;
pub mod engine;
mod error;
pub(crate) mod fft;
pub mod grid;
pub mod kernel;
pub mod params;
pub mod resample;
pub mod sensitivity;

// Re-exports.
pub use chunk::{ChunkSource, ChunkSourceError, VisChunk};
pub use engine::{EngineError, EngineState, GriddingEngine};
pub use error::GridderError;
pub use grid::VisGrid;
pub use kernel::{
    ConvolutionKernel, KernelCache, KernelError, KernelFactory, KernelRotator, PatternState,
    PillboxKernelFactory,
};
pub use params::{GridderParams, ParamsError};
pub use resample::{
    ConvolutionalResampler, ResampleError, RowSample, VisResampler, WeightGridAccumulator,
};
pub use sensitivity::{
    SensitivityError, SensitivityImage, SensitivityImageBuilder, UnitSensitivityBuilder,
    WidebandSensitivityBuilder,
};

// External re-exports.
pub use marlu::{c64, UVW};
