// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The gridding engine: one gridding (or degridding) cycle at a time.
//!
//! A cycle runs `initialize_to_sky` → `grid_one_chunk`* →
//! `finalize_to_sky` → `get_image`. While the active qualifier has no
//! cached sensitivity pattern, gridding also accumulates kernel self-energy
//! into a parallel weight grid, and finalisation hands that grid to the
//! injected [`SensitivityImageBuilder`] exactly once. The adjoint cycle
//! (`initialize_to_vis` → `degrid_one_chunk`* → `finalize_to_vis`)
//! predicts model visibilities from an image.
//!
//! Chunks are processed strictly sequentially; to parallelise, partition
//! chunks across independent engines and merge their grids afterwards.

mod error;
#[cfg(test)]
mod tests;

pub use error::EngineError;

use log::{debug, info, warn};
use marlu::c64;
use ndarray::{azip, prelude::*};
use rustfft::FftDirection;

use crate::chunk::{ChunkSource, VisChunk};
use crate::fft::PlaneFft;
use crate::grid::VisGrid;
use crate::kernel::{KernelCache, KernelFactory};
use crate::params::GridderParams;
use crate::resample::{VisResampler, WeightGridAccumulator};
use crate::sensitivity::{SensitivityImage, SensitivityImageBuilder};

/// The engine's state machine. Operations invoked in the wrong state fail
/// with [`EngineError::Sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    /// A gridding cycle is in progress.
    Accumulating,
    /// A gridding cycle has been finalised; `get_image` is valid.
    GridReady,
    /// A degridding cycle is in progress.
    Predicting,
}

/// Tracks the angle the currently valid rotated kernels were produced at.
#[derive(Debug, Clone, Copy)]
struct RotationState {
    angle: Option<f64>,
    tolerance: f64,
}

impl RotationState {
    fn new(tolerance: f64) -> RotationState {
        RotationState {
            angle: None,
            tolerance,
        }
    }

    fn needs_update(&self, angle: f64) -> bool {
        match self.angle {
            None => true,
            Some(a) => (angle - a).abs() > self.tolerance,
        }
    }

    fn update(&mut self, angle: f64) {
        self.angle = Some(angle);
    }

    fn reset(&mut self) {
        self.angle = None;
    }
}

/// Orchestrates gridding cycles over an exclusive pair of uv grids, using
/// an injected kernel factory, resampler and sensitivity-image strategy.
pub struct GriddingEngine {
    params: GridderParams,
    cache: KernelCache,
    resampler: Box<dyn VisResampler>,
    weight_accumulator: WeightGridAccumulator,
    builder: Box<dyn SensitivityImageBuilder>,

    state: EngineState,
    rotation: RotationState,

    science: Option<VisGrid>,
    weight: Option<VisGrid>,
    sum_weight: Array2<f64>,
    sum_cf_weight: Array2<f64>,

    /// The last image returned by `get_image`, so repeated calls in
    /// `GridReady` are bit-identical.
    last_image: Option<(bool, Array4<c64>)>,
}

impl GriddingEngine {
    /// Build an engine with a fresh kernel cache.
    pub fn new(
        params: GridderParams,
        factory: Box<dyn KernelFactory>,
        resampler: Box<dyn VisResampler>,
        builder: Box<dyn SensitivityImageBuilder>,
    ) -> Result<GriddingEngine, EngineError> {
        let cache = KernelCache::new(factory, params.freqs_hz.clone(), params.n_pols);
        GriddingEngine::with_cache(params, cache, resampler, builder)
    }

    /// Build an engine around an existing cache, so kernels and sensitivity
    /// patterns persist across engine instances (e.g. across wide-band
    /// terms).
    pub fn with_cache(
        params: GridderParams,
        cache: KernelCache,
        resampler: Box<dyn VisResampler>,
        builder: Box<dyn SensitivityImageBuilder>,
    ) -> Result<GriddingEngine, EngineError> {
        params.validate()?;
        if cache.n_chans() != params.n_chans() || cache.n_pols() != params.n_pols {
            return Err(EngineError::CacheAxesMismatch);
        }
        let shape = (params.n_pols, params.n_chans());
        let rotation = RotationState::new(params.rotation_tolerance_rad);
        Ok(GriddingEngine {
            params,
            cache,
            resampler,
            weight_accumulator: WeightGridAccumulator,
            builder,
            state: EngineState::Idle,
            rotation,
            science: None,
            weight: None,
            sum_weight: Array2::zeros(shape),
            sum_cf_weight: Array2::zeros(shape),
            last_image: None,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn params(&self) -> &GridderParams {
        &self.params
    }

    /// The per-(pol, chan) sum over unflagged samples of
    /// `weight × kernel integral`.
    pub fn sum_of_weights(&self) -> &Array2<f64> {
        &self.sum_weight
    }

    /// The cached sensitivity image for a qualifier; `None` is the
    /// NOT_CACHED sentinel.
    pub fn sensitivity_image(&self, qualifier: &str) -> Option<&SensitivityImage> {
        self.cache.load_average_pb(qualifier)
    }

    /// Recover the kernel cache to hand to another engine instance.
    pub fn into_cache(self) -> KernelCache {
        self.cache
    }

    /// Drop all cached kernels and sensitivity patterns. Only legal between
    /// cycles.
    pub fn reset_cache(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Idle | EngineState::GridReady => {
                self.cache.clear();
                self.last_image = None;
                Ok(())
            }
            state => Err(EngineError::Sequence {
                op: "reset_cache",
                state,
            }),
        }
    }

    /// Discard an abandoned cycle. A cycle cannot be resumed; re-initialise
    /// and grid its chunks again.
    pub fn discard_cycle(&mut self) {
        if matches!(
            self.state,
            EngineState::Accumulating | EngineState::Predicting
        ) {
            debug!("Discarding the cycle in progress");
        }
        if self.weight.take().is_some() {
            self.cache.abandon_pattern(&self.params.qualifier);
        }
        self.science = None;
        self.rotation.reset();
        self.state = EngineState::Idle;
    }

    /// Begin a gridding cycle: allocate/clear the science grid and, if the
    /// active qualifier has no cached sensitivity pattern, the weight grid
    /// and its sum of weights.
    pub fn initialize_to_sky(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Idle | EngineState::GridReady => (),
            state => {
                return Err(EngineError::Sequence {
                    op: "initialize_to_sky",
                    state,
                })
            }
        }

        let science = self.science.take();
        self.science = Some(self.fresh_grid(science));
        self.sum_weight.fill(0.0);
        self.last_image = None;

        if self.cache.load_average_pb(&self.params.qualifier).is_none() {
            info!(
                "No cached sensitivity pattern for qualifier {:?}; accumulating weights during \
                 gridding. The first cycle will be slower than subsequent ones.",
                self.params.qualifier
            );
            let weight = self.weight.take();
            self.weight = Some(self.fresh_grid(weight));
            self.sum_cf_weight.fill(0.0);
            self.cache.begin_pattern(&self.params.qualifier);
        } else {
            self.weight = None;
        }

        self.rotation.reset();
        self.state = EngineState::Accumulating;
        Ok(())
    }

    /// Grid one chunk of visibility samples. Kernel and shape failures
    /// abort (discard) the cycle; a partial grid would silently corrupt
    /// the image.
    pub fn grid_one_chunk(&mut self, chunk: &VisChunk) -> Result<(), EngineError> {
        if self.state != EngineState::Accumulating {
            return Err(EngineError::Sequence {
                op: "grid_one_chunk",
                state: self.state,
            });
        }
        if let Err(e) = self.check_chunk(chunk) {
            self.discard_cycle();
            return Err(e);
        }

        match self.grid_chunk_inner(chunk) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard_cycle();
                Err(e)
            }
        }
    }

    fn grid_chunk_inner(&mut self, chunk: &VisChunk) -> Result<(), EngineError> {
        let qualifier = &self.params.qualifier;
        for row in 0..chunk.n_rows() {
            let angle = chunk.parallactic_angles[row];
            if self.rotation.needs_update(angle) {
                self.cache
                    .ensure_rotation(angle, self.rotation.tolerance)
                    .map_err(|source| EngineError::Kernel {
                        qualifier: qualifier.clone(),
                        source,
                    })?;
                self.rotation.update(angle);
            }

            let sample = chunk.row_sample(row);
            let kernels = self.cache.kernels();

            if let Some(science) = self.science.as_mut() {
                self.resampler
                    .accumulate(
                        science,
                        &mut self.sum_weight,
                        &chunk.freqs_hz,
                        &sample,
                        kernels,
                    )
                    .map_err(|source| EngineError::Resample {
                        qualifier: qualifier.clone(),
                        source,
                    })?;
            }

            if let Some(weight) = self.weight.as_mut() {
                self.weight_accumulator
                    .accumulate(weight, &mut self.sum_cf_weight, &sample, kernels)
                    .map_err(|source| EngineError::Resample {
                        qualifier: qualifier.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// Drive a whole store of chunks through `grid_one_chunk`.
    pub fn grid_all(&mut self, source: &mut dyn ChunkSource) -> Result<(), EngineError> {
        while let Some(chunk) = source.next_chunk()? {
            self.grid_one_chunk(&chunk)?;
        }
        Ok(())
    }

    /// End the gridding cycle. If the sensitivity pattern was accumulating
    /// this cycle, it is built and cached now, exactly once.
    pub fn finalize_to_sky(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Accumulating {
            return Err(EngineError::Sequence {
                op: "finalize_to_sky",
                state: self.state,
            });
        }

        if let Some(weight_grid) = self.weight.take() {
            match self.builder.build(&weight_grid, &self.sum_cf_weight) {
                Ok(image) => self.cache.flush(&self.params.qualifier, image),
                Err(source) => {
                    let qualifier = self.params.qualifier.clone();
                    self.cache.abandon_pattern(&qualifier);
                    self.discard_cycle();
                    return Err(EngineError::Sensitivity { qualifier, source });
                }
            }
        }

        self.state = EngineState::GridReady;
        debug!("Gridding cycle finalised for qualifier {:?}", self.params.qualifier);
        Ok(())
    }

    /// Transform the science grid to the image domain.
    ///
    /// With `normalize`, each (pol, chan) plane is scaled by its sum of
    /// weights and divided by the sensitivity pattern, with pixels below
    /// the configured floor blanked. Without it, the transform is unitary
    /// and energy-preserving. Results are deterministic and memoised, so
    /// repeated calls return bit-identical arrays.
    pub fn get_image(&mut self, normalize: bool) -> Result<Array4<c64>, EngineError> {
        if self.state != EngineState::GridReady {
            return Err(EngineError::Sequence {
                op: "get_image",
                state: self.state,
            });
        }
        if let Some((n, image)) = &self.last_image {
            if *n == normalize {
                return Ok(image.clone());
            }
        }

        let science = match self.science.as_ref() {
            Some(g) => g,
            None => {
                return Err(EngineError::Sequence {
                    op: "get_image",
                    state: self.state,
                })
            }
        };

        let (n_pols, n_chans, ny, nx) = science.values().dim();
        let mut image = science.values().to_owned();
        let fft = PlaneFft::new(ny, nx, FftDirection::Inverse);
        let unitary = 1.0 / ((nx * ny) as f64).sqrt();
        for pol in 0..n_pols {
            for chan in 0..n_chans {
                let mut plane = image.slice_mut(s![pol, chan, .., ..]);
                fft.process(plane.view_mut());
                plane.mapv_inplace(|v| v * unitary);
            }
        }

        if normalize {
            let pattern = self
                .cache
                .load_average_pb(&self.params.qualifier)
                .ok_or_else(|| EngineError::SensitivityMissing {
                    qualifier: self.params.qualifier.clone(),
                })?;
            let pb_limit = self.params.pb_limit;
            for pol in 0..n_pols {
                for chan in 0..n_chans {
                    let mut plane = image.slice_mut(s![pol, chan, .., ..]);
                    let sum_wt = self.sum_weight[(pol, chan)];
                    if sum_wt == 0.0 {
                        warn!(
                            "Sum of weights for pol {pol}, chan {chan} is zero; its image plane \
                             is left at zero"
                        );
                        plane.fill(c64::new(0.0, 0.0));
                        continue;
                    }
                    // Undo the unitary scaling and apply the flux scale.
                    let scale = ((nx * ny) as f64).sqrt() / sum_wt;
                    let pb_plane = pattern.slice(s![pol, chan, .., ..]);
                    azip!((v in &mut plane, &pb in &pb_plane) {
                        *v = if pb >= pb_limit { *v * scale / pb } else { c64::new(0.0, 0.0) };
                    });
                }
            }
        }

        self.last_image = Some((normalize, image.clone()));
        Ok(image)
    }

    /// Begin a degridding cycle from a model image with axes
    /// `(pol, chan, y, x)`: flatten by the sensitivity pattern where one is
    /// cached, then transform to the uv plane.
    pub fn initialize_to_vis(&mut self, model: &Array4<c64>) -> Result<(), EngineError> {
        match self.state {
            EngineState::Idle | EngineState::GridReady => (),
            state => {
                return Err(EngineError::Sequence {
                    op: "initialize_to_vis",
                    state,
                })
            }
        }
        let (n_pols, n_chans, ny, nx) = model.dim();
        if n_pols != self.params.n_pols
            || n_chans != self.params.n_chans()
            || ny != self.params.ny
            || nx != self.params.nx
        {
            return Err(EngineError::DataShape {
                got_pols: n_pols,
                got_chans: n_chans,
                n_pols: self.params.n_pols,
                n_chans: self.params.n_chans(),
            });
        }

        let old = self.science.take();
        let mut grid = self.fresh_grid(old);
        grid.data.assign(model);

        match self.cache.load_average_pb(&self.params.qualifier) {
            Some(pattern) => {
                let pb_limit = self.params.pb_limit;
                for pol in 0..n_pols {
                    for chan in 0..n_chans {
                        let mut plane = grid.data.slice_mut(s![pol, chan, .., ..]);
                        let pb_plane = pattern.slice(s![pol, chan, .., ..]);
                        azip!((v in &mut plane, &pb in &pb_plane) {
                            *v = if pb >= pb_limit { *v / pb } else { c64::new(0.0, 0.0) };
                        });
                    }
                }
            }
            None => warn!(
                "No cached sensitivity pattern for qualifier {:?}; predicting without flattening",
                self.params.qualifier
            ),
        }

        let fft = PlaneFft::new(ny, nx, FftDirection::Forward);
        let scale = 1.0 / (nx * ny) as f64;
        for pol in 0..n_pols {
            for chan in 0..n_chans {
                let mut plane = grid.data.slice_mut(s![pol, chan, .., ..]);
                fft.process(plane.view_mut());
                plane.mapv_inplace(|v| v * scale);
            }
        }

        self.science = Some(grid);
        self.rotation.reset();
        self.last_image = None;
        self.state = EngineState::Predicting;
        Ok(())
    }

    /// Predict model visibilities for one chunk's rows into `model`
    /// (`(row, pol, chan)`, matching the chunk's data axes).
    pub fn degrid_one_chunk(
        &mut self,
        chunk: &VisChunk,
        model: &mut Array3<c64>,
    ) -> Result<(), EngineError> {
        if self.state != EngineState::Predicting {
            return Err(EngineError::Sequence {
                op: "degrid_one_chunk",
                state: self.state,
            });
        }
        if let Err(e) = self.check_chunk(chunk) {
            self.discard_cycle();
            return Err(e);
        }
        if model.dim() != chunk.data.dim() {
            self.discard_cycle();
            return Err(EngineError::DataShape {
                got_pols: model.len_of(Axis(1)),
                got_chans: model.len_of(Axis(2)),
                n_pols: self.params.n_pols,
                n_chans: self.params.n_chans(),
            });
        }

        let qualifier = &self.params.qualifier;
        for row in 0..chunk.n_rows() {
            let angle = chunk.parallactic_angles[row];
            if self.rotation.needs_update(angle) {
                self.cache
                    .ensure_rotation(angle, self.rotation.tolerance)
                    .map_err(|source| EngineError::Kernel {
                        qualifier: qualifier.clone(),
                        source,
                    })?;
                self.rotation.update(angle);
            }

            let kernels = self.cache.kernels();
            if let Some(science) = self.science.as_ref() {
                self.resampler
                    .sample_from_grid(
                        science,
                        &chunk.freqs_hz,
                        chunk.uvws[row],
                        chunk.pointing_for_row(row),
                        chunk.flags.index_axis(Axis(0), row),
                        model.index_axis_mut(Axis(0), row),
                        kernels,
                    )
                    .map_err(|source| EngineError::Resample {
                        qualifier: qualifier.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    /// End the degridding cycle.
    pub fn finalize_to_vis(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Predicting {
            return Err(EngineError::Sequence {
                op: "finalize_to_vis",
                state: self.state,
            });
        }
        self.science = None;
        self.state = EngineState::Idle;
        Ok(())
    }

    /// Reuse a grid allocation where possible.
    fn fresh_grid(&self, old: Option<VisGrid>) -> VisGrid {
        match old {
            Some(mut grid) => {
                grid.reset();
                grid
            }
            None => VisGrid::from_params(&self.params),
        }
    }

    fn check_chunk(&self, chunk: &VisChunk) -> Result<(), EngineError> {
        if chunk.n_pols() != self.params.n_pols
            || chunk.n_chans() != self.params.n_chans()
            || chunk.freqs_hz.len() != self.params.n_chans()
        {
            return Err(EngineError::DataShape {
                got_pols: chunk.n_pols(),
                got_chans: chunk.n_chans(),
                n_pols: self.params.n_pols,
                n_chans: self.params.n_chans(),
            });
        }
        let n_rows = chunk.n_rows();
        for (what, got) in [
            ("ant1", chunk.ant1.len()),
            ("ant2", chunk.ant2.len()),
            ("times", chunk.times.len()),
            ("uvws", chunk.uvws.len()),
            ("parallactic_angles", chunk.parallactic_angles.len()),
        ] {
            if got != n_rows {
                return Err(EngineError::RaggedChunk {
                    what,
                    expected: n_rows,
                    got,
                });
            }
        }
        if chunk.flags.dim() != chunk.data.dim() || chunk.weights.dim() != chunk.data.dim() {
            return Err(EngineError::DataShape {
                got_pols: chunk.n_pols(),
                got_chans: chunk.n_chans(),
                n_pols: self.params.n_pols,
                n_chans: self.params.n_chans(),
            });
        }
        Ok(())
    }
}
