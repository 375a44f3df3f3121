// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use hifitime::Epoch;
use marlu::{c64, UVW};
use ndarray::prelude::*;

use super::*;
use crate::chunk::ChunkSourceError;
use crate::constants::VEL_C;
use crate::kernel::{ConvolutionKernel, KernelError, PillboxKernelFactory};
use crate::resample::ConvolutionalResampler;
use crate::sensitivity::{SensitivityError, WidebandSensitivityBuilder};

/// A 32x32 grid with one pixel per wavelength, observed at a frequency of
/// one wavelength per metre, so uvw coordinates in metres are grid-pixel
/// offsets from the centre.
fn test_params() -> GridderParams {
    GridderParams::new(32, 32, 1.0 / 32.0, vec![VEL_C], 1, "term0")
}

fn test_engine(support: usize) -> GriddingEngine {
    GriddingEngine::new(
        test_params(),
        Box::new(PillboxKernelFactory { support }),
        Box::new(ConvolutionalResampler),
        Box::new(WidebandSensitivityBuilder::default()),
    )
    .unwrap()
}

/// A single-pol, single-chan chunk with unit weights and nothing flagged.
fn test_chunk(uvws: &[(f64, f64)], values: &[c64]) -> VisChunk {
    let n = uvws.len();
    VisChunk {
        ant1: vec![0; n],
        ant2: vec![1; n],
        times: vec![Epoch::from_gpst_seconds(1090008640.0); n],
        uvws: uvws.iter().map(|&(u, v)| UVW { u, v, w: 0.0 }).collect(),
        parallactic_angles: vec![0.0; n],
        pointing_offsets: vec![],
        freqs_hz: vec![VEL_C],
        data: Array3::from_shape_fn((n, 1, 1), |(r, _, _)| values[r]),
        flags: Array3::from_elem((n, 1, 1), false),
        weights: Array3::ones((n, 1, 1)),
    }
}

#[test]
fn operations_out_of_sequence_are_rejected() {
    let mut engine = test_engine(1);
    let chunk = test_chunk(&[(0.0, 0.0)], &[c64::new(1.0, 0.0)]);
    let mut model = Array3::zeros((1, 1, 1));

    assert!(matches!(
        engine.grid_one_chunk(&chunk),
        Err(EngineError::Sequence { op: "grid_one_chunk", .. })
    ));
    assert!(matches!(
        engine.finalize_to_sky(),
        Err(EngineError::Sequence { op: "finalize_to_sky", .. })
    ));
    assert!(matches!(
        engine.get_image(false),
        Err(EngineError::Sequence { op: "get_image", .. })
    ));
    assert!(matches!(
        engine.degrid_one_chunk(&chunk, &mut model),
        Err(EngineError::Sequence { op: "degrid_one_chunk", .. })
    ));

    engine.initialize_to_sky().unwrap();
    assert_eq!(engine.state(), EngineState::Accumulating);
    assert!(matches!(
        engine.initialize_to_sky(),
        Err(EngineError::Sequence { op: "initialize_to_sky", .. })
    ));
    assert!(matches!(
        engine.get_image(false),
        Err(EngineError::Sequence { op: "get_image", .. })
    ));

    engine.grid_one_chunk(&chunk).unwrap();
    engine.finalize_to_sky().unwrap();
    assert_eq!(engine.state(), EngineState::GridReady);

    // A finished cycle can seed a new one.
    engine.initialize_to_sky().unwrap();
    assert_eq!(engine.state(), EngineState::Accumulating);
}

#[test]
fn malformed_chunks_abort_the_cycle() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();

    // Two channels against a single-channel engine.
    let mut chunk = test_chunk(&[(0.0, 0.0)], &[c64::new(1.0, 0.0)]);
    chunk.freqs_hz = vec![VEL_C, VEL_C * 1.01];
    chunk.data = Array3::zeros((1, 1, 2));
    chunk.flags = Array3::from_elem((1, 1, 2), false);
    chunk.weights = Array3::ones((1, 1, 2));
    assert!(matches!(
        engine.grid_one_chunk(&chunk),
        Err(EngineError::DataShape { got_chans: 2, .. })
    ));
    assert_eq!(engine.state(), EngineState::Idle);

    engine.initialize_to_sky().unwrap();
    let mut chunk = test_chunk(&[(0.0, 0.0)], &[c64::new(1.0, 0.0)]);
    chunk.uvws.clear();
    assert!(matches!(
        engine.grid_one_chunk(&chunk),
        Err(EngineError::RaggedChunk { what: "uvws", .. })
    ));
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn sensitivity_pattern_peaks_at_unity_and_is_non_negative() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    let chunk = test_chunk(
        &[(3.0, 0.0), (-5.0, 2.0)],
        &[c64::new(1.0, 0.5), c64::new(-0.5, 1.0)],
    );
    engine.grid_one_chunk(&chunk).unwrap();
    engine.finalize_to_sky().unwrap();

    let pattern = engine.sensitivity_image("term0").unwrap();
    assert_eq!(pattern.dim(), (1, 1, 32, 32));
    assert_abs_diff_eq!(pattern[(0, 0, 16, 16)], 1.0, epsilon = 1e-9);
    for &value in pattern.iter() {
        assert!(value >= 0.0);
        assert!(value <= 1.0 + 1e-9);
    }
}

struct CountingBuilder {
    calls: Arc<AtomicUsize>,
    inner: WidebandSensitivityBuilder,
}

impl SensitivityImageBuilder for CountingBuilder {
    fn build(
        &self,
        weight_grid: &VisGrid,
        sum_cf_weight: &Array2<f64>,
    ) -> Result<SensitivityImage, SensitivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.build(weight_grid, sum_cf_weight)
    }
}

#[test]
fn sensitivity_is_built_once_and_reused_across_cycles() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = GriddingEngine::new(
        test_params(),
        Box::new(PillboxKernelFactory { support: 1 }),
        Box::new(ConvolutionalResampler),
        Box::new(CountingBuilder {
            calls: Arc::clone(&calls),
            inner: WidebandSensitivityBuilder::default(),
        }),
    )
    .unwrap();

    let chunk = test_chunk(&[(2.0, -3.0)], &[c64::new(1.0, 0.0)]);
    for _ in 0..2 {
        engine.initialize_to_sky().unwrap();
        engine.grid_one_chunk(&chunk).unwrap();
        engine.finalize_to_sky().unwrap();
        engine.get_image(true).unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn repeated_image_requests_are_bit_identical() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    let chunk = test_chunk(
        &[(4.0, 1.0), (-2.0, 6.0)],
        &[c64::new(0.7, -0.3), c64::new(1.2, 0.8)],
    );
    engine.grid_one_chunk(&chunk).unwrap();
    engine.finalize_to_sky().unwrap();

    let first = engine.get_image(true).unwrap();
    let second = engine.get_image(true).unwrap();
    assert_eq!(first, second);

    let raw_first = engine.get_image(false).unwrap();
    let raw_second = engine.get_image(false).unwrap();
    assert_eq!(raw_first, raw_second);
}

#[test]
fn normalised_image_recovers_flux_and_blanks_low_sensitivity_pixels() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    // A single unit-weight sample at the zero spacing: a flat sky of this
    // amplitude.
    let value = c64::new(2.0, -1.0);
    engine
        .grid_one_chunk(&test_chunk(&[(0.0, 0.0)], &[value]))
        .unwrap();
    engine.finalize_to_sky().unwrap();

    assert_abs_diff_eq!(engine.sum_of_weights()[(0, 0)], 1.0, epsilon = 1e-12);

    let image = engine.get_image(true).unwrap();
    let pattern = engine.sensitivity_image("term0").unwrap();

    // The pattern is exactly 1 at the image centre, so the centre pixel is
    // the (sum-of-weights normalised) visibility amplitude.
    assert_abs_diff_eq!(image[(0, 0, 16, 16)].re, value.re, epsilon = 1e-9);
    assert_abs_diff_eq!(image[(0, 0, 16, 16)].im, value.im, epsilon = 1e-9);

    // Pixels below the sensitivity floor are blanked outright.
    let pb_limit = engine.params().pb_limit;
    for ((idx, &pb), &pixel) in pattern.indexed_iter().zip(image.iter()) {
        if pb < pb_limit {
            assert_eq!(pixel, c64::new(0.0, 0.0), "pixel {idx:?} should be blanked");
        }
    }
}

/// A 3x3 boxcar with unit energy (not unit integral), so the total energy
/// deposited on the grid equals the energy of the input samples.
struct UnitEnergyBoxcarFactory;

impl KernelFactory for UnitEnergyBoxcarFactory {
    fn reference_kernel(
        &self,
        _chan: usize,
        _pol: usize,
        _freq_hz: f64,
        angle: f64,
    ) -> Result<ConvolutionKernel, KernelError> {
        ConvolutionKernel::new(
            Array2::from_elem((3, 3), c64::new(1.0 / 3.0, 0.0)),
            1,
            angle,
        )
    }
}

#[test]
fn unnormalised_image_conserves_energy() {
    let mut engine = GriddingEngine::new(
        test_params(),
        Box::new(UnitEnergyBoxcarFactory),
        Box::new(ConvolutionalResampler),
        Box::new(WidebandSensitivityBuilder::default()),
    )
    .unwrap();

    // Support windows placed so none of them overlap.
    let chunks = [
        test_chunk(
            &[(6.0, 0.0), (-6.0, 0.0), (0.0, 6.0), (0.0, -6.0)],
            &[
                c64::new(1.0, 0.0),
                c64::new(0.0, 2.0),
                c64::new(-1.5, 0.5),
                c64::new(0.3, -0.7),
            ],
        ),
        test_chunk(
            &[(12.0, 0.0), (-12.0, 0.0), (0.0, 12.0), (0.0, -12.0)],
            &[
                c64::new(2.0, 1.0),
                c64::new(-0.4, -0.9),
                c64::new(1.1, 0.0),
                c64::new(0.0, -1.3),
            ],
        ),
    ];
    let data_energy: f64 = chunks
        .iter()
        .flat_map(|c| c.data.iter())
        .map(|v| v.norm_sqr())
        .sum();

    engine.initialize_to_sky().unwrap();
    for chunk in &chunks {
        engine.grid_one_chunk(chunk).unwrap();
    }
    engine.finalize_to_sky().unwrap();

    let image = engine.get_image(false).unwrap();
    let image_energy: f64 = image.iter().map(|v| v.norm_sqr()).sum();
    assert_abs_diff_eq!(image_energy, data_energy, epsilon = 0.01 * data_energy);
}

#[test]
fn all_zero_weights_cannot_build_a_sensitivity_pattern() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    let mut chunk = test_chunk(&[(0.0, 0.0)], &[c64::new(1.0, 0.0)]);
    chunk.flags.fill(true);
    engine.grid_one_chunk(&chunk).unwrap();

    let result = engine.finalize_to_sky();
    assert!(matches!(
        result,
        Err(EngineError::Sensitivity {
            source: SensitivityError::DivideByZeroWeight,
            ..
        })
    ));
    // The failed cycle is discarded, and nothing was cached.
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.sensitivity_image("term0").is_none());
}

#[test]
fn grid_allocations_are_reused_and_cleared_between_cycles() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    engine
        .grid_one_chunk(&test_chunk(&[(2.0, 0.0)], &[c64::new(1.0, 0.0)]))
        .unwrap();
    engine.finalize_to_sky().unwrap();

    // The second cycle reuses the first cycle's grid allocation; gridding
    // nothing must yield an empty image, not a stale one.
    engine.initialize_to_sky().unwrap();
    engine.finalize_to_sky().unwrap();
    let image = engine.get_image(false).unwrap();
    assert!(image.iter().all(|v| v.norm() == 0.0));
}

#[test]
fn unnormalised_images_do_not_need_a_sensitivity_pattern() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    engine
        .grid_one_chunk(&test_chunk(&[(1.0, 0.0)], &[c64::new(1.0, 0.0)]))
        .unwrap();
    engine.finalize_to_sky().unwrap();

    engine.reset_cache().unwrap();
    assert!(engine.sensitivity_image("term0").is_none());

    // The unitary transform has no use for the pattern, but flattening
    // cannot proceed without one.
    engine.get_image(false).unwrap();
    assert!(matches!(
        engine.get_image(true),
        Err(EngineError::SensitivityMissing { .. })
    ));
}

struct VecSource(Vec<VisChunk>);

impl ChunkSource for VecSource {
    fn next_chunk(&mut self) -> Result<Option<VisChunk>, ChunkSourceError> {
        Ok(if self.0.is_empty() {
            None
        } else {
            Some(self.0.remove(0))
        })
    }
}

#[test]
fn grid_all_drains_a_chunk_source() {
    let mut engine = test_engine(0);
    engine.initialize_to_sky().unwrap();
    let mut source = VecSource(vec![
        test_chunk(&[(1.0, 0.0)], &[c64::new(1.0, 0.0)]),
        test_chunk(&[(2.0, 0.0)], &[c64::new(1.0, 0.0)]),
    ]);
    engine.grid_all(&mut source).unwrap();
    engine.finalize_to_sky().unwrap();

    assert_abs_diff_eq!(engine.sum_of_weights()[(0, 0)], 2.0, epsilon = 1e-12);
}

#[test]
fn degridding_a_flat_image_predicts_only_the_zero_spacing() {
    let mut engine = test_engine(0);
    let constant = c64::new(3.0, 0.0);
    let model_image = Array4::from_elem((1, 1, 32, 32), constant);
    engine.initialize_to_vis(&model_image).unwrap();
    assert_eq!(engine.state(), EngineState::Predicting);

    // A flat sky has power only at the zero spacing.
    let chunk = test_chunk(
        &[(0.0, 0.0), (5.0, 0.0)],
        &[c64::new(0.0, 0.0), c64::new(0.0, 0.0)],
    );
    let mut model = Array3::zeros((2, 1, 1));
    engine.degrid_one_chunk(&chunk, &mut model).unwrap();

    assert_abs_diff_eq!(model[(0, 0, 0)].re, constant.re, epsilon = 1e-9);
    assert_abs_diff_eq!(model[(0, 0, 0)].im, 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(model[(1, 0, 0)].norm(), 0.0, epsilon = 1e-9);

    engine.finalize_to_vis().unwrap();
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn model_image_shape_is_checked() {
    let mut engine = test_engine(0);
    let wrong = Array4::zeros((1, 1, 16, 16));
    assert!(matches!(
        engine.initialize_to_vis(&wrong),
        Err(EngineError::DataShape { .. })
    ));
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn cache_reset_is_only_legal_between_cycles() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    assert!(matches!(
        engine.reset_cache(),
        Err(EngineError::Sequence { op: "reset_cache", .. })
    ));

    engine.discard_cycle();
    assert_eq!(engine.state(), EngineState::Idle);
    engine.reset_cache().unwrap();
}

#[test]
fn cache_axes_must_match_the_parameters() {
    let cache = crate::kernel::KernelCache::new(
        Box::new(PillboxKernelFactory { support: 1 }),
        vec![VEL_C],
        2,
    );
    let result = GriddingEngine::with_cache(
        test_params(),
        cache,
        Box::new(ConvolutionalResampler),
        Box::new(WidebandSensitivityBuilder::default()),
    );
    assert!(matches!(result, Err(EngineError::CacheAxesMismatch)));
}

#[test]
fn a_recovered_cache_carries_the_sensitivity_pattern() {
    let mut engine = test_engine(1);
    engine.initialize_to_sky().unwrap();
    engine
        .grid_one_chunk(&test_chunk(&[(1.0, 1.0)], &[c64::new(1.0, 0.0)]))
        .unwrap();
    engine.finalize_to_sky().unwrap();

    let cache = engine.into_cache();
    assert!(cache.load_average_pb("term0").is_some());

    let engine = GriddingEngine::with_cache(
        test_params(),
        cache,
        Box::new(ConvolutionalResampler),
        Box::new(WidebandSensitivityBuilder::default()),
    )
    .unwrap();
    assert!(engine.sensitivity_image("term0").is_some());
}
