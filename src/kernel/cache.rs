// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The process-wide cache of reference kernels and sensitivity patterns.

use indexmap::IndexMap;
use log::{debug, trace};

use super::{ConvolutionKernel, KernelError, KernelFactory, KernelRotator};
use crate::sensitivity::SensitivityImage;

/// The lifecycle of a qualifier's cached sensitivity pattern.
#[derive(Debug, Default)]
pub enum PatternState {
    /// Nothing accumulated yet.
    #[default]
    Empty,

    /// Weight-grid accumulation is under way this cycle.
    Building,

    /// Built and cached for the lifetime of the cache.
    Ready(SensitivityImage),
}

static EMPTY_PATTERN: PatternState = PatternState::Empty;

/// Stores reference-angle aperture kernels per (channel, polarisation) and
/// the cached sensitivity image per pattern qualifier.
///
/// Reference kernels are synthesised lazily through the injected
/// [`KernelFactory`]; their rotated copies are refreshed only when the
/// requested angle differs from the copy's tag by more than the tolerance.
pub struct KernelCache {
    factory: Box<dyn KernelFactory>,
    rotator: KernelRotator,
    freqs_hz: Vec<f64>,
    n_pols: usize,

    /// Channel-major: `kernels[chan * n_pols + pol]`.
    kernels: Vec<Option<ConvolutionKernel>>,

    patterns: IndexMap<String, PatternState>,
}

impl KernelCache {
    pub fn new(factory: Box<dyn KernelFactory>, freqs_hz: Vec<f64>, n_pols: usize) -> KernelCache {
        let n_kernels = freqs_hz.len() * n_pols;
        KernelCache {
            factory,
            rotator: KernelRotator,
            freqs_hz,
            n_pols,
            kernels: (0..n_kernels).map(|_| None).collect(),
            patterns: IndexMap::new(),
        }
    }

    pub fn n_chans(&self) -> usize {
        self.freqs_hz.len()
    }

    pub fn n_pols(&self) -> usize {
        self.n_pols
    }

    /// Look up the kernel for `(chan, pol)`, synthesising the reference
    /// through the factory if absent, and re-rotating the cached copy if
    /// its angle tag differs from `angle` by more than `tolerance`.
    pub fn get_or_build(
        &mut self,
        chan: usize,
        pol: usize,
        angle: f64,
        tolerance: f64,
    ) -> Result<&ConvolutionKernel, KernelError> {
        if chan >= self.n_chans() || pol >= self.n_pols {
            return Err(KernelError::Unavailable {
                chan,
                pol,
                reason: format!(
                    "outside the configured axes ({} chans, {} pols)",
                    self.n_chans(),
                    self.n_pols
                ),
            });
        }

        let idx = chan * self.n_pols + pol;
        if self.kernels[idx].is_none() {
            debug!("Synthesising reference kernel for chan {chan}, pol {pol} at {angle:.6} rad");
            let kernel = self
                .factory
                .reference_kernel(chan, pol, self.freqs_hz[chan], angle)?;
            self.kernels[idx] = Some(kernel);
        }

        let rotator = self.rotator;
        if let Some(kernel) = self.kernels[idx].as_mut() {
            if (kernel.angle() - angle).abs() > tolerance {
                trace!(
                    "Rotating kernel (chan {chan}, pol {pol}) from {:.6} to {angle:.6} rad",
                    kernel.angle()
                );
                rotator.rotate_to(kernel, angle);
            }
        }
        self.kernels[idx].as_ref().ok_or(KernelError::Unavailable {
            chan,
            pol,
            reason: "kernel synthesis yielded nothing".to_string(),
        })
    }

    /// Bring every (channel, polarisation) kernel up to date for `angle`.
    pub(crate) fn ensure_rotation(&mut self, angle: f64, tolerance: f64) -> Result<(), KernelError> {
        for chan in 0..self.n_chans() {
            for pol in 0..self.n_pols {
                self.get_or_build(chan, pol, angle, tolerance)?;
            }
        }
        Ok(())
    }

    /// A read-only view of the cached kernels for the resampling loops.
    pub(crate) fn kernels(&self) -> KernelSet {
        KernelSet {
            kernels: &self.kernels,
            n_pols: self.n_pols,
        }
    }

    /// The cached sensitivity image for a qualifier; `None` is the
    /// NOT_CACHED sentinel.
    pub fn load_average_pb(&self, qualifier: &str) -> Option<&SensitivityImage> {
        match self.patterns.get(qualifier) {
            Some(PatternState::Ready(image)) => Some(image),
            _ => None,
        }
    }

    pub fn pattern_state(&self, qualifier: &str) -> &PatternState {
        self.patterns.get(qualifier).unwrap_or(&EMPTY_PATTERN)
    }

    /// Mark a qualifier's pattern as accumulating this cycle.
    pub(crate) fn begin_pattern(&mut self, qualifier: &str) {
        let state = self.patterns.entry(qualifier.to_string()).or_default();
        if !matches!(state, PatternState::Ready(_)) {
            *state = PatternState::Building;
        }
    }

    /// Persist a built sensitivity image for a qualifier.
    pub fn flush(&mut self, qualifier: &str, image: SensitivityImage) {
        debug!("Caching sensitivity pattern for qualifier {qualifier:?}");
        self.patterns
            .insert(qualifier.to_string(), PatternState::Ready(image));
    }

    /// Roll an accumulating pattern back to empty when its cycle is
    /// abandoned.
    pub(crate) fn abandon_pattern(&mut self, qualifier: &str) {
        if let Some(state) = self.patterns.get_mut(qualifier) {
            if matches!(state, PatternState::Building) {
                *state = PatternState::Empty;
            }
        }
    }

    /// Drop all cached kernels and sensitivity patterns. Only legal between
    /// gridding cycles; the engine enforces this.
    pub(crate) fn clear(&mut self) {
        self.kernels.iter_mut().for_each(|k| *k = None);
        self.patterns.clear();
    }
}

/// Read-only access to the cached kernels, indexed by (channel,
/// polarisation).
#[derive(Clone, Copy)]
pub struct KernelSet<'a> {
    kernels: &'a [Option<ConvolutionKernel>],
    n_pols: usize,
}

impl KernelSet<'_> {
    pub fn get(&self, chan: usize, pol: usize) -> Option<&ConvolutionKernel> {
        self.kernels.get(chan * self.n_pols + pol)?.as_ref()
    }
}
