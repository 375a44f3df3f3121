// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility-sample chunks and the contract with the data-access layer
//! that supplies them.

use hifitime::Epoch;
use marlu::{c64, UVW};
use ndarray::prelude::*;
use thiserror::Error;

use crate::resample::RowSample;

/// One chunk of calibrated visibility samples, as yielded by the external
/// data-access layer. Read-only to the engine for the duration of a cycle.
///
/// All per-row vectors have the same length as the row axis of `data`;
/// `data`, `flags` and `weights` share the shape `(row, pol, chan)`.
#[derive(Debug, Clone)]
pub struct VisChunk {
    /// The first antenna of each row's baseline.
    pub ant1: Vec<usize>,

    /// The second antenna of each row's baseline.
    pub ant2: Vec<usize>,

    /// The timestamp of each row.
    pub times: Vec<Epoch>,

    /// The uvw coordinate of each row \[metres\].
    pub uvws: Vec<UVW>,

    /// The sky-rotation (parallactic) angle of each row \[radians\]. The
    /// data layer owns the array location and astrometry needed to derive
    /// this from the timestamp.
    pub parallactic_angles: Vec<f64>,

    /// Per-antenna pointing offsets `(l, m)` \[radians\], indexed by
    /// antenna number. May be empty when no pointing corrections apply.
    pub pointing_offsets: Vec<[f64; 2]>,

    /// The sky frequency of each channel \[Hz\].
    pub freqs_hz: Vec<f64>,

    /// Complex visibility values, `(row, pol, chan)`.
    pub data: Array3<c64>,

    /// Flags; `true` means the corresponding sample does not contribute.
    pub flags: Array3<bool>,

    /// Sample weights.
    pub weights: Array3<f64>,
}

impl VisChunk {
    pub fn n_rows(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_pols(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn n_chans(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// The pointing offset applying to a row: the mean of its two
    /// antennas' offsets, or zero when no offsets were supplied.
    pub(crate) fn pointing_for_row(&self, row: usize) -> [f64; 2] {
        match (
            self.pointing_offsets.get(self.ant1[row]),
            self.pointing_offsets.get(self.ant2[row]),
        ) {
            (Some(a), Some(b)) => [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0],
            _ => [0.0, 0.0],
        }
    }

    pub(crate) fn row_sample(&self, row: usize) -> RowSample {
        RowSample {
            uvw: self.uvws[row],
            pointing: self.pointing_for_row(row),
            data: self.data.index_axis(Axis(0), row),
            flags: self.flags.index_axis(Axis(0), row),
            weights: self.weights.index_axis(Axis(0), row),
        }
    }
}

/// The contract with the external visibility store: iterate a table-like
/// store and yield per-chunk sample buffers. Blocking behaviour is the
/// supplier's own responsibility; the engine never retries.
pub trait ChunkSource {
    /// Yield the next chunk, or `None` when the store is exhausted.
    fn next_chunk(&mut self) -> Result<Option<VisChunk>, ChunkSourceError>;
}

/// An error from the external chunk supplier.
#[derive(Error, Debug)]
#[error("visibility chunk supplier error: {0}")]
pub struct ChunkSourceError(#[source] pub Box<dyn std::error::Error + Send + Sync>);
