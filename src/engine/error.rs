// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with the gridding engine.

use thiserror::Error;

use super::EngineState;
use crate::chunk::ChunkSourceError;
use crate::kernel::KernelError;
use crate::params::ParamsError;
use crate::resample::ResampleError;
use crate::sensitivity::SensitivityError;

#[derive(Error, Debug)]
pub enum EngineError {
    /// An operation was invoked in the wrong state-machine state.
    #[error("{op} is not valid while the engine is {state:?}")]
    Sequence { op: &'static str, state: EngineState },

    /// A chunk's (pol, chan) axes don't match the active grid.
    #[error(
        "Chunk axes ({got_pols} pols, {got_chans} chans) don't match the \
         active grid ({n_pols} pols, {n_chans} chans)"
    )]
    DataShape {
        got_pols: usize,
        got_chans: usize,
        n_pols: usize,
        n_chans: usize,
    },

    /// A chunk's per-row vectors disagree with its row axis.
    #[error("Chunk {what} has length {got}, but the chunk has {expected} rows")]
    RaggedChunk {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("The kernel cache axes don't match the engine parameters")]
    CacheAxesMismatch,

    #[error("No sensitivity pattern is cached or accumulating for qualifier {qualifier:?}")]
    SensitivityMissing { qualifier: String },

    #[error("While gridding for qualifier {qualifier:?}: {source}")]
    Kernel {
        qualifier: String,
        source: KernelError,
    },

    #[error("While resampling for qualifier {qualifier:?}: {source}")]
    Resample {
        qualifier: String,
        source: ResampleError,
    },

    #[error("While building the sensitivity pattern for qualifier {qualifier:?}: {source}")]
    Sensitivity {
        qualifier: String,
        source: SensitivityError,
    },

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    ChunkSource(#[from] ChunkSourceError),
}
