/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The engine-level error taxonomy.
//!
//! Every variant is unrecoverable at the point of detection and is
//! surfaced directly to the caller; the engine performs no silent
//! fallback and never retries communication internally. The caller is
//! expected to treat any reshard failure as a compilation-time error
//! tied to the tensor and operator that required the transition.

use ndmesh::MeshError;
use ndmesh::ProcId;

use crate::attr::DistAttr;
use crate::buffer::BufferError;
use crate::comm::CommError;

/// Errors surfaced by [`Resharder::reshard`](crate::Resharder::reshard).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ReshardError {
    /// No registered strategy matches the requested transition.
    #[error("no suitable reshard strategy for transition {src} -> {dst}")]
    NoSuitableReshardStrategy {
        /// The source descriptor.
        src: Box<DistAttr>,
        /// The target descriptor.
        dst: Box<DistAttr>,
    },

    /// A local buffer's shape is inconsistent with the declared
    /// placement, or peers contributed inconsistent shapes to a
    /// collective.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A requested shard count cannot be applied to a tensor axis
    /// without producing an empty slice.
    #[error("cannot split axis of length {len} into {parts} non-empty slices")]
    UnshardableDimension {
        /// Length of the tensor axis being split.
        len: usize,
        /// Requested number of slices.
        parts: usize,
    },

    /// A cross-mesh relocation requires a process pairing the
    /// communication layer cannot resolve.
    #[error("unreachable peer: {0}")]
    UnreachablePeer(ProcId),

    /// Source and target meshes overlap partially, which would require
    /// a process to play two roles without a defined precedence.
    #[error("source and target meshes overlap partially (shared procs: {procs:?})")]
    PartialOverlapUnsupported {
        /// The processes present in both meshes.
        procs: Vec<ProcId>,
    },

    /// A mesh-level fault.
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// A communication-layer fault, propagated unmodified.
    #[error(transparent)]
    Comm(#[from] CommError),
}

// Buffer faults reaching the engine boundary are shape or dtype
// violations of the declared placement.
impl From<BufferError> for ReshardError {
    fn from(err: BufferError) -> Self {
        ReshardError::ShapeMismatch(err.to_string())
    }
}
