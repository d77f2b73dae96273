/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The communication layer consumed by reshard strategies.
//!
//! [`Communicator`] is the capability set the engine assumes: collective
//! sum-reduction and gather over an ordered process group, and
//! point-to-point send/recv. Calls are blocking and SPMD — every member
//! of a group must make the matching call; mismatched participation is
//! a caller contract violation the layer does not detect. Cancellation,
//! timeout, and retry policy belong to implementations of this trait,
//! never to the engine, which treats any [`CommError`] as fatal to the
//! current reshard call.

pub mod sim;

use std::time::Duration;

use ndmesh::ProcId;

use crate::buffer::Buffer;
use crate::buffer::BufferError;
use crate::buffer::DType;

/// Errors surfaced by the communication layer.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CommError {
    /// No channel exists to the addressed process.
    #[error("unreachable peer: {0}")]
    Unreachable(ProcId),

    /// The caller is not a member of the group it passed to a
    /// collective.
    #[error("caller {0} is not a member of the collective group")]
    NotInGroup(ProcId),

    /// A blocking receive elapsed.
    #[error("timeout after {} ms waiting for {}", .0.as_millis(), .1)]
    Timeout(Duration, ProcId),

    /// Peers contributed inconsistently-shaped buffers to a
    /// collective.
    #[error("collective shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Peers contributed buffers of different element types to a
    /// collective.
    #[error("collective dtype mismatch: {lhs} vs {rhs}")]
    DTypeMismatch {
        /// This process's element type.
        lhs: DType,
        /// The disagreeing peer's element type.
        rhs: DType,
    },

    /// The channel to a peer was closed.
    #[error("channel closed by peer {0}")]
    Closed(ProcId),
}

impl From<BufferError> for CommError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::DTypeMismatch { lhs, rhs } => CommError::DTypeMismatch { lhs, rhs },
            other => CommError::ShapeMismatch(other.to_string()),
        }
    }
}

/// One process's handle onto the communication layer.
///
/// Groups are ordered ascending by mesh coordinate (as produced by
/// [`DeviceMesh::group_along`](ndmesh::DeviceMesh::group_along));
/// [`all_gather`](Communicator::all_gather) returns contributions in
/// group order and [`all_reduce_sum`](Communicator::all_reduce_sum)
/// accumulates in group order, so results are deterministic for a
/// fixed topology.
pub trait Communicator: Send + Sync {
    /// The process this handle belongs to.
    fn proc(&self) -> ProcId;

    /// Element-wise sum across `group`; every member ends up holding
    /// the fully reduced buffer. Reduction stays in the input dtype.
    fn all_reduce_sum(&self, buf: Buffer, group: &[ProcId]) -> Result<Buffer, CommError>;

    /// Gathers every member's buffer, returned in group order on every
    /// member.
    fn all_gather(&self, buf: Buffer, group: &[ProcId]) -> Result<Vec<Buffer>, CommError>;

    /// Posts a buffer to `dst`.
    fn send(&self, buf: Buffer, dst: ProcId) -> Result<(), CommError>;

    /// Blocks until a buffer arrives from `src`.
    fn recv(&self, src: ProcId) -> Result<Buffer, CommError>;
}
