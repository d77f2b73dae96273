/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The relocation phase shared by the cross-mesh strategies.
//!
//! Process pairing is index-by-index: the process at flat rank `i` of
//! the source mesh hands its local buffer to the process at flat rank
//! `i` of the target mesh. Coincident pairs move nothing. Every send is
//! posted before any receive is drained, so a process playing both
//! roles never blocks on itself.

use std::collections::BTreeSet;

use ndmesh::ProcId;
use tracing::trace;

use crate::attr::DistAttr;
use crate::buffer::Buffer;
use crate::comm::CommError;
use crate::error::ReshardError;
use crate::funcs::ReshardContext;
use crate::funcs::ReshardFunction;
use crate::tensor::DistTensor;

// A pairing the communication layer cannot resolve is a relocation
// failure, not a generic transport fault.
fn relocation_err(err: CommError) -> ReshardError {
    match err {
        CommError::Unreachable(proc) => ReshardError::UnreachablePeer(proc),
        other => ReshardError::Comm(other),
    }
}

/// Relocates `input` from its source mesh onto the mesh of `dst`, then
/// applies `local_step` (the single-mesh counterpart of the calling
/// strategy) under the target mesh. With no `local_step` the relocated
/// tensor is relabeled to `dst` directly.
///
/// Processes outside the target mesh finish after their sends and
/// return an empty local buffer under the target descriptor.
pub(crate) fn relocate_then(
    ctx: &ReshardContext<'_>,
    input: DistTensor,
    dst: &DistAttr,
    local_step: Option<&dyn ReshardFunction>,
) -> Result<DistTensor, ReshardError> {
    let dtype = input.dtype();
    let src_attr = input.attr().clone();
    let src_mesh = src_attr.mesh();
    let dst_mesh = dst.mesh();

    // A process present in both meshes would have to take a source
    // role and a target role with no defined precedence unless the
    // process sets coincide entirely; reject rather than guess.
    let src_set: BTreeSet<ProcId> = src_mesh.procs().iter().copied().collect();
    let dst_set: BTreeSet<ProcId> = dst_mesh.procs().iter().copied().collect();
    let shared: Vec<ProcId> = src_set.intersection(&dst_set).copied().collect();
    if !shared.is_empty() && src_set != dst_set {
        return Err(ReshardError::PartialOverlapUnsupported { procs: shared });
    }

    if src_mesh.len() != dst_mesh.len() {
        return Err(ReshardError::ShapeMismatch(format!(
            "cannot pair source mesh {} with target mesh {}",
            src_mesh, dst_mesh
        )));
    }

    let me = ctx.proc();
    let (local, global, _) = input.into_parts();

    if let Some(rank) = src_mesh.rank_of(me) {
        let peer = dst_mesh.procs()[rank];
        if peer != me {
            trace!(src = me, dst = peer, rank, "relocating shard");
            ctx.comm()
                .send(local.clone(), peer)
                .map_err(relocation_err)?;
        }
    }

    let Some(rank) = dst_mesh.rank_of(me) else {
        // Source-only process: its contribution is on the wire, it
        // holds nothing under the target mesh.
        return DistTensor::new(Buffer::empty(dtype), global, dst.clone());
    };
    let peer = src_mesh.procs()[rank];
    let moved = if peer == me {
        local
    } else {
        ctx.comm().recv(peer).map_err(relocation_err)?
    };

    // The data now lives under the target mesh, still with the source
    // placement.
    let moved_attr = DistAttr::new(
        dst_mesh.clone(),
        src_attr.dims_mapping().to_vec(),
        src_attr.partial_dims().iter().copied(),
    );
    let moved = DistTensor::new(moved, global, moved_attr)?;

    match local_step {
        Some(func) => func.eval(ctx, moved, dst),
        None => Ok(moved.with_attr(dst.clone())),
    }
}
