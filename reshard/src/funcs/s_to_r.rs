/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Sharded→Replicated.
//!
//! Gathers every per-process slice along the mesh dimension being
//! removed and concatenates them along the corresponding tensor axis in
//! ascending mesh-coordinate order — exactly inverting the slicing that
//! produced the shards, so the result is reproducible regardless of
//! which process initiates gathering.

use tracing::trace;

use crate::attr::AxisSharding;
use crate::attr::DistAttr;
use crate::buffer::Buffer;
use crate::error::ReshardError;
use crate::funcs::ReshardContext;
use crate::funcs::ReshardFunction;
use crate::funcs::collective_err;
use crate::funcs::cross_mesh::relocate_then;
use crate::funcs::single_axis_change;
use crate::funcs::well_formed_transition;
use crate::tensor::DistTensor;

// Whether the only placement change is one tensor axis going from
// sharded to replicated.
fn removes_one_shard(src: &DistAttr, dst: &DistAttr) -> bool {
    !src.is_partial()
        && !dst.is_partial()
        && matches!(
            single_axis_change(src, dst),
            Some((_, AxisSharding::Shard(_), AxisSharding::Replicate))
        )
}

/// Rebuilds the full tensor from its shards along one mesh dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct SToRReshard;

impl ReshardFunction for SToRReshard {
    fn name(&self) -> &'static str {
        "s_to_r"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        well_formed_transition(src, dst)
            && src.mesh() == dst.mesh()
            && removes_one_shard(src, dst)
    }

    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        let (local, global, attr) = input.into_parts();
        let (axis, dim) = match single_axis_change(&attr, dst) {
            Some((axis, AxisSharding::Shard(dim), AxisSharding::Replicate)) => (axis, dim),
            _ => {
                return Err(ReshardError::NoSuitableReshardStrategy {
                    src: Box::new(attr),
                    dst: Box::new(dst.clone()),
                });
            }
        };
        let mesh = attr.mesh();
        let coord = ctx.coord_in(mesh)?;

        let expected = attr.local_shape(&global, &coord)?;
        if expected.as_slice() != local.sizes() {
            return Err(ReshardError::ShapeMismatch(format!(
                "local buffer {:?} does not match placement-implied shape {:?}",
                local.sizes(),
                expected
            )));
        }

        let group = mesh.group_along(dim, &coord)?;
        trace!(axis, mesh_dim = dim, group_size = group.len(), "gathering shards");
        let parts = if group.len() > 1 {
            ctx.comm()
                .all_gather(local, &group)
                .map_err(collective_err)?
        } else {
            vec![local]
        };

        let full = Buffer::concat(&parts, axis)?;
        if full.sizes()[axis] != global[axis] {
            return Err(ReshardError::ShapeMismatch(format!(
                "gathered extent {} does not rebuild axis {} of length {}",
                full.sizes()[axis],
                axis,
                global[axis]
            )));
        }
        DistTensor::new(full, global, dst.clone())
    }
}

/// Rebuilds the full tensor while relocating onto a different mesh:
/// relocation by matching flat mesh coordinates, then the gather under
/// the target mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct SToRReshardCrossMesh;

impl ReshardFunction for SToRReshardCrossMesh {
    fn name(&self) -> &'static str {
        "s_to_r_cross_mesh"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        well_formed_transition(src, dst)
            && src.mesh() != dst.mesh()
            && src.mesh().sizes() == dst.mesh().sizes()
            && removes_one_shard(src, dst)
    }

    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        relocate_then(ctx, input, dst, Some(&SToRReshard))
    }
}
