/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Replicated→Sharded.
//!
//! Every process already holds the full extent of the axis being
//! sharded, so the transition is a pure local slice — no communication.
//! The axis is split into contiguous, as-equal-as-possible slices, one
//! per coordinate of the mesh dimension being sharded onto, and each
//! process keeps the slice at its own coordinate.

use tracing::trace;

use crate::attr::AxisSharding;
use crate::attr::DistAttr;
use crate::attr::balanced_split;
use crate::attr::split_offsets;
use crate::error::ReshardError;
use crate::funcs::ReshardContext;
use crate::funcs::ReshardFunction;
use crate::funcs::cross_mesh::relocate_then;
use crate::funcs::single_axis_change;
use crate::funcs::well_formed_transition;
use crate::tensor::DistTensor;

// Whether the only placement change is one tensor axis going from
// replicated to sharded.
fn introduces_one_shard(src: &DistAttr, dst: &DistAttr) -> bool {
    !src.is_partial()
        && !dst.is_partial()
        && matches!(
            single_axis_change(src, dst),
            Some((_, AxisSharding::Replicate, AxisSharding::Shard(_)))
        )
}

/// Shards one replicated tensor axis onto a mesh dimension by local
/// slicing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RToSReshard;

impl ReshardFunction for RToSReshard {
    fn name(&self) -> &'static str {
        "r_to_s"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        well_formed_transition(src, dst)
            && src.mesh() == dst.mesh()
            && introduces_one_shard(src, dst)
    }

    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        let (local, global, attr) = input.into_parts();
        let (axis, dim) = match single_axis_change(&attr, dst) {
            Some((axis, AxisSharding::Replicate, AxisSharding::Shard(dim))) => (axis, dim),
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

        let parts = mesh.size(dim)?;
        let sizes = balanced_split(global[axis], parts)?;
        let offsets = split_offsets(&sizes);
        let index = coord[dim];
        trace!(
            axis,
            mesh_dim = dim,
            start = offsets[index],
            count = sizes[index],
            "slicing own shard"
        );
        let sliced = local.slice_axis(axis, offsets[index], sizes[index])?;
        DistTensor::new(sliced, global, dst.clone())
    }
}

/// Shards one replicated tensor axis while relocating onto a different
/// mesh: relocation by matching flat mesh coordinates, then the local
/// slice under the target mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct RToSReshardCrossMesh;

impl ReshardFunction for RToSReshardCrossMesh {
    fn name(&self) -> &'static str {
        "r_to_s_cross_mesh"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        well_formed_transition(src, dst)
            && src.mesh() != dst.mesh()
            && src.mesh().sizes() == dst.mesh().sizes()
            && introduces_one_shard(src, dst)
    }

    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        relocate_then(ctx, input, dst, Some(&RToSReshard))
    }
}
