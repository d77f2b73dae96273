/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Partial→Replicated.
//!
//! Every process holds a partial contribution; summing across each
//! partial mesh dimension leaves every process with the fully reduced
//! logical value. Partial dimensions are reduced in ascending mesh-axis
//! order, so the result is deterministic for a fixed topology. The
//! tensor's shape is unchanged.

use tracing::trace;

use crate::attr::DistAttr;
use crate::error::ReshardError;
use crate::funcs::ReshardContext;
use crate::funcs::ReshardFunction;
use crate::funcs::collective_err;
use crate::funcs::cross_mesh::relocate_then;
use crate::funcs::well_formed_transition;
use crate::tensor::DistTensor;

/// Resolves pending partial sums on a single mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct PToRReshard;

impl ReshardFunction for PToRReshard {
    fn name(&self) -> &'static str {
        "p_to_r"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        well_formed_transition(src, dst)
            && src.mesh() == dst.mesh()
            && src.is_partial()
            && !dst.is_partial()
            && src.dims_mapping() == dst.dims_mapping()
    }

    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        let (mut local, global, attr) = input.into_parts();
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

        // BTreeSet iteration is ascending, which fixes the reduction
        // order across partial dimensions.
        for &dim in attr.partial_dims() {
            let group = mesh.group_along(dim, &coord)?;
            if group.len() <= 1 {
                continue;
            }
            trace!(mesh_dim = dim, group_size = group.len(), "reducing partials");
            local = ctx
                .comm()
                .all_reduce_sum(local, &group)
                .map_err(collective_err)?;
        }

        DistTensor::new(local, global, dst.clone())
    }
}

/// Resolves pending partial sums while relocating onto a different
/// mesh: point-to-point relocation by matching flat mesh coordinates,
/// then the single-mesh reduction under the target mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct PToRReshardCrossMesh;

impl ReshardFunction for PToRReshardCrossMesh {
    fn name(&self) -> &'static str {
        "p_to_r_cross_mesh"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        well_formed_transition(src, dst)
            && src.mesh() != dst.mesh()
            && src.mesh().sizes() == dst.mesh().sizes()
            && src.is_partial()
            && !dst.is_partial()
            && src.dims_mapping() == dst.dims_mapping()
    }

    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        relocate_then(ctx, input, dst, Some(&PToRReshard))
    }
}
