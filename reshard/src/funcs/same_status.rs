/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Same-Status.
//!
//! The placement does not change. On identical descriptors this is the
//! identity — the input value is returned untouched, so downstream
//! compiler logic can always request a reshard without special-casing
//! "nothing to do". When the meshes differ but describe the same
//! process group with equivalent per-dimension groupings, the
//! descriptor is relabeled with no data movement. When the process
//! membership itself differs, the cross-mesh variant relocates each
//! process's buffer to its flat-coordinate counterpart.

use tracing::debug;

use crate::attr::AxisSharding;
use crate::attr::DistAttr;
use crate::error::ReshardError;
use crate::funcs::ReshardContext;
use crate::funcs::ReshardFunction;
use crate::funcs::cross_mesh::relocate_then;
use crate::funcs::well_formed_transition;
use crate::tensor::DistTensor;

// Whether two descriptors place identically on meshes that contain the
// same ordered process list: every axis and every partial reduction
// must induce the same process groupings under both meshes.
fn equivalent_relabel(src: &DistAttr, dst: &DistAttr) -> bool {
    let src_mesh = src.mesh();
    let dst_mesh = dst.mesh();
    if src_mesh.procs() != dst_mesh.procs() {
        return false;
    }
    for (a, b) in src.dims_mapping().iter().zip(dst.dims_mapping()) {
        match (a, b) {
            (AxisSharding::Replicate, AxisSharding::Replicate) => {}
            (AxisSharding::Shard(x), AxisSharding::Shard(y)) => {
                if src_mesh.groups_along(*x).ok() != dst_mesh.groups_along(*y).ok() {
                    return false;
                }
            }
            _ => return false,
        }
    }
    let mut src_groups: Vec<_> = src
        .partial_dims()
        .iter()
        .map(|&dim| src_mesh.groups_along(dim).ok())
        .collect();
    let mut dst_groups: Vec<_> = dst
        .partial_dims()
        .iter()
        .map(|&dim| dst_mesh.groups_along(dim).ok())
        .collect();
    src_groups.sort();
    dst_groups.sort();
    src_groups == dst_groups
}

/// The identity transition: identical descriptors, or a pure
/// relabeling between equivalent meshes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameStatusReshard;

impl ReshardFunction for SameStatusReshard {
    fn name(&self) -> &'static str {
        "same_status"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        if !well_formed_transition(src, dst) {
            return false;
        }
        src == dst || (src.mesh() != dst.mesh() && equivalent_relabel(src, dst))
    }

    fn eval(
        &self,
        _ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        if input.attr() == dst {
            // Provably a no-op; the one case where the input buffer is
            // reused.
            return Ok(input);
        }
        debug!(%dst, "relabeling onto equivalent mesh");
        Ok(input.with_attr(dst.clone()))
    }
}

/// Same placement, different process membership: pure relocation by
/// matching flat mesh coordinates, no local transformation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameStatusReshardCrossMesh;

impl ReshardFunction for SameStatusReshardCrossMesh {
    fn name(&self) -> &'static str {
        "same_status_cross_mesh"
    }

    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool {
        well_formed_transition(src, dst)
            && src.mesh() != dst.mesh()
            && src.mesh().sizes() == dst.mesh().sizes()
            && src.mesh().procs() != dst.mesh().procs()
            && src.dims_mapping() == dst.dims_mapping()
            && src.partial_dims() == dst.partial_dims()
    }

    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        relocate_then(ctx, input, dst, None)
    }
}

#[cfg(test)]
mod tests {
    use ndmesh::mesh;

    use super::*;

    #[test]
    fn test_equivalent_relabel_accepts_renamed_dims() {
        let src = DistAttr::replicated(mesh!(x = 2; [0, 1]), 1).shard(0, 0);
        let dst = DistAttr::replicated(mesh!(y = 2; [0, 1]), 1).shard(0, 0);
        assert!(equivalent_relabel(&src, &dst));
        assert!(SameStatusReshard.is_suitable(&src, &dst));
    }

    #[test]
    fn test_equivalent_relabel_rejects_regrouping() {
        // [4] and [2, 2] over the same procs group differently: one
        // shard group of four versus two shard groups of two.
        let src = DistAttr::replicated(mesh!(x = 4; [0, 1, 2, 3]), 1).shard(0, 0);
        let dst = DistAttr::replicated(mesh!(a = 2, b = 2; [0, 1, 2, 3]), 1).shard(0, 0);
        assert!(!equivalent_relabel(&src, &dst));
        assert!(!SameStatusReshard.is_suitable(&src, &dst));
    }

    #[test]
    fn test_equivalent_relabel_rejects_different_procs() {
        let src = DistAttr::replicated(mesh!(x = 2; [0, 1]), 1);
        let dst = DistAttr::replicated(mesh!(x = 2; [2, 3]), 1);
        assert!(!equivalent_relabel(&src, &dst));
        // This transition belongs to the cross-mesh variant instead.
        assert!(!SameStatusReshard.is_suitable(&src, &dst));
        assert!(SameStatusReshardCrossMesh.is_suitable(&src, &dst));
    }

    #[test]
    fn test_partial_grouping_must_match() {
        let src = DistAttr::replicated(mesh!(a = 2, b = 2; [0, 1, 2, 3]), 1).partial(0);
        let relabeled = DistAttr::replicated(mesh!(c = 2, d = 2; [0, 1, 2, 3]), 1).partial(0);
        let regrouped = DistAttr::replicated(mesh!(c = 2, d = 2; [0, 1, 2, 3]), 1).partial(1);
        assert!(equivalent_relabel(&src, &relabeled));
        assert!(!equivalent_relabel(&src, &regrouped));
    }
}
