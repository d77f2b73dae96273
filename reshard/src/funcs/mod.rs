/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Reshard strategies and their registry.
//!
//! Every supported transition is one cell of a two-axis matrix: the
//! placement transition (partial→replicated, replicated→sharded,
//! sharded→replicated, same-status) crossed with the mesh relation
//! (same mesh, cross mesh). Each strategy's suitability predicate
//! matches exactly one cell, with mesh equality keeping a cross-mesh
//! strategy mutually exclusive from its single-mesh counterpart.
//!
//! Dispatch is a linear scan in registration order, first match wins.
//! This keeps strategies independently addable — an open/closed
//! extension point — at the cost of registration-order discipline:
//! a strategy's predicate must be mutually exclusive with, or a strict
//! specialization of, everything registered before it.

mod cross_mesh;
pub mod p_to_r;
pub mod r_to_s;
pub mod s_to_r;
pub mod same_status;

use std::fmt;

use itertools::Itertools;
use ndmesh::DeviceMesh;
use ndmesh::ProcId;
use tracing::debug;

use crate::attr::AxisSharding;
use crate::attr::DistAttr;
use crate::comm::CommError;
use crate::comm::Communicator;
use crate::error::ReshardError;
use crate::tensor::DistTensor;

pub use crate::funcs::p_to_r::PToRReshard;
pub use crate::funcs::p_to_r::PToRReshardCrossMesh;
pub use crate::funcs::r_to_s::RToSReshard;
pub use crate::funcs::r_to_s::RToSReshardCrossMesh;
pub use crate::funcs::s_to_r::SToRReshard;
pub use crate::funcs::s_to_r::SToRReshardCrossMesh;
pub use crate::funcs::same_status::SameStatusReshard;
pub use crate::funcs::same_status::SameStatusReshardCrossMesh;

/// Per-call execution context handed to a strategy: the caller's handle
/// onto the communication layer.
pub struct ReshardContext<'a> {
    comm: &'a dyn Communicator,
}

impl<'a> ReshardContext<'a> {
    /// A context executing against the given communicator.
    pub fn new(comm: &'a dyn Communicator) -> Self {
        Self { comm }
    }

    /// The communication layer.
    pub fn comm(&self) -> &dyn Communicator {
        self.comm
    }

    /// The calling process.
    pub fn proc(&self) -> ProcId {
        self.comm.proc()
    }

    /// The caller's coordinate in `mesh`. Every process participating
    /// in a single-mesh transition must be a mesh member; a
    /// non-member call is a violation of the SPMD contract.
    pub(crate) fn coord_in(&self, mesh: &DeviceMesh) -> Result<Vec<usize>, ReshardError> {
        mesh.coord_of(self.proc())
            .ok_or(ReshardError::Comm(CommError::NotInGroup(self.proc())))
    }
}

/// A transformation strategy: a suitability test over a (source,
/// target) descriptor pair and an execution step realizing the
/// transition.
pub trait ReshardFunction: fmt::Debug + Send + Sync {
    /// A stable identifier for logs and errors.
    fn name(&self) -> &'static str;

    /// Whether this strategy is responsible for the transition.
    fn is_suitable(&self, src: &DistAttr, dst: &DistAttr) -> bool;

    /// Realizes the transition, consuming the input and returning a
    /// tensor carrying the target descriptor.
    fn eval(
        &self,
        ctx: &ReshardContext<'_>,
        input: DistTensor,
        dst: &DistAttr,
    ) -> Result<DistTensor, ReshardError>;
}

// The structural guard every suitability predicate starts from: both
// descriptors well formed and placing tensors of the same rank.
pub(crate) fn well_formed_transition(src: &DistAttr, dst: &DistAttr) -> bool {
    src.is_well_formed() && dst.is_well_formed() && src.ndim() == dst.ndim()
}

// The single tensor axis whose placement changes between `src` and
// `dst`, if exactly one does.
pub(crate) fn single_axis_change(
    src: &DistAttr,
    dst: &DistAttr,
) -> Option<(usize, AxisSharding, AxisSharding)> {
    src.dims_mapping()
        .iter()
        .zip(dst.dims_mapping())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .exactly_one()
        .ok()
        .map(|(axis, (&a, &b))| (axis, a, b))
}

// Peers in a collective reporting inconsistent shapes is a placement
// violation, not a transport fault.
pub(crate) fn collective_err(err: CommError) -> ReshardError {
    match err {
        CommError::ShapeMismatch(msg) => ReshardError::ShapeMismatch(msg),
        other => ReshardError::Comm(other),
    }
}

/// An ordered collection of strategies and the dispatcher selecting one
/// for a given transition. Populated once at startup and read-only
/// thereafter.
#[derive(Debug, Default)]
pub struct ReshardFunctionRegistry {
    funcs: Vec<Box<dyn ReshardFunction>>,
}

impl ReshardFunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a strategy. Order matters: dispatch is first match
    /// wins.
    pub fn register<F: ReshardFunction + 'static>(&mut self, func: F) {
        self.funcs.push(Box::new(func));
    }

    /// The number of registered strategies.
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    /// Whether no strategies are registered.
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Registered strategy names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.funcs.iter().map(|f| f.name()).collect()
    }

    /// Resolves the strategy responsible for the transition: the first
    /// registered strategy whose suitability predicate accepts the
    /// pair.
    pub fn find(
        &self,
        src: &DistAttr,
        dst: &DistAttr,
    ) -> Result<&dyn ReshardFunction, ReshardError> {
        for func in &self.funcs {
            if func.is_suitable(src, dst) {
                debug!(strategy = func.name(), %src, %dst, "dispatched");
                return Ok(func.as_ref());
            }
        }
        Err(ReshardError::NoSuitableReshardStrategy {
            src: Box::new(src.clone()),
            dst: Box::new(dst.clone()),
        })
    }
}

/// The full strategy family in its canonical registration order.
pub fn default_registry() -> ReshardFunctionRegistry {
    let mut registry = ReshardFunctionRegistry::new();
    registry.register(PToRReshard);
    registry.register(PToRReshardCrossMesh);
    registry.register(RToSReshard);
    registry.register(RToSReshardCrossMesh);
    registry.register(SameStatusReshard);
    registry.register(SameStatusReshardCrossMesh);
    registry.register(SToRReshard);
    registry.register(SToRReshardCrossMesh);
    registry
}

#[cfg(test)]
mod tests {
    use ndmesh::mesh;

    use super::*;

    fn mesh2() -> DeviceMesh {
        mesh!(x = 2; [0, 1])
    }

    fn other_mesh2() -> DeviceMesh {
        mesh!(x = 2; [2, 3])
    }

    // A representative descriptor for every supported placement on a
    // 1-D mesh, over a rank-1 tensor.
    fn placements(mesh: &DeviceMesh) -> Vec<DistAttr> {
        vec![
            DistAttr::replicated(mesh.clone(), 1),
            DistAttr::replicated(mesh.clone(), 1).shard(0, 0),
            DistAttr::replicated(mesh.clone(), 1).partial(0),
        ]
    }

    #[test]
    fn test_default_registry_order() {
        assert_eq!(
            default_registry().names(),
            vec![
                "p_to_r",
                "p_to_r_cross_mesh",
                "r_to_s",
                "r_to_s_cross_mesh",
                "same_status",
                "same_status_cross_mesh",
                "s_to_r",
                "s_to_r_cross_mesh",
            ]
        );
    }

    #[test]
    fn test_dispatch_selects_expected_cells() {
        let registry = default_registry();
        let mesh = mesh2();
        let replicated = DistAttr::replicated(mesh.clone(), 1);
        let sharded = replicated.clone().shard(0, 0);
        let partial = replicated.clone().partial(0);

        let cases = [
            (&partial, &replicated, "p_to_r"),
            (&replicated, &sharded, "r_to_s"),
            (&sharded, &replicated, "s_to_r"),
            (&replicated, &replicated, "same_status"),
        ];
        for (src, dst, expected) in cases {
            assert_eq!(registry.find(src, dst).unwrap().name(), expected);
        }

        let remote = other_mesh2();
        let remote_replicated = DistAttr::replicated(remote.clone(), 1);
        let remote_sharded = remote_replicated.clone().shard(0, 0);
        let cross_cases = [
            (&partial, &remote_replicated, "p_to_r_cross_mesh"),
            (&replicated, &remote_sharded, "r_to_s_cross_mesh"),
            (&sharded, &remote_replicated, "s_to_r_cross_mesh"),
            (&replicated, &remote_replicated, "same_status_cross_mesh"),
        ];
        for (src, dst, expected) in cross_cases {
            assert_eq!(registry.find(src, dst).unwrap().name(), expected);
        }
    }

    // For every pair of registered strategies, no transition in the
    // sample matrix is accepted by both — except a cross-mesh
    // specialization, which mesh equality already separates from its
    // single-mesh counterpart.
    #[test]
    fn test_dispatch_exclusivity() {
        let registry = default_registry();
        let near = mesh2();
        let far = other_mesh2();
        let mut attrs = placements(&near);
        attrs.extend(placements(&far));

        for src in &attrs {
            for dst in &attrs {
                let suitable: Vec<&str> = registry
                    .funcs
                    .iter()
                    .filter(|f| f.is_suitable(src, dst))
                    .map(|f| f.name())
                    .collect();
                assert!(
                    suitable.len() <= 1,
                    "transition {} -> {} matched by {:?}",
                    src,
                    dst,
                    suitable
                );
            }
        }
    }

    #[test]
    fn test_find_rejects_unsupported_transitions() {
        let registry = default_registry();
        let mesh = mesh!(dp = 2, tp = 2; [0, 1, 2, 3]);
        let replicated = DistAttr::replicated(mesh.clone(), 2);

        // Two tensor axes sharded over the same mesh dimension: the
        // target violates the placement invariant, so no strategy may
        // accept it.
        let doubled = DistAttr::replicated(mesh.clone(), 2).shard(0, 0).shard(1, 0);
        assert!(matches!(
            registry.find(&replicated, &doubled),
            Err(ReshardError::NoSuitableReshardStrategy { .. })
        ));

        // Compound transition (resolve a partial and change sharding at
        // once): expected to be decomposed upstream.
        let partial = DistAttr::replicated(mesh.clone(), 2).partial(0);
        let sharded = DistAttr::replicated(mesh, 2).shard(0, 0);
        assert!(matches!(
            registry.find(&partial, &sharded),
            Err(ReshardError::NoSuitableReshardStrategy { .. })
        ));
    }

    #[test]
    fn test_empty_registry_finds_nothing() {
        let registry = ReshardFunctionRegistry::new();
        let attr = DistAttr::replicated(mesh2(), 1);
        assert!(matches!(
            registry.find(&attr, &attr),
            Err(ReshardError::NoSuitableReshardStrategy { .. })
        ));
    }

    #[test]
    fn test_single_axis_change() {
        let mesh = mesh!(dp = 2, tp = 2; [0, 1, 2, 3]);
        let replicated = DistAttr::replicated(mesh.clone(), 2);
        let one = replicated.clone().shard(0, 0);
        let two = replicated.clone().shard(0, 0).shard(1, 1);

        assert_eq!(
            single_axis_change(&replicated, &one),
            Some((0, AxisSharding::Replicate, AxisSharding::Shard(0)))
        );
        assert_eq!(single_axis_change(&replicated, &two), None);
        assert_eq!(single_axis_change(&one, &one), None);
    }
}
