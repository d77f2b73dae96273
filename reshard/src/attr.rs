/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Placement descriptors.
//!
//! A [`DistAttr`] describes how one tensor's elements are distributed
//! across a [`DeviceMesh`]: per tensor dimension, whether that dimension
//! is replicated or sharded over a mesh dimension
//! ([`AxisSharding`]), and the set of mesh dimensions over which the
//! tensor is only partially summed. Descriptors are immutable values;
//! two descriptors are compatible for a no-op iff mesh, dimension
//! mapping, and partial set are all equal.
//!
//! Ill-formed descriptors (a mesh dimension sharding two tensor axes, a
//! partial dimension that also shards, out-of-range indices) are
//! representable so that dispatch can reject them explicitly, but no
//! strategy accepts them; see [`DistAttr::is_well_formed`].

use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use ndmesh::DeviceMesh;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ReshardError;

/// The placement of a single tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisSharding {
    /// The dimension is fully present on every process.
    Replicate,
    /// The dimension is split contiguously across the given mesh
    /// dimension, one slice per coordinate.
    Shard(usize),
}

impl AxisSharding {
    /// Whether this axis is sharded.
    pub fn is_shard(&self) -> bool {
        matches!(self, AxisSharding::Shard(_))
    }

    /// The mesh dimension sharding this axis, if any.
    pub fn mesh_dim(&self) -> Option<usize> {
        match self {
            AxisSharding::Shard(dim) => Some(*dim),
            AxisSharding::Replicate => None,
        }
    }
}

impl fmt::Display for AxisSharding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisSharding::Replicate => write!(f, "R"),
            AxisSharding::Shard(dim) => write!(f, "S({})", dim),
        }
    }
}

/// An immutable descriptor of one tensor's placement on a device mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistAttr {
    mesh: DeviceMesh,
    dims_mapping: Vec<AxisSharding>,
    partial_dims: BTreeSet<usize>,
}

impl DistAttr {
    /// Creates a descriptor from its parts. No validation is performed;
    /// see [`DistAttr::is_well_formed`].
    pub fn new(
        mesh: DeviceMesh,
        dims_mapping: Vec<AxisSharding>,
        partial_dims: impl IntoIterator<Item = usize>,
    ) -> Self {
        Self {
            mesh,
            dims_mapping,
            partial_dims: partial_dims.into_iter().collect(),
        }
    }

    /// A fully replicated descriptor for a tensor of rank `ndim`.
    pub fn replicated(mesh: DeviceMesh, ndim: usize) -> Self {
        Self::new(mesh, vec![AxisSharding::Replicate; ndim], [])
    }

    /// Returns this descriptor with tensor axis `axis` sharded over
    /// mesh dimension `mesh_dim`.
    pub fn shard(mut self, axis: usize, mesh_dim: usize) -> Self {
        self.dims_mapping[axis] = AxisSharding::Shard(mesh_dim);
        self
    }

    /// Returns this descriptor with a partial sum pending over mesh
    /// dimension `mesh_dim`.
    pub fn partial(mut self, mesh_dim: usize) -> Self {
        self.partial_dims.insert(mesh_dim);
        self
    }

    /// The mesh this descriptor places onto.
    pub fn mesh(&self) -> &DeviceMesh {
        &self.mesh
    }

    /// Per-tensor-dimension placements.
    pub fn dims_mapping(&self) -> &[AxisSharding] {
        &self.dims_mapping
    }

    /// Mesh dimensions over which the tensor is partially summed.
    pub fn partial_dims(&self) -> &BTreeSet<usize> {
        &self.partial_dims
    }

    /// The tensor rank this descriptor applies to.
    pub fn ndim(&self) -> usize {
        self.dims_mapping.len()
    }

    /// Whether any mesh dimension holds a pending partial sum.
    pub fn is_partial(&self) -> bool {
        !self.partial_dims.is_empty()
    }

    /// Whether any tensor dimension is sharded.
    pub fn is_shard(&self) -> bool {
        self.dims_mapping.iter().any(AxisSharding::is_shard)
    }

    /// Whether tensor axis `axis` is sharded.
    pub fn is_shard_on(&self, axis: usize) -> bool {
        self.dims_mapping
            .get(axis)
            .is_some_and(AxisSharding::is_shard)
    }

    /// Whether every process holds the complete logical tensor.
    pub fn is_replicated(&self) -> bool {
        !self.is_partial() && !self.is_shard()
    }

    /// The tensor axis sharded over `mesh_dim`, if any.
    pub fn shard_axis_for(&self, mesh_dim: usize) -> Option<usize> {
        self.dims_mapping
            .iter()
            .position(|m| m.mesh_dim() == Some(mesh_dim))
    }

    /// Structural validity: every referenced mesh dimension is in
    /// range, no mesh dimension shards more than one tensor axis, and
    /// no partial dimension is also a shard dimension.
    pub fn is_well_formed(&self) -> bool {
        let num_dim = self.mesh.num_dim();
        let mut sharded = vec![false; num_dim];
        for mapping in &self.dims_mapping {
            if let AxisSharding::Shard(dim) = mapping {
                if *dim >= num_dim || sharded[*dim] {
                    return false;
                }
                sharded[*dim] = true;
            }
        }
        self.partial_dims
            .iter()
            .all(|&dim| dim < num_dim && !sharded[dim])
    }

    /// The local buffer shape held by the process at mesh coordinate
    /// `coord` for a tensor of logical shape `global`.
    pub fn local_shape(
        &self,
        global: &[usize],
        coord: &[usize],
    ) -> Result<Vec<usize>, ReshardError> {
        if global.len() != self.ndim() {
            return Err(ReshardError::ShapeMismatch(format!(
                "global shape {:?} has rank {}, descriptor expects {}",
                global,
                global.len(),
                self.ndim()
            )));
        }
        let mut local = Vec::with_capacity(global.len());
        for (&extent, mapping) in global.iter().zip(&self.dims_mapping) {
            match mapping {
                AxisSharding::Replicate => local.push(extent),
                AxisSharding::Shard(dim) => {
                    let parts = self.mesh.size(*dim)?;
                    let index = *coord.get(*dim).ok_or_else(|| {
                        ReshardError::ShapeMismatch(format!(
                            "coordinate {:?} too short for mesh dimension {}",
                            coord, dim
                        ))
                    })?;
                    let sizes = balanced_split(extent, parts)?;
                    local.push(*sizes.get(index).ok_or_else(|| {
                        ReshardError::ShapeMismatch(format!(
                            "coordinate {:?} out of range on mesh dimension {}",
                            coord, dim
                        ))
                    })?);
                }
            }
        }
        Ok(local)
    }
}

impl fmt::Display for DistAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{mesh={}, dims=[{}], partial={{{}}}}}",
            self.mesh,
            self.dims_mapping.iter().join(", "),
            self.partial_dims.iter().join(", "),
        )
    }
}

/// Splits `len` elements into `parts` contiguous, as-equal-as-possible
/// slices: the remainder is distributed one element each to the leading
/// slices, so `balanced_split(10, 3)` is `[4, 3, 3]`.
///
/// Fails with [`ReshardError::UnshardableDimension`] if any slice would
/// be empty.
pub fn balanced_split(len: usize, parts: usize) -> Result<Vec<usize>, ReshardError> {
    if parts == 0 || len < parts {
        return Err(ReshardError::UnshardableDimension { len, parts });
    }
    let base = len / parts;
    let rem = len % parts;
    Ok((0..parts).map(|i| base + usize::from(i < rem)).collect())
}

/// Starting offsets of the slices produced by [`balanced_split`].
pub fn split_offsets(sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut acc = 0;
    for &size in sizes {
        offsets.push(acc);
        acc += size;
    }
    offsets
}

#[cfg(test)]
mod tests {
    use ndmesh::mesh;

    use super::*;

    #[test]
    fn test_balanced_split() {
        assert_eq!(balanced_split(10, 3).unwrap(), vec![4, 3, 3]);
        assert_eq!(balanced_split(4, 2).unwrap(), vec![2, 2]);
        assert_eq!(balanced_split(3, 3).unwrap(), vec![1, 1, 1]);
        assert_eq!(balanced_split(7, 2).unwrap(), vec![4, 3]);
        assert!(matches!(
            balanced_split(2, 3),
            Err(ReshardError::UnshardableDimension { len: 2, parts: 3 })
        ));
        assert!(matches!(
            balanced_split(0, 1),
            Err(ReshardError::UnshardableDimension { .. })
        ));
    }

    #[test]
    fn test_split_offsets() {
        assert_eq!(split_offsets(&[4, 3, 3]), vec![0, 4, 7]);
        assert_eq!(split_offsets(&[]), Vec::<usize>::new());
    }

    #[test]
    fn test_classification() {
        let mesh = mesh!(dp = 2, tp = 2; [0, 1, 2, 3]);
        let replicated = DistAttr::replicated(mesh.clone(), 2);
        assert!(replicated.is_replicated());
        assert!(!replicated.is_partial());
        assert!(!replicated.is_shard());

        let sharded = replicated.clone().shard(1, 0);
        assert!(sharded.is_shard());
        assert!(sharded.is_shard_on(1));
        assert!(!sharded.is_shard_on(0));
        assert!(!sharded.is_replicated());
        assert_eq!(sharded.shard_axis_for(0), Some(1));
        assert_eq!(sharded.shard_axis_for(1), None);

        let partial = DistAttr::replicated(mesh, 2).partial(1);
        assert!(partial.is_partial());
        assert!(!partial.is_replicated());
    }

    #[test]
    fn test_well_formedness() {
        let mesh = mesh!(dp = 2, tp = 2; [0, 1, 2, 3]);
        let ok = DistAttr::replicated(mesh.clone(), 2).shard(0, 0).partial(1);
        assert!(ok.is_well_formed());

        // Two tensor axes on the same mesh dimension.
        let doubled = DistAttr::replicated(mesh.clone(), 2).shard(0, 0).shard(1, 0);
        assert!(!doubled.is_well_formed());

        // Partial over a dimension that also shards.
        let clash = DistAttr::replicated(mesh.clone(), 2).shard(0, 1).partial(1);
        assert!(!clash.is_well_formed());

        // Out-of-range mesh dimension.
        let oob = DistAttr::replicated(mesh.clone(), 1).shard(0, 5);
        assert!(!oob.is_well_formed());
        let oob_partial = DistAttr::replicated(mesh, 1).partial(9);
        assert!(!oob_partial.is_well_formed());
    }

    #[test]
    fn test_local_shape() {
        let mesh = mesh!(x = 3; [0, 1, 2]);
        let attr = DistAttr::replicated(mesh, 2).shard(0, 0);
        assert_eq!(attr.local_shape(&[10, 2], &[0]).unwrap(), vec![4, 2]);
        assert_eq!(attr.local_shape(&[10, 2], &[1]).unwrap(), vec![3, 2]);
        assert_eq!(attr.local_shape(&[10, 2], &[2]).unwrap(), vec![3, 2]);
        assert!(matches!(
            attr.local_shape(&[10], &[0]),
            Err(ReshardError::ShapeMismatch(_))
        ));
        assert!(matches!(
            attr.local_shape(&[2, 2], &[0]),
            Err(ReshardError::UnshardableDimension { .. })
        ));
    }

    #[test]
    fn test_display() {
        let mesh = mesh!(dp = 2; [0, 1]);
        let attr = DistAttr::replicated(mesh, 2).shard(0, 0);
        assert_eq!(
            attr.to_string(),
            "{mesh={dp=2; procs=[0, 1]}, dims=[S(0), R], partial={}}"
        );
    }

    #[test]
    fn test_no_op_compatibility_is_full_equality() {
        let a = DistAttr::replicated(mesh!(x = 2; [0, 1]), 1);
        let b = DistAttr::replicated(mesh!(x = 2; [0, 1]), 1);
        let c = DistAttr::replicated(mesh!(x = 2; [0, 1]), 1).partial(0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
