/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The [`DeviceMesh`] type and its coordinate algebra.
//!
//! Coordinates are row-major: the last dimension varies fastest, so the
//! process at coordinate `c` in a mesh of sizes `[s0, .., sn]` has flat
//! rank `∑ᵢ cᵢ × strideᵢ` with `striden = 1` and `strideᵢ = strideᵢ₊₁ ×
//! sᵢ₊₁`.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::ProcId;

/// Errors arising from mesh construction or coordinate arithmetic.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MeshError {
    /// The process list does not match the product of the sizes.
    #[error("mesh of sizes {sizes:?} expects {expected} processes, got {got}")]
    WrongProcCount {
        /// Per-dimension extents of the offending mesh.
        sizes: Vec<usize>,
        /// `sizes.iter().product()`.
        expected: usize,
        /// Number of processes actually supplied.
        got: usize,
    },

    /// The label list does not match the number of dimensions.
    #[error("mesh has {labels} labels for {dims} dimensions")]
    WrongLabelCount {
        /// Number of labels supplied.
        labels: usize,
        /// Number of dimensions.
        dims: usize,
    },

    /// A dimension label appears more than once.
    #[error("duplicate mesh dimension label: {0}")]
    DuplicateLabel(String),

    /// A process id appears more than once.
    #[error("duplicate process id: {0}")]
    DuplicateProc(ProcId),

    /// A mesh dimension has extent zero.
    #[error("zero-size mesh dimension: {0}")]
    ZeroDim(String),

    /// A coordinate is out of range for the mesh.
    #[error("invalid coordinate {coord:?} for mesh of sizes {sizes:?}")]
    InvalidCoordinate {
        /// The offending coordinate.
        coord: Vec<usize>,
        /// Per-dimension extents.
        sizes: Vec<usize>,
    },

    /// A flat rank is out of range for the mesh.
    #[error("rank {rank} out of range for mesh of {len} processes")]
    RankOutOfRange {
        /// The offending rank.
        rank: usize,
        /// Number of processes in the mesh.
        len: usize,
    },

    /// A mesh dimension index is out of range.
    #[error("mesh dimension {dim} out of range for {num_dim} dimensions")]
    DimOutOfRange {
        /// The offending dimension index.
        dim: usize,
        /// Number of dimensions in the mesh.
        num_dim: usize,
    },
}

/// An N-dimensional logical arrangement of process identifiers.
///
/// Each dimension carries a unique label (e.g. `"dp"`, `"tp"`), and the
/// process list is stored flat in row-major order. Meshes are referenced
/// by value equality and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceMesh {
    sizes: Vec<usize>,
    labels: Vec<String>,
    procs: Vec<ProcId>,
}

impl DeviceMesh {
    /// Creates a mesh from per-dimension labels, extents, and the
    /// row-major flat process list.
    pub fn new(
        labels: Vec<String>,
        sizes: Vec<usize>,
        procs: Vec<ProcId>,
    ) -> Result<Self, MeshError> {
        if labels.len() != sizes.len() {
            return Err(MeshError::WrongLabelCount {
                labels: labels.len(),
                dims: sizes.len(),
            });
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].contains(label) {
                return Err(MeshError::DuplicateLabel(label.clone()));
            }
        }
        for (label, &size) in labels.iter().zip(&sizes) {
            if size == 0 {
                return Err(MeshError::ZeroDim(label.clone()));
            }
        }
        let expected = sizes.iter().product::<usize>();
        if procs.len() != expected {
            return Err(MeshError::WrongProcCount {
                sizes,
                expected,
                got: procs.len(),
            });
        }
        for (i, proc) in procs.iter().enumerate() {
            if procs[..i].contains(proc) {
                return Err(MeshError::DuplicateProc(*proc));
            }
        }
        Ok(Self {
            sizes,
            labels,
            procs,
        })
    }

    /// The number of mesh dimensions.
    pub fn num_dim(&self) -> usize {
        self.sizes.len()
    }

    /// Per-dimension extents.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// The extent of one mesh dimension.
    pub fn size(&self, dim: usize) -> Result<usize, MeshError> {
        self.sizes
            .get(dim)
            .copied()
            .ok_or(MeshError::DimOutOfRange {
                dim,
                num_dim: self.num_dim(),
            })
    }

    /// Per-dimension labels.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The total number of processes in the mesh.
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    /// Whether the mesh has no processes. Construction forbids this, so
    /// it is always false for a built mesh; provided for completeness.
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// The flat, row-major process list.
    pub fn procs(&self) -> &[ProcId] {
        &self.procs
    }

    /// Row-major strides for the current sizes.
    fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.sizes.len()];
        for i in (0..self.sizes.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.sizes[i + 1];
        }
        strides
    }

    /// Maps a coordinate to its flat rank.
    pub fn location(&self, coord: &[usize]) -> Result<usize, MeshError> {
        if coord.len() != self.num_dim()
            || coord.iter().zip(&self.sizes).any(|(&c, &s)| c >= s)
        {
            return Err(MeshError::InvalidCoordinate {
                coord: coord.to_vec(),
                sizes: self.sizes.clone(),
            });
        }
        Ok(self
            .strides()
            .iter()
            .zip(coord)
            .map(|(s, c)| s * c)
            .sum::<usize>())
    }

    /// Maps a flat rank back to its coordinate.
    pub fn coordinates(&self, rank: usize) -> Result<Vec<usize>, MeshError> {
        if rank >= self.len() {
            return Err(MeshError::RankOutOfRange {
                rank,
                len: self.len(),
            });
        }
        let mut rem = rank;
        let mut coord = Vec::with_capacity(self.num_dim());
        for stride in self.strides() {
            coord.push(rem / stride);
            rem %= stride;
        }
        Ok(coord)
    }

    /// The flat rank of a process in this mesh, if it is a member.
    pub fn rank_of(&self, proc: ProcId) -> Option<usize> {
        self.procs.iter().position(|&p| p == proc)
    }

    /// Whether a process is a member of this mesh.
    pub fn contains(&self, proc: ProcId) -> bool {
        self.rank_of(proc).is_some()
    }

    /// The coordinate of a process in this mesh, if it is a member.
    pub fn coord_of(&self, proc: ProcId) -> Option<Vec<usize>> {
        let rank = self.rank_of(proc)?;
        self.coordinates(rank).ok()
    }

    /// The ordered process group obtained by varying mesh dimension
    /// `dim` while holding every other coordinate of `coord` fixed.
    ///
    /// The group is returned in ascending coordinate order along `dim`;
    /// this ordering is what makes collectives over the group
    /// deterministic and reproducible.
    pub fn group_along(&self, dim: usize, coord: &[usize]) -> Result<Vec<ProcId>, MeshError> {
        let size = self.size(dim)?;
        let mut varied = coord.to_vec();
        let mut group = Vec::with_capacity(size);
        for i in 0..size {
            varied[dim] = i;
            group.push(self.procs[self.location(&varied)?]);
        }
        Ok(group)
    }

    /// All process groups along mesh dimension `dim`, one per fixed
    /// assignment of the remaining coordinates. Together the groups
    /// partition the mesh's processes.
    pub fn groups_along(&self, dim: usize) -> Result<Vec<Vec<ProcId>>, MeshError> {
        self.size(dim)?;
        let mut groups = Vec::with_capacity(self.len() / self.sizes[dim]);
        for rank in 0..self.len() {
            let coord = self.coordinates(rank)?;
            // Emit each group once, keyed by its first member.
            if coord[dim] == 0 {
                groups.push(self.group_along(dim, &coord)?);
            }
        }
        Ok(groups)
    }
}

impl fmt::Display for DeviceMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (label, size)) in self.labels.iter().zip(&self.sizes).enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", label, size)?;
        }
        write!(f, "; procs={:?}}}", self.procs)
    }
}

/// Constructs a [`DeviceMesh`] from labeled extents and a process list:
///
/// ```
/// use ndmesh::mesh;
///
/// let m = mesh!(dp = 2, tp = 2; [0, 1, 2, 3]);
/// assert_eq!(m.len(), 4);
/// ```
///
/// Panics on invalid input; intended for tests and examples.
#[macro_export]
macro_rules! mesh {
    ($($label:ident = $size:expr),+ $(,)? ; [$($proc:expr),* $(,)?]) => {
        $crate::DeviceMesh::new(
            vec![$(stringify!($label).to_string()),+],
            vec![$($size),+],
            vec![$($proc),*],
        )
        .unwrap()
    };
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::strategy::gen_mesh;

    #[test]
    fn test_construction_checks() {
        assert_eq!(
            DeviceMesh::new(vec!["x".into()], vec![2], vec![0, 1, 2]),
            Err(MeshError::WrongProcCount {
                sizes: vec![2],
                expected: 2,
                got: 3
            })
        );
        assert_eq!(
            DeviceMesh::new(vec!["x".into(), "x".into()], vec![2, 2], vec![0, 1, 2, 3]),
            Err(MeshError::DuplicateLabel("x".into()))
        );
        assert_eq!(
            DeviceMesh::new(vec!["x".into()], vec![2], vec![7, 7]),
            Err(MeshError::DuplicateProc(7))
        );
        assert_eq!(
            DeviceMesh::new(vec!["x".into(), "y".into()], vec![2, 0], vec![]),
            Err(MeshError::ZeroDim("y".into()))
        );
        assert_eq!(
            DeviceMesh::new(vec!["x".into()], vec![2, 2], vec![0, 1, 2, 3]),
            Err(MeshError::WrongLabelCount { labels: 1, dims: 2 })
        );
    }

    #[test]
    fn test_location_row_major() {
        let m = mesh!(a = 2, b = 3; [10, 11, 12, 13, 14, 15]);
        assert_eq!(m.location(&[0, 0]).unwrap(), 0);
        assert_eq!(m.location(&[0, 2]).unwrap(), 2);
        assert_eq!(m.location(&[1, 0]).unwrap(), 3);
        assert_eq!(m.location(&[1, 2]).unwrap(), 5);
        assert_eq!(m.coordinates(4).unwrap(), vec![1, 1]);
        assert!(matches!(
            m.location(&[2, 0]),
            Err(MeshError::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            m.coordinates(6),
            Err(MeshError::RankOutOfRange { .. })
        ));
    }

    #[test]
    fn test_groups_along() {
        let m = mesh!(dp = 2, tp = 2; [0, 1, 2, 3]);
        // Varying tp holds dp fixed: rows of the 2x2 grid.
        assert_eq!(m.groups_along(1).unwrap(), vec![vec![0, 1], vec![2, 3]]);
        // Varying dp holds tp fixed: columns.
        assert_eq!(m.groups_along(0).unwrap(), vec![vec![0, 2], vec![1, 3]]);
        assert_eq!(m.group_along(0, &[1, 1]).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_membership() {
        let m = mesh!(x = 2; [4, 9]);
        assert_eq!(m.rank_of(9), Some(1));
        assert_eq!(m.rank_of(5), None);
        assert_eq!(m.coord_of(4), Some(vec![0]));
        assert!(m.contains(9));
        assert!(!m.contains(0));
    }

    #[test]
    fn test_value_equality() {
        let a = mesh!(x = 2; [0, 1]);
        let b = mesh!(x = 2; [0, 1]);
        let c = mesh!(y = 2; [0, 1]);
        assert_eq!(a, b);
        assert_ne!(a, c); // labels participate in identity
    }

    #[test]
    fn test_display() {
        let m = mesh!(dp = 2, tp = 2; [0, 1, 2, 3]);
        assert_eq!(m.to_string(), "{dp=2,tp=2; procs=[0, 1, 2, 3]}");
    }

    proptest! {
        #[test]
        fn test_location_coordinates_roundtrip(mesh in gen_mesh(3, 4)) {
            for rank in 0..mesh.len() {
                let coord = mesh.coordinates(rank).unwrap();
                prop_assert_eq!(mesh.location(&coord).unwrap(), rank);
            }
        }

        #[test]
        fn test_groups_partition_mesh(mesh in gen_mesh(3, 4)) {
            for dim in 0..mesh.num_dim() {
                let groups = mesh.groups_along(dim).unwrap();
                let mut seen: Vec<ProcId> =
                    groups.iter().flatten().copied().collect();
                seen.sort_unstable();
                let mut all = mesh.procs().to_vec();
                all.sort_unstable();
                prop_assert_eq!(seen, all);
            }
        }
    }
}
