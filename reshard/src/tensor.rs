/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The distributed tensor value.
//!
//! A [`DistTensor`] pairs one process's local buffer with the logical
//! (unsharded) shape it contributes to and the placement descriptor
//! that relates the two. Reshard strategies consume the value and
//! return a new one; the only case in which the input's buffer is
//! reused is the same-status no-op, where the transformation is
//! provably the identity.

use serde::Deserialize;
use serde::Serialize;

use crate::attr::DistAttr;
use crate::buffer::Buffer;
use crate::buffer::DType;
use crate::error::ReshardError;

/// A local buffer plus its placement descriptor and the logical shape
/// it represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistTensor {
    local: Buffer,
    global_sizes: Vec<usize>,
    attr: DistAttr,
}

impl DistTensor {
    /// Creates a distributed tensor value. The descriptor's rank must
    /// match the logical shape; the local buffer's shape is checked
    /// against the descriptor by the strategies that require it, since
    /// the owning coordinate is not part of the value.
    pub fn new(
        local: Buffer,
        global_sizes: Vec<usize>,
        attr: DistAttr,
    ) -> Result<Self, ReshardError> {
        if attr.ndim() != global_sizes.len() {
            return Err(ReshardError::ShapeMismatch(format!(
                "descriptor of rank {} cannot place a tensor of shape {:?}",
                attr.ndim(),
                global_sizes
            )));
        }
        Ok(Self {
            local,
            global_sizes,
            attr,
        })
    }

    /// The locally held buffer.
    pub fn local(&self) -> &Buffer {
        &self.local
    }

    /// The logical (unsharded) shape.
    pub fn global_sizes(&self) -> &[usize] {
        &self.global_sizes
    }

    /// The placement descriptor.
    pub fn attr(&self) -> &DistAttr {
        &self.attr
    }

    /// The element type.
    pub fn dtype(&self) -> DType {
        self.local.dtype()
    }

    /// Whether this process holds any elements of the tensor. False
    /// for processes outside the owning mesh after a cross-mesh
    /// transition.
    pub fn has_local_data(&self) -> bool {
        !self.local.is_empty()
    }

    /// Decomposes the value into its parts.
    pub(crate) fn into_parts(self) -> (Buffer, Vec<usize>, DistAttr) {
        (self.local, self.global_sizes, self.attr)
    }

    /// The same local data under a new descriptor (a relabeling, no
    /// data movement).
    pub(crate) fn with_attr(self, attr: DistAttr) -> Self {
        Self { attr, ..self }
    }
}

#[cfg(test)]
mod tests {
    use ndmesh::mesh;

    use super::*;

    #[test]
    fn test_rank_agreement() {
        let mesh = mesh!(x = 2; [0, 1]);
        let attr = DistAttr::replicated(mesh, 2);
        let buf = Buffer::from_f32(vec![2, 2], vec![0.0; 4]).unwrap();
        assert!(DistTensor::new(buf.clone(), vec![2, 2], attr.clone()).is_ok());
        assert!(matches!(
            DistTensor::new(buf, vec![2], attr),
            Err(ReshardError::ShapeMismatch(_))
        ));
    }
}
