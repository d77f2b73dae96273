/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Dense local buffers.
//!
//! A [`Buffer`] is the row-major, dtype-tagged block of elements one
//! process holds for its part of a distributed tensor. The engine only
//! needs three kernels over it: contiguous slicing along one axis,
//! concatenation along one axis (the exact inverse), and element-wise
//! accumulation in the input dtype — no implicit upcasting anywhere.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// The element type of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
        }
    }
}

/// Errors from buffer kernels.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum BufferError {
    /// The element count does not match the shape, or two shapes that
    /// must agree do not.
    #[error("buffer shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Two buffers that must share an element type do not.
    #[error("buffer dtype mismatch: {lhs} vs {rhs}")]
    DTypeMismatch {
        /// Left-hand element type.
        lhs: DType,
        /// Right-hand element type.
        rhs: DType,
    },

    /// An axis index is out of range for the buffer's rank.
    #[error("axis {axis} out of bounds for rank {rank}")]
    AxisOutOfBounds {
        /// The offending axis.
        axis: usize,
        /// The buffer's rank.
        rank: usize,
    },

    /// A slice range is out of range along an axis.
    #[error("range {start}+{count} out of bounds on axis {axis} (size {size})")]
    RangeOutOfBounds {
        /// The offending axis.
        axis: usize,
        /// Start of the requested range.
        start: usize,
        /// Length of the requested range.
        count: usize,
        /// Extent of the axis.
        size: usize,
    },

    /// Concatenation of an empty part list.
    #[error("cannot concatenate an empty list of buffers")]
    EmptyConcat,
}

/// Dtype-tagged element storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Storage {
    /// 32-bit float elements.
    F32(Vec<f32>),
    /// 64-bit float elements.
    F64(Vec<f64>),
    /// 32-bit signed integer elements.
    I32(Vec<i32>),
    /// 64-bit signed integer elements.
    I64(Vec<i64>),
}

impl Storage {
    /// The element type of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            Storage::F32(_) => DType::F32,
            Storage::F64(_) => DType::F64,
            Storage::I32(_) => DType::I32,
            Storage::I64(_) => DType::I64,
        }
    }

    /// The number of elements held.
    pub fn len(&self) -> usize {
        match self {
            Storage::F32(data) => data.len(),
            Storage::F64(data) => data.len(),
            Storage::I32(data) => data.len(),
            Storage::I64(data) => data.len(),
        }
    }

    /// Whether no elements are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dense, row-major local buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    sizes: Vec<usize>,
    storage: Storage,
}

// Copies the `[start, start + count)` rows of each outer block.
fn slice_rows<T: Copy>(
    data: &[T],
    outer: usize,
    axis_len: usize,
    inner: usize,
    start: usize,
    count: usize,
) -> Vec<T> {
    let mut out = Vec::with_capacity(outer * count * inner);
    for block in 0..outer {
        let base = block * axis_len * inner + start * inner;
        out.extend_from_slice(&data[base..base + count * inner]);
    }
    out
}

// Interleaves per-part outer blocks: for each outer index, the rows of
// every part in order.
fn concat_rows<T: Copy>(parts: &[(&[T], usize)], outer: usize, inner: usize) -> Vec<T> {
    let total: usize = parts.iter().map(|(data, _)| data.len()).sum();
    let mut out = Vec::with_capacity(total);
    for block in 0..outer {
        for (data, axis_len) in parts {
            let base = block * axis_len * inner;
            out.extend_from_slice(&data[base..base + axis_len * inner]);
        }
    }
    out
}

macro_rules! concat_storage {
    ($variant:ident, $parts:expr, $axis:expr, $outer:expr, $inner:expr) => {{
        let mut slices = Vec::with_capacity($parts.len());
        for part in $parts {
            match &part.storage {
                Storage::$variant(data) => slices.push((data.as_slice(), part.sizes[$axis])),
                other => {
                    return Err(BufferError::DTypeMismatch {
                        lhs: DType::$variant,
                        rhs: other.dtype(),
                    });
                }
            }
        }
        Storage::$variant(concat_rows(&slices, $outer, $inner))
    }};
}

impl Buffer {
    /// Creates a buffer, checking that the storage holds exactly
    /// `sizes.iter().product()` elements.
    pub fn new(sizes: Vec<usize>, storage: Storage) -> Result<Self, BufferError> {
        let expected = sizes.iter().product::<usize>();
        if storage.len() != expected {
            return Err(BufferError::ShapeMismatch(format!(
                "shape {:?} expects {} elements, storage holds {}",
                sizes,
                expected,
                storage.len()
            )));
        }
        Ok(Self { sizes, storage })
    }

    /// A buffer of `f32` elements.
    pub fn from_f32(sizes: Vec<usize>, data: Vec<f32>) -> Result<Self, BufferError> {
        Self::new(sizes, Storage::F32(data))
    }

    /// A buffer of `f64` elements.
    pub fn from_f64(sizes: Vec<usize>, data: Vec<f64>) -> Result<Self, BufferError> {
        Self::new(sizes, Storage::F64(data))
    }

    /// A buffer of `i32` elements.
    pub fn from_i32(sizes: Vec<usize>, data: Vec<i32>) -> Result<Self, BufferError> {
        Self::new(sizes, Storage::I32(data))
    }

    /// A buffer of `i64` elements.
    pub fn from_i64(sizes: Vec<usize>, data: Vec<i64>) -> Result<Self, BufferError> {
        Self::new(sizes, Storage::I64(data))
    }

    /// A zero-element buffer of the given dtype, held by processes that
    /// own no part of a tensor.
    pub fn empty(dtype: DType) -> Self {
        let storage = match dtype {
            DType::F32 => Storage::F32(Vec::new()),
            DType::F64 => Storage::F64(Vec::new()),
            DType::I32 => Storage::I32(Vec::new()),
            DType::I64 => Storage::I64(Vec::new()),
        };
        Self {
            sizes: vec![0],
            storage,
        }
    }

    /// The element type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Per-axis extents.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Total element count.
    pub fn numel(&self) -> usize {
        self.sizes.iter().product()
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn outer_inner(&self, axis: usize) -> Result<(usize, usize), BufferError> {
        if axis >= self.sizes.len() {
            return Err(BufferError::AxisOutOfBounds {
                axis,
                rank: self.sizes.len(),
            });
        }
        let outer = self.sizes[..axis].iter().product();
        let inner = self.sizes[axis + 1..].iter().product();
        Ok((outer, inner))
    }

    /// The contiguous sub-range `[start, start + count)` along `axis`.
    pub fn slice_axis(
        &self,
        axis: usize,
        start: usize,
        count: usize,
    ) -> Result<Buffer, BufferError> {
        let (outer, inner) = self.outer_inner(axis)?;
        let axis_len = self.sizes[axis];
        if start + count > axis_len {
            return Err(BufferError::RangeOutOfBounds {
                axis,
                start,
                count,
                size: axis_len,
            });
        }
        let storage = match &self.storage {
            Storage::F32(data) => {
                Storage::F32(slice_rows(data, outer, axis_len, inner, start, count))
            }
            Storage::F64(data) => {
                Storage::F64(slice_rows(data, outer, axis_len, inner, start, count))
            }
            Storage::I32(data) => {
                Storage::I32(slice_rows(data, outer, axis_len, inner, start, count))
            }
            Storage::I64(data) => {
                Storage::I64(slice_rows(data, outer, axis_len, inner, start, count))
            }
        };
        let mut sizes = self.sizes.clone();
        sizes[axis] = count;
        Ok(Buffer { sizes, storage })
    }

    /// Concatenates `parts` along `axis`, the exact inverse of slicing:
    /// all parts must agree on dtype, rank, and every other axis
    /// extent.
    pub fn concat(parts: &[Buffer], axis: usize) -> Result<Buffer, BufferError> {
        let first = parts.first().ok_or(BufferError::EmptyConcat)?;
        let (outer, inner) = first.outer_inner(axis)?;
        for part in &parts[1..] {
            if part.sizes.len() != first.sizes.len()
                || part
                    .sizes
                    .iter()
                    .zip(&first.sizes)
                    .enumerate()
                    .any(|(i, (a, b))| i != axis && a != b)
            {
                return Err(BufferError::ShapeMismatch(format!(
                    "cannot concatenate {:?} with {:?} along axis {}",
                    part.sizes, first.sizes, axis
                )));
            }
        }
        let storage = match first.dtype() {
            DType::F32 => concat_storage!(F32, parts, axis, outer, inner),
            DType::F64 => concat_storage!(F64, parts, axis, outer, inner),
            DType::I32 => concat_storage!(I32, parts, axis, outer, inner),
            DType::I64 => concat_storage!(I64, parts, axis, outer, inner),
        };
        let mut sizes = first.sizes.clone();
        sizes[axis] = parts.iter().map(|p| p.sizes[axis]).sum();
        Ok(Buffer { sizes, storage })
    }

    /// Element-wise accumulation in the input dtype.
    pub fn add_assign(&mut self, other: &Buffer) -> Result<(), BufferError> {
        if self.sizes != other.sizes {
            return Err(BufferError::ShapeMismatch(format!(
                "cannot accumulate {:?} into {:?}",
                other.sizes, self.sizes
            )));
        }
        match (&mut self.storage, &other.storage) {
            (Storage::F32(lhs), Storage::F32(rhs)) => {
                for (l, r) in lhs.iter_mut().zip(rhs) {
                    *l += *r;
                }
            }
            (Storage::F64(lhs), Storage::F64(rhs)) => {
                for (l, r) in lhs.iter_mut().zip(rhs) {
                    *l += *r;
                }
            }
            (Storage::I32(lhs), Storage::I32(rhs)) => {
                for (l, r) in lhs.iter_mut().zip(rhs) {
                    *l += *r;
                }
            }
            (Storage::I64(lhs), Storage::I64(rhs)) => {
                for (l, r) in lhs.iter_mut().zip(rhs) {
                    *l += *r;
                }
            }
            (lhs, rhs) => {
                return Err(BufferError::DTypeMismatch {
                    lhs: lhs.dtype(),
                    rhs: rhs.dtype(),
                });
            }
        }
        Ok(())
    }
}
