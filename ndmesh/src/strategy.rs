/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Property-based generators for [`DeviceMesh`].
//!
//! Used by `proptest`-based tests to construct randomized meshes for
//! exercising coordinate math and group derivation. Only included in
//! test builds (`#[cfg(test)]`).

use proptest::prelude::*;

use crate::DeviceMesh;

// Labels are drawn positionally from a fixed pool, so generated meshes
// always have unique dimension names.
const LABELS: [&str; 4] = ["a", "b", "c", "d"];

/// Generates a `DeviceMesh` with up to `max_dims` dimensions, each of
/// extent `1..=max_size`, and a dense process list `0..len`.
pub fn gen_mesh(max_dims: usize, max_size: usize) -> impl Strategy<Value = DeviceMesh> {
    assert!(max_dims >= 1 && max_dims <= LABELS.len());
    prop::collection::vec(1..=max_size, 1..=max_dims).prop_map(|sizes| {
        let labels = sizes
            .iter()
            .enumerate()
            .map(|(i, _)| LABELS[i].to_string())
            .collect();
        let len = sizes.iter().product();
        DeviceMesh::new(labels, sizes, (0..len).collect()).unwrap()
    })
}
