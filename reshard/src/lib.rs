/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Distributed-tensor resharding.
//!
//! This crate transforms a tensor laid out across a device mesh
//! according to one placement descriptor into an equivalent tensor laid
//! out according to another. The caller presents a [`DistTensor`] and a
//! target [`DistAttr`] to a [`Resharder`]; the resharder resolves a
//! strategy from its [`ReshardFunctionRegistry`] and executes it against
//! the [`Communicator`], returning a new tensor carrying the target
//! descriptor.
//!
//! Execution is SPMD: every process participating in a transition makes
//! the identical call with identical source and target descriptors, and
//! each process issues only its own local contribution to the
//! collectives involved. The engine is synchronous from the caller's
//! point of view and holds no mutable state across calls: the registry
//! is read-only after construction, and tensors are consumed and
//! replaced, never mutated.
//!
//! Supported transitions are single cells of the (placement transition
//! × mesh relation) matrix: partial→replicated, replicated→sharded,
//! sharded→replicated, and same-status, each in a single-mesh and a
//! cross-mesh variant. Compound transitions are expected to be
//! decomposed upstream into a sequence of single-cell steps; the engine
//! performs no multi-step planning and fails loudly
//! ([`ReshardError::NoSuitableReshardStrategy`]) rather than
//! approximating.

pub mod attr;
pub mod buffer;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod funcs;
pub mod tensor;

pub use ndmesh::DeviceMesh;
pub use ndmesh::MeshError;
pub use ndmesh::ProcId;

pub use crate::attr::AxisSharding;
pub use crate::attr::DistAttr;
pub use crate::buffer::Buffer;
pub use crate::buffer::BufferError;
pub use crate::buffer::DType;
pub use crate::buffer::Storage;
pub use crate::comm::CommError;
pub use crate::comm::Communicator;
pub use crate::comm::sim::SimComm;
pub use crate::comm::sim::SimWorld;
pub use crate::config::CommConfig;
pub use crate::engine::Resharder;
pub use crate::error::ReshardError;
pub use crate::funcs::ReshardContext;
pub use crate::funcs::ReshardFunction;
pub use crate::funcs::ReshardFunctionRegistry;
pub use crate::funcs::default_registry;
pub use crate::tensor::DistTensor;
