/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The reshard entry point.
//!
//! [`Resharder`] pairs a strategy registry with one process's
//! communicator handle. It is an explicit configuration object — built
//! once at startup, read-only thereafter — rather than ambient global
//! state, so scenario-specific strategy sets are trivial to assemble in
//! tests.
//!
//! A call moves through `Unresolved → Dispatched → Transforming →
//! Resolved`; there is no retry state. Communication failures are fatal
//! to the call and surface unmodified — retrying is the communication
//! layer's business, never the engine's.

use std::sync::Arc;

use tracing::debug;

use crate::attr::DistAttr;
use crate::comm::Communicator;
use crate::error::ReshardError;
use crate::funcs::ReshardContext;
use crate::funcs::ReshardFunctionRegistry;
use crate::funcs::default_registry;
use crate::tensor::DistTensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReshardState {
    Unresolved,
    Dispatched,
    Transforming,
    Resolved,
}

/// The external-facing adapter the graph compiler calls into.
pub struct Resharder {
    registry: ReshardFunctionRegistry,
    comm: Arc<dyn Communicator>,
}

impl Resharder {
    /// A resharder with the full default strategy family.
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self::with_registry(default_registry(), comm)
    }

    /// A resharder with an explicit, scenario-specific strategy set.
    pub fn with_registry(registry: ReshardFunctionRegistry, comm: Arc<dyn Communicator>) -> Self {
        Self { registry, comm }
    }

    /// The registered strategies.
    pub fn registry(&self) -> &ReshardFunctionRegistry {
        &self.registry
    }

    /// Transforms `tensor` to carry `target`, issuing whatever
    /// collective or point-to-point operations the selected strategy
    /// requires. Consumes the input; every participating process must
    /// make the identical call with identical descriptors and shape.
    pub fn reshard(
        &self,
        tensor: DistTensor,
        target: &DistAttr,
    ) -> Result<DistTensor, ReshardError> {
        let mut state = ReshardState::Unresolved;
        debug!(src = %tensor.attr(), dst = %target, ?state, "resolving reshard");

        let func = self.registry.find(tensor.attr(), target)?;
        state = ReshardState::Dispatched;
        debug!(strategy = func.name(), ?state, "strategy selected");

        state = ReshardState::Transforming;
        debug!(strategy = func.name(), ?state, "executing");
        let ctx = ReshardContext::new(self.comm.as_ref());
        let out = func.eval(&ctx, tensor, target)?;

        state = ReshardState::Resolved;
        debug!(strategy = func.name(), ?state, "reshard complete");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use ndmesh::mesh;

    use super::*;
    use crate::buffer::Buffer;
    use crate::comm::sim::SimWorld;
    use crate::funcs::SameStatusReshard;

    #[test]
    fn test_with_registry_limits_strategies() {
        let mut registry = ReshardFunctionRegistry::new();
        registry.register(SameStatusReshard);

        let comms = SimWorld::new(1).into_comms();
        let engine = Resharder::with_registry(registry, Arc::new(comms.into_iter().next().unwrap()));
        assert_eq!(engine.registry().names(), vec!["same_status"]);

        let mesh = mesh!(x = 1; [0]);
        let attr = DistAttr::replicated(mesh, 1);
        let tensor = DistTensor::new(
            Buffer::from_f32(vec![2], vec![1.0, 2.0]).unwrap(),
            vec![2],
            attr.clone(),
        )
        .unwrap();

        // The only registered strategy handles the identity.
        let out = engine.reshard(tensor, &attr).unwrap();
        assert_eq!(out.attr(), &attr);

        // Anything else has no strategy to land on.
        let partial = attr.clone().partial(0);
        let tensor = DistTensor::new(
            Buffer::from_f32(vec![2], vec![1.0, 2.0]).unwrap(),
            vec![2],
            partial.clone(),
        )
        .unwrap();
        assert!(matches!(
            engine.reshard(tensor, &attr),
            Err(ReshardError::NoSuitableReshardStrategy { .. })
        ));
    }
}
