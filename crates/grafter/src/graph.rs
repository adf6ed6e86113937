// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::dependency::{Dependency, Requirement};
use crate::error::UnresolvedDependencyError;
use crate::node::{ProviderNode, Resolution};
use crate::node_map::{Scope, ServiceNodeMap};

/// Resolves the dependencies of every node of one scope.
///
/// Nodes are visited in insertion order and their dependencies in declaration order, in a single
/// pass. A dependency is looked up in the scope itself first and then in each ancestor, nearest
/// first. The first required dependency that nothing provides aborts the pass.
pub(crate) struct DependencyGraph<'a, 's> {
    map: &'a mut ServiceNodeMap,
    ancestors: &'a [Scope<'s>],
}

impl<'a, 's> DependencyGraph<'a, 's> {
    pub(crate) fn new(map: &'a mut ServiceNodeMap, ancestors: &'a [Scope<'s>]) -> Self {
        Self { map, ancestors }
    }

    pub(crate) fn resolve(self) -> Result<(), UnresolvedDependencyError> {
        let mut plan = Vec::with_capacity(self.map.len());

        for node in self.map.nodes() {
            let mut slots = Vec::with_capacity(node.dependencies().len());
            for dependency in node.dependencies() {
                let slot = match dependency.requirement() {
                    Requirement::InjectionSite => Resolution::Site,
                    Requirement::Service(key) => match self.map.get_recursive(key, self.ancestors) {
                        Some(found) => Resolution::Node(found.handle),
                        None if dependency.is_optional() => Resolution::Absent,
                        None => return Err(self.unresolved(node, dependency)),
                    },
                };
                slots.push(slot);
            }
            plan.push(slots);
        }

        for (node, slots) in self.map.nodes_mut().zip(plan) {
            node.set_resolved(slots);
        }

        self.check_resolved();
        Ok(())
    }

    fn check_resolved(&self) {
        debug_assert!(
            self.map.nodes().all(ProviderNode::is_resolved),
            "every dependency slot is filled after resolution"
        );
    }

    fn unresolved(&self, node: &ProviderNode, missing: &Dependency) -> UnresolvedDependencyError {
        let provenance = missing.provenance();
        let parameters = node
            .dependencies()
            .iter()
            .map(|dependency| {
                if dependency.index() == missing.index() {
                    format!("-> {} <-", dependency.requirement())
                } else {
                    dependency.requirement().to_string()
                }
            })
            .collect();

        UnresolvedDependencyError::new(
            missing.key().cloned().unwrap_or_else(|| node.key().clone()),
            provenance.owner(),
            provenance.member(),
            provenance.kind(),
            missing.index(),
            parameters,
            self.map.keys().cloned().collect(),
        )
    }
}
