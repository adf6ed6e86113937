// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::dependency::Dependency;
use crate::runtime::{Instance, Memo, NodeCell, NodeHandle, Producer, Recipe, RuntimeNode, Slot};
use crate::telemetry::Telemetry;
use crate::{DeclarationSite, InstantiationMode, Key, ServiceDescriptor};

/// How a provider produces its service.
pub(crate) enum Strategy {
    /// A value supplied at declaration time.
    Fixed(Instance),
    /// A factory or member, run with the resolved dependencies.
    Produce(Recipe),
    /// Forwards to a node of another scope.
    Delegate(NodeHandle),
}

/// What a dependency slot was resolved to.
#[derive(Debug)]
pub(crate) enum Resolution {
    Node(NodeHandle),
    Absent,
    Site,
}

/// A published service: what the outside sees of it and the handle it is materialized through.
#[derive(Debug, Clone)]
pub(crate) struct ServiceEntry {
    pub(crate) descriptor: ServiceDescriptor,
    pub(crate) handle: NodeHandle,
}

/// A build-time node.
///
/// The key, dependencies and strategy are fixed at construction; only the resolved slots are
/// written afterwards, by the dependency graph.
pub(crate) struct ProviderNode {
    key: Key,
    description: Option<Cow<'static, str>>,
    mode: InstantiationMode,
    dependencies: Vec<Dependency>,
    resolved: Vec<Option<Resolution>>,
    strategy: Strategy,
    owner: Option<Key>,
    site: DeclarationSite,
    handle: NodeHandle,
}

impl ProviderNode {
    pub(crate) fn new(
        key: Key,
        description: Option<Cow<'static, str>>,
        mode: InstantiationMode,
        dependencies: Vec<Dependency>,
        strategy: Strategy,
        site: DeclarationSite,
    ) -> Self {
        let handle = NodeCell::new(key.clone());
        Self {
            key,
            description,
            mode,
            resolved: dependencies.iter().map(|_| None).collect(),
            dependencies,
            strategy,
            owner: None,
            site,
            handle,
        }
    }

    /// A node standing in for a service of another scope.
    pub(crate) fn delegate(key: Key, source: &ServiceEntry) -> Self {
        Self::new(
            key,
            source.descriptor.description.clone(),
            source.descriptor.mode,
            Vec::new(),
            Strategy::Delegate(Arc::clone(&source.handle)),
            source.descriptor.site,
        )
    }

    pub(crate) fn with_owner(mut self, owner: Key) -> Self {
        self.owner = Some(owner);
        self
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    pub(crate) fn mode(&self) -> InstantiationMode {
        self.mode
    }

    pub(crate) fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    #[cfg(test)]
    pub(crate) fn owner(&self) -> Option<&Key> {
        self.owner.as_ref()
    }

    pub(crate) fn site(&self) -> DeclarationSite {
        self.site
    }

    pub(crate) fn handle(&self) -> &NodeHandle {
        &self.handle
    }

    #[cfg(test)]
    pub(crate) fn is_fixed(&self) -> bool {
        matches!(self.strategy, Strategy::Fixed(_))
    }

    /// The fixed instance, if the node was declared with one.
    #[cfg(test)]
    pub(crate) fn fixed_instance(&self) -> Option<&Instance> {
        match &self.strategy {
            Strategy::Fixed(instance) => Some(instance),
            _ => None,
        }
    }

    pub(crate) fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(self.key.clone(), self.description.clone(), self.mode, self.site)
    }

    pub(crate) fn entry(&self) -> ServiceEntry {
        ServiceEntry {
            descriptor: self.descriptor(),
            handle: Arc::clone(&self.handle),
        }
    }

    pub(crate) fn set_resolved(&mut self, resolved: Vec<Resolution>) {
        debug_assert_eq!(resolved.len(), self.dependencies.len());
        self.resolved = resolved.into_iter().map(Some).collect();
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.resolved.len() == self.dependencies.len() && self.resolved.iter().all(Option::is_some)
    }

    /// Whether the node is created while building when eager singletons are enabled.
    pub(crate) fn is_eager_candidate(&self) -> bool {
        self.mode == InstantiationMode::Singleton && matches!(self.strategy, Strategy::Produce(_))
    }

    /// Turns the node into its runtime counterpart and publishes it through the node handle.
    pub(crate) fn compile(self, telemetry: &Telemetry) -> ServiceEntry {
        let descriptor = self.descriptor();

        let runtime = match self.strategy {
            Strategy::Fixed(instance) => RuntimeNode::Singleton(Memo::filled(instance)),
            Strategy::Delegate(target) => RuntimeNode::Delegate(target),
            Strategy::Produce(recipe) => {
                let slots = self
                    .resolved
                    .into_iter()
                    .map(|resolution| match resolution {
                        Some(Resolution::Node(handle)) => Slot::Node(handle),
                        Some(Resolution::Site) => Slot::Site,
                        Some(Resolution::Absent) | None => Slot::Absent,
                    })
                    .collect();
                let producer = Producer::new(self.mode, slots, recipe, telemetry.clone());

                match self.mode {
                    InstantiationMode::Singleton => RuntimeNode::Singleton(Memo::new(producer)),
                    InstantiationMode::Lazy => RuntimeNode::Lazy(Memo::new(producer)),
                    InstantiationMode::Prototype => RuntimeNode::Prototype(producer),
                }
            }
        };

        let published = self.handle.publish(runtime);
        debug_assert!(published, "{} was compiled twice", self.key);

        ServiceEntry {
            descriptor,
            handle: self.handle,
        }
    }
}

impl fmt::Debug for ProviderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategy = match self.strategy {
            Strategy::Fixed(_) => "fixed",
            Strategy::Produce(_) => "produce",
            Strategy::Delegate(_) => "delegate",
        };

        f.debug_struct("ProviderNode")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("strategy", &strategy)
            .field("dependencies", &self.dependencies.len())
            .field("owner", &self.owner)
            .field("site", &self.site)
            .finish_non_exhaustive()
    }
}
