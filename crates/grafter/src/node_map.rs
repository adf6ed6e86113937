// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use indexmap::{IndexMap, IndexSet};

use crate::node::{ProviderNode, ServiceEntry};
use crate::{DeclarationSite, Injector, Key};

/// Position of a node in its map.
pub(crate) type NodeId = usize;

/// A scope a lookup may fall back to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Scope<'a> {
    /// The map of an enclosing builder, for linked bundles.
    Building(&'a ServiceNodeMap),
    /// A built injector, for child scopes.
    Built(&'a Injector),
}

impl Scope<'_> {
    pub(crate) fn find(&self, key: &Key) -> Option<ServiceEntry> {
        match self {
            Self::Building(map) => map.get(key).map(ProviderNode::entry),
            Self::Built(injector) => injector.entry(key).cloned(),
        }
    }

    pub(crate) fn keys(&self) -> Vec<Key> {
        match self {
            Self::Building(map) => map.keys().cloned().collect(),
            Self::Built(injector) => injector.services().map(|descriptor| descriptor.key().clone()).collect(),
        }
    }
}

/// An export registered on a builder.
#[derive(Debug, Clone)]
pub(crate) struct Export {
    pub(crate) key: Key,
    pub(crate) internal: Key,
    pub(crate) site: DeclarationSite,
}

/// The provider nodes of one scope, in insertion order.
#[derive(Debug, Default)]
pub(crate) struct ServiceNodeMap {
    nodes: IndexMap<Key, ProviderNode>,
    required: IndexSet<Key>,
    exports: Vec<Export>,
}

impl ServiceNodeMap {
    /// Inserts a node. On a duplicate key the map is left unchanged and the rejected node is
    /// handed back.
    pub(crate) fn put(&mut self, node: ProviderNode) -> Result<NodeId, ProviderNode> {
        match self.nodes.entry(node.key().clone()) {
            indexmap::map::Entry::Occupied(_) => Err(node),
            indexmap::map::Entry::Vacant(entry) => {
                let id = entry.index();
                entry.insert(node);
                Ok(id)
            }
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Option<&ProviderNode> {
        self.nodes.get(key)
    }

    /// Looks `key` up locally, then in each ancestor, nearest first.
    pub(crate) fn get_recursive(&self, key: &Key, ancestors: &[Scope<'_>]) -> Option<ServiceEntry> {
        self.get(key)
            .map(ProviderNode::entry)
            .or_else(|| ancestors.iter().find_map(|scope| scope.find(key)))
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &Key> {
        self.nodes.keys()
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &ProviderNode> {
        self.nodes.values()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut ProviderNode> {
        self.nodes.values_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn into_nodes(self) -> impl Iterator<Item = ProviderNode> {
        self.nodes.into_values()
    }

    /// Marks `key` as demanded from the enclosing scope.
    pub(crate) fn require(&mut self, key: Key) {
        self.required.insert(key);
    }

    pub(crate) fn take_required(&mut self) -> IndexSet<Key> {
        std::mem::take(&mut self.required)
    }

    pub(crate) fn export(&mut self, export: Export) {
        self.exports.push(export);
    }

    pub(crate) fn take_exports(&mut self) -> Vec<Export> {
        std::mem::take(&mut self.exports)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::node::Strategy;
    use crate::{InstantiationMode, Provide};

    fn node<T: Send + Sync + 'static>(value: T) -> ProviderNode {
        ProviderNode::new(
            Key::of::<T>(),
            None,
            InstantiationMode::Singleton,
            Vec::new(),
            Strategy::Fixed(Arc::new(value)),
            DeclarationSite::caller(),
        )
    }

    #[test]
    fn duplicate_put_leaves_map_unchanged() {
        let mut map = ServiceNodeMap::default();
        assert_eq!(map.put(node(String::from("first"))).unwrap(), 0);
        assert_eq!(map.put(node(1_u8)).unwrap(), 1);

        let rejected = map.put(node(String::from("second"))).unwrap_err();

        assert_eq!(rejected.key(), &Key::of::<String>());
        assert_eq!(map.len(), 2);
        let kept = map.get(&Key::of::<String>()).unwrap();
        let value = kept.fixed_instance().and_then(|instance| instance.downcast_ref::<String>());
        assert_eq!(value.map(String::as_str), Some("first"));
    }

    #[test]
    fn insertion_order_is_kept() {
        let mut map = ServiceNodeMap::default();
        map.put(node(1_u32)).unwrap();
        map.put(node(1_u8)).unwrap();
        map.put(node(1_u16)).unwrap();

        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![Key::of::<u32>(), Key::of::<u8>(), Key::of::<u16>()]);
    }

    #[test]
    fn recursive_lookup_prefers_nearest_scope() {
        let mut outer = ServiceNodeMap::default();
        outer.put(node(1_u8)).unwrap();
        outer.put(node(1_u16)).unwrap();

        let mut middle = ServiceNodeMap::default();
        middle.put(node(2_u8)).unwrap();

        let mut inner = ServiceNodeMap::default();
        inner.put(node(3_u32)).unwrap();

        let ancestors = [Scope::Building(&middle), Scope::Building(&outer)];

        let local = inner.get_recursive(&Key::of::<u32>(), &ancestors).unwrap();
        assert!(Arc::ptr_eq(&local.handle, inner.get(&Key::of::<u32>()).unwrap().handle()));

        let nearest = inner.get_recursive(&Key::of::<u8>(), &ancestors).unwrap();
        assert!(Arc::ptr_eq(&nearest.handle, middle.get(&Key::of::<u8>()).unwrap().handle()));

        assert!(inner.get_recursive(&Key::of::<u16>(), &ancestors).is_some());
        assert!(inner.get_recursive(&Key::of::<u64>(), &ancestors).is_none());
        assert!(inner.get(&Key::of::<u8>()).is_none());
    }

    #[test]
    fn built_injectors_are_scopes() {
        let injector = Injector::builder()
            .provide(Provide::instance(5_u8))
            .unwrap()
            .build()
            .unwrap();

        let map = ServiceNodeMap::default();
        let scopes = [Scope::Built(&injector)];

        assert!(map.get_recursive(&Key::of::<u8>(), &scopes).is_some());
        assert_eq!(scopes[0].keys(), vec![Key::of::<u8>()]);
    }

    #[test]
    fn required_and_exports_are_taken_once() {
        let mut map = ServiceNodeMap::default();
        map.require(Key::of::<u8>());
        map.require(Key::of::<u8>());
        map.export(Export {
            key: Key::of::<u16>(),
            internal: Key::of::<u16>(),
            site: DeclarationSite::caller(),
        });

        assert_eq!(map.take_required().len(), 1);
        assert!(map.take_required().is_empty());
        assert_eq!(map.take_exports().len(), 1);
        assert!(map.take_exports().is_empty());
    }
}
