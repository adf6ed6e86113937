// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Compiled service nodes and their materialization.
//!
//! Every provider is published through a [`NodeHandle`] that is created with the provider and
//! filled exactly once when the provider is compiled. Nodes in other scopes hold the handle,
//! never the provider itself, so a scope can reference nodes that are compiled after it.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::arguments::{Argument, Arguments};
use crate::error::{BoxError, CyclicDependencyError, Error, Result};
use crate::telemetry::Telemetry;
use crate::{InjectionSite, InstantiationMode, Key};

/// A type-erased service instance.
pub(crate) type Instance = Arc<dyn Any + Send + Sync>;

/// Produces a service from its arguments.
pub(crate) type FactoryFn = Box<dyn Fn(&Arguments) -> std::result::Result<Instance, BoxError> + Send + Sync>;

/// Produces a service from an instance of its owner and its arguments.
pub(crate) type MemberFn = Box<dyn Fn(&Instance, &Arguments) -> std::result::Result<Instance, BoxError> + Send + Sync>;

pub(crate) type NodeHandle = Arc<NodeCell>;

pub(crate) fn factory_fn<F>(factory: F) -> FactoryFn
where
    F: Fn(&Arguments) -> std::result::Result<Instance, BoxError> + Send + Sync + 'static,
{
    Box::new(factory)
}

pub(crate) fn member_fn<F>(produce: F) -> MemberFn
where
    F: Fn(&Instance, &Arguments) -> std::result::Result<Instance, BoxError> + Send + Sync + 'static,
{
    Box::new(produce)
}

/// The published runtime counterpart of a provider.
pub(crate) struct NodeCell {
    key: Key,
    runtime: OnceLock<RuntimeNode>,
}

impl NodeCell {
    pub(crate) fn new(key: Key) -> NodeHandle {
        Arc::new(Self {
            key,
            runtime: OnceLock::new(),
        })
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    /// Publishes the compiled node. Returns `false` if the cell was already filled.
    pub(crate) fn publish(&self, node: RuntimeNode) -> bool {
        self.runtime.set(node).is_ok()
    }

    pub(crate) fn runtime(&self) -> Option<&RuntimeNode> {
        self.runtime.get()
    }

    /// Returns the instance for one request, materializing it if needed.
    pub(crate) fn instance(&self, site: &InjectionSite) -> Result<Instance> {
        match self.runtime.get() {
            Some(RuntimeNode::Singleton(memo) | RuntimeNode::Lazy(memo)) => memo.get_or_produce(self, site),
            Some(RuntimeNode::Prototype(producer)) => {
                let _active = producer.enter(self)?;
                producer.produce(&self.key, site)
            }
            Some(RuntimeNode::Delegate(target)) => target.instance(site),
            // Only reachable while a build is still compiling; built injectors are fully published.
            None => Err(Error::ServiceNotFound { key: self.key.clone() }),
        }
    }

    /// Whether a memoized instance exists behind this node.
    #[cfg(test)]
    pub(crate) fn is_materialized(&self) -> bool {
        match self.runtime.get() {
            Some(RuntimeNode::Singleton(memo) | RuntimeNode::Lazy(memo)) => memo.value.get().is_some(),
            Some(RuntimeNode::Delegate(target)) => target.is_materialized(),
            Some(RuntimeNode::Prototype(_)) | None => false,
        }
    }

    /// Whether materializing this node would create a lazy node that has no instance yet.
    ///
    /// Follows dependency, owner and delegate edges; nodes holding an instance end the walk.
    pub(crate) fn reaches_pending_lazy(&self) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![self];

        while let Some(cell) = pending.pop() {
            if !seen.insert(ptr::from_ref(cell)) {
                continue;
            }

            match cell.runtime.get() {
                Some(RuntimeNode::Lazy(memo)) if memo.value.get().is_none() => return true,
                Some(RuntimeNode::Singleton(memo) | RuntimeNode::Lazy(memo)) if memo.value.get().is_some() => {}
                Some(node) => pending.extend(node.edges().into_iter().map(|handle| &**handle)),
                None => {}
            }
        }

        false
    }
}

impl fmt::Debug for NodeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCell")
            .field("key", &self.key)
            .field("compiled", &self.runtime.get().is_some())
            .finish()
    }
}

/// A compiled node.
pub(crate) enum RuntimeNode {
    Singleton(Memo),
    Lazy(Memo),
    Prototype(Producer),
    Delegate(NodeHandle),
}

impl RuntimeNode {
    /// The nodes this node may request while materializing.
    pub(crate) fn edges(&self) -> Vec<&NodeHandle> {
        match self {
            Self::Singleton(memo) | Self::Lazy(memo) => memo.producer.as_ref().map(Producer::edges).unwrap_or_default(),
            Self::Prototype(producer) => producer.edges(),
            Self::Delegate(target) => vec![target],
        }
    }
}

/// A value computed at most once.
///
/// The first caller computes the value under the lock; callers arriving meanwhile block on the
/// lock and then observe the stored value. A failed computation stores nothing, so a later call
/// tries again.
pub(crate) struct Memo {
    value: OnceLock<Instance>,
    lock: Mutex<()>,
    producer: Option<Producer>,
}

impl Memo {
    pub(crate) fn new(producer: Producer) -> Self {
        Self {
            value: OnceLock::new(),
            lock: Mutex::new(()),
            producer: Some(producer),
        }
    }

    pub(crate) fn filled(instance: Instance) -> Self {
        Self {
            value: OnceLock::from(instance),
            lock: Mutex::new(()),
            producer: None,
        }
    }

    fn get_or_produce(&self, cell: &NodeCell, site: &InjectionSite) -> Result<Instance> {
        if let Some(value) = self.value.get() {
            return Ok(Arc::clone(value));
        }

        let Some(producer) = &self.producer else {
            return Err(Error::ServiceNotFound { key: cell.key.clone() });
        };

        // The guard is entered before the lock so that reentry fails instead of deadlocking.
        let _active = producer.enter(cell)?;
        let _lock = self.lock.lock();

        if let Some(value) = self.value.get() {
            return Ok(Arc::clone(value));
        }

        let value = producer.produce(&cell.key, site)?;
        Ok(Arc::clone(self.value.get_or_init(|| value)))
    }
}

pub(crate) enum Slot {
    Node(NodeHandle),
    Absent,
    Site,
}

pub(crate) enum Recipe {
    Factory(FactoryFn),
    Member { owner: Owner, produce: MemberFn },
}

/// Where an instance member gets its owner from.
pub(crate) enum Owner {
    /// The owner is a fixed instance, bound when the member was declared.
    Bound(Instance),
    /// The owner is produced on demand through its own node.
    Node(NodeHandle),
}

impl Owner {
    fn instance(&self) -> Result<Instance> {
        match self {
            Self::Bound(instance) => Ok(Arc::clone(instance)),
            Self::Node(handle) => handle.instance(&InjectionSite::direct(handle.key().clone())),
        }
    }
}

/// Materializes one service: resolves the current instance of every dependency and runs the
/// recipe.
pub(crate) struct Producer {
    mode: InstantiationMode,
    slots: Vec<Slot>,
    recipe: Recipe,
    telemetry: Telemetry,
}

impl Producer {
    pub(crate) fn new(mode: InstantiationMode, slots: Vec<Slot>, recipe: Recipe, telemetry: Telemetry) -> Self {
        Self {
            mode,
            slots,
            recipe,
            telemetry,
        }
    }

    fn edges(&self) -> Vec<&NodeHandle> {
        let owner = match &self.recipe {
            Recipe::Member {
                owner: Owner::Node(handle), ..
            } => Some(handle),
            _ => None,
        };

        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Node(handle) => Some(handle),
                Slot::Absent | Slot::Site => None,
            })
            .chain(owner)
            .collect()
    }

    fn enter(&self, cell: &NodeCell) -> Result<ActivationGuard> {
        ActivationGuard::enter(cell).map_err(|error| {
            self.telemetry.cycle(&cell.key, &error);
            Error::CyclicDependency(error)
        })
    }

    fn produce(&self, key: &Key, site: &InjectionSite) -> Result<Instance> {
        let mut values = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.iter().enumerate() {
            values.push(match slot {
                Slot::Node(handle) => {
                    let site = InjectionSite::dependency(handle.key().clone(), key.clone(), index);
                    Argument::Instance(handle.instance(&site)?)
                }
                Slot::Absent => Argument::Absent,
                Slot::Site => Argument::Site(site.clone()),
            });
        }

        let arguments = Arguments::new(key.clone(), values);
        let produced = match &self.recipe {
            Recipe::Factory(factory) => factory(&arguments),
            Recipe::Member { owner, produce } => produce(&owner.instance()?, &arguments),
        };

        let instance = produced.map_err(|source| Error::from_factory(key, source))?;
        self.telemetry.materialized(key, self.mode);
        Ok(instance)
    }
}

thread_local! {
    /// Nodes being materialized on this thread, outermost first.
    static ACTIVE: RefCell<Vec<(*const NodeCell, Key)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a node as being materialized on the current thread until dropped.
struct ActivationGuard {
    _not_send: PhantomData<*const ()>,
}

impl ActivationGuard {
    fn enter(cell: &NodeCell) -> std::result::Result<Self, CyclicDependencyError> {
        ACTIVE.with_borrow_mut(|active| {
            if let Some(start) = active.iter().position(|(entered, _)| ptr::eq(*entered, cell)) {
                let path = active
                    .iter()
                    .skip(start)
                    .map(|(_, key)| key.clone())
                    .chain(std::iter::once(cell.key.clone()))
                    .collect();
                return Err(CyclicDependencyError::new(path));
            }

            active.push((ptr::from_ref(cell), cell.key.clone()));
            Ok(Self { _not_send: PhantomData })
        })
    }
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        ACTIVE.with_borrow_mut(|active| {
            active.pop();
        });
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io;

    use testing_aids::{CallCounter, run_concurrently};

    use super::*;

    fn factory(f: impl Fn(&Arguments) -> std::result::Result<Instance, BoxError> + Send + Sync + 'static) -> Recipe {
        Recipe::Factory(factory_fn(f))
    }

    fn producer(mode: InstantiationMode, slots: Vec<Slot>, recipe: Recipe) -> Producer {
        Producer::new(mode, slots, recipe, Telemetry::default())
    }

    fn counting(counter: &CallCounter) -> Recipe {
        let counter = counter.clone();
        factory(move |_| Ok(Arc::new(counter.hit()) as Instance))
    }

    fn direct(cell: &NodeCell) -> InjectionSite {
        InjectionSite::direct(cell.key().clone())
    }

    #[test]
    fn singleton_computes_once() {
        let counter = CallCounter::new();
        let cell = NodeCell::new(Key::of::<usize>());
        assert!(cell.publish(RuntimeNode::Singleton(Memo::new(producer(
            InstantiationMode::Singleton,
            Vec::new(),
            counting(&counter)
        )))));

        assert!(!cell.is_materialized());
        let first = cell.instance(&direct(&cell)).unwrap();
        let second = cell.instance(&direct(&cell)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.count(), 1);
        assert!(cell.is_materialized());
    }

    #[test]
    fn prototype_computes_every_time() {
        let counter = CallCounter::new();
        let cell = NodeCell::new(Key::of::<usize>());
        cell.publish(RuntimeNode::Prototype(producer(
            InstantiationMode::Prototype,
            Vec::new(),
            counting(&counter),
        )));

        let first = cell.instance(&direct(&cell)).unwrap();
        let second = cell.instance(&direct(&cell)).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(counter.count(), 2);
        assert!(!cell.is_materialized());
    }

    #[test]
    fn publishing_twice_is_refused() {
        let cell = NodeCell::new(Key::of::<u8>());
        assert!(cell.publish(RuntimeNode::Singleton(Memo::filled(Arc::new(1_u8)))));
        assert!(!cell.publish(RuntimeNode::Singleton(Memo::filled(Arc::new(2_u8)))));
        assert!(cell.is_materialized());
    }

    #[test]
    fn uncompiled_node_is_not_found() {
        let cell = NodeCell::new(Key::of::<u8>());
        assert!(matches!(cell.instance(&direct(&cell)), Err(Error::ServiceNotFound { .. })));
    }

    #[test]
    fn failure_does_not_poison() {
        let counter = CallCounter::new();
        let calls = counter.clone();
        let cell = NodeCell::new(Key::of::<u8>());
        cell.publish(RuntimeNode::Lazy(Memo::new(producer(
            InstantiationMode::Lazy,
            Vec::new(),
            factory(move |_| {
                if calls.hit() == 0 {
                    Err(io::Error::other("not yet").into())
                } else {
                    Ok(Arc::new(7_u8))
                }
            }),
        ))));

        let error = cell.instance(&direct(&cell)).unwrap_err();
        assert!(matches!(error, Error::Materialization { .. }));
        assert!(!cell.is_materialized());

        let value = cell.instance(&direct(&cell)).unwrap();
        assert_eq!(value.downcast_ref::<u8>(), Some(&7));
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn reentry_is_a_cycle() {
        let a = NodeCell::new(Key::of::<u8>());
        let b = NodeCell::new(Key::of::<u16>());
        let pass = || factory(|_| Ok(Arc::new(()) as Instance));

        a.publish(RuntimeNode::Singleton(Memo::new(producer(
            InstantiationMode::Singleton,
            vec![Slot::Node(Arc::clone(&b))],
            pass(),
        ))));
        b.publish(RuntimeNode::Prototype(producer(
            InstantiationMode::Prototype,
            vec![Slot::Node(Arc::clone(&a))],
            pass(),
        )));

        let Err(Error::CyclicDependency(error)) = a.instance(&direct(&a)) else {
            panic!("expected a cycle");
        };
        assert_eq!(error.path(), &[Key::of::<u8>(), Key::of::<u16>(), Key::of::<u8>()]);

        // The guard stack unwinds on failure.
        ACTIVE.with_borrow(|active| assert!(active.is_empty()));
    }

    #[test]
    fn delegates_forward_to_target() {
        let target = NodeCell::new(Key::of::<u8>());
        target.publish(RuntimeNode::Singleton(Memo::filled(Arc::new(3_u8))));
        let delegate = NodeCell::new(Key::qualified::<u8>("alias"));
        delegate.publish(RuntimeNode::Delegate(Arc::clone(&target)));

        let via_delegate = delegate.instance(&direct(&delegate)).unwrap();
        let via_target = target.instance(&direct(&target)).unwrap();

        assert!(Arc::ptr_eq(&via_delegate, &via_target));
        assert_eq!(delegate.runtime().map(|node| node.edges().len()), Some(1));
    }

    #[test]
    fn members_receive_their_owner() {
        let owner = NodeCell::new(Key::of::<String>());
        owner.publish(RuntimeNode::Singleton(Memo::filled(Arc::new(String::from("owner")))));

        let member = NodeCell::new(Key::of::<usize>());
        member.publish(RuntimeNode::Lazy(Memo::new(producer(
            InstantiationMode::Lazy,
            Vec::new(),
            Recipe::Member {
                owner: Owner::Node(Arc::clone(&owner)),
                produce: member_fn(|owner, _| {
                    let owner = owner.downcast_ref::<String>().map_or(0, String::len);
                    Ok(Arc::new(owner))
                }),
            },
        ))));

        let value = member.instance(&direct(&member)).unwrap();
        assert_eq!(value.downcast_ref::<usize>(), Some(&5));
        assert_eq!(member.runtime().map(|node| node.edges().len()), Some(1));
    }

    #[test]
    fn pending_lazy_nodes_are_found_through_edges() {
        let lazy = NodeCell::new(Key::of::<u8>());
        lazy.publish(RuntimeNode::Lazy(Memo::new(producer(
            InstantiationMode::Lazy,
            Vec::new(),
            factory(|_| Ok(Arc::new(1_u8))),
        ))));
        let alias = NodeCell::new(Key::qualified::<u8>("alias"));
        alias.publish(RuntimeNode::Delegate(Arc::clone(&lazy)));
        let singleton = NodeCell::new(Key::of::<u16>());
        singleton.publish(RuntimeNode::Singleton(Memo::new(producer(
            InstantiationMode::Singleton,
            vec![Slot::Node(Arc::clone(&alias))],
            factory(|_| Ok(Arc::new(2_u16))),
        ))));
        let independent = NodeCell::new(Key::of::<u32>());
        independent.publish(RuntimeNode::Singleton(Memo::new(producer(
            InstantiationMode::Singleton,
            Vec::new(),
            factory(|_| Ok(Arc::new(3_u32))),
        ))));

        assert!(singleton.reaches_pending_lazy());
        assert!(!independent.reaches_pending_lazy());

        lazy.instance(&direct(&lazy)).unwrap();
        assert!(!singleton.reaches_pending_lazy());
    }

    #[test]
    fn concurrent_first_access_computes_once() {
        let counter = CallCounter::new();
        let cell = NodeCell::new(Key::of::<usize>());
        cell.publish(RuntimeNode::Singleton(Memo::new(producer(
            InstantiationMode::Singleton,
            Vec::new(),
            counting(&counter),
        ))));

        let results = run_concurrently(8, |_| cell.instance(&direct(&cell)).unwrap());

        assert_eq!(counter.count(), 1);
        assert!(results.iter().all(|value| Arc::ptr_eq(value, &results[0])));
    }
}
