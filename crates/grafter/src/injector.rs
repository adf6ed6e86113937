// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::cycles;
use crate::dependency::MemberKind;
use crate::error::{DeclarationError, DuplicateKeyError, Error, Result, UnresolvedDependencyError};
use crate::graph::DependencyGraph;
use crate::node::{ProviderNode, ServiceEntry};
use crate::node_map::{Export, NodeId, Scope, ServiceNodeMap};
use crate::runtime::NodeHandle;
use crate::wiring::{self, Incoming, Wiring};
use crate::{BuildOptions, CycleDetection, DeclarationSite, InjectionSite, InstantiationMode, Key, Provide, Qualifier};

/// What an injector tells about one of its services, without materializing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub(crate) key: Key,
    pub(crate) description: Option<Cow<'static, str>>,
    pub(crate) mode: InstantiationMode,
    pub(crate) site: DeclarationSite,
}

impl ServiceDescriptor {
    pub(crate) fn new(
        key: Key,
        description: Option<Cow<'static, str>>,
        mode: InstantiationMode,
        site: DeclarationSite,
    ) -> Self {
        Self {
            key,
            description,
            mode,
            site,
        }
    }

    /// The key the service is provided under.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The description given when the service was declared.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// How instances of the service are shared.
    #[must_use]
    pub fn mode(&self) -> InstantiationMode {
        self.mode
    }

    /// Where the service was declared.
    #[must_use]
    pub fn site(&self) -> DeclarationSite {
        self.site
    }
}

/// A built, immutable set of services.
///
/// Cloning an injector is cheap; clones share the same services and therefore the same
/// singleton instances. Services are looked up locally first and then in the parent injector,
/// if the injector was created through [`Injector::child`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use grafter::{Dependency, Injector, Provide};
///
/// struct Greeter {
///     greeting: Arc<String>,
/// }
///
/// let injector = Injector::builder()
///     .provide(Provide::instance(String::from("hello")))?
///     .provide(
///         Provide::factory(|args| Ok(Greeter { greeting: args.get::<String>(0)? }))
///             .depends_on(Dependency::required::<String>()),
///     )?
///     .build()?;
///
/// let greeter = injector.use_service::<Greeter>()?;
/// assert_eq!(greeter.greeting.as_str(), "hello");
/// assert!(injector.get::<u32>()?.is_none());
/// # Ok::<(), grafter::Error>(())
/// ```
#[derive(Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

struct InjectorInner {
    options: BuildOptions,
    services: IndexMap<Key, ServiceEntry>,
    exports: IndexMap<Key, ServiceEntry>,
    parent: Option<Injector>,
}

impl Injector {
    /// Starts declaring the services of a new injector.
    #[must_use]
    pub fn builder() -> InjectorBuilder {
        InjectorBuilder::new()
    }

    /// Returns the unqualified service of type `T`, or `None` if nothing provides it.
    ///
    /// # Errors
    ///
    /// Returns an error if the service or one of its dependencies fails to materialize, or if
    /// materializing it walks into a dependency cycle.
    pub fn get<T: Any + Send + Sync>(&self) -> Result<Option<Arc<T>>> {
        self.get_by_key(&Key::of::<T>())
    }

    /// Returns the service of type `T` qualified with `qualifier`, or `None` if nothing
    /// provides it.
    ///
    /// # Errors
    ///
    /// See [`Injector::get`].
    pub fn get_qualified<T: Any + Send + Sync>(&self, qualifier: impl Into<Qualifier>) -> Result<Option<Arc<T>>> {
        self.get_by_key(&Key::qualified::<T>(qualifier))
    }

    /// Returns the service provided under `key` as a `T`, or `None` if nothing provides it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `key` does not name a `T`, and otherwise the errors of
    /// [`Injector::get`].
    pub fn get_by_key<T: Any + Send + Sync>(&self, key: &Key) -> Result<Option<Arc<T>>> {
        let Some(entry) = self.entry(key) else {
            return Ok(None);
        };

        let instance = entry.handle.instance(&InjectionSite::direct(key.clone()))?;
        instance.downcast::<T>().map(Some).map_err(|_instance| Error::TypeMismatch {
            key: key.clone(),
            expected: type_name::<T>(),
        })
    }

    /// Returns the unqualified service of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] if nothing provides it, and otherwise the errors of
    /// [`Injector::get`].
    pub fn use_service<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.use_key(&Key::of::<T>())
    }

    /// Returns the service of type `T` qualified with `qualifier`.
    ///
    /// # Errors
    ///
    /// See [`Injector::use_service`].
    pub fn use_qualified<T: Any + Send + Sync>(&self, qualifier: impl Into<Qualifier>) -> Result<Arc<T>> {
        self.use_key(&Key::qualified::<T>(qualifier))
    }

    /// Returns the service provided under `key` as a `T`.
    ///
    /// # Errors
    ///
    /// See [`Injector::use_service`] and [`Injector::get_by_key`].
    pub fn use_key<T: Any + Send + Sync>(&self, key: &Key) -> Result<Arc<T>> {
        self.get_by_key(key)?
            .ok_or_else(|| Error::ServiceNotFound { key: key.clone() })
    }

    /// Whether a service is provided under `key`, here or in a parent. Never materializes it.
    #[must_use]
    pub fn has_service(&self, key: &Key) -> bool {
        self.entry(key).is_some()
    }

    /// Describes the service provided under `key`, here or in a parent.
    #[must_use]
    pub fn descriptor(&self, key: &Key) -> Option<&ServiceDescriptor> {
        self.entry(key).map(|entry| &entry.descriptor)
    }

    /// The services of this injector in declaration order, parents excluded.
    ///
    /// Imported services appear where they were imported. Required keys and the exports of
    /// linked bundles are merged in while building, after every declared service.
    pub fn services(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.inner.services.values().map(|entry| &entry.descriptor)
    }

    /// The exported services in export order, under their export keys.
    pub fn exports(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.inner.exports.values().map(|entry| &entry.descriptor)
    }

    /// The injector name, from [`BuildOptions::with_name`].
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.options.name()
    }

    /// The injector description, from [`BuildOptions::with_description`].
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.inner.options.description()
    }

    /// The number of services of this injector, parents excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.services.len()
    }

    /// Whether this injector has no services of its own.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.services.is_empty()
    }

    /// The injector this one was created as a child of.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Starts declaring a child injector.
    ///
    /// The child sees every service of this injector and its ancestors, sharing their
    /// instances, and may shadow them with services of its own.
    #[must_use]
    pub fn child(&self) -> InjectorBuilder {
        InjectorBuilder {
            parent: Some(self.clone()),
            ..InjectorBuilder::new()
        }
    }

    pub(crate) fn entry(&self, key: &Key) -> Option<&ServiceEntry> {
        self.inner
            .services
            .get(key)
            .or_else(|| self.inner.parent.as_ref().and_then(|parent| parent.entry(key)))
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("name", &self.name())
            .field("services", &self.inner.services.keys().collect::<Vec<_>>())
            .field("exports", &self.inner.exports.keys().collect::<Vec<_>>())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Link {
    bundle: InjectorBuilder,
    wirings: Vec<Wiring>,
}

/// The compiled services of one builder, plus what the top-level build still has to do.
struct Assembly {
    services: IndexMap<Key, ServiceEntry>,
    exports: IndexMap<Key, ServiceEntry>,
    /// Every node compiled for this builder and its linked bundles.
    handles: Vec<NodeHandle>,
    eager: Vec<NodeHandle>,
    links: usize,
}

/// Collects declarations and builds an [`Injector`] from them.
///
/// The builder is consumed by [`InjectorBuilder::build`]; a declaration cannot be changed once
/// it was handed to the builder.
///
/// Declarations are checked as they arrive where possible: [`InjectorBuilder::provide`] and
/// [`InjectorBuilder::import`] fail on duplicate keys and invalid declarations. Dependencies,
/// required keys, exports and linked bundles are resolved by [`InjectorBuilder::build`].
///
/// # Examples
///
/// A bundle that needs a service from the scope it is linked into and exports one back:
///
/// ```
/// use grafter::{Dependency, Injector, Key, Provide};
///
/// struct Pool(usize);
///
/// let bundle = Injector::builder()
///     .require(Key::qualified::<usize>("pool_size"))
///     .provide(
///         Provide::factory(|args| Ok(Pool(*args.get::<usize>(0)?)))
///             .depends_on(Dependency::on(Key::qualified::<usize>("pool_size"))),
///     )?
///     .export(Key::of::<Pool>());
///
/// let injector = Injector::builder()
///     .provide(Provide::instance(8_usize).qualified("pool_size"))?
///     .link(bundle, [])
///     .build()?;
///
/// assert_eq!(injector.use_service::<Pool>()?.0, 8);
/// # Ok::<(), grafter::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct InjectorBuilder {
    options: BuildOptions,
    map: ServiceNodeMap,
    links: Vec<Link>,
    parent: Option<Injector>,
}

impl InjectorBuilder {
    /// Creates a builder with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the options the injector is built with.
    #[must_use]
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a declaration together with its members.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateKey`] if the declaration or one of its members uses a key that is
    /// already declared, in which case nothing of the declaration is added, and
    /// [`Error::Declaration`] if the declaration is invalid.
    pub fn provide(mut self, declaration: Provide) -> Result<Self> {
        let nodes = declaration.into_nodes()?;

        if let Some((existing, rejected)) = nodes
            .iter()
            .find_map(|node| self.map.get(node.key()).map(|existing| (existing, node)))
        {
            return Err(DuplicateKeyError::new(rejected.key().clone(), existing.site(), rejected.site()).into());
        }

        for node in nodes {
            self.put(node)?;
        }
        Ok(self)
    }

    /// Demands `key` from the scope the builder is linked into, or from the parent injector.
    ///
    /// The key must not be declared by this builder.
    #[must_use]
    pub fn require(mut self, key: Key) -> Self {
        self.map.require(key);
        self
    }

    /// Imports the exported services of a built injector, transformed by `wirings`.
    ///
    /// Imported services forward to the instances of `injector`; singletons are shared with it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Declaration`] if a wiring names a service that is not imported or
    /// changes its type, and [`Error::DuplicateKey`] if an imported key is already taken.
    pub fn import(mut self, injector: &Injector, wirings: impl IntoIterator<Item = Wiring>) -> Result<Self> {
        let wirings: Vec<_> = wirings.into_iter().collect();
        let incoming = injector
            .inner
            .exports
            .iter()
            .map(|(key, entry)| Incoming::new(key.clone(), entry.clone()))
            .collect();

        for service in wiring::apply(incoming, &wirings)? {
            self.put(ProviderNode::delegate(service.key, &service.entry))?;
        }
        Ok(self)
    }

    /// Links a bundle that is built together with this builder.
    ///
    /// The bundle resolves its dependencies against its own services first, then against this
    /// builder and its ancestors. Its exports, transformed by `wirings`, become services of this
    /// builder.
    #[must_use]
    pub fn link(mut self, bundle: Self, wirings: impl IntoIterator<Item = Wiring>) -> Self {
        self.links.push(Link {
            bundle,
            wirings: wirings.into_iter().collect(),
        });
        self
    }

    /// Exports the service `key` under its own key.
    #[must_use]
    #[track_caller]
    pub fn export(self, key: Key) -> Self {
        let export_key = key.clone();
        self.export_as(key, export_key)
    }

    /// Exports the service `key` under `export_key`, which must name the same type.
    #[must_use]
    #[track_caller]
    pub fn export_as(mut self, key: Key, export_key: Key) -> Self {
        self.map.export(Export {
            key: export_key,
            internal: key,
            site: DeclarationSite::caller(),
        });
        self
    }

    /// Resolves every dependency and builds the injector.
    ///
    /// Linked bundles are built first. With [`CycleDetection::AtBuild`] the compiled graph is
    /// checked for cycles, and with [`BuildOptions::with_eager_singletons`] singleton services
    /// that do not need a lazy service are created before the injector is returned.
    ///
    /// # Errors
    ///
    /// Returns the first problem found; no injector is built in that case:
    ///
    /// * [`Error::UnresolvedDependency`] if a required dependency, required key or export is
    ///   not provided,
    /// * [`Error::DuplicateKey`] or [`Error::Declaration`] for conflicting linked services,
    /// * [`Error::CyclicDependency`] if cycles are detected at build,
    /// * [`Error::Materialization`] if an eager singleton fails.
    pub fn build(self) -> Result<Injector> {
        let telemetry = self.options.create_telemetry();
        self.finish().inspect_err(|error| telemetry.build_failed(error))
    }

    fn finish(mut self) -> Result<Injector> {
        let options = self.options.clone();
        let parent = self.parent.take();

        let assembly = {
            let scopes: Vec<_> = parent.iter().map(Scope::Built).collect();
            self.assemble(&scopes)?
        };

        if options.cycle_detection() == CycleDetection::AtBuild {
            cycles::detect(&assembly.handles)?;
        }

        // Singletons that would create a lazy service first stay on demand.
        for handle in assembly.eager.iter().filter(|handle| !handle.reaches_pending_lazy()) {
            handle.instance(&InjectionSite::direct(handle.key().clone()))?;
        }

        options
            .create_telemetry()
            .build_completed(assembly.services.len(), assembly.exports.len(), assembly.links);

        Ok(Injector {
            inner: Arc::new(InjectorInner {
                options,
                services: assembly.services,
                exports: assembly.exports,
                parent,
            }),
        })
    }

    fn assemble(mut self, ancestors: &[Scope<'_>]) -> Result<Assembly> {
        self.import_required(ancestors)?;

        let mut handles = Vec::new();
        let mut eager = Vec::new();
        let mut links = 0;

        for Link { bundle, wirings } in std::mem::take(&mut self.links) {
            let mut scopes = Vec::with_capacity(ancestors.len() + 1);
            scopes.push(Scope::Building(&self.map));
            scopes.extend_from_slice(ancestors);
            let linked = bundle.assemble(&scopes)?;

            let incoming = linked
                .exports
                .into_iter()
                .map(|(key, entry)| Incoming::new(key, entry))
                .collect();
            for service in wiring::apply(incoming, &wirings)? {
                self.put(ProviderNode::delegate(service.key, &service.entry))?;
            }

            handles.extend(linked.handles);
            eager.extend(linked.eager);
            links += linked.links + 1;
        }

        DependencyGraph::new(&mut self.map, ancestors).resolve()?;
        let exports = self.plan_exports()?;

        let telemetry = self.options.create_telemetry();
        let eager_singletons = self.options.eager_singletons();
        let mut services = IndexMap::with_capacity(self.map.len());

        for node in self.map.into_nodes() {
            let is_eager = eager_singletons && node.is_eager_candidate();
            let entry = node.compile(&telemetry);
            handles.push(Arc::clone(&entry.handle));
            if is_eager {
                eager.push(Arc::clone(&entry.handle));
            }
            services.insert(entry.descriptor.key.clone(), entry);
        }

        let exports = exports
            .into_iter()
            .filter_map(|(key, internal)| {
                let entry = ProviderNode::delegate(key.clone(), services.get(&internal)?).compile(&telemetry);
                handles.push(Arc::clone(&entry.handle));
                Some((key, entry))
            })
            .collect();

        Ok(Assembly {
            services,
            exports,
            handles,
            eager,
            links,
        })
    }

    /// Turns every required key into a service forwarding to the enclosing scope.
    fn import_required(&mut self, ancestors: &[Scope<'_>]) -> Result<()> {
        let required = self.map.take_required();

        for (index, key) in required.iter().enumerate() {
            if let Some(declared) = self.map.get(key) {
                return Err(DeclarationError::RequiredKeyDeclared {
                    key: key.clone(),
                    site: declared.site(),
                }
                .into());
            }

            let Some(entry) = ancestors.iter().find_map(|scope| scope.find(key)) else {
                let parameters = required
                    .iter()
                    .map(|required| {
                        if required == key {
                            format!("-> {required} <-")
                        } else {
                            required.to_string()
                        }
                    })
                    .collect();
                return Err(UnresolvedDependencyError::new(
                    key.clone(),
                    self.options.name(),
                    "require",
                    MemberKind::Factory,
                    index,
                    parameters,
                    ancestors.first().map(Scope::keys).unwrap_or_default(),
                )
                .into());
            };

            self.put(ProviderNode::delegate(key.clone(), &entry))?;
        }

        Ok(())
    }

    /// Checks every export and returns the export keys with the internal keys they forward to.
    fn plan_exports(&mut self) -> Result<IndexMap<Key, Key>> {
        let mut planned: IndexMap<Key, Export> = IndexMap::new();

        for (index, export) in self.map.take_exports().into_iter().enumerate() {
            if self.map.get(&export.internal).is_none() {
                return Err(UnresolvedDependencyError::new(
                    export.internal.clone(),
                    self.options.name(),
                    "export",
                    MemberKind::Factory,
                    index,
                    vec![format!("-> {} <-", export.internal)],
                    self.map.keys().cloned().collect(),
                )
                .into());
            }

            if !export.key.same_type(&export.internal) {
                return Err(DeclarationError::KeyTypeMismatch {
                    key: export.key,
                    produced: export.internal.type_name(),
                }
                .into());
            }

            if let Some(existing) = planned.get(&export.key) {
                return Err(DuplicateKeyError::new(export.key, existing.site, export.site).into());
            }

            planned.insert(export.key.clone(), export);
        }

        Ok(planned
            .into_iter()
            .map(|(key, export)| (key, export.internal))
            .collect())
    }

    fn put(&mut self, node: ProviderNode) -> Result<NodeId> {
        self.map.put(node).map_err(|rejected| {
            let existing = self.map.get(rejected.key()).map_or(rejected.site(), ProviderNode::site);
            DuplicateKeyError::new(rejected.key().clone(), existing, rejected.site()).into()
        })
    }
}
