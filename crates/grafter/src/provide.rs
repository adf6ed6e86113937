// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Service declarations.
//!
//! A [`Provide`] describes one service: how it is produced, under which key, in which
//! [`InstantiationMode`], what it depends on and which [`Member`]s it exposes as services of
//! their own. Declarations are consumed by
//! [`InjectorBuilder::provide`][crate::InjectorBuilder::provide] and cannot be changed
//! afterwards.

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::dependency::{Dependency, MemberKind, Requirement, Signature};
use crate::error::{BoxError, DeclarationError, DuplicateKeyError, Error, Result};
use crate::node::{ProviderNode, Strategy};
use crate::runtime::{FactoryFn, Instance, MemberFn, Owner, Recipe, factory_fn, member_fn};
use crate::{Arguments, DeclarationSite, InstantiationMode, Key, Qualifier};

enum Source {
    Instance(Instance),
    Factory(FactoryFn),
}

/// The declaration of a service.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use grafter::{Dependency, Injector, InstantiationMode, Provide};
///
/// struct Config {
///     endpoint: String,
/// }
///
/// struct Client {
///     endpoint: String,
/// }
///
/// let injector = Injector::builder()
///     .provide(Provide::instance(Config { endpoint: "https://example.com".to_string() }))?
///     .provide(
///         Provide::factory(|args| {
///             let config = args.get::<Config>(0)?;
///             Ok(Client { endpoint: config.endpoint.clone() })
///         })
///         .depends_on(Dependency::required::<Config>())
///         .describe("the outgoing client")
///         .lazy(),
///     )?
///     .build()?;
///
/// let client: Arc<Client> = injector.use_service()?;
/// assert_eq!(client.endpoint, "https://example.com");
/// # Ok::<(), grafter::Error>(())
/// ```
pub struct Provide {
    key: Key,
    produced: Key,
    description: Option<Cow<'static, str>>,
    mode: InstantiationMode,
    dependencies: std::result::Result<Vec<Dependency>, DeclarationError>,
    source: Source,
    members: Vec<Member>,
    site: DeclarationSite,
}

impl Provide {
    #[track_caller]
    fn new<T: Any>(source: Source) -> Self {
        Self {
            key: Key::of::<T>(),
            produced: Key::of::<T>(),
            description: None,
            mode: InstantiationMode::Singleton,
            dependencies: Ok(Vec::new()),
            source,
            members: Vec::new(),
            site: DeclarationSite::caller(),
        }
    }

    /// Declares a fixed instance.
    ///
    /// Fixed instances are always singletons.
    #[track_caller]
    #[must_use]
    pub fn instance<T: Any + Send + Sync>(value: T) -> Self {
        Self::new::<T>(Source::Instance(Arc::new(value)))
    }

    /// Declares a service produced by a factory.
    ///
    /// The factory receives one argument per declared dependency, see [`Arguments`].
    #[track_caller]
    #[must_use]
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Arguments) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::new::<T>(Source::Factory(factory_fn(move |args| {
            factory(args).map(|value| Arc::new(value) as Instance)
        })))
    }

    /// Declares a service produced by a factory whose dependencies are described by a
    /// [`Signature`].
    #[track_caller]
    #[must_use]
    pub fn with_signature<T, F>(signature: &Signature, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Arguments) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::factory(factory).signature(signature)
    }

    /// Replaces the dependencies with the parameters of `signature`.
    ///
    /// An unresolvable optional parameter fails the declaration when it is provided.
    #[must_use]
    pub fn signature(mut self, signature: &Signature) -> Self {
        self.dependencies = Dependency::from_signature(signature);
        self
    }

    /// Appends a dependency. Its argument index is the number of dependencies declared before it.
    #[must_use]
    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        if let Ok(dependencies) = &mut self.dependencies {
            let index = dependencies.len();
            dependencies.push(dependency.at(index));
        }
        self
    }

    /// Provides the service under another key of the same type.
    #[must_use]
    pub fn key(mut self, key: Key) -> Self {
        self.key = key;
        self
    }

    /// Provides the service under a qualified key.
    #[must_use]
    pub fn qualified(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.key = self.key.with_qualifier(qualifier);
        self
    }

    /// Attaches a human readable description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the instantiation mode.
    #[must_use]
    pub fn mode(mut self, mode: InstantiationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for [`InstantiationMode::Lazy`].
    #[must_use]
    pub fn lazy(self) -> Self {
        self.mode(InstantiationMode::Lazy)
    }

    /// Shorthand for [`InstantiationMode::Prototype`].
    #[must_use]
    pub fn prototype(self) -> Self {
        self.mode(InstantiationMode::Prototype)
    }

    /// Exposes a member of the service as a service of its own.
    #[must_use]
    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    /// Validates the declaration and turns it into the owner node followed by its member nodes.
    pub(crate) fn into_nodes(self) -> Result<Vec<ProviderNode>> {
        let Self {
            key,
            produced,
            description,
            mode,
            dependencies,
            source,
            members,
            site,
        } = self;

        check_key(&key, &produced)?;
        let dependencies = declared_by(dependencies?, produced.type_name(), "factory");
        check_site(&key, mode, &dependencies, site)?;

        let (strategy, bound) = match source {
            Source::Instance(instance) => {
                if mode != InstantiationMode::Singleton {
                    return Err(DeclarationError::FixedInstanceMode { key, mode, site }.into());
                }
                (Strategy::Fixed(Arc::clone(&instance)), Some(instance))
            }
            Source::Factory(factory) => (Strategy::Produce(Recipe::Factory(factory)), None),
        };

        let owner = ProviderNode::new(key, description, mode, dependencies, strategy, site);

        let mut nodes: Vec<ProviderNode> = Vec::with_capacity(members.len() + 1);
        for member in members {
            let node = member.into_node(&owner, bound.as_ref(), &produced)?;

            if node.key() == owner.key() {
                return Err(DuplicateKeyError::new(node.key().clone(), owner.site(), node.site()).into());
            }
            if nodes.iter().any(|other| other.key() == node.key()) {
                return Err(DeclarationError::DuplicateMember {
                    owner: owner.key().clone(),
                    key: node.key().clone(),
                    site: node.site(),
                }
                .into());
            }

            nodes.push(node);
        }

        nodes.insert(0, owner);
        Ok(nodes)
    }
}

impl fmt::Debug for Provide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provide")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("members", &self.members)
            .field("site", &self.site)
            .finish_non_exhaustive()
    }
}

enum MemberSource {
    Static(FactoryFn),
    Instance { owner: Key, produce: MemberFn },
}

/// A member of a declared service, exposed as a service of its own.
///
/// Instance members ([`Member::field`], [`Member::method`]) receive the owner's instance;
/// static members ([`Member::associated`]) never touch it. Unless set explicitly, an instance
/// member has the mode of its owner and a static member is a singleton.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use grafter::{Injector, Member, Provide};
///
/// struct Settings {
///     port: u16,
/// }
///
/// let injector = Injector::builder()
///     .provide(Provide::instance(Settings { port: 8080 }).member(Member::field("port", |s: &Settings| s.port)))?
///     .build()?;
///
/// let port: Arc<u16> = injector.use_service()?;
/// assert_eq!(*port, 8080);
/// # Ok::<(), grafter::Error>(())
/// ```
pub struct Member {
    name: &'static str,
    kind: MemberKind,
    key: Key,
    produced: Key,
    description: Option<Cow<'static, str>>,
    mode: Option<InstantiationMode>,
    dependencies: std::result::Result<Vec<Dependency>, DeclarationError>,
    source: MemberSource,
    site: DeclarationSite,
}

impl Member {
    #[track_caller]
    fn new<T: Any>(name: &'static str, kind: MemberKind, source: MemberSource) -> Self {
        Self {
            name,
            kind,
            key: Key::of::<T>(),
            produced: Key::of::<T>(),
            description: None,
            mode: None,
            dependencies: Ok(Vec::new()),
            source,
            site: DeclarationSite::caller(),
        }
    }

    /// A field of the owner, read from the owner's instance.
    #[track_caller]
    #[must_use]
    pub fn field<O, T>(name: &'static str, read: impl Fn(&O) -> T + Send + Sync + 'static) -> Self
    where
        O: Any + Send + Sync,
        T: Any + Send + Sync,
    {
        Self::method::<O, T>(name, move |owner, _| Ok(read(owner))).with_kind(MemberKind::Field)
    }

    /// A method of the owner, called on the owner's instance with the member's arguments.
    #[track_caller]
    #[must_use]
    pub fn method<O, T>(
        name: &'static str,
        call: impl Fn(&O, &Arguments) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    ) -> Self
    where
        O: Any + Send + Sync,
        T: Any + Send + Sync,
    {
        let produce = member_fn(move |owner, args| {
            let owner = owner.downcast_ref::<O>().ok_or_else(|| Error::TypeMismatch {
                key: Key::of::<O>(),
                expected: type_name::<O>(),
            })?;
            call(owner, args).map(|value| Arc::new(value) as Instance)
        });

        Self::new::<T>(
            name,
            MemberKind::Method,
            MemberSource::Instance {
                owner: Key::of::<O>(),
                produce,
            },
        )
    }

    /// An associated function of the owner type, which does not need an owner instance.
    #[track_caller]
    #[must_use]
    pub fn associated<T>(
        name: &'static str,
        factory: impl Fn(&Arguments) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    ) -> Self
    where
        T: Any + Send + Sync,
    {
        let factory = factory_fn(move |args| factory(args).map(|value| Arc::new(value) as Instance));
        Self::new::<T>(name, MemberKind::Factory, MemberSource::Static(factory))
    }

    fn with_kind(mut self, kind: MemberKind) -> Self {
        self.kind = kind;
        self
    }

    /// Replaces the dependencies with the parameters of `signature`.
    #[must_use]
    pub fn signature(mut self, signature: &Signature) -> Self {
        self.dependencies = Dependency::from_signature(signature);
        self
    }

    /// Appends a dependency. Its argument index is the number of dependencies declared before it.
    #[must_use]
    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        if let Ok(dependencies) = &mut self.dependencies {
            let index = dependencies.len();
            dependencies.push(dependency.at(index));
        }
        self
    }

    /// Provides the member under another key of the same type.
    #[must_use]
    pub fn key(mut self, key: Key) -> Self {
        self.key = key;
        self
    }

    /// Provides the member under a qualified key.
    #[must_use]
    pub fn qualified(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.key = self.key.with_qualifier(qualifier);
        self
    }

    /// Attaches a human readable description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the instantiation mode.
    #[must_use]
    pub fn mode(mut self, mode: InstantiationMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Shorthand for [`InstantiationMode::Lazy`].
    #[must_use]
    pub fn lazy(self) -> Self {
        self.mode(InstantiationMode::Lazy)
    }

    /// Shorthand for [`InstantiationMode::Prototype`].
    #[must_use]
    pub fn prototype(self) -> Self {
        self.mode(InstantiationMode::Prototype)
    }

    fn into_node(self, owner: &ProviderNode, bound: Option<&Instance>, owner_type: &Key) -> Result<ProviderNode> {
        check_key(&self.key, &self.produced)?;
        let dependencies = declared_by(self.dependencies?, owner_type.type_name(), self.name);

        let (mode, recipe) = match self.source {
            MemberSource::Static(factory) => (self.mode.unwrap_or_default(), Recipe::Factory(factory)),
            MemberSource::Instance { owner: expected, produce } => {
                if !expected.same_type(owner_type) {
                    return Err(DeclarationError::KeyTypeMismatch {
                        key: owner.key().clone(),
                        produced: expected.type_name(),
                    }
                    .into());
                }

                let mode = self.mode.unwrap_or_else(|| owner.mode());
                if owner.mode() == InstantiationMode::Prototype && mode.is_memoized() {
                    return Err(DeclarationError::ConflictingLifetimes {
                        owner: owner.key().clone(),
                        member: self.key,
                        mode,
                        site: self.site,
                    }
                    .into());
                }

                let owner = match bound {
                    Some(instance) => Owner::Bound(Arc::clone(instance)),
                    None => Owner::Node(Arc::clone(owner.handle())),
                };
                (mode, Recipe::Member { owner, produce })
            }
        };

        check_site(&self.key, mode, &dependencies, self.site)?;

        Ok(
            ProviderNode::new(self.key, self.description, mode, dependencies, Strategy::Produce(recipe), self.site)
                .with_owner(owner.key().clone()),
        )
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Member")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("site", &self.site)
            .finish_non_exhaustive()
    }
}

fn declared_by(dependencies: Vec<Dependency>, owner: &'static str, member: &'static str) -> Vec<Dependency> {
    dependencies
        .into_iter()
        .map(|dependency| dependency.declared_by(owner, member))
        .collect()
}

fn check_key(key: &Key, produced: &Key) -> std::result::Result<(), DeclarationError> {
    if key.same_type(produced) {
        Ok(())
    } else {
        Err(DeclarationError::KeyTypeMismatch {
            key: key.clone(),
            produced: produced.type_name(),
        })
    }
}

/// Only prototypes are materialized per request, so only they may see the injection site.
fn check_site(
    key: &Key,
    mode: InstantiationMode,
    dependencies: &[Dependency],
    site: DeclarationSite,
) -> std::result::Result<(), DeclarationError> {
    let wants_site = dependencies
        .iter()
        .any(|dependency| *dependency.requirement() == Requirement::InjectionSite);

    if wants_site && mode.is_memoized() {
        Err(DeclarationError::InjectionSiteOnSharedNode {
            key: key.clone(),
            mode,
            site,
        })
    } else {
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{Parameter, ParameterType};

    struct Settings {
        port: u16,
    }

    fn settings() -> Provide {
        Provide::instance(Settings { port: 80 })
    }

    #[test]
    fn owner_precedes_members() {
        let nodes = settings()
            .member(Member::field("port", |s: &Settings| s.port))
            .member(Member::associated("default_name", |_| Ok(String::from("svc"))))
            .into_nodes()
            .unwrap();

        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].key(), &Key::of::<Settings>());
        assert_eq!(nodes[1].key(), &Key::of::<u16>());
        assert_eq!(nodes[1].owner(), Some(&Key::of::<Settings>()));
        assert_eq!(nodes[2].key(), &Key::of::<String>());
    }

    #[test]
    fn declaration_site_is_the_caller() {
        let nodes = settings().into_nodes().unwrap();
        assert!(nodes[0].site().file().ends_with("provide.rs"));
    }

    #[rstest]
    #[case::lazy(InstantiationMode::Lazy)]
    #[case::prototype(InstantiationMode::Prototype)]
    fn fixed_instances_are_singletons(#[case] mode: InstantiationMode) {
        let error = settings().mode(mode).into_nodes().unwrap_err();
        assert!(matches!(error, Error::Declaration(DeclarationError::FixedInstanceMode { .. })));
    }

    #[test]
    fn key_must_match_produced_type() {
        let error = settings().key(Key::of::<u32>()).into_nodes().unwrap_err();
        assert!(matches!(
            error,
            Error::Declaration(DeclarationError::KeyTypeMismatch { ref key, .. }) if *key == Key::of::<u32>()
        ));
    }

    #[test]
    fn qualified_keeps_the_type() {
        let nodes = settings().qualified("edge").into_nodes().unwrap();
        assert_eq!(nodes[0].key(), &Key::qualified::<Settings>("edge"));
    }

    #[rstest]
    #[case::singleton(InstantiationMode::Singleton, false)]
    #[case::lazy(InstantiationMode::Lazy, false)]
    #[case::prototype(InstantiationMode::Prototype, true)]
    fn injection_site_needs_prototype(#[case] mode: InstantiationMode, #[case] accepted: bool) {
        let result = Provide::factory(|args| Ok(args.site().map(|site| site.key().to_string())))
            .depends_on(Dependency::site())
            .mode(mode)
            .into_nodes();

        if accepted {
            assert_eq!(result.unwrap().len(), 1);
        } else {
            assert!(matches!(
                result,
                Err(Error::Declaration(DeclarationError::InjectionSiteOnSharedNode { .. }))
            ));
        }
    }

    #[test]
    fn prototype_owner_rejects_memoized_instance_members() {
        let error = Provide::factory(|_| Ok(Settings { port: 1 }))
            .prototype()
            .member(Member::field("port", |s: &Settings| s.port).lazy())
            .into_nodes()
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Declaration(DeclarationError::ConflictingLifetimes { ref member, mode: InstantiationMode::Lazy, .. })
                if *member == Key::of::<u16>()
        ));
    }

    #[test]
    fn instance_members_inherit_the_owner_mode() {
        let nodes = Provide::factory(|_| Ok(Settings { port: 1 }))
            .prototype()
            .member(Member::field("port", |s: &Settings| s.port))
            .member(Member::associated("name", |_| Ok(String::new())))
            .into_nodes()
            .unwrap();

        assert_eq!(nodes[1].mode(), InstantiationMode::Prototype);
        assert_eq!(nodes[2].mode(), InstantiationMode::Singleton);
    }

    #[test]
    fn members_must_have_distinct_keys() {
        let error = settings()
            .member(Member::field("port", |s: &Settings| s.port))
            .member(Member::field("port_again", |s: &Settings| s.port))
            .into_nodes()
            .unwrap_err();

        assert!(matches!(error, Error::Declaration(DeclarationError::DuplicateMember { .. })));
    }

    #[test]
    fn member_cannot_shadow_its_owner() {
        let error = settings()
            .member(Member::associated("other", |_| Ok(Settings { port: 2 })))
            .into_nodes()
            .unwrap_err();

        assert!(matches!(error, Error::DuplicateKey(_)));
    }

    #[test]
    fn member_owner_type_must_match() {
        let error = settings()
            .member(Member::field("len", |s: &String| s.len()))
            .into_nodes()
            .unwrap_err();

        assert!(matches!(error, Error::Declaration(DeclarationError::KeyTypeMismatch { .. })));
    }

    #[test]
    fn signature_errors_surface_when_provided() {
        let signature = Signature::new("Client", "new", MemberKind::Constructor)
            .parameter(Parameter::new("maybe", ParameterType::Optional(None)));

        let error = Provide::with_signature(&signature, |_| Ok(1_u8)).into_nodes().unwrap_err();
        assert!(matches!(error, Error::Declaration(DeclarationError::UnresolvableOptional { .. })));
    }

    #[test]
    fn anonymous_dependencies_name_their_declaration() {
        let nodes = Provide::factory(|_| Ok(1_u8))
            .depends_on(Dependency::required::<u16>())
            .depends_on(Dependency::optional::<u32>())
            .into_nodes()
            .unwrap();

        let dependencies = nodes[0].dependencies();
        assert_eq!(dependencies[1].index(), 1);
        assert_eq!(dependencies[1].provenance().owner(), "u8");
        assert_eq!(dependencies[1].provenance().member(), "factory");
        assert_eq!(dependencies[1].provenance().parameter(), "arg1");
    }

    #[test]
    fn debug_output_names_the_key() {
        let debug = format!("{:?}", settings().member(Member::field("port", |s: &Settings| s.port)));
        assert!(debug.contains("Settings"));
        assert!(debug.contains("port"));
    }
}
