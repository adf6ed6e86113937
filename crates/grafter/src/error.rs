// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use thiserror::Error;

use crate::{DeclarationSite, Key, MemberKind};

/// A specialized `Result` type for injector operations that return a grafter
/// [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type user factories return.
///
/// Any error that is `Send + Sync` converts into it with `?`, including [`Error`][enum@Error]
/// itself, which is passed through unchanged when a factory fails.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error originating in the injector.
///
/// This is an umbrella type for everything that can go wrong while declaring services,
/// building an injector or requesting services from it. Build-time errors abort the build and
/// no partial injector is ever returned. Future versions may add additional enum variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Two services were declared under the same key in one scope.
    #[error(transparent)]
    DuplicateKey(#[from] DuplicateKeyError),

    /// A required dependency has no provider in the scope chain.
    #[error(transparent)]
    UnresolvedDependency(#[from] UnresolvedDependencyError),

    /// A declaration is malformed.
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// Materializing a service requires the service itself.
    #[error(transparent)]
    CyclicDependency(#[from] CyclicDependencyError),

    /// The requested service is not provided by the injector.
    #[error("no service is provided for {key}")]
    ServiceNotFound {
        /// The requested key.
        key: Key,
    },

    /// The service was requested as a type other than the one it produces.
    #[error("{key} cannot be retrieved as {expected}")]
    TypeMismatch {
        /// The requested key.
        key: Key,
        /// The type the caller asked for.
        expected: &'static str,
    },

    /// A factory returned an error.
    #[error("failed to materialize {key}: {source}")]
    Materialization {
        /// The service whose factory failed.
        key: Key,
        /// The error returned by the factory.
        source: BoxError,
    },

    /// A factory asked for an argument that is missing or of another type.
    #[error("argument {index} is unusable: {reason}")]
    Argument {
        /// The index of the argument.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
}

impl Error {
    /// Wraps an error returned by the factory of `key`.
    ///
    /// Injector errors raised inside the factory, for example by an argument accessor or a
    /// nested lookup, are passed through as they are.
    pub(crate) fn from_factory(key: &Key, source: BoxError) -> Self {
        match source.downcast::<Self>() {
            Ok(error) => *error,
            Err(source) => Self::Materialization { key: key.clone(), source },
        }
    }

    /// A short `snake_case` name of the error kind, used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateKey(_) => "duplicate_key",
            Self::UnresolvedDependency(_) => "unresolved_dependency",
            Self::Declaration(_) => "declaration",
            Self::CyclicDependency(_) => "cyclic_dependency",
            Self::ServiceNotFound { .. } => "service_not_found",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::Materialization { .. } => "materialization",
            Self::Argument { .. } => "argument",
        }
    }
}

/// A second service was declared under a key that is already taken in the same scope.
///
/// The scope is left unchanged: the service declared first stays in place.
#[derive(Debug, Clone, Error)]
#[error("{key} is declared twice, at {existing} and at {rejected}")]
pub struct DuplicateKeyError {
    key: Key,
    existing: DeclarationSite,
    rejected: DeclarationSite,
}

impl DuplicateKeyError {
    pub(crate) fn new(key: Key, existing: DeclarationSite, rejected: DeclarationSite) -> Self {
        Self { key, existing, rejected }
    }

    /// The contested key.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Where the service that was kept was declared.
    #[must_use]
    pub fn existing(&self) -> DeclarationSite {
        self.existing
    }

    /// Where the rejected service was declared.
    #[must_use]
    pub fn rejected(&self) -> DeclarationSite {
        self.rejected
    }
}

/// A required dependency could not be satisfied from the scope chain.
///
/// The message names the member and marks the unresolved parameter in its parameter list:
///
/// ```text
/// unresolved dependency on u32 (parameter 1) of constructor app::Client::new(String, -> u32 <-); available: [String, app::Config]
/// ```
#[derive(Debug, Clone, Error)]
#[error(
    "unresolved dependency on {key} (parameter {index}) of {kind} {owner}::{member}({}); available: [{}]",
    .parameters.join(", "),
    .available.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
)]
pub struct UnresolvedDependencyError {
    key: Key,
    owner: String,
    member: String,
    kind: MemberKind,
    index: usize,
    parameters: Vec<String>,
    available: Vec<Key>,
}

impl UnresolvedDependencyError {
    pub(crate) fn new(
        key: Key,
        owner: impl Into<String>,
        member: impl Into<String>,
        kind: MemberKind,
        index: usize,
        parameters: Vec<String>,
        available: Vec<Key>,
    ) -> Self {
        Self {
            key,
            owner: owner.into(),
            member: member.into(),
            kind,
            index,
            parameters,
            available,
        }
    }

    /// The key nothing provides.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The type declaring the member with the unresolved parameter.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The member with the unresolved parameter.
    #[must_use]
    pub fn member(&self) -> &str {
        &self.member
    }

    /// The kind of that member.
    #[must_use]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// The index of the unresolved parameter.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The parameter list of the member, with the unresolved parameter marked as `-> key <-`.
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// The keys that were available in the local scope.
    #[must_use]
    pub fn available(&self) -> &[Key] {
        &self.available
    }
}

/// A malformed declaration.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum DeclarationError {
    /// An optional parameter wraps a type that cannot be determined.
    #[error("the optional parameter {parameter} of {owner}::{member} has no resolvable inner type")]
    UnresolvableOptional {
        /// The type declaring the member.
        owner: String,
        /// The member.
        member: String,
        /// The parameter.
        parameter: String,
    },

    /// A singleton or lazy service depends on the per-request injection site.
    #[error("{key} is a {mode} service and cannot depend on the injection site, at {site}")]
    InjectionSiteOnSharedNode {
        /// The offending service.
        key: Key,
        /// Its instantiation mode.
        mode: crate::InstantiationMode,
        /// Where it was declared.
        site: DeclarationSite,
    },

    /// A prototype owner declares instance members that outlive a single owner instance.
    #[error("{member} is a {mode} member of the prototype {owner}, at {site}")]
    ConflictingLifetimes {
        /// The prototype owner.
        owner: Key,
        /// The offending member.
        member: Key,
        /// The mode of the member.
        mode: crate::InstantiationMode,
        /// Where the member was declared.
        site: DeclarationSite,
    },

    /// Two members of one owner provide the same key.
    #[error("{owner} declares two members providing {key}, at {site}")]
    DuplicateMember {
        /// The owner.
        owner: Key,
        /// The contested key.
        key: Key,
        /// Where the second member was declared.
        site: DeclarationSite,
    },

    /// A fixed instance was declared with a mode other than singleton.
    #[error("the instance {key} can only be a singleton, not {mode}, at {site}")]
    FixedInstanceMode {
        /// The offending service.
        key: Key,
        /// The requested mode.
        mode: crate::InstantiationMode,
        /// Where it was declared.
        site: DeclarationSite,
    },

    /// A key was assigned to a service of another type.
    #[error("{key} cannot name a service of type {produced}")]
    KeyTypeMismatch {
        /// The assigned key.
        key: Key,
        /// The type of the service.
        produced: &'static str,
    },

    /// A wiring transform names a key that is not among the imported services.
    #[error("{key} is not among the imported services")]
    UnknownImport {
        /// The unknown key.
        key: Key,
    },

    /// A linked bundle both requires a key from its enclosing scope and declares it.
    #[error("{key} is required from the enclosing scope but also declared locally, at {site}")]
    RequiredKeyDeclared {
        /// The contested key.
        key: Key,
        /// Where the local service was declared.
        site: DeclarationSite,
    },
}

/// Materializing a service requires the service itself.
#[derive(Debug, Clone, Error)]
#[error("cyclic dependency: {}", Path(.path))]
pub struct CyclicDependencyError {
    path: Vec<Key>,
}

impl CyclicDependencyError {
    pub(crate) fn new(path: Vec<Key>) -> Self {
        Self { path }
    }

    /// The keys along the cycle; the first and the last key are the same.
    #[must_use]
    pub fn path(&self) -> &[Key] {
        &self.path
    }
}

struct Path<'a>(&'a [Key]);

impl fmt::Display for Path<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::io;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, std::error::Error);
    assert_impl_all!(DuplicateKeyError: Send, Sync, Clone);
    assert_impl_all!(CyclicDependencyError: Send, Sync, Clone);

    #[test]
    fn factory_errors_are_wrapped() {
        let error = Error::from_factory(&Key::of::<u8>(), io::Error::other("boom").into());

        assert!(matches!(error, Error::Materialization { ref key, .. } if *key == Key::of::<u8>()));
        assert_eq!(error.to_string(), "failed to materialize u8: boom");
        assert_eq!(error.kind(), "materialization");
    }

    #[test]
    fn injector_errors_pass_through_factories() {
        let inner = Error::ServiceNotFound { key: Key::of::<u16>() };
        let error = Error::from_factory(&Key::of::<u8>(), inner.into());

        assert!(matches!(error, Error::ServiceNotFound { ref key } if *key == Key::of::<u16>()));
    }

    #[test]
    fn cycle_path_display() {
        let error = CyclicDependencyError::new(vec![Key::of::<u8>(), Key::of::<u16>(), Key::of::<u8>()]);
        assert_eq!(error.to_string(), "cyclic dependency: u8 -> u16 -> u8");
        assert_eq!(error.path().len(), 3);
    }

    #[test]
    fn unresolved_display_marks_parameter() {
        let error = UnresolvedDependencyError::new(
            Key::of::<u32>(),
            "Client",
            "new",
            MemberKind::Constructor,
            1,
            vec!["String".to_string(), "-> u32 <-".to_string()],
            vec![Key::of::<String>()],
        );

        assert_eq!(
            error.to_string(),
            "unresolved dependency on u32 (parameter 1) of constructor Client::new(String, -> u32 <-); available: [alloc::string::String]"
        );
        assert_eq!(error.owner(), "Client");
        assert_eq!(error.index(), 1);
    }

    #[test]
    fn kinds_are_snake_case() {
        let error: Error = CyclicDependencyError::new(vec![]).into();
        assert_eq!(error.kind(), "cyclic_dependency");

        let error: Error = DeclarationError::UnknownImport { key: Key::of::<u8>() }.into();
        assert_eq!(error.kind(), "declaration");
        assert_eq!(error.to_string(), "u8 is not among the imported services");
    }
}
