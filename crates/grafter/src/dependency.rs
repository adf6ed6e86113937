// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Dependency descriptors and the signatures they are extracted from.
//!
//! The injector never inspects code. Whatever discovers providers (hand-written declarations,
//! a macro, a code generator) describes each constructor, factory, method or field as a
//! [`Signature`], and [`Dependency::from_signature`] turns it into one [`Dependency`] per
//! parameter.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

use crate::Key;
use crate::error::DeclarationError;

/// The kind of member a signature describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A constructor of the owner type.
    Constructor,
    /// A free-standing or associated factory function.
    Factory,
    /// A method of the owner type.
    Method,
    /// A field of the owner type.
    Field,
}

impl MemberKind {
    /// A short lowercase name, used in messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constructor => "constructor",
            Self::Factory => "factory",
            Self::Method => "method",
            Self::Field => "field",
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The declared type of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterType {
    /// A plain service.
    Service(Key),

    /// An optional wrapper around a service.
    ///
    /// `None` stands for a wrapper whose inner type could not be determined, which is a
    /// declaration error.
    Optional(Option<Key>),

    /// The per-request [`InjectionSite`][crate::InjectionSite].
    InjectionSite,
}

/// One parameter of a [`Signature`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    name: Cow<'static, str>,
    ty: ParameterType,
}

impl Parameter {
    /// Creates a parameter.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>, ty: ParameterType) -> Self {
        Self { name: name.into(), ty }
    }

    /// A parameter of type `T`.
    #[must_use]
    pub fn of<T: Any>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, ParameterType::Service(Key::of::<T>()))
    }

    /// A parameter of type `Option<T>`.
    #[must_use]
    pub fn optional<T: Any>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, ParameterType::Optional(Some(Key::of::<T>())))
    }

    /// The parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared parameter type.
    #[must_use]
    pub fn ty(&self) -> &ParameterType {
        &self.ty
    }
}

/// An already extracted description of a constructor, factory, method or field.
///
/// # Examples
///
/// ```
/// use grafter::{Dependency, MemberKind, Parameter, Signature};
///
/// let signature = Signature::new("Client", "new", MemberKind::Constructor)
///     .parameter(Parameter::of::<String>("endpoint"))
///     .parameter(Parameter::optional::<u16>("port"));
///
/// let dependencies = Dependency::from_signature(&signature)?;
/// assert_eq!(dependencies.len(), 2);
/// assert!(dependencies[1].is_optional());
/// # Ok::<(), grafter::DeclarationError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    owner: Cow<'static, str>,
    member: Cow<'static, str>,
    kind: MemberKind,
    parameters: Vec<Parameter>,
}

impl Signature {
    /// Creates a signature without parameters.
    #[must_use]
    pub fn new(owner: impl Into<Cow<'static, str>>, member: impl Into<Cow<'static, str>>, kind: MemberKind) -> Self {
        Self {
            owner: owner.into(),
            member: member.into(),
            kind,
            parameters: Vec::new(),
        }
    }

    /// Appends a parameter.
    #[must_use]
    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// The type declaring the member.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The member name.
    #[must_use]
    pub fn member(&self) -> &str {
        &self.member
    }

    /// The member kind.
    #[must_use]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// The parameters in declaration order.
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }
}

/// Where a dependency was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    owner: Cow<'static, str>,
    member: Cow<'static, str>,
    kind: MemberKind,
    parameter: Cow<'static, str>,
}

impl Provenance {
    fn new(signature: &Signature, parameter: &Parameter) -> Self {
        Self {
            owner: signature.owner.clone(),
            member: signature.member.clone(),
            kind: signature.kind,
            parameter: parameter.name.clone(),
        }
    }

    fn anonymous(index: usize) -> Self {
        Self {
            owner: Cow::Borrowed(""),
            member: Cow::Borrowed(""),
            kind: MemberKind::Factory,
            parameter: Cow::Owned(format!("arg{index}")),
        }
    }

    /// The type declaring the member.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The member name.
    #[must_use]
    pub fn member(&self) -> &str {
        &self.member
    }

    /// The member kind.
    #[must_use]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// The parameter name.
    #[must_use]
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    fn or_declared_by(mut self, owner: &'static str, member: &'static str) -> Self {
        if self.owner.is_empty() {
            self.owner = Cow::Borrowed(owner);
        }
        if self.member.is_empty() {
            self.member = Cow::Borrowed(member);
        }
        self
    }
}

/// What a dependency needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// A service with the given key.
    Service(Key),
    /// The per-request injection site.
    InjectionSite,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(key) => fmt::Display::fmt(key, f),
            Self::InjectionSite => f.write_str("InjectionSite"),
        }
    }
}

/// One required input of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    index: usize,
    requirement: Requirement,
    optional: bool,
    provenance: Provenance,
}

impl Dependency {
    /// Extracts one dependency per parameter of `signature`.
    ///
    /// # Errors
    ///
    /// Returns [`DeclarationError::UnresolvableOptional`] for an optional parameter whose
    /// inner type is unknown.
    pub fn from_signature(signature: &Signature) -> Result<Vec<Self>, DeclarationError> {
        signature
            .parameters
            .iter()
            .enumerate()
            .map(|(index, parameter)| {
                let (requirement, optional) = match &parameter.ty {
                    ParameterType::Service(key) => (Requirement::Service(key.clone()), false),
                    ParameterType::Optional(Some(key)) => (Requirement::Service(key.clone()), true),
                    ParameterType::Optional(None) => {
                        return Err(DeclarationError::UnresolvableOptional {
                            owner: signature.owner.to_string(),
                            member: signature.member.to_string(),
                            parameter: parameter.name.to_string(),
                        });
                    }
                    ParameterType::InjectionSite => (Requirement::InjectionSite, false),
                };

                Ok(Self {
                    index,
                    requirement,
                    optional,
                    provenance: Provenance::new(signature, parameter),
                })
            })
            .collect()
    }

    /// A required dependency on `T`, for declarations made without a signature.
    #[must_use]
    pub fn required<T: Any>() -> Self {
        Self::on(Key::of::<T>())
    }

    /// A required dependency on `key`, for declarations made without a signature.
    #[must_use]
    pub fn on(key: Key) -> Self {
        Self {
            index: 0,
            requirement: Requirement::Service(key),
            optional: false,
            provenance: Provenance::anonymous(0),
        }
    }

    /// An optional dependency on `T`, for declarations made without a signature.
    #[must_use]
    pub fn optional<T: Any>() -> Self {
        Self {
            optional: true,
            ..Self::required::<T>()
        }
    }

    /// A dependency on the injection site, for declarations made without a signature.
    #[must_use]
    pub fn site() -> Self {
        Self {
            index: 0,
            requirement: Requirement::InjectionSite,
            optional: false,
            provenance: Provenance::anonymous(0),
        }
    }

    pub(crate) fn at(mut self, index: usize) -> Self {
        if self.provenance.member.is_empty() {
            self.provenance.parameter = Cow::Owned(format!("arg{index}"));
        }
        self.index = index;
        self
    }

    /// Fills in the owner and member of a dependency declared without a signature.
    pub(crate) fn declared_by(mut self, owner: &'static str, member: &'static str) -> Self {
        self.provenance = self.provenance.or_declared_by(owner, member);
        self
    }

    /// The position of the parameter.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// What the dependency needs.
    #[must_use]
    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    /// The key of the required service, `None` for the injection site.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match &self.requirement {
            Requirement::Service(key) => Some(key),
            Requirement::InjectionSite => None,
        }
    }

    /// Whether the dependency may be left unsatisfied.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Where the dependency was declared.
    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}
