// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Service identities.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A tag that distinguishes several services of the same type.
///
/// Two qualifiers are equal when their values are equal.
///
/// # Examples
///
/// ```
/// use grafter::Qualifier;
///
/// assert_eq!(Qualifier::new("london"), Qualifier::from("london"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier(Cow<'static, str>);

impl Qualifier {
    /// Creates a qualifier from its value.
    #[must_use]
    pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
        Self(value.into())
    }

    /// Returns the value of the qualifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Qualifier {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for Qualifier {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identity of a requested or provided service.
///
/// A key is the raw type of the service plus an optional [`Qualifier`]. Equality and hashing
/// consider only the [`TypeId`] and the qualifier; the type name is carried for messages.
///
/// # Examples
///
/// ```
/// use grafter::Key;
///
/// let plain = Key::of::<String>();
/// let london = Key::qualified::<String>("london");
///
/// assert_ne!(plain, london);
/// assert_eq!(london.without_qualifier(), plain);
/// assert_eq!(london.to_string(), "alloc::string::String@london");
/// ```
#[derive(Clone)]
pub struct Key {
    type_id: TypeId,
    type_name: &'static str,
    qualifier: Option<Qualifier>,
}

impl Key {
    /// Creates an unqualified key for `T`.
    #[must_use]
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            qualifier: None,
        }
    }

    /// Creates a key for `T` carrying the given qualifier.
    #[must_use]
    pub fn qualified<T: Any>(qualifier: impl Into<Qualifier>) -> Self {
        Self::of::<T>().with_qualifier(qualifier)
    }

    /// Returns a copy of this key with the qualifier replaced.
    #[must_use]
    pub fn with_qualifier(&self, qualifier: impl Into<Qualifier>) -> Self {
        Self {
            type_id: self.type_id,
            type_name: self.type_name,
            qualifier: Some(qualifier.into()),
        }
    }

    /// Returns a copy of this key without a qualifier.
    #[must_use]
    pub fn without_qualifier(&self) -> Self {
        Self {
            type_id: self.type_id,
            type_name: self.type_name,
            qualifier: None,
        }
    }

    /// Returns the [`TypeId`] of the service type.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the full name of the service type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the type name without its module path, e.g. `String` for `alloc::string::String`.
    ///
    /// Every path inside the name is shortened, so generic arguments, tuples and references read
    /// `Vec<String>`, `(u8, String)` and `&str`.
    #[must_use]
    pub fn simple_name(&self) -> String {
        self.type_name
            .split_inclusive(|c: char| !(c.is_alphanumeric() || c == '_' || c == ':'))
            .map(|piece| piece.rsplit("::").next().unwrap_or(piece))
            .collect()
    }

    /// Returns the qualifier, if any.
    #[must_use]
    pub fn qualifier(&self) -> Option<&Qualifier> {
        self.qualifier.as_ref()
    }

    /// Returns `true` if this key identifies a service of type `T`, regardless of qualifier.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Returns `true` if both keys name the same type, regardless of qualifiers.
    #[must_use]
    pub fn same_type(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.qualifier == other.qualifier
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.qualifier.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    // Type names keep sorted output readable; the type id breaks ties between equally named types.
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name
            .cmp(other.type_name)
            .then_with(|| self.type_id.cmp(&other.type_id))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{}@{q}", self.type_name),
            None => f.write_str(self.type_name),
        }
    }
}
