// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::error::{DeclarationError, DuplicateKeyError, Result};
use crate::node::ServiceEntry;
use crate::Key;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transform {
    Rebind { from: Key, to: Key },
    Remove(Key),
    Retain(Vec<Key>),
}

/// A transform applied to the services imported from another scope.
///
/// Wirings run in the order they are given. Each one must name keys that are among the
/// services still imported at that point.
///
/// # Examples
///
/// ```
/// use grafter::{Injector, Key, Provide, Wiring};
///
/// let shared = Injector::builder()
///     .provide(Provide::instance(String::from("db://primary")))?
///     .provide(Provide::instance(8080_u16))?
///     .export(Key::of::<String>())
///     .export(Key::of::<u16>())
///     .build()?;
///
/// let injector = Injector::builder()
///     .import(
///         &shared,
///         [
///             Wiring::rebind(Key::of::<String>(), Key::qualified::<String>("primary")),
///             Wiring::remove(Key::of::<u16>()),
///         ],
///     )?
///     .build()?;
///
/// assert!(injector.has_service(&Key::qualified::<String>("primary")));
/// assert!(!injector.has_service(&Key::of::<u16>()));
/// # Ok::<(), grafter::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wiring(Transform);

impl Wiring {
    /// Imports the service `from` under the key `to`, which must name the same type.
    #[must_use]
    pub fn rebind(from: Key, to: Key) -> Self {
        Self(Transform::Rebind { from, to })
    }

    /// Drops the service `key` from the import.
    #[must_use]
    pub fn remove(key: Key) -> Self {
        Self(Transform::Remove(key))
    }

    /// Keeps only the listed services.
    #[must_use]
    pub fn retain(keys: impl IntoIterator<Item = Key>) -> Self {
        Self(Transform::Retain(keys.into_iter().collect()))
    }
}

/// A service offered for import, under the key it will be imported as.
#[derive(Debug, Clone)]
pub(crate) struct Incoming {
    pub(crate) key: Key,
    pub(crate) entry: ServiceEntry,
}

impl Incoming {
    pub(crate) fn new(key: Key, entry: ServiceEntry) -> Self {
        Self { key, entry }
    }
}

/// Applies `wirings` in order and returns the services that survive.
pub(crate) fn apply(mut incoming: Vec<Incoming>, wirings: &[Wiring]) -> Result<Vec<Incoming>> {
    for Wiring(transform) in wirings {
        match transform {
            Transform::Rebind { from, to } => {
                let position = position(&incoming, from)?;
                if !from.same_type(to) {
                    return Err(DeclarationError::KeyTypeMismatch {
                        key: to.clone(),
                        produced: from.type_name(),
                    }
                    .into());
                }
                if let Some(existing) = incoming.iter().find(|service| service.key == *to) {
                    return Err(DuplicateKeyError::new(
                        to.clone(),
                        existing.entry.descriptor.site(),
                        incoming[position].entry.descriptor.site(),
                    )
                    .into());
                }
                incoming[position].key = to.clone();
            }
            Transform::Remove(key) => {
                let position = position(&incoming, key)?;
                incoming.remove(position);
            }
            Transform::Retain(keys) => {
                for key in keys {
                    position(&incoming, key)?;
                }
                incoming.retain(|service| keys.contains(&service.key));
            }
        }
    }

    Ok(incoming)
}

fn position(incoming: &[Incoming], key: &Key) -> std::result::Result<usize, DeclarationError> {
    incoming
        .iter()
        .position(|service| service.key == *key)
        .ok_or_else(|| DeclarationError::UnknownImport { key: key.clone() })
}
