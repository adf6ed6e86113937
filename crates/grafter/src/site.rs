// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::panic::Location;

use crate::Key;

/// The source location where a service was declared.
///
/// Captured through `#[track_caller]` by the declaration constructors, so error messages can
/// point at the offending line without any reflection.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeclarationSite {
    location: &'static Location<'static>,
}

impl DeclarationSite {
    /// Captures the location of the caller.
    #[track_caller]
    #[must_use]
    pub fn caller() -> Self {
        Self {
            location: Location::caller(),
        }
    }

    /// Returns the file of the declaration.
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.location.file()
    }

    /// Returns the line of the declaration.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.location.line()
    }
}

impl fmt::Debug for DeclarationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclarationSite({self})")
    }
}

impl fmt::Display for DeclarationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.location.file(), self.location.line(), self.location.column())
    }
}

/// The context of a single request for a service.
///
/// Prototype services may declare a dependency on the injection site to learn which key was
/// requested and on whose behalf. Singletons and lazy services are computed once and never
/// see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSite {
    key: Key,
    requester: Option<Key>,
    index: Option<usize>,
}

impl InjectionSite {
    /// A site for a service requested directly from an injector.
    #[must_use]
    pub fn direct(key: Key) -> Self {
        Self {
            key,
            requester: None,
            index: None,
        }
    }

    /// A site for a service injected into the dependency `index` of the service `requester`.
    #[must_use]
    pub fn dependency(key: Key, requester: Key, index: usize) -> Self {
        Self {
            key,
            requester: Some(requester),
            index: Some(index),
        }
    }

    /// The key that was requested.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The service the request is made for, `None` for direct injector lookups.
    #[must_use]
    pub fn requester(&self) -> Option<&Key> {
        self.requester.as_ref()
    }

    /// The dependency index in the requester, `None` for direct injector lookups.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.index
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_points_here() {
        let site = DeclarationSite::caller();
        assert!(site.file().ends_with("site.rs"));
        assert!(site.to_string().starts_with(site.file()));
    }

    #[test]
    fn injection_site_accessors() {
        let direct = InjectionSite::direct(Key::of::<u8>());
        assert_eq!(direct.key(), &Key::of::<u8>());
        assert!(direct.requester().is_none());
        assert!(direct.index().is_none());

        let nested = InjectionSite::dependency(Key::of::<u8>(), Key::of::<String>(), 2);
        assert_eq!(nested.requester(), Some(&Key::of::<String>()));
        assert_eq!(nested.index(), Some(2));
    }
}
