// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

/// How often a service is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InstantiationMode {
    /// One instance for the lifetime of the injector.
    ///
    /// Created on first access, or while building when
    /// [`BuildOptions::eager_singletons`][crate::BuildOptions::eager_singletons] is set.
    #[default]
    Singleton,

    /// One instance, created on first access and never before.
    Lazy,

    /// A new instance for every request.
    Prototype,
}

impl InstantiationMode {
    /// Returns `true` for modes that keep a single instance.
    #[must_use]
    pub fn is_memoized(self) -> bool {
        !matches!(self, Self::Prototype)
    }

    /// A short lowercase name, used in messages and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Singleton => "singleton",
            Self::Lazy => "lazy",
            Self::Prototype => "prototype",
        }
    }
}

impl fmt::Display for InstantiationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
