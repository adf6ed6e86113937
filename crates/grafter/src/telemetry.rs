// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! # Injector Telemetry
//!
//! Well-known field keys attached to the structured log events an injector emits when logging
//! is enabled through [`BuildOptions::enable_logs`][crate::BuildOptions] and the `logs`
//! feature.
//!
//! | Event | Level | Fields |
//! |---|---|---|
//! | `grafter.build.completed` | INFO | [`INJECTOR_NAME`], [`SERVICE_COUNT`], [`EXPORT_COUNT`], [`LINK_COUNT`] |
//! | `grafter.build.failed` | WARN | [`INJECTOR_NAME`], [`ERROR_KIND`], `error` |
//! | `grafter.node.materialized` | DEBUG | [`INJECTOR_NAME`], [`SERVICE_KEY`], [`INSTANTIATION_MODE`] |
//! | `grafter.node.cycle` | WARN | [`INJECTOR_NAME`], [`SERVICE_KEY`], [`CYCLE_PATH`] |
//!
//! # Conventions
//!
//! Keys are dot-separated and values are short, preferably `snake_case`.

use crate::error::{CyclicDependencyError, Error};
use crate::{InstantiationMode, Key};

/// Key used to annotate the name of the injector emitting an event.
pub const INJECTOR_NAME: &str = "grafter.injector.name";

/// Key used to annotate the service an event is about.
pub const SERVICE_KEY: &str = "grafter.service.key";

/// Key used to annotate the instantiation mode of a service.
///
/// Values are `singleton`, `lazy` or `prototype`.
pub const INSTANTIATION_MODE: &str = "grafter.instantiation.mode";

/// Key used to annotate the number of services an injector provides.
pub const SERVICE_COUNT: &str = "grafter.service.count";

/// Key used to annotate the number of services an injector exports.
pub const EXPORT_COUNT: &str = "grafter.export.count";

/// Key used to annotate the number of bundles linked into an injector.
pub const LINK_COUNT: &str = "grafter.link.count";

/// Key used to annotate the kind of a failure, e.g. `unresolved_dependency`.
pub const ERROR_KIND: &str = "grafter.error.kind";

/// Key used to annotate the keys along a dependency cycle.
pub const CYCLE_PATH: &str = "grafter.cycle.path";

#[derive(Debug, Clone)]
pub(crate) struct Telemetry {
    #[cfg(any(feature = "logs", test))]
    pub(crate) injector_name: std::borrow::Cow<'static, str>,
    #[cfg(any(feature = "logs", test))]
    pub(crate) logs_enabled: bool,
}

#[cfg_attr(
    not(any(feature = "logs", test)),
    expect(unused_variables, reason = "unused when logs are disabled")
)]
impl Telemetry {
    pub(crate) fn build_completed(&self, services: usize, exports: usize, links: usize) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: "grafter.build.completed",
                tracing::Level::INFO,
                grafter.injector.name = %self.injector_name,
                grafter.service.count = services,
                grafter.export.count = exports,
                grafter.link.count = links,
            );
        }
    }

    pub(crate) fn build_failed(&self, error: &Error) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: "grafter.build.failed",
                tracing::Level::WARN,
                grafter.injector.name = %self.injector_name,
                grafter.error.kind = error.kind(),
                error = %error,
            );
        }
    }

    pub(crate) fn materialized(&self, key: &Key, mode: InstantiationMode) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: "grafter.node.materialized",
                tracing::Level::DEBUG,
                grafter.injector.name = %self.injector_name,
                grafter.service.key = %key,
                grafter.instantiation.mode = mode.as_str(),
            );
        }
    }

    pub(crate) fn cycle(&self, key: &Key, error: &CyclicDependencyError) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: "grafter.node.cycle",
                tracing::Level::WARN,
                grafter.injector.name = %self.injector_name,
                grafter.service.key = %key,
                grafter.cycle.path = %error,
            );
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            #[cfg(any(feature = "logs", test))]
            injector_name: std::borrow::Cow::Borrowed(crate::options::DEFAULT_NAME),
            #[cfg(any(feature = "logs", test))]
            logs_enabled: false,
        }
    }
}
