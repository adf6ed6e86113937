// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use crate::telemetry::Telemetry;

/// Name given to injectors that are not named explicitly.
pub(crate) const DEFAULT_NAME: &str = "default";

/// Cycles are reported when they are first walked into, so a build never pays for a graph walk.
pub(crate) const DEFAULT_CYCLE_DETECTION: CycleDetection = CycleDetection::OnFirstAccess;

/// Singletons are created on first access unless asked otherwise.
pub(crate) const DEFAULT_EAGER_SINGLETONS: bool = false;

/// When cyclic dependencies are reported.
///
/// Materialization always guards against reentrancy on the current thread, whatever the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CycleDetection {
    /// Report a cycle when a request first walks into it.
    ///
    /// Services outside the cycle remain usable. Two threads entering the same cycle from
    /// different ends may block each other, since each holds the first-computation lock of the
    /// node it entered.
    #[default]
    OnFirstAccess,

    /// Walk the compiled graph at the end of the build and fail the build on any cycle.
    AtBuild,
}

/// Options applied when building an [`Injector`][crate::Injector].
///
/// # Examples
///
/// ```
/// use grafter::{BuildOptions, CycleDetection};
///
/// let options = BuildOptions::new()
///     .with_name("orders")
///     .with_cycle_detection(CycleDetection::AtBuild)
///     .with_eager_singletons(true);
///
/// assert_eq!(options.name(), "orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BuildOptions {
    name: Cow<'static, str>,
    description: Option<Cow<'static, str>>,
    cycle_detection: CycleDetection,
    eager_singletons: bool,
    logs_enabled: bool,
}

impl BuildOptions {
    /// Creates options with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: Cow::Borrowed(DEFAULT_NAME),
            description: None,
            cycle_detection: DEFAULT_CYCLE_DETECTION,
            eager_singletons: DEFAULT_EAGER_SINGLETONS,
            logs_enabled: false,
        }
    }

    /// Sets the injector name used in logs and descriptions. Prefer `snake_case`.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets a human readable description of the injector.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets when cyclic dependencies are reported.
    #[must_use]
    pub fn with_cycle_detection(mut self, cycle_detection: CycleDetection) -> Self {
        self.cycle_detection = cycle_detection;
        self
    }

    /// Creates every singleton service while building.
    ///
    /// Lazy and prototype services are unaffected, as are singletons of linked bundles, which
    /// follow the options of their own builder. A singleton whose creation would create a lazy
    /// service first, as its owner or through its dependencies, stays on demand.
    #[must_use]
    pub fn with_eager_singletons(mut self, eager: bool) -> Self {
        self.eager_singletons = eager;
        self
    }

    /// Enables structured logging of build and materialization events.
    #[must_use]
    #[cfg(any(feature = "logs", test))]
    pub fn enable_logs(mut self) -> Self {
        self.logs_enabled = true;
        self
    }

    /// The injector name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The injector description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// When cyclic dependencies are reported.
    #[must_use]
    pub fn cycle_detection(&self) -> CycleDetection {
        self.cycle_detection
    }

    /// Whether singletons are created while building.
    #[must_use]
    pub fn eager_singletons(&self) -> bool {
        self.eager_singletons
    }

    /// Whether structured logging is enabled.
    #[must_use]
    pub fn logs_enabled(&self) -> bool {
        self.logs_enabled
    }

    pub(crate) fn create_telemetry(&self) -> Telemetry {
        Telemetry {
            #[cfg(any(feature = "logs", test))]
            injector_name: self.name.clone(),
            #[cfg(any(feature = "logs", test))]
            logs_enabled: self.logs_enabled,
        }
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::new()
    }
}
