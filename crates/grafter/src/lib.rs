// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Dependency injection with a dependency graph resolved at build time.
//!
//! Services are declared as [`Provide`] declarations: fixed instances, factories, and members
//! of other services. An [`InjectorBuilder`] collects them, resolves every dependency against
//! the services it can see, and compiles the result into an immutable, thread-safe
//! [`Injector`]. Problems in the declarations surface when building, with enough context to
//! find the offending declaration; the injector itself only fails when a factory fails or when
//! a dependency cycle is walked into.
//!
//! # Core Types
//!
//! - [`Key`]: The type of a service plus an optional [`Qualifier`].
//! - [`Provide`] and [`Member`]: Declarations of services and of the services their instances
//!   expose.
//! - [`Dependency`]: What a declaration needs, possibly derived from a [`Signature`].
//! - [`InjectorBuilder`]: Consumes declarations, imports, links and exports, then builds.
//! - [`Injector`]: Looks services up at run time.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use grafter::{Dependency, Injector, Provide};
//!
//! struct Config {
//!     endpoint: String,
//! }
//!
//! struct Client {
//!     config: Arc<Config>,
//! }
//!
//! let injector = Injector::builder()
//!     .provide(Provide::instance(Config {
//!         endpoint: "https://example.com".to_string(),
//!     }))?
//!     .provide(
//!         Provide::factory(|args| Ok(Client { config: args.get(0)? }))
//!             .depends_on(Dependency::required::<Config>()),
//!     )?
//!     .build()?;
//!
//! let client = injector.use_service::<Client>()?;
//! assert_eq!(client.config.endpoint, "https://example.com");
//!
//! // Singletons are created once and shared.
//! assert!(Arc::ptr_eq(&client, &injector.use_service::<Client>()?));
//! # Ok::<(), grafter::Error>(())
//! ```
//!
//! # Instantiation Modes
//!
//! Every service has an [`InstantiationMode`]:
//!
//! - [`Singleton`][InstantiationMode::Singleton] services are created once, on first access
//!   or while building when [`BuildOptions::with_eager_singletons`] is set.
//! - [`Lazy`][InstantiationMode::Lazy] services are created once, on first access.
//! - [`Prototype`][InstantiationMode::Prototype] services are created on every request and may
//!   receive the [`InjectionSite`] they are requested for.
//!
//! Concurrent first requests of a shared service run its factory once; every caller observes
//! the same instance. A failed factory call stores nothing, so a later request tries again.
//!
//! # Scopes
//!
//! Injectors compose in three ways:
//!
//! - [`Injector::child`] starts a builder that sees every service of an existing injector.
//! - [`InjectorBuilder::import`] merges the exports of a built injector, transformed by
//!   [`Wiring`]s.
//! - [`InjectorBuilder::link`] builds a bundle together with the enclosing builder. The bundle
//!   resolves its dependencies against the enclosing services, declares the ones it demands with
//!   [`InjectorBuilder::require`] and hands back what it exports.
//!
//! # Cycles
//!
//! By default a dependency cycle is reported when a request first walks into it, and the
//! services outside the cycle remain usable. [`CycleDetection::AtBuild`] checks the whole graph
//! while building instead.
//!
//! # Features
//!
//! - `logs`: Emits structured [`tracing`](https://docs.rs/tracing) events once enabled
//!   through `BuildOptions::enable_logs`. See the [`telemetry`] module.
//! - `serde`: Serialization of [`BuildOptions`] and the enums it is made of.

mod arguments;
mod cycles;
mod dependency;
mod error;
mod graph;
mod injector;
mod key;
mod mode;
mod node;
mod node_map;
mod options;
mod provide;
mod runtime;
mod site;
mod wiring;

pub mod telemetry;

pub use arguments::Arguments;
pub use dependency::{Dependency, MemberKind, Parameter, ParameterType, Provenance, Requirement, Signature};
pub use error::{
    BoxError, CyclicDependencyError, DeclarationError, DuplicateKeyError, Error, Result, UnresolvedDependencyError,
};
pub use injector::{Injector, InjectorBuilder, ServiceDescriptor};
pub use key::{Key, Qualifier};
pub use mode::InstantiationMode;
pub use options::{BuildOptions, CycleDetection};
pub use provide::{Member, Provide};
pub use site::{DeclarationSite, InjectionSite};
pub use wiring::Wiring;
