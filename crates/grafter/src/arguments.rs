// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::{Any, type_name};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::runtime::Instance;
use crate::{InjectionSite, Key};

#[derive(Debug)]
pub(crate) enum Argument {
    Instance(Instance),
    Absent,
    Site(InjectionSite),
}

/// The materialized dependencies handed to a factory, one per declared dependency.
///
/// Arguments are addressed by the index of the dependency they were declared for.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use grafter::{Dependency, Injector, Provide};
///
/// struct Greeting(String);
///
/// let injector = Injector::builder()
///     .provide(Provide::instance(String::from("world")))?
///     .provide(
///         Provide::factory(|args| Ok(Greeting(format!("hello {}", args.get::<String>(0)?))))
///             .depends_on(Dependency::required::<String>()),
///     )?
///     .build()?;
///
/// let greeting: Arc<Greeting> = injector.use_service()?;
/// assert_eq!(greeting.0, "hello world");
/// # Ok::<(), grafter::Error>(())
/// ```
#[derive(Debug)]
pub struct Arguments {
    requester: Key,
    values: Vec<Argument>,
}

impl Arguments {
    pub(crate) fn new(requester: Key, values: Vec<Argument>) -> Self {
        Self { requester, values }
    }

    /// The key of the service being materialized.
    #[must_use]
    pub fn requester(&self) -> &Key {
        &self.requester
    }

    /// The number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The required service at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] if there is no argument at `index`, if it is an absent
    /// optional service or the injection site, or if it is not a `T`.
    pub fn get<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>> {
        match self.optional(index)? {
            Some(value) => Ok(value),
            None => Err(Error::Argument {
                index,
                reason: format!("the optional {} is absent", type_name::<T>()),
            }),
        }
    }

    /// The optional service at `index`, `None` when nothing provides it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Argument`] if there is no argument at `index`, if it is the injection
    /// site, or if it is not a `T`.
    pub fn optional<T: Any + Send + Sync>(&self, index: usize) -> Result<Option<Arc<T>>> {
        match self.values.get(index) {
            Some(Argument::Instance(instance)) => Arc::clone(instance).downcast::<T>().map(Some).map_err(|_instance| Error::Argument {
                index,
                reason: format!("it is not a {}", type_name::<T>()),
            }),
            Some(Argument::Absent) => Ok(None),
            Some(Argument::Site(_)) => Err(Error::Argument {
                index,
                reason: "it is the injection site".to_string(),
            }),
            None => Err(Error::Argument {
                index,
                reason: format!("only {} arguments are declared", self.values.len()),
            }),
        }
    }

    /// The injection site of the current request, if the service depends on it.
    #[must_use]
    pub fn site(&self) -> Option<&InjectionSite> {
        self.values.iter().find_map(|value| match value {
            Argument::Site(site) => Some(site),
            _ => None,
        })
    }
}
