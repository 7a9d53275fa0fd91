//! Service registry mapping capabilities to factories
//!
//! A [`ServiceCollection`] records bindings and is frozen into a
//! [`ServiceProvider`] with [`ServiceCollection::build`]. The set of
//! capabilities is fixed once built, so every singleton cell is allocated up
//! front and no lock is needed around the registry itself.

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::error::{FixtureError, Result};

/// A type-erased constructed instance
pub(crate) type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&ServiceProvider) -> Result<Instance> + Send + Sync>;

/// Name of an abstract dependency role
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(Cow<'static, str>);

impl Capability {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Capability {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// The loaded configuration snapshot
pub const CONFIGURATION: Capability = Capability::from_static("configuration");

/// The shared stand-in database
pub const DATABASE_RESOURCE: Capability = Capability::from_static("database resource");

/// How often a binding's factory runs when resolved from a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// Constructed at most once per provider
    Singleton,
    /// Constructed on every provider-level resolution
    Transient,
}

#[derive(Clone)]
struct Registration {
    lifetime: Lifetime,
    factory: Factory,
}

/// Mutable set of bindings, frozen with [`ServiceCollection::build`]
#[derive(Default)]
pub struct ServiceCollection {
    registrations: HashMap<Capability, Registration>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already constructed value as a singleton
    pub fn add_instance<T>(&mut self, capability: Capability, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        let instance: Instance = Arc::new(value);
        self.register(
            capability,
            Lifetime::Singleton,
            Arc::new(move |_: &ServiceProvider| -> Result<Instance> {
                Ok(Arc::clone(&instance))
            }),
        )
    }

    pub fn add_singleton<T, F>(&mut self, capability: Capability, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
    {
        self.register(capability, Lifetime::Singleton, erase(factory))
    }

    pub fn add_transient<T, F>(&mut self, capability: Capability, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
    {
        self.register(capability, Lifetime::Transient, erase(factory))
    }

    fn register(
        &mut self,
        capability: Capability,
        lifetime: Lifetime,
        factory: Factory,
    ) -> &mut Self {
        tracing::debug!("Registering {:?} binding for '{}'", lifetime, capability);
        let previous = self
            .registrations
            .insert(capability.clone(), Registration { lifetime, factory });
        if previous.is_some() {
            tracing::warn!("Replaced existing binding for '{}'", capability);
        }
        self
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.registrations.contains_key(capability)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Freeze the bindings into a provider
    pub fn build(self) -> ServiceProvider {
        let singletons = self
            .registrations
            .iter()
            .filter(|(_, registration)| registration.lifetime == Lifetime::Singleton)
            .map(|(capability, _)| (capability.clone(), OnceLock::new()))
            .collect();

        ServiceProvider {
            registrations: self.registrations,
            singletons,
        }
    }
}

fn erase<T, F>(factory: F) -> Factory
where
    T: Send + Sync + 'static,
    F: Fn(&ServiceProvider) -> Result<T> + Send + Sync + 'static,
{
    Arc::new(move |provider: &ServiceProvider| {
        factory(provider).map(|value| Arc::new(value) as Instance)
    })
}

thread_local! {
    /// Capabilities under construction on this thread, tagged by provider
    static CONSTRUCTING: RefCell<Vec<(usize, Capability)>> = const { RefCell::new(Vec::new()) };
}

/// Marks a capability as under construction until dropped
struct ConstructionGuard;

impl ConstructionGuard {
    /// Push `capability`, failing if this provider is already building it
    fn enter(provider: usize, capability: &Capability) -> Result<Self> {
        CONSTRUCTING.with(|stack| {
            let mut stack = stack.borrow_mut();
            let start = stack
                .iter()
                .position(|(owner, pending)| *owner == provider && pending == capability);
            if let Some(start) = start {
                let chain = stack[start..]
                    .iter()
                    .filter(|(owner, _)| *owner == provider)
                    .map(|(_, pending)| pending.as_str())
                    .chain(std::iter::once(capability.as_str()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(FixtureError::CircularDependency(chain));
            }
            stack.push((provider, capability.clone()));
            Ok(ConstructionGuard)
        })
    }
}

impl Drop for ConstructionGuard {
    fn drop(&mut self) {
        CONSTRUCTING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Frozen registry that constructs instances on demand
pub struct ServiceProvider {
    registrations: HashMap<Capability, Registration>,
    singletons: HashMap<Capability, OnceLock<Result<Instance>>>,
}

impl ServiceProvider {
    /// Resolve a capability to a value of type `T`
    ///
    /// `T` is the exact type the factory produced; trait objects are usually
    /// registered as `Arc<dyn Trait>` so that the clone handed out here shares
    /// the underlying instance.
    pub fn resolve<T>(&self, capability: &Capability) -> Result<T>
    where
        T: Clone + 'static,
    {
        let instance = self.resolve_instance(capability)?;
        downcast(capability, &instance)
    }

    pub(crate) fn resolve_instance(&self, capability: &Capability) -> Result<Instance> {
        let registration = self
            .registrations
            .get(capability)
            .ok_or_else(|| FixtureError::UnresolvedDependency(capability.to_string()))?;

        // Checked before touching the singleton cell: re-entering get_or_init
        // from the same thread would never return
        let _guard = ConstructionGuard::enter(self as *const Self as usize, capability)?;

        match registration.lifetime {
            Lifetime::Singleton => {
                let cell = self
                    .singletons
                    .get(capability)
                    .ok_or_else(|| FixtureError::UnresolvedDependency(capability.to_string()))?;
                cell.get_or_init(|| self.construct(capability, registration))
                    .clone()
            }
            Lifetime::Transient => self.construct(capability, registration),
        }
    }

    fn construct(&self, capability: &Capability, registration: &Registration) -> Result<Instance> {
        tracing::debug!("Constructing '{}'", capability);
        (registration.factory)(self).map_err(|e| {
            tracing::warn!("Construction of '{}' failed: {}", capability, e);
            FixtureError::construction(capability.as_str(), e)
        })
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.registrations.contains_key(capability)
    }

    pub fn lifetime(&self, capability: &Capability) -> Option<Lifetime> {
        self.registrations.get(capability).map(|r| r.lifetime)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.registrations.keys()
    }
}

pub(crate) fn downcast<T>(capability: &Capability, instance: &Instance) -> Result<T>
where
    T: Clone + 'static,
{
    instance
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| FixtureError::TypeMismatch {
            capability: capability.to_string(),
            expected: type_name::<T>(),
        })
}
