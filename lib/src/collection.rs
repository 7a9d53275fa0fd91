//! Collection-level container shared by every test class in a collection
//!
//! The container owns the configuration snapshot and the frozen service
//! provider. Each capability resolved through it is constructed at most once
//! per collection run, whatever lifetime its binding declares, and the
//! outcome (instance or error) is cached so that every class fixture sees the
//! same thing.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use ulid::Ulid;

use crate::config::{ConfigSnapshot, ConfigSource};
use crate::container::{
    downcast, Capability, Instance, ServiceCollection, ServiceProvider, CONFIGURATION,
    DATABASE_RESOURCE,
};
use crate::database::{InMemoryDatabase, SharedDatabase};
use crate::error::{FixtureError, Result};

/// Registry and per-run instance cache for one collection
pub struct CollectionContainer {
    run_id: Ulid,
    config: Arc<ConfigSnapshot>,
    provider: ServiceProvider,
    resolved: HashMap<Capability, OnceLock<Result<Instance>>>,
}

impl CollectionContainer {
    /// Load configuration and register the default bindings
    ///
    /// Registers the snapshot under [`CONFIGURATION`] and the in-memory
    /// database as a transient [`DATABASE_RESOURCE`]. Nothing is constructed
    /// until the first resolution.
    pub fn build(source: &ConfigSource) -> Result<Self> {
        Self::build_with(source, |_| {})
    }

    /// Like [`build`](Self::build), then let `configure` add or replace bindings
    pub fn build_with<F>(source: &ConfigSource, configure: F) -> Result<Self>
    where
        F: FnOnce(&mut ServiceCollection),
    {
        let config = Arc::new(ConfigSnapshot::load(source)?);

        let mut services = ServiceCollection::new();
        services.add_instance(CONFIGURATION, Arc::clone(&config));
        services.add_transient(DATABASE_RESOURCE, |provider: &ServiceProvider| {
            let config = provider.resolve::<Arc<ConfigSnapshot>>(&CONFIGURATION)?;
            let db: SharedDatabase = Arc::new(InMemoryDatabase::new(&config)?);
            Ok(db)
        });
        configure(&mut services);

        let provider = services.build();
        let resolved = provider
            .capabilities()
            .map(|capability| (capability.clone(), OnceLock::new()))
            .collect();

        let run_id = Ulid::new();
        tracing::info!(
            "Built collection container {} from {} ({} configuration values)",
            run_id,
            source.describe(),
            config.len()
        );

        Ok(Self {
            run_id,
            config,
            provider,
            resolved,
        })
    }

    /// Resolve a capability, constructing it on first use
    ///
    /// Concurrent first resolutions block until the single construction
    /// finishes. A failed construction is returned unchanged to every caller.
    pub fn resolve<T>(&self, capability: &Capability) -> Result<T>
    where
        T: Clone + 'static,
    {
        let cell = self
            .resolved
            .get(capability)
            .ok_or_else(|| FixtureError::UnresolvedDependency(capability.to_string()))?;

        let instance = cell
            .get_or_init(|| {
                tracing::debug!(
                    "First resolution of '{}' in collection {}",
                    capability,
                    self.run_id
                );
                self.provider.resolve_instance(capability)
            })
            .clone()?;

        downcast(capability, &instance)
    }

    /// Whether the capability has been constructed (or has failed) this run
    pub fn is_resolved(&self, capability: &Capability) -> bool {
        self.resolved
            .get(capability)
            .is_some_and(|cell| cell.get().is_some())
    }

    pub fn run_id(&self) -> Ulid {
        self.run_id
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    /// Tear the collection down, returning how many live instances were released
    pub fn dispose(self) -> usize {
        let released = self
            .resolved
            .values()
            .filter(|cell| matches!(cell.get(), Some(Ok(_))))
            .count();
        tracing::info!(
            "Disposed collection container {} ({} instances released)",
            self.run_id,
            released
        );
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseResource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VALID: &str = r#"{"ConnectionStrings": {"sql-database": "my connection string"}}"#;
    const WRONG: &str = r#"{"ConnectionStrings": {"sql-database": "wrong"}}"#;

    #[test]
    fn test_build_is_lazy() {
        let container = CollectionContainer::build(&ConfigSource::json(WRONG)).unwrap();

        // The invalid connection string only surfaces on resolution
        assert!(!container.is_resolved(&DATABASE_RESOURCE));
        assert_eq!(
            container.config().connection_string("sql-database"),
            Some("wrong")
        );
    }

    #[test]
    fn test_build_fails_on_malformed_source() {
        let result = CollectionContainer::build(&ConfigSource::json("{"));
        assert!(matches!(result, Err(FixtureError::ConfigLoad { .. })));
    }

    #[test]
    fn test_resolve_returns_same_instance() {
        let container = CollectionContainer::build(&ConfigSource::json(VALID)).unwrap();

        let first: SharedDatabase = container.resolve(&DATABASE_RESOURCE).unwrap();
        let second: SharedDatabase = container.resolve(&DATABASE_RESOURCE).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get(), "");
        first.insert("Test1");
        assert_eq!(second.get(), "Test1");
        assert!(container.is_resolved(&DATABASE_RESOURCE));
    }

    #[test]
    fn test_transient_binding_constructed_once_per_collection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = Arc::clone(&calls);
        let counter = Capability::new("counter");

        let container = CollectionContainer::build_with(&ConfigSource::json(VALID), |services| {
            services.add_transient(counter.clone(), move |_: &ServiceProvider| {
                Ok(factory_calls.fetch_add(1, Ordering::SeqCst))
            });
        })
        .unwrap();

        for _ in 0..10 {
            assert_eq!(container.resolve::<usize>(&counter).unwrap(), 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_configuration_observed_identically() {
        let container = CollectionContainer::build(&ConfigSource::json(WRONG)).unwrap();

        let first = container
            .resolve::<SharedDatabase>(&DATABASE_RESOURCE)
            .err()
            .unwrap();
        let second = container
            .resolve::<SharedDatabase>(&DATABASE_RESOURCE)
            .err()
            .unwrap();

        assert_eq!(first, second);
        assert!(first.is_invalid_configuration());
        assert!(matches!(first, FixtureError::ResourceConstruction { .. }));
    }

    #[test]
    fn test_unregistered_capability() {
        let container = CollectionContainer::build(&ConfigSource::json(VALID)).unwrap();

        let result = container.resolve::<String>(&Capability::new("cache"));
        assert_eq!(
            result.unwrap_err(),
            FixtureError::UnresolvedDependency("cache".to_string())
        );
    }

    #[test]
    fn test_concurrent_first_resolution_constructs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = Arc::clone(&calls);

        let container = CollectionContainer::build_with(&ConfigSource::json(VALID), |services| {
            services.add_transient(DATABASE_RESOURCE, move |_: &ServiceProvider| {
                factory_calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                let config = ConfigSnapshot::from_json(VALID)?;
                let db: SharedDatabase = Arc::new(InMemoryDatabase::new(&config)?);
                Ok(db)
            });
        })
        .unwrap();

        let handles: Vec<SharedDatabase> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| container.resolve::<SharedDatabase>(&DATABASE_RESOURCE)))
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().unwrap().unwrap())
                .collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn test_self_dependent_database_fails_instead_of_hanging() {
        let container = CollectionContainer::build_with(&ConfigSource::json(VALID), |services| {
            services.add_singleton(DATABASE_RESOURCE, |provider: &ServiceProvider| {
                provider.resolve::<SharedDatabase>(&DATABASE_RESOURCE)
            });
        })
        .unwrap();

        let err = std::thread::scope(|scope| {
            scope
                .spawn(|| container.resolve::<SharedDatabase>(&DATABASE_RESOURCE).err())
                .join()
                .unwrap()
        })
        .unwrap();

        assert!(matches!(
            err.root_cause(),
            FixtureError::CircularDependency(chain)
                if chain == "database resource -> database resource"
        ));
        assert!(container.is_resolved(&DATABASE_RESOURCE));
    }

    #[test]
    fn test_dispose_counts_live_instances() {
        let container = CollectionContainer::build(&ConfigSource::json(VALID)).unwrap();
        assert_eq!(container.run_id(), container.run_id());

        let _db: SharedDatabase = container.resolve(&DATABASE_RESOURCE).unwrap();
        let _config: Arc<ConfigSnapshot> = container.resolve(&CONFIGURATION).unwrap();

        assert_eq!(container.dispose(), 2);
    }

    #[test]
    fn test_dispose_skips_failed_constructions() {
        let container = CollectionContainer::build(&ConfigSource::json(WRONG)).unwrap();
        let _ = container.resolve::<SharedDatabase>(&DATABASE_RESOURCE);

        assert_eq!(container.dispose(), 0);
    }
}
