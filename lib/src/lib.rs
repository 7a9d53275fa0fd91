//! Collection Fixture Library
//!
//! Shares one stateful resource across every test class of a collection.
//! A [`CollectionContainer`] loads configuration and registers bindings once
//! per run; each [`ClassFixture`] resolves the shared database through it, so
//! all classes observe the same instance. The [`harness`] module drives the
//! collection/class/test lifecycle explicitly.

pub mod collection;
pub mod config;
pub mod container;
pub mod database;
pub mod demo;
pub mod error;
pub mod fixture;
pub mod harness;

pub use collection::CollectionContainer;
pub use config::{ConfigFormat, ConfigSnapshot, ConfigSource, HarnessConfig};
pub use container::{Capability, Lifetime, ServiceCollection, ServiceProvider};
pub use database::{DatabaseResource, InMemoryDatabase, SharedDatabase};
pub use error::{FixtureError, Result};
pub use fixture::ClassFixture;
pub use harness::{CollectionReport, RunMode, TestClass, TestCollection, TestOutcome};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_harness_config() {
        let config = HarnessConfig::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.run_mode, RunMode::Sequential);
    }

    #[test]
    fn test_reexported_capabilities() {
        assert_eq!(
            container::DATABASE_RESOURCE,
            Capability::new("database resource")
        );
        assert_eq!(container::CONFIGURATION, Capability::new("configuration"));
    }

    #[test]
    fn test_demo_collection_shape() {
        let collection = demo::collection();
        assert_eq!(collection.name, demo::COLLECTION_NAME);
        assert_eq!(collection.classes.len(), 2);
        assert_eq!(collection.test_count(), 3);
    }
}
