//! Common Test Utilities
//!
//! Shared configuration documents and container builders for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use collection_fixture_lib::container::{CONFIGURATION, DATABASE_RESOURCE};
use collection_fixture_lib::{
    CollectionContainer, ConfigSnapshot, ConfigSource, InMemoryDatabase, SharedDatabase,
};

pub const VALID_JSON: &str = r#"{
    "ConnectionStrings": {
        "sql-database": "my connection string"
    }
}"#;

pub const WRONG_JSON: &str = r#"{
    "ConnectionStrings": {
        "sql-database": "wrong"
    }
}"#;

pub const VALID_TOML: &str = r#"
[ConnectionStrings]
sql-database = "my connection string"
"#;

/// Write a configuration document into `dir` and return its path
pub fn write_config(dir: &Path, file_name: &str, contents: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, contents).expect("Should write config file");
    path
}

/// Container whose database factory counts its invocations
pub fn counting_container(source: &ConfigSource) -> (CollectionContainer, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory_calls = Arc::clone(&calls);

    let container = CollectionContainer::build_with(source, move |services| {
        services.add_transient(DATABASE_RESOURCE, move |provider| {
            factory_calls.fetch_add(1, Ordering::SeqCst);
            let config: Arc<ConfigSnapshot> = provider.resolve(&CONFIGURATION)?;
            let db: SharedDatabase = Arc::new(InMemoryDatabase::new(&config)?);
            Ok(db)
        });
    })
    .expect("Should build container");

    (container, calls)
}

/// Enable log output for a test binary when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
