//! In-memory stand-in for a shared database

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::ConfigSnapshot;
use crate::error::{FixtureError, Result};

/// Connection string entry the database reads at construction
pub const CONNECTION_STRING_NAME: &str = "sql-database";

/// The only connection string the stand-in database accepts
pub const EXPECTED_CONNECTION_STRING: &str = "my connection string";

/// Readable and appendable shared state
pub trait DatabaseResource: Send + Sync {
    /// Current contents of the buffer
    fn get(&self) -> String;

    /// Append data to the buffer
    fn insert(&self, data: &str);
}

/// Handle to the shared database as handed out by the container
pub type SharedDatabase = Arc<dyn DatabaseResource>;

/// A string buffer acting as the database, initially empty
#[derive(Debug)]
pub struct InMemoryDatabase {
    buffer: RwLock<String>,
}

impl InMemoryDatabase {
    /// Validate the connection string and open an empty database
    pub fn new(config: &ConfigSnapshot) -> Result<Self> {
        match config.connection_string(CONNECTION_STRING_NAME) {
            Some(EXPECTED_CONNECTION_STRING) => {
                tracing::debug!("Opened in-memory database '{}'", CONNECTION_STRING_NAME);
                Ok(Self::empty())
            }
            Some(_) => Err(FixtureError::InvalidConfiguration(format!(
                "connection string '{}' is invalid",
                CONNECTION_STRING_NAME
            ))),
            None => Err(FixtureError::InvalidConfiguration(format!(
                "connection string '{}' is missing",
                CONNECTION_STRING_NAME
            ))),
        }
    }

    fn empty() -> Self {
        Self {
            buffer: RwLock::new(String::new()),
        }
    }
}

impl DatabaseResource for InMemoryDatabase {
    fn get(&self) -> String {
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn insert(&self, data: &str) {
        self.buffer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(data);
    }
}
