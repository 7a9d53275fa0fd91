//! Per-class fixture holding the collection's shared database

use crate::collection::CollectionContainer;
use crate::container::DATABASE_RESOURCE;
use crate::database::{DatabaseResource, SharedDatabase};
use crate::error::Result;

/// Built once per test class from the collection container
///
/// Never constructs a database itself: every class fixture in a collection
/// run holds the same instance.
#[derive(Clone)]
pub struct ClassFixture {
    db: SharedDatabase,
}

impl ClassFixture {
    pub fn new(container: &CollectionContainer) -> Result<Self> {
        let db = container.resolve::<SharedDatabase>(&DATABASE_RESOURCE)?;
        Ok(Self { db })
    }

    /// The shared database
    pub fn db(&self) -> &SharedDatabase {
        &self.db
    }
}

impl std::fmt::Debug for ClassFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassFixture")
            .field("db", &self.db.get())
            .finish()
    }
}
