//! Error types for collection fixtures

use thiserror::Error;

/// Main error type for fixture construction and resolution
///
/// Errors are `Clone` because a failed construction is cached by the
/// collection container and handed out to every later resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FixtureError {
    /// The configuration source is missing, unreadable or malformed
    ///
    /// Fatal for the whole collection: raised before any resource exists.
    #[error("Failed to load configuration from {source_name}: {reason}")]
    ConfigLoad { source_name: String, reason: String },

    /// The configuration loaded but holds a value a resource rejects
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A capability was requested that nothing registered
    #[error("No binding registered for capability '{0}'")]
    UnresolvedDependency(String),

    /// A factory depends on its own capability, directly or through others
    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    /// A registered factory failed while constructing its instance
    #[error("Failed to construct '{capability}': {source}")]
    ResourceConstruction {
        capability: String,
        source: Box<FixtureError>,
    },

    /// The resolved instance is not of the requested type
    #[error("Capability '{capability}' does not resolve to {expected}")]
    TypeMismatch {
        capability: String,
        expected: &'static str,
    },

    #[error("Harness error: {0}")]
    Harness(String),
}

impl FixtureError {
    /// Wrap a factory failure for the given capability
    pub fn construction(capability: impl Into<String>, source: FixtureError) -> Self {
        FixtureError::ResourceConstruction {
            capability: capability.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error below any construction wrappers
    pub fn root_cause(&self) -> &FixtureError {
        let mut current = self;
        while let FixtureError::ResourceConstruction { source, .. } = current {
            current = source;
        }
        current
    }

    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self.root_cause(), FixtureError::InvalidConfiguration(_))
    }
}

/// Convenience type alias for Results using FixtureError
pub type Result<T> = std::result::Result<T, FixtureError>;
