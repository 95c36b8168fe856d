//! Engine error taxonomy.
//!
//! Errors are returned as typed results across the engine boundary so
//! callers can branch on kind without string matching. Routing-backend
//! degradation is absorbed by the distance provider and has no variant here.

use std::fmt;

use crate::traits::StoreError;

/// Typed failure returned by the assignment, tour, and re-optimization
/// engines.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: missing required field, out-of-range coordinate,
    /// unknown event name. Rejected before any mutation.
    Validation(String),
    /// The request conflicts with entity state (capacity exceeded, route in
    /// a state that does not accept the event). No partial state change.
    Constraint(String),
    /// A referenced entity does not exist.
    NotFound {
        entity: &'static str,
        id: String,
    },
    /// The persistence layer failed.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "validation: {}", msg),
            EngineError::Constraint(msg) => write!(f, "constraint: {}", msg),
            EngineError::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            EngineError::Store(err) => write!(f, "store: {}", err),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Store(err)
    }
}
