//! Error taxonomy for the core.
//!
//! Only pre-mutation rejections are errors. Solve-phase conditions
//! (conflict, non-convergence, cancellation) are statuses carried in
//! `session::EditResult` and never cross the public boundary as errors.

use crate::store::EntityId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CoreError {
    /// Non-finite or out-of-range numeric input, rejected before mutation.
    #[error("invalid value for {context}: {value}")]
    InvalidValue { context: String, value: f64 },

    /// A parameter expression graph cycle, rejected at definition time.
    #[error("cyclic parameter dependency: {}", path.join(" -> "))]
    CyclicParameterDependency { path: Vec<String> },

    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),

    #[error("entity {entity} is not a {expected}")]
    KindMismatch { entity: EntityId, expected: String },

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("parameter '{0}' already exists")]
    DuplicateParameter(String),

    /// Removing a parameter that still drives geometry is an error,
    /// not a silent no-op.
    #[error("parameter '{name}' is still referenced by: {}", dependents.join(", "))]
    ParameterInUse { name: String, dependents: Vec<String> },

    #[error("parameter '{0}' is derived; set its inputs instead")]
    DerivedParameter(String),

    /// Expression parse or evaluation failure (division by zero, domain
    /// error, malformed input).
    #[error("expression error: {0}")]
    Expression(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Validate a scalar before it enters the geometry store or the solver.
pub(crate) fn ensure_finite(value: f64, context: &str) -> Result<f64, CoreError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CoreError::InvalidValue {
            context: context.to_string(),
            value,
        })
    }
}
