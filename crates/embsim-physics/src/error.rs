//! Error types for the physics layer.

use embsim_metadata::MotionType;
use thiserror::Error;

/// Errors returned by physics object construction and joint-space setters.
///
/// Programming errors (unknown object IDs, out-of-range link indices) panic
/// instead of producing one of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhysicsError {
    /// No template is registered under the given handle or ID.
    #[error("Unknown object template: {0}")]
    UnknownTemplate(String),

    /// A stage was already added to this world.
    #[error("A stage already exists in this world")]
    StageExists,

    /// A collision mesh cannot be used by the active backend.
    #[error("Invalid collision mesh {index} for {name}: {reason}")]
    InvalidCollisionMesh {
        /// Owner template handle.
        name: String,
        /// Index of the offending mesh.
        index: usize,
        /// Reason for rejection.
        reason: String,
    },

    /// Failed to create collision shape.
    #[error("Failed to create collision shape for {name}: {reason}")]
    CollisionShape {
        /// Object/link name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// A joint-space vector has the wrong number of entries.
    #[error("Joint {what} vector has {actual} entries, expected {expected}")]
    JointVectorSize {
        /// Which vector (positions, velocities, forces).
        what: &'static str,
        /// Required length.
        expected: usize,
        /// Provided length.
        actual: usize,
    },

    /// Articulated model failed validation.
    #[error("Invalid articulated model: {0}")]
    InvalidModel(String),

    /// The backend cannot simulate the requested motion type.
    #[error("Motion type {0:?} is not supported by this physics backend")]
    UnsupportedMotionType(MotionType),

    /// The manager was used before `initialize`.
    #[error("Physics manager is not initialized")]
    NotInitialized,
}

impl From<embsim_metadata::MetadataError> for PhysicsError {
    fn from(err: embsim_metadata::MetadataError) -> Self {
        PhysicsError::InvalidModel(err.to_string())
    }
}
