#![warn(missing_docs)]

//! Declarative templates for the embsim simulator.
//!
//! Everything in this crate is plain data: object and stage templates,
//! articulated (kinematic tree) models, scene instance placements and the
//! physics configuration. Nothing here touches the dynamics engine or the
//! scene graph; the physics layer consumes these types read-only.
//!
//! # Example
//!
//! ```
//! use embsim_metadata::{Geometry, ObjectAttributes, TemplateLibrary};
//!
//! let mut library = TemplateLibrary::new();
//! let id = library.register(ObjectAttributes::primitive(
//!     "crate",
//!     Geometry::Box { size: [0.5, 0.5, 0.5] },
//! ));
//! assert_eq!(library.get_copy_by_id(id).unwrap().handle, "crate");
//! ```

mod attributes;
mod config;
mod error;
mod library;
mod model;

pub use attributes::{
    ColliderStrategy, CollisionMeshData, Geometry, MotionType, ObjectAttributes, ObjectCollision,
    Pose, SceneObjectInstanceAttributes, StageAttributes,
};
pub use config::{PhysicsLibrary, PhysicsManagerAttributes};
pub use error::{MetadataError, Result};
pub use library::TemplateLibrary;
pub use model::{
    ArticulatedModel, CollisionShape, JointKind, LinkBody, MaterialColor, ModelJoint, ModelLink,
    VisualShape,
};
