#![warn(missing_docs)]

//! Physics object management for the embsim simulator.
//!
//! The [`PhysicsManager`] owns every simulated object in a world: rigid
//! objects, articulated objects (kinematic trees of links and joints) and the
//! static stage. It hands out integer [`ObjectId`]s, advances the world in
//! fixed timesteps and answers ray, sphere and contact queries.
//!
//! Two dynamics backends are available:
//!
//! - `NoPhysics`: a kinematic world. Objects only move when told to.
//! - `Rapier`: full rigid body dynamics using Rapier3d.
//!
//! Callers hold objects through [`ManagedRigidObject`] and
//! [`ManagedArticulatedObject`] handles. A handle never keeps its object
//! alive; once the object is removed every accessor returns a default value.
//!
//! # Example
//!
//! ```
//! use embsim_metadata::{Geometry, ObjectAttributes, PhysicsLibrary, PhysicsManagerAttributes, TemplateLibrary};
//! use embsim_physics::PhysicsManager;
//! use embsim_scene::SceneGraph;
//! use nalgebra::Vector3;
//!
//! let mut templates = TemplateLibrary::new();
//! templates.register(ObjectAttributes::primitive(
//!     "ball",
//!     Geometry::Sphere { radius: 0.1 },
//! ));
//!
//! let config = PhysicsManagerAttributes::with_simulator(PhysicsLibrary::Rapier);
//! let mut manager = PhysicsManager::new(config, templates);
//! let scene = SceneGraph::shared();
//! let root = scene.borrow().root();
//! manager.initialize(scene, root);
//!
//! let id = manager.add_object("ball", None, None).unwrap();
//! let ball = manager.rigid_object(id).unwrap();
//! ball.set_translation(Vector3::new(0.0, 2.0, 0.0));
//!
//! manager.step_physics(0.1);
//! assert!(ball.translation().y < 2.0);
//! ```

mod articulated;
mod backend;
mod colliders;
mod collision_groups;
mod error;
mod keyframe;
mod managed;
mod manager;
mod motion;
mod query;
mod rigid;

pub use articulated::{
    ArticulatedObject, JointLimit, JointType, CUBE_ASSET, CYLINDER_ASSET, SPHERE_ASSET,
};
pub use backend::{
    create_backend, BodyDesc, BodyKey, ColliderDesc, ColliderKey, ColliderOwner, ColliderRole,
    DynamicsBackend, KinematicBackend, MembershipCounts, MultibodyKey, RapierBackend, SharedBackend,
};
pub use colliders::{combine_shapes, estimate_mass, geometry_to_shape, mesh_to_shape, PlacedShape};
pub use collision_groups::CollisionGroup;
pub use error::PhysicsError;
pub use keyframe::{Keyframe, ObjectState};
pub use managed::{Managed, ManagedArticulatedObject, ManagedRigidObject};
pub use manager::{PhysicsManager, TemplateKey};
pub use motion::{integrate_rotation, VelocityControl};
pub use query::{ContactPointData, Ray, RayHitInfo, RaycastResults, NO_OBJECT_ID, STAGE_ID};
pub use rigid::{RigidObject, RigidStage};

/// Integer identifier of a simulated object.
pub type ObjectId = i32;

/// Returned for objects that do not exist.
pub const ID_UNDEFINED: ObjectId = -1;
