//! Dynamics backends.
//!
//! A [`DynamicsBackend`] owns every body and collider of a world and answers
//! collision queries. Simulated objects hold keys into it and never touch
//! engine handles directly. [`KinematicBackend`] only stores poses;
//! [`RapierBackend`] steps a full rapier3d world.

mod kinematic;
mod rapier;

use std::cell::RefCell;
use std::rc::Rc;

use embsim_metadata::{CollisionMeshData, MotionType, PhysicsLibrary, PhysicsManagerAttributes};
use nalgebra::{Isometry3, Point3, Vector3};
use parry3d::shape::SharedShape;
use slotmap::{new_key_type, SlotMap};

pub use kinematic::KinematicBackend;
pub use rapier::RapierBackend;

use crate::collision_groups::CollisionGroup;
use crate::error::PhysicsError;
use crate::query::{ContactPointData, Ray, RayHitInfo};
use crate::ObjectId;

new_key_type! {
    /// Backend rigid body.
    pub struct BodyKey;
    /// Backend collider.
    pub struct ColliderKey;
    /// Multibody registered with a backend.
    pub struct MultibodyKey;
}

/// Backend shared by the manager and every simulated object in its world.
pub type SharedBackend = Rc<RefCell<dyn DynamicsBackend>>;

/// What a collider is part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColliderRole {
    /// Collider of a rigid object's body.
    Body,
    /// Collider of an articulated object link (or its base).
    MultibodyLink,
    /// Static aggregate of an articulated object's non-collidable links.
    FixedAggregate,
    /// Stage geometry.
    Stage,
}

/// Maps a collider back to the object that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColliderOwner {
    /// Owning object, or [`crate::STAGE_ID`].
    pub object_id: ObjectId,
    /// Link index for articulated link colliders.
    pub link_id: Option<usize>,
    /// Kind of owner.
    pub role: ColliderRole,
}

/// Parameters for a new rigid body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    /// World pose.
    pub pose: Isometry3<f32>,
    /// Initial motion type; `Undefined` is not accepted.
    pub motion_type: MotionType,
    /// Linear damping.
    pub linear_damping: f32,
    /// Angular damping.
    pub angular_damping: f32,
}

/// Parameters for a new collider.
#[derive(Clone)]
pub struct ColliderDesc {
    /// Collision shape.
    pub shape: SharedShape,
    /// Pose relative to the parent body, or world pose when parentless.
    pub pose: Isometry3<f32>,
    /// Mass contributed to the parent body.
    pub mass: f32,
    /// Friction coefficient.
    pub friction: f32,
    /// Restitution coefficient.
    pub restitution: f32,
    /// Collision group.
    pub group: CollisionGroup,
    /// Owner record used to map query results to objects.
    pub owner: ColliderOwner,
}

/// How often bodies and multibodies entered or left the simulated set.
///
/// Only transitions to and from `Dynamic` count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipCounts {
    /// Number of additions.
    pub added: usize,
    /// Number of removals.
    pub removed: usize,
}

/// Multibodies currently simulated, plus the transition counters.
#[derive(Debug, Default)]
pub(crate) struct WorldMembership {
    multibodies: SlotMap<MultibodyKey, bool>,
    counts: MembershipCounts,
}

impl WorldMembership {
    pub(crate) fn register(&mut self) -> MultibodyKey {
        self.multibodies.insert(false)
    }

    pub(crate) fn unregister(&mut self, key: MultibodyKey) {
        if self.multibodies.remove(key) == Some(true) {
            self.counts.removed += 1;
        }
    }

    pub(crate) fn add(&mut self, key: MultibodyKey) {
        if let Some(in_world) = self.multibodies.get_mut(key) {
            if !*in_world {
                *in_world = true;
                self.counts.added += 1;
            }
        }
    }

    pub(crate) fn remove(&mut self, key: MultibodyKey) {
        if let Some(in_world) = self.multibodies.get_mut(key) {
            if *in_world {
                *in_world = false;
                self.counts.removed += 1;
            }
        }
    }

    pub(crate) fn contains(&self, key: MultibodyKey) -> bool {
        self.multibodies.get(key).copied().unwrap_or(false)
    }

    /// Record a rigid body entering or leaving the simulated set.
    pub(crate) fn note_body_transition(&mut self, from: MotionType, to: MotionType) {
        match (from == MotionType::Dynamic, to == MotionType::Dynamic) {
            (false, true) => self.counts.added += 1,
            (true, false) => self.counts.removed += 1,
            _ => {}
        }
    }

    pub(crate) fn counts(&self) -> MembershipCounts {
        self.counts
    }
}

/// Interface to a physics world.
///
/// Keys handed out by one backend are only meaningful to that backend.
/// Accessors panic on keys that were never issued or already removed.
pub trait DynamicsBackend {
    /// Which library this is.
    fn library(&self) -> PhysicsLibrary;

    /// Advance the world by `dt` seconds.
    fn step(&mut self, dt: f32);

    /// World gravity.
    fn gravity(&self) -> Vector3<f32>;

    /// Set world gravity.
    fn set_gravity(&mut self, gravity: Vector3<f32>);

    /// Transition counters for the simulated set.
    fn membership_counts(&self) -> MembershipCounts;

    /// Insert a rigid body.
    fn insert_body(&mut self, desc: BodyDesc) -> Result<BodyKey, PhysicsError>;

    /// Remove a rigid body and every collider attached to it.
    fn remove_body(&mut self, body: BodyKey);

    /// World pose of a body.
    fn body_pose(&self, body: BodyKey) -> Isometry3<f32>;

    /// Teleport a body.
    fn set_body_pose(&mut self, body: BodyKey, pose: Isometry3<f32>);

    /// Current motion type of a body.
    fn body_motion_type(&self, body: BodyKey) -> MotionType;

    /// Change a body's motion type.
    ///
    /// Same-type requests and `Undefined` are no-ops.
    fn set_body_motion_type(
        &mut self,
        body: BodyKey,
        motion_type: MotionType,
    ) -> Result<(), PhysicsError>;

    /// Linear velocity of a body.
    fn body_linear_velocity(&self, body: BodyKey) -> Vector3<f32>;

    /// Set linear velocity.
    fn set_body_linear_velocity(&mut self, body: BodyKey, velocity: Vector3<f32>);

    /// Angular velocity of a body.
    fn body_angular_velocity(&self, body: BodyKey) -> Vector3<f32>;

    /// Set angular velocity.
    fn set_body_angular_velocity(&mut self, body: BodyKey, velocity: Vector3<f32>);

    /// Apply a force at a world point for the next step.
    fn apply_force(&mut self, body: BodyKey, force: Vector3<f32>, point: Point3<f32>);

    /// Apply an impulse at a world point.
    fn apply_impulse(&mut self, body: BodyKey, impulse: Vector3<f32>, point: Point3<f32>);

    /// Apply a torque for the next step.
    fn apply_torque(&mut self, body: BodyKey, torque: Vector3<f32>);

    /// Apply an angular impulse.
    fn apply_impulse_torque(&mut self, body: BodyKey, impulse: Vector3<f32>);

    /// False while the body sleeps.
    fn body_is_active(&self, body: BodyKey) -> bool;

    /// Wake or sleep a body.
    fn set_body_active(&mut self, body: BodyKey, active: bool);

    /// Insert a collider, attached to `parent` or placed in the world.
    fn insert_collider(&mut self, desc: ColliderDesc, parent: Option<BodyKey>) -> ColliderKey;

    /// Remove a collider.
    fn remove_collider(&mut self, collider: ColliderKey);

    /// World pose of a collider.
    fn collider_pose(&self, collider: ColliderKey) -> Isometry3<f32>;

    /// Place a parentless collider. Also refreshes its bounding volume.
    fn set_collider_pose(&mut self, collider: ColliderKey, pose: Isometry3<f32>);

    /// Collision group of a collider.
    fn collider_group(&self, collider: ColliderKey) -> CollisionGroup;

    /// Move a collider into another collision group.
    fn set_collider_group(&mut self, collider: ColliderKey, group: CollisionGroup);

    /// Friction coefficient.
    fn collider_friction(&self, collider: ColliderKey) -> f32;

    /// Set friction coefficient.
    fn set_collider_friction(&mut self, collider: ColliderKey, friction: f32);

    /// Restitution coefficient.
    fn collider_restitution(&self, collider: ColliderKey) -> f32;

    /// Set restitution coefficient.
    fn set_collider_restitution(&mut self, collider: ColliderKey, restitution: f32);

    /// Owner record of a live collider.
    fn collider_owner(&self, collider: ColliderKey) -> Option<ColliderOwner>;

    /// Register a multibody. It starts outside the simulated set.
    fn register_multibody(&mut self) -> MultibodyKey;

    /// Forget a multibody, counting a removal if it was simulated.
    fn unregister_multibody(&mut self, multibody: MultibodyKey);

    /// Put a multibody into the simulated set. No-op if already there.
    fn add_multibody(&mut self, multibody: MultibodyKey);

    /// Take a multibody out of the simulated set. No-op if not there.
    fn remove_multibody(&mut self, multibody: MultibodyKey);

    /// True if the multibody is in the simulated set.
    fn contains_multibody(&self, multibody: MultibodyKey) -> bool;

    /// True if `collider` overlaps any collider its group/mask admits and
    /// `accept` does not reject.
    fn contact_test(
        &mut self,
        collider: ColliderKey,
        accept: &dyn Fn(&ColliderOwner) -> bool,
    ) -> bool;

    /// Every hit along `ray` up to `max_distance`, unsorted.
    fn cast_ray(&mut self, ray: &Ray, max_distance: f32) -> Vec<RayHitInfo>;

    /// First hit of a sphere swept along `ray`.
    fn cast_sphere(&mut self, ray: &Ray, radius: f32, max_distance: f32) -> Option<RayHitInfo>;

    /// Recompute contacts without advancing time.
    fn perform_discrete_collision_detection(&mut self);

    /// Contact points from the last step or discrete detection pass.
    fn contact_points(&self) -> Vec<ContactPointData>;

    /// Number of contact points that took part in the last solve.
    fn num_active_contact_points(&self) -> usize {
        self.contact_points().iter().filter(|c| c.is_active).count()
    }

    /// Check that a mesh can become a collider in this backend.
    fn validate_collision_mesh(&self, mesh: &CollisionMeshData) -> Result<(), String>;
}

/// Create the backend for `library`.
pub fn create_backend(
    library: PhysicsLibrary,
    config: &PhysicsManagerAttributes,
) -> SharedBackend {
    match library {
        PhysicsLibrary::NoPhysics => Rc::new(RefCell::new(KinematicBackend::new())),
        PhysicsLibrary::Rapier => Rc::new(RefCell::new(RapierBackend::new(config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_transitions() {
        let mut membership = WorldMembership::default();
        let mb = membership.register();
        membership.add(mb);
        membership.add(mb);
        assert!(membership.contains(mb));
        membership.remove(mb);
        membership.remove(mb);
        assert_eq!(membership.counts(), MembershipCounts { added: 1, removed: 1 });

        membership.note_body_transition(MotionType::Static, MotionType::Kinematic);
        membership.note_body_transition(MotionType::Kinematic, MotionType::Dynamic);
        membership.note_body_transition(MotionType::Dynamic, MotionType::Dynamic);
        assert_eq!(membership.counts(), MembershipCounts { added: 2, removed: 1 });
    }

    #[test]
    fn test_unregister_counts_removal() {
        let mut membership = WorldMembership::default();
        let mb = membership.register();
        membership.add(mb);
        membership.unregister(mb);
        assert!(!membership.contains(mb));
        assert_eq!(membership.counts().removed, 1);
    }
}
