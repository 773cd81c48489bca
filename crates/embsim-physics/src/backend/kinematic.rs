//! Pose-only backend used when no physics library is selected.
//!
//! Bodies can be static or kinematic and move only when told to. There is no
//! collision detection: contact tests, casts and contact queries are empty.

use embsim_metadata::{CollisionMeshData, MotionType, PhysicsLibrary};
use nalgebra::{Isometry3, Point3, Vector3};
use slotmap::SlotMap;
use tracing::warn;

use super::{
    BodyDesc, BodyKey, ColliderDesc, ColliderKey, ColliderOwner, DynamicsBackend,
    MembershipCounts, MultibodyKey, WorldMembership,
};
use crate::collision_groups::CollisionGroup;
use crate::error::PhysicsError;
use crate::query::{ContactPointData, Ray, RayHitInfo};

#[derive(Debug, Clone)]
struct KinematicBody {
    pose: Isometry3<f32>,
    motion_type: MotionType,
    linear_velocity: Vector3<f32>,
    angular_velocity: Vector3<f32>,
    active: bool,
}

#[derive(Debug, Clone)]
struct KinematicCollider {
    parent: Option<BodyKey>,
    pose: Isometry3<f32>,
    group: CollisionGroup,
    friction: f32,
    restitution: f32,
    owner: ColliderOwner,
}

/// Backend that stores poses and nothing else.
#[derive(Debug, Default)]
pub struct KinematicBackend {
    bodies: SlotMap<BodyKey, KinematicBody>,
    colliders: SlotMap<ColliderKey, KinematicCollider>,
    membership: WorldMembership,
}

impl KinematicBackend {
    /// Empty world.
    pub fn new() -> Self {
        Self::default()
    }

    fn body(&self, body: BodyKey) -> &KinematicBody {
        self.bodies
            .get(body)
            .unwrap_or_else(|| panic!("body {:?} is not in this world", body))
    }

    fn body_mut(&mut self, body: BodyKey) -> &mut KinematicBody {
        self.bodies
            .get_mut(body)
            .unwrap_or_else(|| panic!("body {:?} is not in this world", body))
    }

    fn collider(&self, collider: ColliderKey) -> &KinematicCollider {
        self.colliders
            .get(collider)
            .unwrap_or_else(|| panic!("collider {:?} is not in this world", collider))
    }

    fn collider_mut(&mut self, collider: ColliderKey) -> &mut KinematicCollider {
        self.colliders
            .get_mut(collider)
            .unwrap_or_else(|| panic!("collider {:?} is not in this world", collider))
    }
}

impl DynamicsBackend for KinematicBackend {
    fn library(&self) -> PhysicsLibrary {
        PhysicsLibrary::NoPhysics
    }

    fn step(&mut self, _dt: f32) {}

    fn gravity(&self) -> Vector3<f32> {
        Vector3::zeros()
    }

    fn set_gravity(&mut self, _gravity: Vector3<f32>) {}

    fn membership_counts(&self) -> MembershipCounts {
        self.membership.counts()
    }

    fn insert_body(&mut self, desc: BodyDesc) -> Result<BodyKey, PhysicsError> {
        let motion_type = match desc.motion_type {
            MotionType::Static | MotionType::Kinematic => desc.motion_type,
            other => {
                warn!(?other, "kinematic backend only creates static or kinematic bodies");
                return Err(PhysicsError::UnsupportedMotionType(other));
            }
        };
        Ok(self.bodies.insert(KinematicBody {
            pose: desc.pose,
            motion_type,
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            active: true,
        }))
    }

    fn remove_body(&mut self, body: BodyKey) {
        self.bodies.remove(body);
        self.colliders.retain(|_, c| c.parent != Some(body));
    }

    fn body_pose(&self, body: BodyKey) -> Isometry3<f32> {
        self.body(body).pose
    }

    fn set_body_pose(&mut self, body: BodyKey, pose: Isometry3<f32>) {
        self.body_mut(body).pose = pose;
    }

    fn body_motion_type(&self, body: BodyKey) -> MotionType {
        self.body(body).motion_type
    }

    fn set_body_motion_type(
        &mut self,
        body: BodyKey,
        motion_type: MotionType,
    ) -> Result<(), PhysicsError> {
        match motion_type {
            MotionType::Undefined => Ok(()),
            MotionType::Dynamic => {
                warn!("kinematic backend cannot simulate dynamic bodies");
                Err(PhysicsError::UnsupportedMotionType(motion_type))
            }
            _ => {
                self.body_mut(body).motion_type = motion_type;
                Ok(())
            }
        }
    }

    fn body_linear_velocity(&self, body: BodyKey) -> Vector3<f32> {
        self.body(body).linear_velocity
    }

    fn set_body_linear_velocity(&mut self, body: BodyKey, velocity: Vector3<f32>) {
        self.body_mut(body).linear_velocity = velocity;
    }

    fn body_angular_velocity(&self, body: BodyKey) -> Vector3<f32> {
        self.body(body).angular_velocity
    }

    fn set_body_angular_velocity(&mut self, body: BodyKey, velocity: Vector3<f32>) {
        self.body_mut(body).angular_velocity = velocity;
    }

    fn apply_force(&mut self, _body: BodyKey, _force: Vector3<f32>, _point: Point3<f32>) {}

    fn apply_impulse(&mut self, _body: BodyKey, _impulse: Vector3<f32>, _point: Point3<f32>) {}

    fn apply_torque(&mut self, _body: BodyKey, _torque: Vector3<f32>) {}

    fn apply_impulse_torque(&mut self, _body: BodyKey, _impulse: Vector3<f32>) {}

    fn body_is_active(&self, body: BodyKey) -> bool {
        self.body(body).active
    }

    fn set_body_active(&mut self, body: BodyKey, active: bool) {
        self.body_mut(body).active = active;
    }

    fn insert_collider(&mut self, desc: ColliderDesc, parent: Option<BodyKey>) -> ColliderKey {
        self.colliders.insert(KinematicCollider {
            parent,
            pose: desc.pose,
            group: desc.group,
            friction: desc.friction,
            restitution: desc.restitution,
            owner: desc.owner,
        })
    }

    fn remove_collider(&mut self, collider: ColliderKey) {
        self.colliders.remove(collider);
    }

    fn collider_pose(&self, collider: ColliderKey) -> Isometry3<f32> {
        let c = self.collider(collider);
        match c.parent.and_then(|body| self.bodies.get(body)) {
            Some(body) => body.pose * c.pose,
            None => c.pose,
        }
    }

    fn set_collider_pose(&mut self, collider: ColliderKey, pose: Isometry3<f32>) {
        self.collider_mut(collider).pose = pose;
    }

    fn collider_group(&self, collider: ColliderKey) -> CollisionGroup {
        self.collider(collider).group
    }

    fn set_collider_group(&mut self, collider: ColliderKey, group: CollisionGroup) {
        self.collider_mut(collider).group = group;
    }

    fn collider_friction(&self, collider: ColliderKey) -> f32 {
        self.collider(collider).friction
    }

    fn set_collider_friction(&mut self, collider: ColliderKey, friction: f32) {
        self.collider_mut(collider).friction = friction;
    }

    fn collider_restitution(&self, collider: ColliderKey) -> f32 {
        self.collider(collider).restitution
    }

    fn set_collider_restitution(&mut self, collider: ColliderKey, restitution: f32) {
        self.collider_mut(collider).restitution = restitution;
    }

    fn collider_owner(&self, collider: ColliderKey) -> Option<ColliderOwner> {
        self.colliders.get(collider).map(|c| c.owner)
    }

    fn register_multibody(&mut self) -> MultibodyKey {
        self.membership.register()
    }

    fn unregister_multibody(&mut self, multibody: MultibodyKey) {
        self.membership.unregister(multibody);
    }

    fn add_multibody(&mut self, multibody: MultibodyKey) {
        self.membership.add(multibody);
    }

    fn remove_multibody(&mut self, multibody: MultibodyKey) {
        self.membership.remove(multibody);
    }

    fn contains_multibody(&self, multibody: MultibodyKey) -> bool {
        self.membership.contains(multibody)
    }

    fn contact_test(
        &mut self,
        _collider: ColliderKey,
        _accept: &dyn Fn(&ColliderOwner) -> bool,
    ) -> bool {
        false
    }

    fn cast_ray(&mut self, _ray: &Ray, _max_distance: f32) -> Vec<RayHitInfo> {
        Vec::new()
    }

    fn cast_sphere(&mut self, _ray: &Ray, _radius: f32, _max_distance: f32) -> Option<RayHitInfo> {
        None
    }

    fn perform_discrete_collision_detection(&mut self) {}

    fn contact_points(&self) -> Vec<ContactPointData> {
        Vec::new()
    }

    fn validate_collision_mesh(&self, _mesh: &CollisionMeshData) -> Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ColliderRole;
    use parry3d::shape::SharedShape;

    fn static_body() -> BodyDesc {
        BodyDesc {
            pose: Isometry3::translation(1.0, 0.0, 0.0),
            motion_type: MotionType::Static,
            linear_damping: 0.0,
            angular_damping: 0.0,
        }
    }

    #[test]
    fn test_rejects_dynamic() {
        let mut backend = KinematicBackend::new();
        let mut desc = static_body();
        desc.motion_type = MotionType::Dynamic;
        assert!(backend.insert_body(desc).is_err());

        let body = backend.insert_body(static_body()).unwrap();
        assert!(backend
            .set_body_motion_type(body, MotionType::Dynamic)
            .is_err());
        assert_eq!(backend.body_motion_type(body), MotionType::Static);
        assert_eq!(backend.membership_counts(), MembershipCounts::default());
    }

    #[test]
    fn test_collider_follows_parent() {
        let mut backend = KinematicBackend::new();
        let body = backend.insert_body(static_body()).unwrap();
        let collider = backend.insert_collider(
            ColliderDesc {
                shape: SharedShape::ball(0.5),
                pose: Isometry3::translation(0.0, 1.0, 0.0),
                mass: 1.0,
                friction: 0.5,
                restitution: 0.1,
                group: CollisionGroup::Static,
                owner: ColliderOwner {
                    object_id: 0,
                    link_id: None,
                    role: ColliderRole::Body,
                },
            },
            Some(body),
        );
        let pose = backend.collider_pose(collider);
        assert_eq!(pose.translation.vector, Vector3::new(1.0, 1.0, 0.0));

        backend.remove_body(body);
        assert!(backend.collider_owner(collider).is_none());
    }

    #[test]
    fn test_queries_are_empty() {
        let mut backend = KinematicBackend::new();
        let ray = Ray::new(Point3::origin(), Vector3::x());
        assert!(backend.cast_ray(&ray, 10.0).is_empty());
        assert!(backend.cast_sphere(&ray, 0.1, 10.0).is_none());
        assert_eq!(backend.num_active_contact_points(), 0);
        assert_eq!(backend.gravity(), Vector3::zeros());
    }
}
