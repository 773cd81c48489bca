//! Rapier3d world.

use std::collections::HashMap;

use embsim_metadata::{CollisionMeshData, MotionType, PhysicsLibrary, PhysicsManagerAttributes};
use nalgebra::{Isometry3, Point3, Vector3};
use rapier3d::dynamics::{
    CCDSolver, ImpulseJointSet, IntegrationParameters, IslandManager, MultibodyJointSet,
    RigidBodyBuilder, RigidBodyHandle, RigidBodySet, RigidBodyType,
};
use rapier3d::geometry::{
    ActiveCollisionTypes, BroadPhaseMultiSap, ColliderBuilder, ColliderHandle, ColliderSet,
    InteractionGroups, NarrowPhase, Ray as RapierRay,
};
use rapier3d::parry::query::ShapeCastOptions;
use rapier3d::parry::shape::Ball;
use rapier3d::pipeline::{CollisionPipeline, PhysicsPipeline, QueryFilter, QueryPipeline};
use slotmap::SlotMap;
use tracing::{debug, warn};

use super::{
    BodyDesc, BodyKey, ColliderDesc, ColliderKey, ColliderOwner, DynamicsBackend,
    MembershipCounts, MultibodyKey, WorldMembership,
};
use crate::collision_groups::CollisionGroup;
use crate::error::PhysicsError;
use crate::query::{ContactPointData, Ray, RayHitInfo, NO_OBJECT_ID};

/// Contact margin used by discrete collision detection passes.
const PREDICTION_DISTANCE: f32 = 0.002;

#[derive(Debug, Clone, Copy)]
struct BodyEntry {
    handle: RigidBodyHandle,
    motion_type: MotionType,
}

#[derive(Debug, Clone, Copy)]
struct ColliderEntry {
    handle: ColliderHandle,
    group: CollisionGroup,
    owner: ColliderOwner,
}

fn body_type(motion_type: MotionType) -> RigidBodyType {
    match motion_type {
        MotionType::Static => RigidBodyType::Fixed,
        MotionType::Kinematic => RigidBodyType::KinematicPositionBased,
        MotionType::Dynamic | MotionType::Undefined => RigidBodyType::Dynamic,
    }
}

/// Orthonormal tangents of a contact normal.
fn tangent_basis(normal: &Vector3<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let helper = if normal.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let t1 = normal.cross(&helper).normalize();
    let t2 = normal.cross(&t1);
    (t1, t2)
}

/// Physics world backed by rapier3d.
pub struct RapierBackend {
    // Rapier components
    pipeline: PhysicsPipeline,
    collision_pipeline: CollisionPipeline,
    gravity: Vector3<f32>,
    integration_params: IntegrationParameters,
    islands: IslandManager,
    broad_phase: BroadPhaseMultiSap,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,

    // Mapping from embsim keys to Rapier
    body_entries: SlotMap<BodyKey, BodyEntry>,
    collider_entries: SlotMap<ColliderKey, ColliderEntry>,
    collider_keys: HashMap<ColliderHandle, ColliderKey>,

    membership: WorldMembership,
    max_mesh_triangles: usize,
    last_dt: f32,
    queries_dirty: bool,
}

impl RapierBackend {
    /// Empty world configured from manager attributes.
    pub fn new(config: &PhysicsManagerAttributes) -> Self {
        let mut integration_params = IntegrationParameters::default();
        integration_params.dt = config.timestep as f32;
        Self {
            pipeline: PhysicsPipeline::new(),
            collision_pipeline: CollisionPipeline::new(),
            gravity: Vector3::from(config.gravity),
            integration_params,
            islands: IslandManager::new(),
            broad_phase: BroadPhaseMultiSap::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            body_entries: SlotMap::with_key(),
            collider_entries: SlotMap::with_key(),
            collider_keys: HashMap::new(),
            membership: WorldMembership::default(),
            max_mesh_triangles: config.max_collision_mesh_triangles,
            last_dt: config.timestep as f32,
            queries_dirty: true,
        }
    }

    fn body_entry(&self, body: BodyKey) -> BodyEntry {
        *self
            .body_entries
            .get(body)
            .unwrap_or_else(|| panic!("body {:?} is not in this world", body))
    }

    fn collider_entry(&self, collider: ColliderKey) -> ColliderEntry {
        *self
            .collider_entries
            .get(collider)
            .unwrap_or_else(|| panic!("collider {:?} is not in this world", collider))
    }

    fn rigid_body(&self, body: BodyKey) -> &rapier3d::dynamics::RigidBody {
        let handle = self.body_entry(body).handle;
        &self.bodies[handle]
    }

    fn rigid_body_mut(&mut self, body: BodyKey) -> &mut rapier3d::dynamics::RigidBody {
        let handle = self.body_entry(body).handle;
        &mut self.bodies[handle]
    }

    fn rapier_collider(&self, collider: ColliderKey) -> &rapier3d::geometry::Collider {
        let handle = self.collider_entry(collider).handle;
        &self.colliders[handle]
    }

    fn rapier_collider_mut(&mut self, collider: ColliderKey) -> &mut rapier3d::geometry::Collider {
        let handle = self.collider_entry(collider).handle;
        &mut self.colliders[handle]
    }

    fn owner_of(&self, handle: ColliderHandle) -> Option<ColliderOwner> {
        let key = self.collider_keys.get(&handle)?;
        self.collider_entries.get(*key).map(|e| e.owner)
    }

    /// Bring collider positions and the query acceleration structure up to
    /// date after teleports, insertions or removals.
    fn refresh_queries(&mut self) {
        if !self.queries_dirty {
            return;
        }
        self.bodies
            .propagate_modified_body_positions_to_colliders(&mut self.colliders);
        self.query_pipeline.update(&self.colliders);
        self.queries_dirty = false;
    }

    fn hit_from(&self, handle: ColliderHandle, point: Point3<f32>, normal: Vector3<f32>, t: f32) -> RayHitInfo {
        let owner = self.owner_of(handle);
        RayHitInfo {
            object_id: owner.map_or(NO_OBJECT_ID, |o| o.object_id),
            link_id: owner.and_then(|o| o.link_id),
            point,
            normal,
            ray_distance: t,
        }
    }
}

impl DynamicsBackend for RapierBackend {
    fn library(&self) -> PhysicsLibrary {
        PhysicsLibrary::Rapier
    }

    fn step(&mut self, dt: f32) {
        self.integration_params.dt = dt;

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );

        // Applied forces only last for one step.
        for (_, body) in self.bodies.iter_mut() {
            body.reset_forces(false);
            body.reset_torques(false);
        }
        self.last_dt = dt;
        self.queries_dirty = true;
    }

    fn gravity(&self) -> Vector3<f32> {
        self.gravity
    }

    fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.gravity = gravity;
    }

    fn membership_counts(&self) -> MembershipCounts {
        self.membership.counts()
    }

    fn insert_body(&mut self, desc: BodyDesc) -> Result<BodyKey, PhysicsError> {
        if desc.motion_type == MotionType::Undefined {
            return Err(PhysicsError::UnsupportedMotionType(desc.motion_type));
        }
        let rigid_body = RigidBodyBuilder::new(body_type(desc.motion_type))
            .position(desc.pose)
            .linear_damping(desc.linear_damping)
            .angular_damping(desc.angular_damping)
            .build();
        let handle = self.bodies.insert(rigid_body);
        self.membership
            .note_body_transition(MotionType::Undefined, desc.motion_type);
        self.queries_dirty = true;
        Ok(self.body_entries.insert(BodyEntry {
            handle,
            motion_type: desc.motion_type,
        }))
    }

    fn remove_body(&mut self, body: BodyKey) {
        let Some(entry) = self.body_entries.remove(body) else {
            return;
        };
        self.membership
            .note_body_transition(entry.motion_type, MotionType::Undefined);
        self.bodies.remove(
            entry.handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );

        // Attached colliders went with the body.
        let colliders = &self.colliders;
        self.collider_entries
            .retain(|_, e| colliders.get(e.handle).is_some());
        self.collider_keys
            .retain(|handle, _| colliders.get(*handle).is_some());
        self.queries_dirty = true;
    }

    fn body_pose(&self, body: BodyKey) -> Isometry3<f32> {
        *self.rigid_body(body).position()
    }

    fn set_body_pose(&mut self, body: BodyKey, pose: Isometry3<f32>) {
        self.rigid_body_mut(body).set_position(pose, true);
        self.queries_dirty = true;
    }

    fn body_motion_type(&self, body: BodyKey) -> MotionType {
        self.body_entry(body).motion_type
    }

    fn set_body_motion_type(
        &mut self,
        body: BodyKey,
        motion_type: MotionType,
    ) -> Result<(), PhysicsError> {
        let current = self.body_entry(body).motion_type;
        if motion_type == MotionType::Undefined || motion_type == current {
            return Ok(());
        }
        let rigid_body = self.rigid_body_mut(body);
        rigid_body.set_body_type(body_type(motion_type), true);
        if motion_type != MotionType::Dynamic {
            rigid_body.set_linvel(Vector3::zeros(), false);
            rigid_body.set_angvel(Vector3::zeros(), false);
        }
        self.membership.note_body_transition(current, motion_type);
        if let Some(entry) = self.body_entries.get_mut(body) {
            entry.motion_type = motion_type;
        }
        debug!(?current, ?motion_type, "body motion type changed");
        Ok(())
    }

    fn body_linear_velocity(&self, body: BodyKey) -> Vector3<f32> {
        *self.rigid_body(body).linvel()
    }

    fn set_body_linear_velocity(&mut self, body: BodyKey, velocity: Vector3<f32>) {
        self.rigid_body_mut(body).set_linvel(velocity, true);
    }

    fn body_angular_velocity(&self, body: BodyKey) -> Vector3<f32> {
        *self.rigid_body(body).angvel()
    }

    fn set_body_angular_velocity(&mut self, body: BodyKey, velocity: Vector3<f32>) {
        self.rigid_body_mut(body).set_angvel(velocity, true);
    }

    fn apply_force(&mut self, body: BodyKey, force: Vector3<f32>, point: Point3<f32>) {
        self.rigid_body_mut(body).add_force_at_point(force, point, true);
    }

    fn apply_impulse(&mut self, body: BodyKey, impulse: Vector3<f32>, point: Point3<f32>) {
        self.rigid_body_mut(body)
            .apply_impulse_at_point(impulse, point, true);
    }

    fn apply_torque(&mut self, body: BodyKey, torque: Vector3<f32>) {
        self.rigid_body_mut(body).add_torque(torque, true);
    }

    fn apply_impulse_torque(&mut self, body: BodyKey, impulse: Vector3<f32>) {
        self.rigid_body_mut(body).apply_torque_impulse(impulse, true);
    }

    fn body_is_active(&self, body: BodyKey) -> bool {
        !self.rigid_body(body).is_sleeping()
    }

    fn set_body_active(&mut self, body: BodyKey, active: bool) {
        let rigid_body = self.rigid_body_mut(body);
        if active {
            rigid_body.wake_up(true);
        } else {
            rigid_body.sleep();
        }
    }

    fn insert_collider(&mut self, desc: ColliderDesc, parent: Option<BodyKey>) -> ColliderKey {
        let builder = ColliderBuilder::new(desc.shape)
            .position(desc.pose)
            .friction(desc.friction)
            .restitution(desc.restitution)
            .collision_groups(desc.group.interaction_groups());

        let handle = match parent {
            Some(body) => {
                let body_handle = self.body_entry(body).handle;
                let collider = builder.mass(desc.mass.max(1e-3)).build();
                self.colliders
                    .insert_with_parent(collider, body_handle, &mut self.bodies)
            }
            None => {
                // Parentless colliders are moved by the object layer and must
                // still report contacts against other fixed geometry.
                let collider = builder
                    .active_collision_types(ActiveCollisionTypes::all())
                    .build();
                self.colliders.insert(collider)
            }
        };

        let key = self.collider_entries.insert(ColliderEntry {
            handle,
            group: desc.group,
            owner: desc.owner,
        });
        self.collider_keys.insert(handle, key);
        self.queries_dirty = true;
        key
    }

    fn remove_collider(&mut self, collider: ColliderKey) {
        let Some(entry) = self.collider_entries.remove(collider) else {
            return;
        };
        self.collider_keys.remove(&entry.handle);
        self.colliders
            .remove(entry.handle, &mut self.islands, &mut self.bodies, true);
        self.queries_dirty = true;
    }

    fn collider_pose(&self, collider: ColliderKey) -> Isometry3<f32> {
        let handle = self.collider_entry(collider).handle;
        let co = &self.colliders[handle];
        match co.parent() {
            // Attached collider positions lag behind teleports until the
            // next propagation, so compose from the body.
            Some(parent) => match (self.bodies.get(parent), co.position_wrt_parent()) {
                (Some(body), Some(local)) => body.position() * local,
                _ => *co.position(),
            },
            None => *co.position(),
        }
    }

    fn set_collider_pose(&mut self, collider: ColliderKey, pose: Isometry3<f32>) {
        let co = self.rapier_collider_mut(collider);
        if co.parent().is_some() {
            co.set_position_wrt_parent(pose);
        } else {
            co.set_position(pose);
        }
        self.queries_dirty = true;
    }

    fn collider_group(&self, collider: ColliderKey) -> CollisionGroup {
        self.collider_entry(collider).group
    }

    fn set_collider_group(&mut self, collider: ColliderKey, group: CollisionGroup) {
        self.rapier_collider_mut(collider)
            .set_collision_groups(group.interaction_groups());
        if let Some(entry) = self.collider_entries.get_mut(collider) {
            entry.group = group;
        }
        self.queries_dirty = true;
    }

    fn collider_friction(&self, collider: ColliderKey) -> f32 {
        self.rapier_collider(collider).friction()
    }

    fn set_collider_friction(&mut self, collider: ColliderKey, friction: f32) {
        self.rapier_collider_mut(collider).set_friction(friction);
    }

    fn collider_restitution(&self, collider: ColliderKey) -> f32 {
        self.rapier_collider(collider).restitution()
    }

    fn set_collider_restitution(&mut self, collider: ColliderKey, restitution: f32) {
        self.rapier_collider_mut(collider).set_restitution(restitution);
    }

    fn collider_owner(&self, collider: ColliderKey) -> Option<ColliderOwner> {
        self.collider_entries.get(collider).map(|e| e.owner)
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
        collider: ColliderKey,
        accept: &dyn Fn(&ColliderOwner) -> bool,
    ) -> bool {
        self.refresh_queries();
        let handle = self.collider_entry(collider).handle;
        let co = &self.colliders[handle];
        if !co.is_enabled() {
            return false;
        }
        let shape = co.shared_shape().clone();
        let position = *co.position();

        let predicate = |other: ColliderHandle, other_co: &rapier3d::geometry::Collider| {
            other_co.is_enabled() && self.owner_of(other).map_or(true, |owner| accept(&owner))
        };
        let mut filter = QueryFilter::new()
            .groups(co.collision_groups())
            .exclude_collider(handle)
            .predicate(&predicate);
        if let Some(parent) = co.parent() {
            filter = filter.exclude_rigid_body(parent);
        }

        let mut hit = false;
        self.query_pipeline.intersections_with_shape(
            &self.bodies,
            &self.colliders,
            &position,
            shape.as_ref(),
            filter,
            |_| {
                hit = true;
                false // Stop at the first contact
            },
        );
        hit
    }

    fn cast_ray(&mut self, ray: &Ray, max_distance: f32) -> Vec<RayHitInfo> {
        self.refresh_queries();
        let rapier_ray = RapierRay::new(ray.origin, ray.direction);

        let mut hits = Vec::new();
        self.query_pipeline.intersections_with_ray(
            &self.bodies,
            &self.colliders,
            &rapier_ray,
            max_distance,
            true,
            QueryFilter::default().groups(InteractionGroups::all()),
            |handle, intersection| {
                hits.push(self.hit_from(
                    handle,
                    ray.point_at(intersection.time_of_impact),
                    intersection.normal,
                    intersection.time_of_impact,
                ));
                true // Continue searching
            },
        );
        hits
    }

    fn cast_sphere(&mut self, ray: &Ray, radius: f32, max_distance: f32) -> Option<RayHitInfo> {
        self.refresh_queries();
        let ball = Ball::new(radius);
        let start = Isometry3::translation(ray.origin.x, ray.origin.y, ray.origin.z);

        let (handle, hit) = self.query_pipeline.cast_shape(
            &self.bodies,
            &self.colliders,
            &start,
            &ray.direction,
            &ball,
            ShapeCastOptions::with_max_time_of_impact(max_distance),
            QueryFilter::default().groups(InteractionGroups::all()),
        )?;

        let collider_pose = *self.colliders.get(handle)?.position();
        Some(self.hit_from(
            handle,
            collider_pose * hit.witness1,
            collider_pose.rotation * hit.normal1.into_inner(),
            hit.time_of_impact,
        ))
    }

    fn perform_discrete_collision_detection(&mut self) {
        self.bodies
            .propagate_modified_body_positions_to_colliders(&mut self.colliders);
        self.collision_pipeline.step(
            PREDICTION_DISTANCE,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            Some(&mut self.query_pipeline),
            &(),
            &(),
        );
        self.queries_dirty = false;
    }

    fn contact_points(&self) -> Vec<ContactPointData> {
        let dt = self.last_dt.max(f32::EPSILON);
        let mut out = Vec::new();

        for pair in self.narrow_phase.contact_pairs() {
            let (Some(co1), Some(co2)) = (
                self.colliders.get(pair.collider1),
                self.colliders.get(pair.collider2),
            ) else {
                continue;
            };
            let owner_a = self.owner_of(pair.collider1);
            let owner_b = self.owner_of(pair.collider2);

            for manifold in &pair.manifolds {
                let normal = manifold.data.normal;
                let (t1, t2) = tangent_basis(&normal);
                for point in &manifold.points {
                    let tangent = point.data.tangent_impulse;
                    out.push(ContactPointData {
                        object_id_a: owner_a.map_or(NO_OBJECT_ID, |o| o.object_id),
                        object_id_b: owner_b.map_or(NO_OBJECT_ID, |o| o.object_id),
                        link_id_a: owner_a.and_then(|o| o.link_id),
                        link_id_b: owner_b.and_then(|o| o.link_id),
                        position_on_a_in_ws: co1.position() * point.local_p1,
                        position_on_b_in_ws: co2.position() * point.local_p2,
                        contact_normal_on_b_in_ws: -normal,
                        contact_distance: point.dist,
                        normal_force: point.data.impulse / dt,
                        linear_friction_force1: tangent[0].abs() / dt,
                        linear_friction_force2: tangent[1].abs() / dt,
                        linear_friction_direction1: t1,
                        linear_friction_direction2: t2,
                        is_active: pair.has_any_active_contact,
                    });
                }
            }
        }
        out
    }

    fn validate_collision_mesh(&self, mesh: &CollisionMeshData) -> Result<(), String> {
        if mesh.is_empty() {
            return Err("mesh has no triangles".to_string());
        }
        if !mesh.indices_in_bounds() {
            return Err("triangle index out of bounds".to_string());
        }
        if mesh.triangle_count() > self.max_mesh_triangles {
            warn!(
                triangles = mesh.triangle_count(),
                limit = self.max_mesh_triangles,
                "collision mesh too large"
            );
            return Err(format!(
                "{} triangles exceeds the limit of {}",
                mesh.triangle_count(),
                self.max_mesh_triangles
            ));
        }
        let vertex = |i: u32| Vector3::from(mesh.vertices[i as usize]);
        let has_area = mesh.indices.iter().any(|[a, b, c]| {
            let (a, b, c) = (vertex(*a), vertex(*b), vertex(*c));
            (b - a).cross(&(c - a)).norm_squared() > 1e-12
        });
        if !has_area {
            return Err("every triangle is degenerate".to_string());
        }
        Ok(())
    }
}
