//! Articulated objects: kinematic trees of links connected by joints.
//!
//! Joint state lives in flat vectors. Positions are laid out link by link
//! (one value for revolute and prismatic joints, an `[x, y, z, w]` quaternion
//! for spherical joints, nothing for fixed joints); velocities and forces use
//! the DoF layout (three values for spherical joints).
//!
//! Link poses come from forward kinematics over the tree and are pushed into
//! parentless colliders, one per link. Dynamic objects integrate in joint
//! space: gravity and link forces are mapped onto joint torques through the
//! kinematic chain, joint limits act as hard stops, and contacts are not
//! resolved against the links.

mod link;
mod visual;

pub use link::{JointLimit, JointType};
pub use visual::{CUBE_ASSET, CYLINDER_ASSET, SPHERE_ASSET};

use std::collections::BTreeMap;

use embsim_metadata::{
    ArticulatedModel, LinkBody, MotionType, PhysicsLibrary, SceneObjectInstanceAttributes,
};
use embsim_scene::{NodeId, NodeType, SharedSceneGraph};
use nalgebra::{Isometry3, Point3, Translation3, Unit, UnitQuaternion, Vector3};
use tracing::{debug, warn};

use crate::backend::{
    ColliderDesc, ColliderKey, ColliderOwner, ColliderRole, MultibodyKey, SharedBackend,
};
use crate::colliders::{combine_shapes, geometry_to_shape, PlacedShape};
use crate::collision_groups::CollisionGroup;
use crate::error::PhysicsError;
use crate::motion::integrate_rotation;
use crate::rigid::default_motion_type;
use crate::ObjectId;

use link::{layout, spherical_rotation, ArticulatedLink, LinkParts};

/// Joint positions within this distance outside a limit are left alone.
const JOINT_LIMIT_EPSILON: f32 = 1e-6;

/// Speed below which an object counts as resting.
const SLEEP_VELOCITY: f32 = 0.01;

/// Consecutive resting steps before a sleeping-enabled object deactivates.
const SLEEP_STEPS: u32 = 60;

/// Added to squared lever arms so links at a pivot keep rotational inertia.
const INERTIA_FLOOR: f32 = 0.01;

const MIN_INERTIA: f32 = 1e-3;

/// Per-object friction and restitution applied to every link collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LinkMaterial {
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
}

/// A multi-link object built from an [`ArticulatedModel`].
pub struct ArticulatedObject {
    object_id: ObjectId,
    handle: String,
    backend: SharedBackend,
    scene: SharedSceneGraph,
    node: NodeId,
    base: LinkParts,
    links: Vec<ArticulatedLink>,
    multibody: MultibodyKey,
    aggregate: Option<(ColliderKey, Isometry3<f32>)>,
    fixed_base: bool,
    self_collision: bool,
    motion_type: MotionType,
    root: Isometry3<f32>,
    root_linear_velocity: Vector3<f32>,
    root_angular_velocity: Vector3<f32>,
    positions: Vec<f32>,
    velocities: Vec<f32>,
    forces: Vec<f32>,
    link_forces: Vec<Vector3<f32>>,
    joint_limits: BTreeMap<usize, JointLimit>,
    deferring_updates: bool,
    active: bool,
    can_sleep: bool,
    resting_steps: u32,
}

/// Collision shapes of a link placed in the link frame. Geometry that cannot
/// become a collider is skipped.
fn link_shapes(body: &LinkBody) -> Vec<PlacedShape> {
    body.collisions
        .iter()
        .filter_map(|collision| match geometry_to_shape(&collision.geometry, &body.name) {
            Ok((shape, offset)) => Some((shape, collision.origin.to_isometry() * offset)),
            Err(err) => {
                warn!(link = %body.name, %err, "skipped link collision shape");
                None
            }
        })
        .collect()
}

/// Mass-weighted point of a link: the mean origin of its collision shapes.
fn center_of_mass(body: &LinkBody) -> Vector3<f32> {
    if body.collisions.is_empty() {
        return Vector3::zeros();
    }
    let sum: Vector3<f32> = body
        .collisions
        .iter()
        .map(|c| Vector3::from(c.origin.translation))
        .sum();
    sum / body.collisions.len() as f32
}

/// Zero joint positions, with identity quaternions for spherical joints.
fn rest_positions(links: &[ArticulatedLink], len: usize) -> Vec<f32> {
    let mut positions = vec![0.0; len];
    for link in links {
        if link.joint_type == JointType::Spherical {
            positions[link.pos_offset + 3] = 1.0;
        }
    }
    positions
}

impl ArticulatedObject {
    /// Build links, colliders and scene nodes for `model` placed at `placement`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        object_id: ObjectId,
        model: &ArticulatedModel,
        placement: Isometry3<f32>,
        fixed_base: bool,
        motion_type: MotionType,
        material: LinkMaterial,
        node: NodeId,
        backend: SharedBackend,
        scene: SharedSceneGraph,
    ) -> Result<Self, PhysicsError> {
        model.validate()?;
        let library = backend.borrow().library();
        let motion_type = match motion_type {
            MotionType::Undefined => default_motion_type(library),
            MotionType::Dynamic if library == PhysicsLibrary::NoPhysics => {
                warn!(object_id, model = %model.name, "dynamic articulated objects need a dynamics library");
                return Err(PhysicsError::UnsupportedMotionType(MotionType::Dynamic));
            }
            other => other,
        };

        let joint_types: Vec<JointType> =
            model.links.iter().map(|l| JointType::from(l.joint.kind)).collect();
        let (offsets, num_dofs, num_positions) = layout(&joint_types);

        let (base, links) = {
            let mut graph = scene.borrow_mut();
            graph.set_type(node, NodeType::Object);
            let (base_visuals, complete) =
                visual::attach_geometry(&mut graph, node, &model.base.name, &model.base.visuals);
            if !complete {
                warn!(object_id, link = %model.base.name, "base visuals partially attached");
            }
            let base = LinkParts {
                name: model.base.name.clone(),
                mass: model.base.mass,
                center_of_mass: center_of_mass(&model.base),
                node,
                visual_nodes: base_visuals,
                collider: None,
                collider_offset: Isometry3::identity(),
            };

            let mut links = Vec::with_capacity(model.links.len());
            for ((model_link, joint_type), (dof_offset, pos_offset)) in
                model.links.iter().zip(&joint_types).zip(offsets)
            {
                let link_node = graph.create_child(node);
                graph.set_type(link_node, NodeType::Object);
                let (visual_nodes, complete) = visual::attach_geometry(
                    &mut graph,
                    link_node,
                    &model_link.body.name,
                    &model_link.body.visuals,
                );
                if !complete {
                    warn!(object_id, link = %model_link.body.name, "link visuals partially attached");
                }
                let joint = &model_link.joint;
                links.push(ArticulatedLink {
                    parts: LinkParts {
                        name: model_link.body.name.clone(),
                        mass: model_link.body.mass,
                        center_of_mass: center_of_mass(&model_link.body),
                        node: link_node,
                        visual_nodes,
                        collider: None,
                        collider_offset: Isometry3::identity(),
                    },
                    parent: model_link.parent,
                    joint_type: *joint_type,
                    joint_origin: joint.origin.to_isometry(),
                    axis: Unit::try_new(Vector3::from(joint.axis), 1e-9)
                        .unwrap_or_else(Vector3::z_axis),
                    damping: joint.damping,
                    dof_offset,
                    num_dofs: joint_type.num_dofs(),
                    pos_offset,
                    num_pos: joint_type.num_positions(),
                    world: placement,
                });
            }
            (base, links)
        };

        let joint_limits = model
            .links
            .iter()
            .enumerate()
            .filter_map(|(index, l)| {
                l.joint
                    .limits
                    .map(|[lower, upper]| (index, JointLimit { lower, upper }))
            })
            .collect();

        let multibody = {
            let mut world = backend.borrow_mut();
            let key = world.register_multibody();
            if motion_type == MotionType::Dynamic {
                world.add_multibody(key);
            }
            key
        };

        let positions = rest_positions(&links, num_positions);
        let mut object = Self {
            object_id,
            handle: model.name.clone(),
            backend,
            scene,
            node,
            base,
            link_forces: vec![Vector3::zeros(); links.len()],
            links,
            multibody,
            aggregate: None,
            fixed_base,
            self_collision: model.self_collision,
            motion_type,
            root: placement,
            root_linear_velocity: Vector3::zeros(),
            root_angular_velocity: Vector3::zeros(),
            positions,
            velocities: vec![0.0; num_dofs],
            forces: vec![0.0; num_dofs],
            joint_limits,
            deferring_updates: false,
            active: true,
            can_sleep: true,
            resting_steps: 0,
        };
        object.forward_kinematics();
        object.build_colliders(model, material);
        object.update_kinematic_state();

        debug!(
            object_id,
            model = %model.name,
            links = object.links.len(),
            dofs = num_dofs,
            fixed_base,
            ?motion_type,
            "created articulated object"
        );
        Ok(object)
    }

    /// Insert one collider per link plus, for fixed bases, the aggregate of
    /// non-collidable parts. Expects link poses from the rest configuration.
    fn build_colliders(&mut self, model: &ArticulatedModel, material: LinkMaterial) {
        let object_id = self.object_id;
        let fixed_base = self.fixed_base;
        let base_world = self.root;
        let base_inv = base_world.inverse();
        let mut aggregate_shapes: Vec<PlacedShape> = Vec::new();
        let mut world = self.backend.borrow_mut();

        let mut insert = |shape: PlacedShape, pose: Isometry3<f32>, mass: f32, group, link_id, role| {
            world.insert_collider(
                ColliderDesc {
                    shape: shape.0,
                    pose,
                    mass,
                    friction: material.friction,
                    restitution: material.restitution,
                    group,
                    owner: ColliderOwner {
                        object_id,
                        link_id,
                        role,
                    },
                },
                None,
            )
        };
        let group_of = |body: &LinkBody| {
            if body.collidable {
                CollisionGroup::Robot
            } else {
                CollisionGroup::Noncollidable
            }
        };

        let shapes = link_shapes(&model.base);
        if fixed_base && !model.base.collidable {
            aggregate_shapes.extend(shapes.iter().cloned());
        }
        if let Some(placed) = combine_shapes(shapes) {
            let offset = placed.1;
            self.base.collider_offset = offset;
            self.base.collider = Some(insert(
                placed,
                base_world * offset,
                model.base.mass,
                group_of(&model.base),
                None,
                ColliderRole::MultibodyLink,
            ));
        }

        for (index, (link, model_link)) in self.links.iter_mut().zip(&model.links).enumerate() {
            let shapes = link_shapes(&model_link.body);
            if fixed_base && !model_link.body.collidable {
                let relative = base_inv * link.world;
                aggregate_shapes.extend(shapes.iter().map(|(s, o)| (s.clone(), relative * o)));
            }
            if let Some(placed) = combine_shapes(shapes) {
                let offset = placed.1;
                link.parts.collider_offset = offset;
                link.parts.collider = Some(insert(
                    placed,
                    link.world * offset,
                    model_link.body.mass,
                    group_of(&model_link.body),
                    Some(index),
                    ColliderRole::MultibodyLink,
                ));
            }
        }

        if let Some(placed) = combine_shapes(aggregate_shapes) {
            let offset = placed.1;
            let key = insert(
                placed,
                base_world * offset,
                0.0,
                CollisionGroup::Static,
                None,
                ColliderRole::FixedAggregate,
            );
            self.aggregate = Some((key, offset));
        }
    }

    /// Object ID.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Name of the model this object was built from.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Scene node of the base link.
    pub fn scene_node(&self) -> NodeId {
        self.node
    }

    /// Visual nodes of the base link.
    pub fn base_visual_scene_nodes(&self) -> &[NodeId] {
        &self.base.visual_nodes
    }

    /// Name of the base link.
    pub fn base_name(&self) -> &str {
        &self.base.name
    }

    /// True if the base is welded to the world.
    pub fn is_fixed_base(&self) -> bool {
        self.fixed_base
    }

    /// Whether links of this object collide with each other.
    pub fn self_collision(&self) -> bool {
        self.self_collision
    }

    /// True if the fixed base carries an aggregate collider.
    pub fn has_fixed_aggregate(&self) -> bool {
        self.aggregate.is_some()
    }

    // Links

    fn link(&self, link_id: usize) -> &ArticulatedLink {
        self.links.get(link_id).unwrap_or_else(|| {
            panic!(
                "articulated object {} has no link {} ({} links)",
                self.object_id,
                link_id,
                self.links.len()
            )
        })
    }

    /// Number of non-base links.
    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    /// IDs of the non-base links.
    pub fn link_ids(&self) -> Vec<usize> {
        (0..self.links.len()).collect()
    }

    /// Link name.
    ///
    /// # Panics
    ///
    /// Panics if `link_id` is out of range. The same holds for every
    /// `link_*` accessor.
    pub fn link_name(&self, link_id: usize) -> &str {
        &self.link(link_id).parts.name
    }

    /// Parent link, `None` when attached to the base.
    pub fn link_parent(&self, link_id: usize) -> Option<usize> {
        self.link(link_id).parent
    }

    /// Joint type of the link.
    pub fn link_joint_type(&self, link_id: usize) -> JointType {
        self.link(link_id).joint_type
    }

    /// Offset of the link's DoFs in velocity and force vectors.
    pub fn link_dof_offset(&self, link_id: usize) -> usize {
        self.link(link_id).dof_offset
    }

    /// Number of DoFs of the link's joint.
    pub fn link_num_dofs(&self, link_id: usize) -> usize {
        self.link(link_id).num_dofs
    }

    /// Offset of the link's variables in the position vector.
    pub fn link_joint_pos_offset(&self, link_id: usize) -> usize {
        self.link(link_id).pos_offset
    }

    /// Number of position variables of the link's joint.
    pub fn link_num_joint_pos(&self, link_id: usize) -> usize {
        self.link(link_id).num_pos
    }

    /// Scene node of the link.
    pub fn link_scene_node(&self, link_id: usize) -> NodeId {
        self.link(link_id).parts.node
    }

    /// Visual nodes attached to the link.
    pub fn link_visual_scene_nodes(&self, link_id: usize) -> &[NodeId] {
        &self.link(link_id).parts.visual_nodes
    }

    /// World transform of the link frame.
    pub fn link_world_transform(&self, link_id: usize) -> Isometry3<f32> {
        self.link(link_id).world
    }

    /// Apply a world-frame force at the link's center of mass for the next step.
    pub fn add_link_force(&mut self, link_id: usize, force: Vector3<f32>) {
        self.link(link_id);
        self.link_forces[link_id] += force;
        self.active = true;
    }

    /// Friction of the link collider; zero for links without collision shapes.
    pub fn link_friction(&self, link_id: usize) -> f32 {
        match self.link(link_id).parts.collider {
            Some(collider) => self.backend.borrow().collider_friction(collider),
            None => 0.0,
        }
    }

    /// Set friction of the link collider.
    pub fn set_link_friction(&mut self, link_id: usize, friction: f32) {
        if let Some(collider) = self.link(link_id).parts.collider {
            self.backend
                .borrow_mut()
                .set_collider_friction(collider, friction);
        }
    }

    // Joint state

    /// Total DoFs.
    pub fn num_dofs(&self) -> usize {
        self.velocities.len()
    }

    /// Total position variables.
    pub fn num_joint_positions(&self) -> usize {
        self.positions.len()
    }

    fn check_size(
        &self,
        what: &'static str,
        expected: usize,
        actual: usize,
    ) -> Result<(), PhysicsError> {
        if expected == actual {
            return Ok(());
        }
        warn!(object_id = self.object_id, what, expected, actual, "joint vector size mismatch");
        Err(PhysicsError::JointVectorSize {
            what,
            expected,
            actual,
        })
    }

    /// Joint positions.
    pub fn joint_positions(&self) -> &[f32] {
        &self.positions
    }

    /// Set joint positions and update link poses.
    ///
    /// A vector of the wrong length is rejected and leaves the state untouched.
    pub fn set_joint_positions(&mut self, positions: &[f32]) -> Result<(), PhysicsError> {
        self.check_size("positions", self.positions.len(), positions.len())?;
        self.positions.copy_from_slice(positions);
        self.update_kinematic_state();
        Ok(())
    }

    /// Joint velocities.
    pub fn joint_velocities(&self) -> &[f32] {
        &self.velocities
    }

    /// Set joint velocities.
    pub fn set_joint_velocities(&mut self, velocities: &[f32]) -> Result<(), PhysicsError> {
        self.check_size("velocities", self.velocities.len(), velocities.len())?;
        self.velocities.copy_from_slice(velocities);
        self.active = true;
        Ok(())
    }

    /// Joint forces applied during the next step.
    pub fn joint_forces(&self) -> &[f32] {
        &self.forces
    }

    /// Replace the joint forces for the next step.
    pub fn set_joint_forces(&mut self, forces: &[f32]) -> Result<(), PhysicsError> {
        self.check_size("forces", self.forces.len(), forces.len())?;
        self.forces.copy_from_slice(forces);
        self.active = true;
        Ok(())
    }

    /// Add to the joint forces for the next step.
    pub fn add_joint_forces(&mut self, forces: &[f32]) -> Result<(), PhysicsError> {
        self.check_size("forces", self.forces.len(), forces.len())?;
        for (current, added) in self.forces.iter_mut().zip(forces) {
            *current += added;
        }
        self.active = true;
        Ok(())
    }

    /// Position limits in position-vector layout. Unlimited variables report
    /// `+inf` (upper) or `-inf` (lower).
    pub fn joint_position_limits(&self, upper: bool) -> Vec<f32> {
        let fill = if upper { f32::INFINITY } else { f32::NEG_INFINITY };
        let mut limits = vec![fill; self.positions.len()];
        for (&link_id, limit) in &self.joint_limits {
            limits[self.links[link_id].pos_offset] = if upper { limit.upper } else { limit.lower };
        }
        limits
    }

    /// Pull limited joints back inside their limits.
    ///
    /// Positions within [`JOINT_LIMIT_EPSILON`] outside a limit are kept.
    /// Link poses are only recomputed when something was clamped.
    pub fn clamp_joint_limits(&mut self) {
        let mut changed = false;
        for (&link_id, limit) in &self.joint_limits {
            let index = self.links[link_id].pos_offset;
            let position = &mut self.positions[index];
            if *position < limit.lower - JOINT_LIMIT_EPSILON {
                *position = limit.lower;
                changed = true;
            } else if *position > limit.upper + JOINT_LIMIT_EPSILON {
                *position = limit.upper;
                changed = true;
            }
        }
        if changed {
            self.update_kinematic_state();
        }
    }

    /// Zero joint state and forces. The root is left where it is.
    pub fn reset(&mut self) {
        self.positions = rest_positions(&self.links, self.positions.len());
        self.velocities.fill(0.0);
        self.forces.fill(0.0);
        self.link_forces.fill(Vector3::zeros());
        self.update_kinematic_state();
    }

    // Root

    /// World pose of the base.
    pub fn root_state(&self) -> Isometry3<f32> {
        self.root
    }

    /// Move the base (and the fixed-base aggregate) to `pose`.
    pub fn set_root_state(&mut self, pose: Isometry3<f32>) {
        self.root = pose;
        self.update_kinematic_state();
    }

    /// World translation of the base.
    pub fn translation(&self) -> Vector3<f32> {
        self.root.translation.vector
    }

    /// Set the base translation, keeping its rotation.
    pub fn set_translation(&mut self, translation: Vector3<f32>) {
        self.set_root_state(Isometry3::from_parts(
            Translation3::from(translation),
            self.root.rotation,
        ));
    }

    /// World rotation of the base.
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.root.rotation
    }

    /// Set the base rotation, keeping its translation.
    pub fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        self.set_root_state(Isometry3::from_parts(self.root.translation, rotation));
    }

    /// Linear velocity of the base; zero for fixed bases.
    pub fn root_linear_velocity(&self) -> Vector3<f32> {
        if self.fixed_base {
            return Vector3::zeros();
        }
        self.root_linear_velocity
    }

    /// Set the base linear velocity. Ignored for fixed bases.
    pub fn set_root_linear_velocity(&mut self, velocity: Vector3<f32>) {
        if !self.fixed_base {
            self.root_linear_velocity = velocity;
            self.active = true;
        }
    }

    /// Angular velocity of the base; zero for fixed bases.
    pub fn root_angular_velocity(&self) -> Vector3<f32> {
        if self.fixed_base {
            return Vector3::zeros();
        }
        self.root_angular_velocity
    }

    /// Set the base angular velocity. Ignored for fixed bases.
    pub fn set_root_angular_velocity(&mut self, velocity: Vector3<f32>) {
        if !self.fixed_base {
            self.root_angular_velocity = velocity;
            self.active = true;
        }
    }

    // Motion and activity

    /// Current motion type.
    pub fn motion_type(&self) -> MotionType {
        self.motion_type
    }

    /// Change the motion type. Same-type and `Undefined` requests are no-ops.
    ///
    /// Entering or leaving `Dynamic` adds the object to or removes it from the
    /// dynamics world.
    pub fn set_motion_type(&mut self, motion_type: MotionType) -> Result<(), PhysicsError> {
        if motion_type == MotionType::Undefined || motion_type == self.motion_type {
            return Ok(());
        }
        {
            let mut world = self.backend.borrow_mut();
            if motion_type == MotionType::Dynamic {
                if world.library() == PhysicsLibrary::NoPhysics {
                    warn!(object_id = self.object_id, "dynamic articulated objects need a dynamics library");
                    return Err(PhysicsError::UnsupportedMotionType(motion_type));
                }
                world.add_multibody(self.multibody);
            } else if self.motion_type == MotionType::Dynamic {
                world.remove_multibody(self.multibody);
            }
        }
        self.motion_type = motion_type;
        debug!(object_id = self.object_id, ?motion_type, "articulated object motion type changed");
        Ok(())
    }

    /// False while asleep.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Wake or sleep the object.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
        self.resting_steps = 0;
    }

    /// Whether the object may fall asleep when resting.
    pub fn can_sleep(&self) -> bool {
        self.can_sleep
    }

    /// Allow or forbid sleeping.
    pub fn set_can_sleep(&mut self, can_sleep: bool) {
        self.can_sleep = can_sleep;
        if !can_sleep {
            self.active = true;
        }
    }

    // Collision

    /// True if any part of the object overlaps something it collides with.
    ///
    /// The fixed-base aggregate, when present, is tested in place of the base
    /// collider. Without self-collision, overlaps between this object's own links and
    /// its fixed-base aggregate are ignored.
    pub fn contact_test(&self) -> bool {
        let own_id = self.object_id;
        let self_collision = self.self_collision;
        let accept = move |owner: &ColliderOwner| {
            self_collision
                || owner.object_id != own_id
                || !matches!(
                    owner.role,
                    ColliderRole::MultibodyLink | ColliderRole::FixedAggregate
                )
        };
        let first = self.aggregate.map(|(key, _)| key).or(self.base.collider);
        let mut world = self.backend.borrow_mut();
        first
            .into_iter()
            .chain(self.links.iter().filter_map(|l| l.parts.collider))
            .any(|collider| world.contact_test(collider, &accept))
    }

    // Kinematics

    fn parent_world(&self, link_id: usize) -> Isometry3<f32> {
        match self.links[link_id].parent {
            Some(parent) => self.links[parent].world,
            None => self.root,
        }
    }

    fn forward_kinematics(&mut self) {
        for index in 0..self.links.len() {
            let parent_world = self.parent_world(index);
            let link = &self.links[index];
            let q = &self.positions[link.pos_offset..link.pos_offset + link.num_pos];
            let world = parent_world * link.joint_origin * link.joint_motion(q);
            self.links[index].world = world;
        }
    }

    /// Recompute link poses from the joint state and move the colliders.
    ///
    /// Scene nodes follow unless updates are deferred.
    pub fn update_kinematic_state(&mut self) {
        self.forward_kinematics();
        {
            let mut world = self.backend.borrow_mut();
            if let Some(collider) = self.base.collider {
                world.set_collider_pose(collider, self.root * self.base.collider_offset);
            }
            for link in &self.links {
                if let Some(collider) = link.parts.collider {
                    world.set_collider_pose(collider, link.world * link.parts.collider_offset);
                }
            }
            if let Some((collider, offset)) = self.aggregate {
                world.set_collider_pose(collider, self.root * offset);
            }
        }
        if !self.deferring_updates {
            self.update_nodes(true);
        }
    }

    /// Stop syncing scene nodes until the next [`update_nodes`](Self::update_nodes).
    pub fn defer_updates(&mut self) {
        self.deferring_updates = true;
    }

    /// True while scene node updates are deferred.
    pub fn is_deferring_updates(&self) -> bool {
        self.deferring_updates
    }

    /// Write link poses into the scene nodes and end any deferral.
    ///
    /// Sleeping objects are skipped unless `force` is set.
    pub fn update_nodes(&mut self, force: bool) {
        self.deferring_updates = false;
        if !force && !self.active {
            return;
        }
        let mut graph = self.scene.borrow_mut();
        graph.set_isometry(self.node, &self.root);
        let base_inv = self.root.inverse();
        for link in &self.links {
            graph.set_isometry(link.parts.node, &(base_inv * link.world));
        }
    }

    // Dynamics

    fn link_center_of_mass(&self, link_id: usize) -> Vector3<f32> {
        let link = &self.links[link_id];
        (link.world * Point3::from(link.parts.center_of_mass)).coords
    }

    /// Map a world force at a link's center of mass onto the joint torques of
    /// its chain.
    fn accumulate_link_force(&self, link_id: usize, force: Vector3<f32>, tau: &mut [f32]) {
        let point = self.link_center_of_mass(link_id);
        let mut current = Some(link_id);
        while let Some(index) = current {
            let joint = &self.links[index];
            let frame = self.parent_world(index) * joint.joint_origin;
            let lever = point - frame.translation.vector;
            let d = joint.dof_offset;
            match joint.joint_type {
                JointType::Revolute => {
                    let axis = frame.rotation * joint.axis.into_inner();
                    tau[d] += axis.dot(&lever.cross(&force));
                }
                JointType::Prismatic => {
                    let axis = frame.rotation * joint.axis.into_inner();
                    tau[d] += axis.dot(&force);
                }
                JointType::Spherical => {
                    let local = joint.world.rotation.inverse() * lever.cross(&force);
                    for (k, value) in local.iter().enumerate() {
                        tau[d + k] += value;
                    }
                }
                JointType::Fixed | JointType::Invalid => {}
            }
            current = joint.parent;
        }
    }

    /// Effective inertia seen by each DoF: the mass of its subtree, weighted
    /// by squared lever arm for rotational DoFs.
    fn dof_inertia(&self) -> Vec<f32> {
        let mut inertia = vec![0.0; self.velocities.len()];
        for index in 0..self.links.len() {
            let mass = self.links[index].parts.mass.max(0.0);
            let com = self.link_center_of_mass(index);
            let mut current = Some(index);
            while let Some(j) = current {
                let joint = &self.links[j];
                let pivot = (self.parent_world(j) * joint.joint_origin).translation.vector;
                let d = joint.dof_offset;
                match joint.joint_type {
                    JointType::Revolute | JointType::Spherical => {
                        let moment = mass * ((com - pivot).norm_squared() + INERTIA_FLOOR);
                        for value in &mut inertia[d..d + joint.num_dofs] {
                            *value += moment;
                        }
                    }
                    JointType::Prismatic => inertia[d] += mass,
                    JointType::Fixed | JointType::Invalid => {}
                }
                current = joint.parent;
            }
        }
        for value in &mut inertia {
            *value = value.max(MIN_INERTIA);
        }
        inertia
    }

    /// Advance a dynamic, awake object by `dt`.
    pub(crate) fn integrate(&mut self, dt: f32) {
        if self.motion_type != MotionType::Dynamic || !self.active {
            return;
        }
        let gravity = self.backend.borrow().gravity();
        let mut tau = self.forces.clone();
        for index in 0..self.links.len() {
            let force = gravity * self.links[index].parts.mass + self.link_forces[index];
            self.accumulate_link_force(index, force, &mut tau);
        }
        let inertia = self.dof_inertia();

        for link in &self.links {
            for d in link.dof_offset..link.dof_offset + link.num_dofs {
                let accel = (tau[d] - link.damping * self.velocities[d]) / inertia[d];
                self.velocities[d] += accel * dt;
            }
        }

        for link in &self.links {
            let (p, d) = (link.pos_offset, link.dof_offset);
            match link.joint_type {
                JointType::Revolute | JointType::Prismatic => {
                    self.positions[p] += self.velocities[d] * dt;
                }
                JointType::Spherical => {
                    let q = spherical_rotation(&self.positions[p..p + 4]);
                    let omega = Vector3::new(
                        self.velocities[d],
                        self.velocities[d + 1],
                        self.velocities[d + 2],
                    );
                    // Body-frame angular velocity
                    let next = q * integrate_rotation(UnitQuaternion::identity(), omega, dt);
                    self.positions[p..p + 4].copy_from_slice(next.coords.as_slice());
                }
                JointType::Fixed | JointType::Invalid => {}
            }
        }

        for (&link_id, limit) in &self.joint_limits {
            let (p, d) = (self.links[link_id].pos_offset, self.links[link_id].dof_offset);
            if self.positions[p] < limit.lower {
                self.positions[p] = limit.lower;
                self.velocities[d] = self.velocities[d].max(0.0);
            } else if self.positions[p] > limit.upper {
                self.positions[p] = limit.upper;
                self.velocities[d] = self.velocities[d].min(0.0);
            }
        }

        if !self.fixed_base {
            let translation = self.root.translation.vector + self.root_linear_velocity * dt;
            let rotation = integrate_rotation(self.root.rotation, self.root_angular_velocity, dt);
            self.root = Isometry3::from_parts(Translation3::from(translation), rotation);
        }

        self.forces.fill(0.0);
        self.link_forces.fill(Vector3::zeros());

        if self.can_sleep {
            let speed = self
                .velocities
                .iter()
                .fold(0.0f32, |max, v| max.max(v.abs()))
                .max(self.root_linear_velocity().norm())
                .max(self.root_angular_velocity().norm());
            if speed < SLEEP_VELOCITY {
                self.resting_steps += 1;
                if self.resting_steps >= SLEEP_STEPS {
                    self.active = false;
                    debug!(object_id = self.object_id, "articulated object fell asleep");
                }
            } else {
                self.resting_steps = 0;
            }
        }

        self.update_kinematic_state();
    }

    // Instances

    /// Apply a scene instance: placement, motion type override and initial
    /// joint state. Entries beyond the object's joint vectors are ignored.
    ///
    /// A rejected motion type fails before anything is changed.
    pub fn apply_instance_attributes(
        &mut self,
        instance: &SceneObjectInstanceAttributes,
    ) -> Result<(), PhysicsError> {
        self.set_motion_type(instance.motion_type)?;
        self.set_root_state(instance.pose().to_isometry());

        if !instance.init_joint_positions.is_empty() {
            let mut positions = self.positions.clone();
            let used = positions.len().min(instance.init_joint_positions.len());
            positions[..used].copy_from_slice(&instance.init_joint_positions[..used]);
            if instance.init_joint_positions.len() > used {
                warn!(
                    object_id = self.object_id,
                    extra = instance.init_joint_positions.len() - used,
                    "ignored extra initial joint positions"
                );
            }
            self.positions = positions;
            self.update_kinematic_state();
        }

        if !instance.init_joint_velocities.is_empty() {
            let used = self.velocities.len().min(instance.init_joint_velocities.len());
            self.velocities[..used].copy_from_slice(&instance.init_joint_velocities[..used]);
            if instance.init_joint_velocities.len() > used {
                warn!(
                    object_id = self.object_id,
                    extra = instance.init_joint_velocities.len() - used,
                    "ignored extra initial joint velocities"
                );
            }
        }
        Ok(())
    }
}

impl Drop for ArticulatedObject {
    fn drop(&mut self) {
        let mut world = self.backend.borrow_mut();
        if self.motion_type == MotionType::Dynamic {
            world.remove_multibody(self.multibody);
        }
        for link in &self.links {
            if let Some(collider) = link.parts.collider {
                world.remove_collider(collider);
            }
        }
        if let Some((collider, _)) = self.aggregate.take() {
            world.remove_collider(collider);
        }
        if let Some(collider) = self.base.collider.take() {
            world.remove_collider(collider);
        }
        world.unregister_multibody(self.multibody);
        self.joint_limits.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;
    use approx::assert_relative_eq;
    use embsim_metadata::{Geometry, JointKind, ModelJoint, PhysicsManagerAttributes, Pose};
    use embsim_scene::SceneGraph;
    use std::f32::consts::{FRAC_PI_2, PI};

    type World = (SharedBackend, SharedSceneGraph);

    fn world(library: PhysicsLibrary) -> World {
        let config = PhysicsManagerAttributes::with_simulator(library);
        (create_backend(library, &config), SceneGraph::shared())
    }

    fn rod(name: &str) -> LinkBody {
        LinkBody::new(name)
            .with_collision(
                Geometry::Box { size: [1.0, 0.2, 0.2] },
                Pose::from_translation(0.5, 0.0, 0.0),
            )
            .with_visual(
                Geometry::Box { size: [1.0, 0.2, 0.2] },
                Pose::from_translation(0.5, 0.0, 0.0),
            )
    }

    /// Planar two-link arm in the XY plane, both joints about Z.
    fn arm(limited: bool) -> ArticulatedModel {
        let base = LinkBody::new("base")
            .with_collision(Geometry::Box { size: [0.2, 0.2, 0.2] }, Pose::default());
        let mut model = ArticulatedModel::new("arm", base);
        let mut shoulder = ModelJoint::new("shoulder", JointKind::Revolute, Pose::default());
        let mut elbow =
            ModelJoint::new("elbow", JointKind::Revolute, Pose::from_translation(1.0, 0.0, 0.0));
        if limited {
            shoulder = shoulder.with_limits(0.0, FRAC_PI_2);
            elbow = elbow.with_limits(0.0, FRAC_PI_2);
        }
        let upper = model.push_link(rod("upper"), None, shoulder);
        model.push_link(rod("lower"), Some(upper), elbow);
        model
    }

    fn build(
        world: &World,
        id: ObjectId,
        model: &ArticulatedModel,
        fixed_base: bool,
        motion_type: MotionType,
    ) -> ArticulatedObject {
        let node = {
            let mut graph = world.1.borrow_mut();
            let root = graph.root();
            graph.create_child(root)
        };
        ArticulatedObject::new(
            id,
            model,
            Isometry3::identity(),
            fixed_base,
            motion_type,
            LinkMaterial {
                friction: 0.5,
                restitution: 0.1,
            },
            node,
            world.0.clone(),
            world.1.clone(),
        )
        .unwrap()
    }

    fn insert_box(
        world: &World,
        owner: ObjectId,
        center: Vector3<f32>,
        half: f32,
        group: CollisionGroup,
    ) -> ColliderKey {
        world.0.borrow_mut().insert_collider(
            ColliderDesc {
                shape: parry3d::shape::SharedShape::cuboid(half, half, half),
                pose: Isometry3::translation(center.x, center.y, center.z),
                mass: 1.0,
                friction: 0.5,
                restitution: 0.0,
                group,
                owner: ColliderOwner {
                    object_id: owner,
                    link_id: None,
                    role: ColliderRole::Body,
                },
            },
            None,
        )
    }

    #[test]
    fn test_layout_queries() {
        let world = world(PhysicsLibrary::NoPhysics);
        let object = build(&world, 0, &arm(true), true, MotionType::Undefined);
        assert_eq!(object.motion_type(), MotionType::Kinematic);
        assert_eq!(object.num_links(), 2);
        assert_eq!(object.link_ids(), vec![0, 1]);
        assert_eq!(object.num_dofs(), 2);
        assert_eq!(object.link_joint_type(1), JointType::Revolute);
        assert_eq!(object.link_dof_offset(1), 1);
        assert_eq!(object.link_parent(1), Some(0));
        assert_eq!(object.link_visual_scene_nodes(0).len(), 1);
    }

    #[test]
    #[should_panic(expected = "has no link 5")]
    fn test_bad_link_panics() {
        let world = world(PhysicsLibrary::NoPhysics);
        let object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        object.link_joint_type(5);
    }

    #[test]
    fn test_clamp_then_reset() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        object.set_joint_positions(&[PI, -1.0]).unwrap();
        object.clamp_joint_limits();
        assert_relative_eq!(object.joint_positions()[0], FRAC_PI_2);
        assert_relative_eq!(object.joint_positions()[1], 0.0);

        object.set_joint_velocities(&[1.0, 2.0]).unwrap();
        object.reset();
        assert_eq!(object.joint_positions(), &[0.0, 0.0]);
        assert_eq!(object.joint_velocities(), &[0.0, 0.0]);
    }

    #[test]
    fn test_clamp_tolerance() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        let inside = [FRAC_PI_2 + 5e-7, -5e-7];
        object.set_joint_positions(&inside).unwrap();
        object.clamp_joint_limits();
        assert_eq!(object.joint_positions(), &inside);

        object.set_joint_positions(&[-1e-5, 0.0]).unwrap();
        object.clamp_joint_limits();
        assert_eq!(object.joint_positions(), &[0.0, 0.0]);
    }

    #[test]
    fn test_clamp_bounds_and_idempotence() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);

        let at_bounds = [0.0, FRAC_PI_2];
        object.set_joint_positions(&at_bounds).unwrap();
        object.clamp_joint_limits();
        assert_eq!(object.joint_positions(), &at_bounds);

        let eps = JOINT_LIMIT_EPSILON;
        object
            .set_joint_positions(&[FRAC_PI_2 + 2.0 * eps, -2.0 * eps])
            .unwrap();
        object.clamp_joint_limits();
        assert_eq!(object.joint_positions(), &[FRAC_PI_2, 0.0]);

        object.set_joint_positions(&[PI, -PI]).unwrap();
        object.clamp_joint_limits();
        let once = object.joint_positions().to_vec();
        object.clamp_joint_limits();
        assert_eq!(object.joint_positions(), once.as_slice());
    }

    #[test]
    fn test_clamp_skips_spherical_slice() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut model = ArticulatedModel::new("chain", LinkBody::new("base"));
        let first = model.push_link(
            rod("first"),
            None,
            ModelJoint::new("hinge", JointKind::Revolute, Pose::default()).with_limits(0.0, 1.0),
        );
        let ball = model.push_link(
            rod("second"),
            Some(first),
            ModelJoint::new("ball", JointKind::Spherical, Pose::from_translation(1.0, 0.0, 0.0)),
        );
        model.push_link(
            rod("third"),
            Some(ball),
            ModelJoint::new("slide", JointKind::Prismatic, Pose::from_translation(1.0, 0.0, 0.0))
                .with_limits(0.0, FRAC_PI_2),
        );
        let mut object = build(&world, 0, &model, true, MotionType::Kinematic);
        assert_eq!(object.link_joint_pos_offset(2), 5);

        // The quaternion's y component sits where the third joint's limit
        // would apply if limits were indexed by link.
        object
            .set_joint_positions(&[0.5, 0.0, -0.6, 0.0, 0.8, 2.0])
            .unwrap();
        object.clamp_joint_limits();
        assert_eq!(
            object.joint_positions(),
            &[0.5, 0.0, -0.6, 0.0, 0.8, FRAC_PI_2]
        );
    }

    #[test]
    fn test_size_mismatch_leaves_state() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        object.set_joint_positions(&[0.3, 0.2]).unwrap();
        let err = object.set_joint_positions(&[1.0]).unwrap_err();
        assert_eq!(
            err,
            PhysicsError::JointVectorSize {
                what: "positions",
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(object.joint_positions(), &[0.3, 0.2]);
        assert!(object.add_joint_forces(&[1.0, 2.0, 3.0]).is_err());
        assert_eq!(object.joint_forces(), &[0.0, 0.0]);
    }

    #[test]
    fn test_position_limits() {
        let world = world(PhysicsLibrary::NoPhysics);
        let limited = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        assert_eq!(limited.joint_position_limits(false), vec![0.0, 0.0]);
        assert_eq!(limited.joint_position_limits(true), vec![FRAC_PI_2, FRAC_PI_2]);

        let free = build(&world, 1, &arm(false), true, MotionType::Kinematic);
        assert!(free.joint_position_limits(true).iter().all(|v| *v == f32::INFINITY));
        assert!(free
            .joint_position_limits(false)
            .iter()
            .all(|v| *v == f32::NEG_INFINITY));
    }

    #[test]
    fn test_forward_kinematics_moves_nodes() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        object.set_translation(Vector3::new(0.0, 0.0, 2.0));
        object.set_joint_positions(&[FRAC_PI_2, 0.0]).unwrap();

        let elbow = object.link_world_transform(1).translation.vector;
        assert_relative_eq!(elbow, Vector3::new(0.0, 1.0, 2.0), epsilon = 1e-5);
        let graph = world.1.borrow();
        assert_relative_eq!(
            graph.absolute_translation(object.link_scene_node(1)),
            Vector3::new(0.0, 1.0, 2.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_deferred_node_updates() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        object.defer_updates();
        object.set_joint_positions(&[FRAC_PI_2, 0.0]).unwrap();
        let node = object.link_scene_node(1);
        assert_relative_eq!(
            world.1.borrow().absolute_translation(node),
            Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-5
        );
        assert!(object.is_deferring_updates());

        object.update_nodes(false);
        assert!(!object.is_deferring_updates());
        assert_relative_eq!(
            world.1.borrow().absolute_translation(node),
            Vector3::new(0.0, 1.0, 0.0),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_spherical_layout_and_reset() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut model = ArticulatedModel::new("ball", LinkBody::new("base"));
        model.push_link(
            rod("head"),
            None,
            ModelJoint::new("neck", JointKind::Spherical, Pose::default()),
        );
        let mut object = build(&world, 0, &model, false, MotionType::Kinematic);
        assert_eq!(object.num_joint_positions(), 4);
        assert_eq!(object.num_dofs(), 3);
        assert_eq!(object.joint_positions(), &[0.0, 0.0, 0.0, 1.0]);

        let half = FRAC_PI_2 / 2.0;
        object
            .set_joint_positions(&[0.0, 0.0, half.sin(), half.cos()])
            .unwrap();
        let tip = object.link_world_transform(0) * Point3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(tip.coords, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-5);

        object.reset();
        assert_eq!(object.joint_positions(), &[0.0, 0.0, 0.0, 1.0]);
        assert!(object.root_linear_velocity().norm() == 0.0);
    }

    #[test]
    fn test_motion_type_transitions() {
        let kinematic = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&kinematic, 0, &arm(true), true, MotionType::Kinematic);
        assert!(object.set_motion_type(MotionType::Dynamic).is_err());
        assert_eq!(object.motion_type(), MotionType::Kinematic);
        assert!(object.set_motion_type(MotionType::Undefined).is_ok());
        assert_eq!(object.motion_type(), MotionType::Kinematic);

        let rapier = world(PhysicsLibrary::Rapier);
        let mut object = build(&rapier, 0, &arm(true), true, MotionType::Kinematic);
        object.set_motion_type(MotionType::Dynamic).unwrap();
        object.set_motion_type(MotionType::Dynamic).unwrap();
        object.set_motion_type(MotionType::Static).unwrap();
        let counts = rapier.0.borrow().membership_counts();
        assert_eq!((counts.added, counts.removed), (1, 1));
    }

    #[test]
    fn test_drop_releases_world() {
        let rapier = world(PhysicsLibrary::Rapier);
        let object = build(&rapier, 0, &arm(true), false, MotionType::Dynamic);
        drop(object);
        let counts = rapier.0.borrow().membership_counts();
        assert_eq!((counts.added, counts.removed), (1, 1));
    }

    #[test]
    fn test_root_velocity_on_fixed_base() {
        let world = world(PhysicsLibrary::Rapier);
        let mut fixed = build(&world, 0, &arm(true), true, MotionType::Dynamic);
        fixed.set_root_linear_velocity(Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(fixed.root_linear_velocity(), Vector3::zeros());

        let mut free = build(&world, 1, &arm(true), false, MotionType::Dynamic);
        free.set_can_sleep(false);
        world.0.borrow_mut().set_gravity(Vector3::zeros());
        free.set_root_linear_velocity(Vector3::new(1.0, 0.0, 0.0));
        for _ in 0..10 {
            free.integrate(0.1);
        }
        assert_relative_eq!(free.translation().x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_pendulum_swings_under_gravity() {
        let world = world(PhysicsLibrary::Rapier);
        world.0.borrow_mut().set_gravity(Vector3::new(0.0, -9.8, 0.0));
        let mut object = build(&world, 0, &arm(false), true, MotionType::Dynamic);
        for _ in 0..20 {
            object.integrate(1.0 / 240.0);
        }
        assert!(object.joint_positions()[0] < 0.0);
        assert!(object.joint_velocities()[0] < 0.0);
        assert_eq!(object.joint_forces(), &[0.0, 0.0]);
    }

    #[test]
    fn test_limits_stop_motion() {
        let world = world(PhysicsLibrary::Rapier);
        world.0.borrow_mut().set_gravity(Vector3::new(0.0, -9.8, 0.0));
        let mut object = build(&world, 0, &arm(true), true, MotionType::Dynamic);
        for _ in 0..20 {
            object.integrate(1.0 / 240.0);
        }
        assert_eq!(object.joint_positions()[0], 0.0);
        assert!(object.joint_velocities()[0] >= 0.0);
    }

    #[test]
    fn test_falls_asleep_when_resting() {
        let world = world(PhysicsLibrary::Rapier);
        world.0.borrow_mut().set_gravity(Vector3::zeros());
        let mut object = build(&world, 0, &arm(true), true, MotionType::Dynamic);
        for _ in 0..SLEEP_STEPS {
            object.integrate(1.0 / 240.0);
        }
        assert!(!object.is_active());
        object.add_link_force(0, Vector3::new(0.0, 1.0, 0.0));
        assert!(object.is_active());
    }

    #[test]
    fn test_contact_screens_own_links() {
        let world = world(PhysicsLibrary::Rapier);
        let object = build(&world, 7, &arm(true), true, MotionType::Kinematic);
        assert!(!object.contact_test());

        insert_box(&world, 8, Vector3::new(1.5, 0.0, 0.0), 0.1, CollisionGroup::Static);
        assert!(object.contact_test());
    }

    #[test]
    fn test_self_collision_counts_aggregate() {
        let world = world(PhysicsLibrary::Rapier);
        let mut model = arm(true);
        model.base.collidable = false;
        let screened = build(&world, 0, &model, true, MotionType::Kinematic);
        assert!(screened.has_fixed_aggregate());
        assert!(!screened.contact_test());
        drop(screened);

        model.self_collision = true;
        let object = build(&world, 1, &model, true, MotionType::Kinematic);
        assert!(object.contact_test());
    }

    #[test]
    fn test_obstacles_touching_links_or_aggregate() {
        let world = world(PhysicsLibrary::Rapier);
        let mut model = arm(true);
        model.base.collidable = false;
        let object = build(&world, 0, &model, true, MotionType::Kinematic);
        assert!(!object.contact_test());

        let near_link = insert_box(&world, 8, Vector3::new(1.5, 0.0, 0.0), 0.1, CollisionGroup::Static);
        assert!(object.contact_test());
        world.0.borrow_mut().remove_collider(near_link);
        assert!(!object.contact_test());

        insert_box(&world, 9, Vector3::new(-0.15, 0.0, 0.0), 0.1, CollisionGroup::Dynamic);
        assert!(object.contact_test());
    }

    #[test]
    fn test_compound_aggregate() {
        let world = world(PhysicsLibrary::Rapier);
        let mut model = arm(true);
        model.base.collidable = false;
        model.links[0].body.collidable = false;
        let object = build(&world, 0, &model, true, MotionType::Kinematic);
        assert!(object.has_fixed_aggregate());
        assert!(!object.contact_test());

        // Only the upper link's part of the aggregate reaches this box.
        insert_box(&world, 9, Vector3::new(0.5, 0.0, 0.13), 0.05, CollisionGroup::Dynamic);
        assert!(object.contact_test());
    }

    #[test]
    fn test_fixed_aggregate_follows_root() {
        let world = world(PhysicsLibrary::Rapier);
        let mut model = arm(true);
        model.base.collidable = false;
        let mut object = build(&world, 0, &model, true, MotionType::Kinematic);
        assert!(object.has_fixed_aggregate());
        let (aggregate, _) = object.aggregate.expect("aggregate collider");
        object.set_translation(Vector3::new(3.0, 0.0, 0.0));
        let pose = world.0.borrow().collider_pose(aggregate);
        assert_relative_eq!(pose.translation.vector, Vector3::new(3.0, 0.0, 0.0), epsilon = 1e-6);

        let free = build(&world, 1, &model, false, MotionType::Kinematic);
        assert!(!free.has_fixed_aggregate());
    }

    #[test]
    fn test_instance_attributes() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        let mut instance = SceneObjectInstanceAttributes::new("arm");
        instance.translation = [1.0, 2.0, 3.0];
        instance.motion_type = MotionType::Static;
        instance.init_joint_positions = vec![0.1, 0.2, 0.3];
        instance.init_joint_velocities = vec![0.5];
        object.apply_instance_attributes(&instance).unwrap();

        assert_relative_eq!(object.translation(), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(object.motion_type(), MotionType::Static);
        assert_eq!(object.joint_positions(), &[0.1, 0.2]);
        assert_eq!(object.joint_velocities(), &[0.5, 0.0]);
    }

    #[test]
    fn test_rejected_instance_changes_nothing() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = build(&world, 0, &arm(true), true, MotionType::Kinematic);
        let mut instance = SceneObjectInstanceAttributes::new("arm");
        instance.translation = [1.0, 2.0, 3.0];
        instance.motion_type = MotionType::Dynamic;
        instance.init_joint_positions = vec![0.1, 0.2];

        let err = object.apply_instance_attributes(&instance).unwrap_err();
        assert_eq!(err, PhysicsError::UnsupportedMotionType(MotionType::Dynamic));
        assert_eq!(object.translation(), Vector3::zeros());
        assert_eq!(object.motion_type(), MotionType::Kinematic);
        assert_eq!(object.joint_positions(), &[0.0, 0.0]);
    }
}
