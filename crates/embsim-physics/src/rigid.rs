//! Rigid objects and the static stage.

use embsim_metadata::{
    ColliderStrategy, CollisionMeshData, MotionType, ObjectAttributes, ObjectCollision,
    PhysicsLibrary, StageAttributes,
};
use embsim_scene::{NodeId, NodeType, SharedSceneGraph};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use tracing::{debug, warn};

use crate::backend::{
    BodyDesc, BodyKey, ColliderDesc, ColliderKey, ColliderOwner, ColliderRole, SharedBackend,
};
use crate::colliders::{estimate_mass, geometry_to_shape, mesh_to_shape};
use crate::collision_groups::CollisionGroup;
use crate::error::PhysicsError;
use crate::motion::VelocityControl;
use crate::query::STAGE_ID;
use crate::ObjectId;

/// Density used to estimate the mass of mesh objects without a template mass.
const DEFAULT_DENSITY: f32 = 1000.0;

/// Collision group for a rigid body of the given motion type.
fn group_for(motion_type: MotionType) -> CollisionGroup {
    match motion_type {
        MotionType::Static => CollisionGroup::Static,
        MotionType::Kinematic => CollisionGroup::Kinematic,
        MotionType::Dynamic => CollisionGroup::Dynamic,
        MotionType::Undefined => CollisionGroup::Default,
    }
}

/// Motion type new objects get when neither template nor instance picks one.
pub(crate) fn default_motion_type(library: PhysicsLibrary) -> MotionType {
    match library {
        PhysicsLibrary::NoPhysics => MotionType::Kinematic,
        PhysicsLibrary::Rapier => MotionType::Dynamic,
    }
}

/// A simulated single-body object.
pub struct RigidObject {
    object_id: ObjectId,
    attributes: ObjectAttributes,
    backend: SharedBackend,
    scene: SharedSceneGraph,
    node: NodeId,
    visual_node: NodeId,
    body: BodyKey,
    collider: ColliderKey,
    is_collidable: bool,
    velocity_control: VelocityControl,
}

impl RigidObject {
    /// Build the body and collider for `attributes` and attach a visual node
    /// under `node`.
    pub(crate) fn new(
        object_id: ObjectId,
        attributes: ObjectAttributes,
        pose: Isometry3<f32>,
        motion_type: MotionType,
        node: NodeId,
        backend: SharedBackend,
        scene: SharedSceneGraph,
    ) -> Result<Self, PhysicsError> {
        let (shape, shape_pose, estimated_mass) = match &attributes.collision {
            ObjectCollision::Primitive { geometry } => {
                let (shape, offset) = geometry_to_shape(geometry, &attributes.handle)?;
                (shape, offset, None)
            }
            ObjectCollision::Mesh { mesh, strategy } => {
                backend.borrow().validate_collision_mesh(mesh).map_err(|reason| {
                    PhysicsError::InvalidCollisionMesh {
                        name: attributes.handle.clone(),
                        index: 0,
                        reason,
                    }
                })?;
                let (shape, offset) =
                    mesh_to_shape(mesh, *strategy, attributes.scale_vector(), &attributes.handle)?;
                (shape, offset, Some(estimate_mass(mesh, DEFAULT_DENSITY)))
            }
        };
        let mass = if attributes.mass > 0.0 {
            attributes.mass
        } else {
            estimated_mass.unwrap_or(1.0)
        };

        let motion_type = match motion_type {
            MotionType::Undefined => default_motion_type(backend.borrow().library()),
            other => other,
        };
        let group = if attributes.is_collidable {
            group_for(motion_type)
        } else {
            CollisionGroup::Noncollidable
        };

        let (body, collider) = {
            let mut world = backend.borrow_mut();
            let body = world.insert_body(BodyDesc {
                pose,
                motion_type,
                linear_damping: attributes.linear_damping,
                angular_damping: attributes.angular_damping,
            })?;
            let collider = world.insert_collider(
                ColliderDesc {
                    shape,
                    pose: shape_pose,
                    mass,
                    friction: attributes.friction_coefficient,
                    restitution: attributes.restitution_coefficient,
                    group,
                    owner: ColliderOwner {
                        object_id,
                        link_id: None,
                        role: ColliderRole::Body,
                    },
                },
                Some(body),
            );
            (body, collider)
        };

        let visual_node = {
            let mut graph = scene.borrow_mut();
            graph.set_type(node, NodeType::Object);
            let visual = graph.create_child(node);
            graph.set_type(visual, NodeType::Visual);
            graph.set_scale(visual, attributes.scale_vector());
            if let Some(asset) = &attributes.render_asset {
                graph.set_render_asset(visual, asset.clone());
            }
            visual
        };

        debug!(object_id, handle = %attributes.handle, ?motion_type, "created rigid object");
        let object = Self {
            object_id,
            is_collidable: attributes.is_collidable,
            attributes,
            backend,
            scene,
            node,
            visual_node,
            body,
            collider,
            velocity_control: VelocityControl::default(),
        };
        object.update_nodes();
        Ok(object)
    }

    /// Object ID.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Template this object was created from.
    pub fn template(&self) -> &ObjectAttributes {
        &self.attributes
    }

    /// Template handle.
    pub fn handle(&self) -> &str {
        &self.attributes.handle
    }

    /// Root scene node.
    pub fn scene_node(&self) -> NodeId {
        self.node
    }

    /// Node carrying the render asset.
    pub fn visual_scene_node(&self) -> NodeId {
        self.visual_node
    }

    /// World pose.
    pub fn root_state(&self) -> Isometry3<f32> {
        self.backend.borrow().body_pose(self.body)
    }

    /// Teleport to `pose` and sync the scene node.
    pub fn set_root_state(&mut self, pose: Isometry3<f32>) {
        self.backend.borrow_mut().set_body_pose(self.body, pose);
        self.update_nodes();
    }

    /// World translation.
    pub fn translation(&self) -> Vector3<f32> {
        self.root_state().translation.vector
    }

    /// Set world translation, keeping the rotation.
    pub fn set_translation(&mut self, translation: Vector3<f32>) {
        let pose = Isometry3::from_parts(Translation3::from(translation), self.rotation());
        self.set_root_state(pose);
    }

    /// World rotation.
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.root_state().rotation
    }

    /// Set world rotation, keeping the translation.
    pub fn set_rotation(&mut self, rotation: UnitQuaternion<f32>) {
        let pose = Isometry3::from_parts(Translation3::from(self.translation()), rotation);
        self.set_root_state(pose);
    }

    /// Current motion type.
    pub fn motion_type(&self) -> MotionType {
        self.backend.borrow().body_motion_type(self.body)
    }

    /// Change the motion type. Same-type requests are no-ops.
    pub fn set_motion_type(&mut self, motion_type: MotionType) -> Result<(), PhysicsError> {
        if motion_type == MotionType::Undefined || motion_type == self.motion_type() {
            return Ok(());
        }
        let mut world = self.backend.borrow_mut();
        world.set_body_motion_type(self.body, motion_type)?;
        if self.is_collidable {
            world.set_collider_group(self.collider, group_for(motion_type));
        }
        debug!(object_id = self.object_id, ?motion_type, "rigid object motion type changed");
        Ok(())
    }

    /// Linear velocity.
    pub fn linear_velocity(&self) -> Vector3<f32> {
        self.backend.borrow().body_linear_velocity(self.body)
    }

    /// Set linear velocity.
    pub fn set_linear_velocity(&mut self, velocity: Vector3<f32>) {
        self.backend
            .borrow_mut()
            .set_body_linear_velocity(self.body, velocity);
    }

    /// Angular velocity.
    pub fn angular_velocity(&self) -> Vector3<f32> {
        self.backend.borrow().body_angular_velocity(self.body)
    }

    /// Set angular velocity.
    pub fn set_angular_velocity(&mut self, velocity: Vector3<f32>) {
        self.backend
            .borrow_mut()
            .set_body_angular_velocity(self.body, velocity);
    }

    /// Apply a force at an offset from the object origin (world axes).
    pub fn apply_force(&mut self, force: Vector3<f32>, relative_position: Vector3<f32>) {
        let point = Point3::from(self.translation() + relative_position);
        self.backend.borrow_mut().apply_force(self.body, force, point);
    }

    /// Apply an impulse at an offset from the object origin (world axes).
    pub fn apply_impulse(&mut self, impulse: Vector3<f32>, relative_position: Vector3<f32>) {
        let point = Point3::from(self.translation() + relative_position);
        self.backend
            .borrow_mut()
            .apply_impulse(self.body, impulse, point);
    }

    /// Apply a torque for the next step.
    pub fn apply_torque(&mut self, torque: Vector3<f32>) {
        self.backend.borrow_mut().apply_torque(self.body, torque);
    }

    /// Apply an angular impulse.
    pub fn apply_impulse_torque(&mut self, impulse: Vector3<f32>) {
        self.backend
            .borrow_mut()
            .apply_impulse_torque(self.body, impulse);
    }

    /// False while asleep.
    pub fn is_active(&self) -> bool {
        self.backend.borrow().body_is_active(self.body)
    }

    /// Wake or sleep the body.
    pub fn set_active(&mut self, active: bool) {
        self.backend.borrow_mut().set_body_active(self.body, active);
    }

    /// Whether the object collides.
    pub fn is_collidable(&self) -> bool {
        self.is_collidable
    }

    /// Enable or disable collisions. Redundant calls are no-ops.
    pub fn set_collidable(&mut self, collidable: bool) {
        if collidable == self.is_collidable {
            return;
        }
        self.is_collidable = collidable;
        let group = if collidable {
            group_for(self.motion_type())
        } else {
            CollisionGroup::Noncollidable
        };
        self.backend
            .borrow_mut()
            .set_collider_group(self.collider, group);
    }

    /// Friction coefficient.
    pub fn friction_coefficient(&self) -> f32 {
        self.backend.borrow().collider_friction(self.collider)
    }

    /// Set friction coefficient.
    pub fn set_friction_coefficient(&mut self, friction: f32) {
        self.backend
            .borrow_mut()
            .set_collider_friction(self.collider, friction);
    }

    /// Restitution coefficient.
    pub fn restitution_coefficient(&self) -> f32 {
        self.backend.borrow().collider_restitution(self.collider)
    }

    /// Set restitution coefficient.
    pub fn set_restitution_coefficient(&mut self, restitution: f32) {
        self.backend
            .borrow_mut()
            .set_collider_restitution(self.collider, restitution);
    }

    /// True if the object currently overlaps anything it collides with.
    pub fn contact_test(&self) -> bool {
        let own_id = self.object_id;
        self.backend
            .borrow_mut()
            .contact_test(self.collider, &|owner| owner.object_id != own_id)
    }

    /// Velocity command.
    pub fn velocity_control(&self) -> &VelocityControl {
        &self.velocity_control
    }

    /// Mutable velocity command.
    pub fn velocity_control_mut(&mut self) -> &mut VelocityControl {
        &mut self.velocity_control
    }

    /// Push velocity commands into a dynamic body before the world steps.
    pub(crate) fn apply_velocity_control(&mut self) {
        if !self.velocity_control.is_active() || self.motion_type() != MotionType::Dynamic {
            return;
        }
        let pose = self.root_state();
        if let Some(v) = self.velocity_control.world_lin_vel(&pose) {
            self.set_linear_velocity(v);
        }
        if let Some(w) = self.velocity_control.world_ang_vel(&pose) {
            self.set_angular_velocity(w);
        }
    }

    /// Move a kinematic object by its velocity command.
    pub(crate) fn integrate(&mut self, dt: f32) {
        if !self.velocity_control.is_active() || self.motion_type() != MotionType::Kinematic {
            return;
        }
        let next = self
            .velocity_control
            .integrate_transform(dt, &self.root_state());
        self.backend.borrow_mut().set_body_pose(self.body, next);
    }

    /// Copy the body pose into the scene node.
    pub fn update_nodes(&self) {
        let pose = self.root_state();
        self.scene.borrow_mut().set_isometry(self.node, &pose);
    }
}

impl Drop for RigidObject {
    fn drop(&mut self) {
        self.backend.borrow_mut().remove_body(self.body);
    }
}

/// Static collision geometry of the world. Reported as [`STAGE_ID`].
pub struct RigidStage {
    attributes: StageAttributes,
    backend: SharedBackend,
    node: NodeId,
    colliders: Vec<ColliderKey>,
    is_collidable: bool,
}

impl RigidStage {
    /// Build stage colliders from already loaded meshes.
    ///
    /// Every mesh is validated before any collider is created, so a rejected
    /// mesh leaves the world untouched.
    pub(crate) fn new(
        attributes: StageAttributes,
        meshes: &[CollisionMeshData],
        node: NodeId,
        backend: SharedBackend,
        scene: SharedSceneGraph,
    ) -> Result<Self, PhysicsError> {
        let library = backend.borrow().library();
        for (index, mesh) in meshes.iter().enumerate() {
            if let Err(reason) = backend.borrow().validate_collision_mesh(mesh) {
                warn!(stage = %attributes.handle, index, %reason, "rejected stage collision mesh");
                return Err(PhysicsError::InvalidCollisionMesh {
                    name: attributes.handle.clone(),
                    index,
                    reason,
                });
            }
        }

        let group = if attributes.is_collidable {
            CollisionGroup::Static
        } else {
            CollisionGroup::Noncollidable
        };

        let mut shapes = Vec::new();
        if library != PhysicsLibrary::NoPhysics {
            for mesh in meshes {
                shapes.push(mesh_to_shape(
                    mesh,
                    ColliderStrategy::TriMesh,
                    Vector3::new(1.0, 1.0, 1.0),
                    &attributes.handle,
                )?);
            }
        }

        let colliders = {
            let mut world = backend.borrow_mut();
            shapes
                .into_iter()
                .map(|(shape, pose)| {
                    world.insert_collider(
                        ColliderDesc {
                            shape,
                            pose,
                            mass: 0.0,
                            friction: attributes.friction_coefficient,
                            restitution: attributes.restitution_coefficient,
                            group,
                            owner: ColliderOwner {
                                object_id: STAGE_ID,
                                link_id: None,
                                role: ColliderRole::Stage,
                            },
                        },
                        None,
                    )
                })
                .collect()
        };

        {
            let mut graph = scene.borrow_mut();
            graph.set_type(node, NodeType::Stage);
            if let Some(asset) = &attributes.render_asset {
                graph.set_render_asset(node, asset.clone());
            }
        }

        debug!(stage = %attributes.handle, meshes = meshes.len(), "created stage");
        Ok(Self {
            is_collidable: attributes.is_collidable,
            attributes,
            backend,
            node,
            colliders,
        })
    }

    /// Stage template handle.
    pub fn handle(&self) -> &str {
        &self.attributes.handle
    }

    /// Stage scene node.
    pub fn scene_node(&self) -> NodeId {
        self.node
    }

    /// Number of collision meshes in the world.
    pub fn num_colliders(&self) -> usize {
        self.colliders.len()
    }

    /// Whether the stage collides.
    pub fn is_collidable(&self) -> bool {
        self.is_collidable
    }

    /// Enable or disable stage collisions. Redundant calls are no-ops.
    pub fn set_collidable(&mut self, collidable: bool) {
        if collidable == self.is_collidable {
            return;
        }
        self.is_collidable = collidable;
        let group = if collidable {
            CollisionGroup::Static
        } else {
            CollisionGroup::Noncollidable
        };
        let mut world = self.backend.borrow_mut();
        for collider in &self.colliders {
            world.set_collider_group(*collider, group);
        }
    }

    /// Friction coefficient.
    pub fn friction_coefficient(&self) -> f32 {
        self.attributes.friction_coefficient
    }

    /// Set friction coefficient on every stage collider.
    pub fn set_friction_coefficient(&mut self, friction: f32) {
        self.attributes.friction_coefficient = friction;
        let mut world = self.backend.borrow_mut();
        for collider in &self.colliders {
            world.set_collider_friction(*collider, friction);
        }
    }

    /// Restitution coefficient.
    pub fn restitution_coefficient(&self) -> f32 {
        self.attributes.restitution_coefficient
    }

    /// Set restitution coefficient on every stage collider.
    pub fn set_restitution_coefficient(&mut self, restitution: f32) {
        self.attributes.restitution_coefficient = restitution;
        let mut world = self.backend.borrow_mut();
        for collider in &self.colliders {
            world.set_collider_restitution(*collider, restitution);
        }
    }
}

impl Drop for RigidStage {
    fn drop(&mut self) {
        let mut world = self.backend.borrow_mut();
        for collider in self.colliders.drain(..) {
            world.remove_collider(collider);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;
    use approx::assert_relative_eq;
    use embsim_metadata::{Geometry, PhysicsManagerAttributes};
    use embsim_scene::SceneGraph;

    fn world(library: PhysicsLibrary) -> (SharedBackend, SharedSceneGraph) {
        let config = PhysicsManagerAttributes::with_simulator(library);
        (create_backend(library, &config), SceneGraph::shared())
    }

    fn cube(world: &(SharedBackend, SharedSceneGraph), id: ObjectId, motion: MotionType) -> RigidObject {
        let node = {
            let mut graph = world.1.borrow_mut();
            let root = graph.root();
            graph.create_child(root)
        };
        let mut attributes =
            ObjectAttributes::primitive("cube", Geometry::Box { size: [1.0, 1.0, 1.0] });
        attributes.render_asset = Some("cubeSolid".to_string());
        RigidObject::new(
            id,
            attributes,
            Isometry3::translation(0.0, 2.0, 0.0),
            motion,
            node,
            world.0.clone(),
            world.1.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_node_follows_root_state() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = cube(&world, 0, MotionType::Undefined);
        assert_eq!(object.motion_type(), MotionType::Kinematic);
        object.set_translation(Vector3::new(1.0, 2.0, 3.0));
        let graph = world.1.borrow();
        assert_relative_eq!(
            graph.absolute_translation(object.scene_node()),
            Vector3::new(1.0, 2.0, 3.0)
        );
        assert_eq!(
            graph.node(object.visual_scene_node()).render_asset(),
            Some("cubeSolid")
        );
    }

    #[test]
    fn test_kinematic_velocity_control() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = cube(&world, 0, MotionType::Kinematic);
        {
            let control = object.velocity_control_mut();
            control.lin_vel = Vector3::new(1.0, 0.0, 0.0);
            control.controlling_lin_vel = true;
        }
        for _ in 0..10 {
            object.integrate(0.1);
        }
        assert_relative_eq!(object.translation().x, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_dynamic_rejected_without_physics() {
        let world = world(PhysicsLibrary::NoPhysics);
        let mut object = cube(&world, 0, MotionType::Static);
        assert!(object.set_motion_type(MotionType::Dynamic).is_err());
        assert_eq!(object.motion_type(), MotionType::Static);
    }

    #[test]
    fn test_contact_test_ignores_self() {
        let world = world(PhysicsLibrary::Rapier);
        let a = cube(&world, 0, MotionType::Static);
        assert!(!a.contact_test());
        let _b = cube(&world, 1, MotionType::Dynamic);
        assert!(a.contact_test());
    }

    #[test]
    fn test_drop_removes_body() {
        let world = world(PhysicsLibrary::Rapier);
        let a = cube(&world, 0, MotionType::Dynamic);
        drop(a);
        let counts = world.0.borrow().membership_counts();
        assert_eq!((counts.added, counts.removed), (1, 1));
    }

    #[test]
    fn test_stage_rejects_empty_mesh() {
        let world = world(PhysicsLibrary::Rapier);
        let node = world.1.borrow().root();
        let result = RigidStage::new(
            StageAttributes::new("stage"),
            &[CollisionMeshData::cuboid([5.0, 0.1, 5.0]), CollisionMeshData::default()],
            node,
            world.0.clone(),
            world.1.clone(),
        );
        assert!(matches!(
            result,
            Err(PhysicsError::InvalidCollisionMesh { index: 1, .. })
        ));
    }

    #[test]
    fn test_stage_collidable_toggle() {
        let world = world(PhysicsLibrary::Rapier);
        let node = world.1.borrow().root();
        let mut stage = RigidStage::new(
            StageAttributes::new("stage"),
            &[CollisionMeshData::cuboid([5.0, 0.1, 5.0])],
            node,
            world.0.clone(),
            world.1.clone(),
        )
        .unwrap();
        let mut object = cube(&world, 0, MotionType::Dynamic);
        object.set_root_state(Isometry3::identity());
        assert!(object.contact_test());
        stage.set_collidable(false);
        assert!(!object.contact_test());
        stage.set_collidable(false);
        assert!(!stage.is_collidable());
    }
}
