//! The physics manager: object directory, identity lifecycle, stepping and
//! world queries.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use embsim_metadata::{
    ArticulatedModel, CollisionMeshData, MotionType, ObjectAttributes, PhysicsLibrary,
    PhysicsManagerAttributes, SceneObjectInstanceAttributes, StageAttributes, TemplateLibrary,
};
use embsim_scene::{NodeId, SharedSceneGraph};
use nalgebra::{Isometry3, Vector3};
use tracing::{debug, error, warn};

use crate::articulated::{ArticulatedObject, LinkMaterial};
use crate::backend::{create_backend, MembershipCounts, SharedBackend};
use crate::error::PhysicsError;
use crate::keyframe::{Keyframe, ObjectState};
use crate::managed::{Managed, ManagedArticulatedObject, ManagedRigidObject};
use crate::query::{ContactPointData, Ray, RaycastResults};
use crate::rigid::{RigidObject, RigidStage};
use crate::ObjectId;

/// Slack when dividing accumulated time into fixed steps.
const STEP_EPSILON: f64 = 1e-9;

/// Reference to a registered object template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKey {
    /// Template handle.
    Handle(String),
    /// Template ID.
    Id(i32),
}

impl From<&str> for TemplateKey {
    fn from(handle: &str) -> Self {
        TemplateKey::Handle(handle.to_string())
    }
}

impl From<String> for TemplateKey {
    fn from(handle: String) -> Self {
        TemplateKey::Handle(handle)
    }
}

impl From<i32> for TemplateKey {
    fn from(id: i32) -> Self {
        TemplateKey::Id(id)
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKey::Handle(handle) => write!(f, "{}", handle),
            TemplateKey::Id(id) => write!(f, "#{}", id),
        }
    }
}

enum ObjectEntry {
    Rigid(Rc<RefCell<RigidObject>>),
    Articulated(Rc<RefCell<ArticulatedObject>>),
}

impl ObjectEntry {
    fn scene_node(&self) -> NodeId {
        match self {
            ObjectEntry::Rigid(object) => object.borrow().scene_node(),
            ObjectEntry::Articulated(object) => object.borrow().scene_node(),
        }
    }

    fn visual_nodes(&self) -> Vec<NodeId> {
        match self {
            ObjectEntry::Rigid(object) => vec![object.borrow().visual_scene_node()],
            ObjectEntry::Articulated(object) => {
                let object = object.borrow();
                let mut nodes = object.base_visual_scene_nodes().to_vec();
                for link in 0..object.num_links() {
                    nodes.extend_from_slice(object.link_visual_scene_nodes(link));
                }
                nodes
            }
        }
    }

    fn motion_type(&self) -> MotionType {
        match self {
            ObjectEntry::Rigid(object) => object.borrow().motion_type(),
            ObjectEntry::Articulated(object) => object.borrow().motion_type(),
        }
    }

    fn set_motion_type(&self, motion_type: MotionType) -> Result<(), PhysicsError> {
        match self {
            ObjectEntry::Rigid(object) => object.borrow_mut().set_motion_type(motion_type),
            ObjectEntry::Articulated(object) => object.borrow_mut().set_motion_type(motion_type),
        }
    }

    fn is_active(&self) -> bool {
        match self {
            ObjectEntry::Rigid(object) => object.borrow().is_active(),
            ObjectEntry::Articulated(object) => object.borrow().is_active(),
        }
    }

    fn contact_test(&self) -> bool {
        match self {
            ObjectEntry::Rigid(object) => object.borrow().contact_test(),
            ObjectEntry::Articulated(object) => object.borrow().contact_test(),
        }
    }
}

struct World {
    backend: SharedBackend,
    scene: SharedSceneGraph,
    root: NodeId,
}

/// Owns every simulated object of one world.
///
/// Objects are addressed by [`ObjectId`]. Unknown IDs passed to per-object
/// operations are programming errors and panic.
pub struct PhysicsManager {
    config: PhysicsManagerAttributes,
    templates: TemplateLibrary,
    world: Option<World>,
    stage: Option<RigidStage>,
    objects: BTreeMap<ObjectId, ObjectEntry>,
    next_object_id: ObjectId,
    recycled_object_ids: Vec<ObjectId>,
    world_time: f64,
    time_accumulator: f64,
}

impl PhysicsManager {
    /// Manager for `config` drawing object templates from `templates`.
    pub fn new(config: PhysicsManagerAttributes, templates: TemplateLibrary) -> Self {
        Self {
            config,
            templates,
            world: None,
            stage: None,
            objects: BTreeMap::new(),
            next_object_id: 0,
            recycled_object_ids: Vec::new(),
            world_time: 0.0,
            time_accumulator: 0.0,
        }
    }

    /// Create the dynamics world and attach objects under `root`.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn initialize(&mut self, scene: SharedSceneGraph, root: NodeId) {
        assert!(self.world.is_none(), "physics manager is already initialized");
        assert!(scene.borrow().contains(root), "root node {:?} does not exist", root);
        let backend = create_backend(self.config.simulator, &self.config);
        backend
            .borrow_mut()
            .set_gravity(Vector3::from(self.config.gravity));
        debug!(simulator = ?self.config.simulator, timestep = self.config.timestep, "physics manager initialized");
        self.world = Some(World {
            backend,
            scene,
            root,
        });
    }

    /// True once [`initialize`](Self::initialize) ran.
    pub fn is_initialized(&self) -> bool {
        self.world.is_some()
    }

    fn world(&self) -> &World {
        self.world
            .as_ref()
            .unwrap_or_else(|| panic!("physics manager is not initialized"))
    }

    fn try_world(&self) -> Result<(SharedBackend, SharedSceneGraph, NodeId), PhysicsError> {
        let world = self.world.as_ref().ok_or(PhysicsError::NotInitialized)?;
        Ok((world.backend.clone(), world.scene.clone(), world.root))
    }

    /// Template registry.
    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    /// Mutable template registry.
    pub fn templates_mut(&mut self) -> &mut TemplateLibrary {
        &mut self.templates
    }

    /// Active dynamics library.
    pub fn physics_library(&self) -> PhysicsLibrary {
        self.config.simulator
    }

    // Identity

    fn allocate_object_id(&mut self) -> ObjectId {
        if let Some(id) = self.recycled_object_ids.pop() {
            return id;
        }
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn deallocate_object_id(&mut self, object_id: ObjectId) {
        assert!(
            object_id >= 0 && object_id < self.next_object_id,
            "object ID {} was never allocated",
            object_id
        );
        assert!(
            !self.recycled_object_ids.contains(&object_id),
            "object ID {} is already free",
            object_id
        );
        self.recycled_object_ids.push(object_id);
    }

    fn entry(&self, object_id: ObjectId) -> &ObjectEntry {
        self.objects
            .get(&object_id)
            .unwrap_or_else(|| panic!("no object with ID {}", object_id))
    }

    /// Number of live objects.
    pub fn num_objects(&self) -> usize {
        self.objects.len()
    }

    /// IDs of live objects in ascending order.
    pub fn existing_object_ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    /// True if `object_id` names a live object.
    pub fn is_valid_object_id(&self, object_id: ObjectId) -> bool {
        self.objects.contains_key(&object_id)
    }

    // Stage

    /// Build the stage from loaded collision meshes.
    pub fn add_stage(
        &mut self,
        attributes: StageAttributes,
        meshes: &[CollisionMeshData],
    ) -> Result<(), PhysicsError> {
        if self.stage.is_some() {
            warn!(stage = %attributes.handle, "a stage already exists");
            return Err(PhysicsError::StageExists);
        }
        let (backend, scene, root) = self.try_world()?;
        let node = scene.borrow_mut().create_child(root);
        match RigidStage::new(attributes, meshes, node, backend, scene.clone()) {
            Ok(stage) => {
                self.stage = Some(stage);
                Ok(())
            }
            Err(err) => {
                error!(%err, "failed to add stage");
                scene.borrow_mut().remove_subtree(node);
                Err(err)
            }
        }
    }

    /// The stage, if one was added.
    pub fn stage(&self) -> Option<&RigidStage> {
        self.stage.as_ref()
    }

    fn has_stage_dynamics(&self) -> bool {
        self.config.simulator != PhysicsLibrary::NoPhysics
    }

    /// Whether the stage collides; false without a stage or dynamics.
    pub fn stage_is_collidable(&self) -> bool {
        self.has_stage_dynamics() && self.stage.as_ref().is_some_and(|s| s.is_collidable())
    }

    /// Enable or disable stage collisions.
    pub fn set_stage_is_collidable(&mut self, collidable: bool) {
        if !self.has_stage_dynamics() {
            return;
        }
        if let Some(stage) = self.stage.as_mut() {
            stage.set_collidable(collidable);
        }
    }

    /// Stage friction coefficient; 0 without a stage or dynamics.
    pub fn stage_friction_coefficient(&self) -> f32 {
        match &self.stage {
            Some(stage) if self.has_stage_dynamics() => stage.friction_coefficient(),
            _ => 0.0,
        }
    }

    /// Set the stage friction coefficient.
    pub fn set_stage_friction_coefficient(&mut self, friction: f32) {
        if !self.has_stage_dynamics() {
            return;
        }
        if let Some(stage) = self.stage.as_mut() {
            stage.set_friction_coefficient(friction);
        }
    }

    /// Stage restitution coefficient; 0 without a stage or dynamics.
    pub fn stage_restitution_coefficient(&self) -> f32 {
        match &self.stage {
            Some(stage) if self.has_stage_dynamics() => stage.restitution_coefficient(),
            _ => 0.0,
        }
    }

    /// Set the stage restitution coefficient.
    pub fn set_stage_restitution_coefficient(&mut self, restitution: f32) {
        if !self.has_stage_dynamics() {
            return;
        }
        if let Some(stage) = self.stage.as_mut() {
            stage.set_restitution_coefficient(restitution);
        }
    }

    // Objects

    fn template(&self, key: &TemplateKey) -> Result<ObjectAttributes, PhysicsError> {
        let attributes = match key {
            TemplateKey::Handle(handle) => self.templates.get_copy_by_handle(handle),
            TemplateKey::Id(id) => self.templates.get_copy_by_id(*id),
        };
        attributes.ok_or_else(|| {
            error!(template = %key, "unknown object template");
            PhysicsError::UnknownTemplate(key.to_string())
        })
    }

    /// Node an object attaches to: the given one, or a new child of the root.
    fn object_node(
        scene: &SharedSceneGraph,
        root: NodeId,
        attachment_node: Option<NodeId>,
    ) -> (NodeId, bool) {
        match attachment_node {
            Some(node) => {
                assert!(scene.borrow().contains(node), "attachment node {:?} does not exist", node);
                (node, false)
            }
            None => (scene.borrow_mut().create_child(root), true),
        }
    }

    /// Instantiate an object template.
    ///
    /// The object attaches to `attachment_node` when given, otherwise to a new
    /// child of the manager's root node. `light_setup_key` is passed through
    /// to the render layer and does not affect simulation.
    pub fn add_object(
        &mut self,
        template: impl Into<TemplateKey>,
        attachment_node: Option<NodeId>,
        light_setup_key: Option<&str>,
    ) -> Result<ObjectId, PhysicsError> {
        let attributes = self.template(&template.into())?;
        let motion_type = attributes.motion_type;
        let object_id = self.add_rigid(
            attributes,
            Isometry3::identity(),
            motion_type,
            attachment_node,
        )?;
        if let Some(key) = light_setup_key {
            debug!(object_id, light_setup = key, "object uses light setup");
        }
        Ok(object_id)
    }

    /// Instantiate a template at the placement and motion type of a scene
    /// instance.
    pub fn add_object_instance(
        &mut self,
        instance: &SceneObjectInstanceAttributes,
        attachment_node: Option<NodeId>,
    ) -> Result<ObjectId, PhysicsError> {
        let attributes = self.template(&TemplateKey::Handle(instance.template_handle.clone()))?;
        let motion_type = match instance.motion_type {
            MotionType::Undefined => attributes.motion_type,
            other => other,
        };
        self.add_rigid(
            attributes,
            instance.pose().to_isometry(),
            motion_type,
            attachment_node,
        )
    }

    fn add_rigid(
        &mut self,
        attributes: ObjectAttributes,
        pose: Isometry3<f32>,
        motion_type: MotionType,
        attachment_node: Option<NodeId>,
    ) -> Result<ObjectId, PhysicsError> {
        let (backend, scene, root) = self.try_world()?;
        let object_id = self.allocate_object_id();
        let (node, created) = Self::object_node(&scene, root, attachment_node);
        let handle = attributes.handle.clone();
        match RigidObject::new(object_id, attributes, pose, motion_type, node, backend, scene.clone()) {
            Ok(object) => {
                self.objects
                    .insert(object_id, ObjectEntry::Rigid(Rc::new(RefCell::new(object))));
                debug!(object_id, %handle, "added rigid object");
                Ok(object_id)
            }
            Err(err) => {
                error!(%handle, %err, "failed to add rigid object");
                if created {
                    scene.borrow_mut().remove_subtree(node);
                }
                self.deallocate_object_id(object_id);
                Err(err)
            }
        }
    }

    /// Build an articulated object from `model` at `placement`.
    pub fn add_articulated_object(
        &mut self,
        model: &ArticulatedModel,
        placement: Isometry3<f32>,
        fixed_base: bool,
    ) -> Result<ObjectId, PhysicsError> {
        self.add_articulated(model, placement, fixed_base, MotionType::Undefined)
            .map(|(object_id, _)| object_id)
    }

    /// Build an articulated object and apply a scene instance to it:
    /// placement, motion type and initial joint state.
    pub fn add_articulated_object_instance(
        &mut self,
        model: &ArticulatedModel,
        instance: &SceneObjectInstanceAttributes,
        fixed_base: bool,
    ) -> Result<ObjectId, PhysicsError> {
        let (object_id, object) = self.add_articulated(
            model,
            instance.pose().to_isometry(),
            fixed_base,
            instance.motion_type,
        )?;
        let applied = object.borrow_mut().apply_instance_attributes(instance);
        if let Err(err) = applied {
            error!(object_id, %err, "failed to apply articulated instance");
            drop(object);
            self.remove_object(object_id, true, true);
            return Err(err);
        }
        Ok(object_id)
    }

    fn add_articulated(
        &mut self,
        model: &ArticulatedModel,
        placement: Isometry3<f32>,
        fixed_base: bool,
        motion_type: MotionType,
    ) -> Result<(ObjectId, Rc<RefCell<ArticulatedObject>>), PhysicsError> {
        let (backend, scene, root) = self.try_world()?;
        let object_id = self.allocate_object_id();
        let node = scene.borrow_mut().create_child(root);
        let material = LinkMaterial {
            friction: self.config.friction_coefficient,
            restitution: self.config.restitution_coefficient,
        };
        match ArticulatedObject::new(
            object_id,
            model,
            placement,
            fixed_base,
            motion_type,
            material,
            node,
            backend,
            scene.clone(),
        ) {
            Ok(object) => {
                let object = Rc::new(RefCell::new(object));
                self.objects
                    .insert(object_id, ObjectEntry::Articulated(object.clone()));
                debug!(object_id, model = %model.name, "added articulated object");
                Ok((object_id, object))
            }
            Err(err) => {
                error!(model = %model.name, %err, "failed to add articulated object");
                scene.borrow_mut().remove_subtree(node);
                self.deallocate_object_id(object_id);
                Err(err)
            }
        }
    }

    /// Remove an object and recycle its ID.
    ///
    /// `delete_object_node` removes the object's scene subtree; otherwise
    /// `delete_visual_node` removes only its visual nodes.
    ///
    /// # Panics
    ///
    /// Panics if `object_id` is not a live object.
    pub fn remove_object(
        &mut self,
        object_id: ObjectId,
        delete_object_node: bool,
        delete_visual_node: bool,
    ) {
        let entry = self
            .objects
            .remove(&object_id)
            .unwrap_or_else(|| panic!("cannot remove unknown object {}", object_id));
        let node = entry.scene_node();
        let visual_nodes = entry.visual_nodes();
        drop(entry);

        {
            let world = self.world();
            let mut graph = world.scene.borrow_mut();
            if delete_object_node {
                if node != graph.root() && graph.contains(node) {
                    graph.remove_subtree(node);
                }
            } else if delete_visual_node {
                for visual in visual_nodes {
                    if graph.contains(visual) {
                        graph.remove_subtree(visual);
                    }
                }
            }
        }
        self.deallocate_object_id(object_id);
        debug!(object_id, "removed object");
    }

    /// Handle to a rigid object, `None` if `object_id` is not a live rigid object.
    pub fn rigid_object(&self, object_id: ObjectId) -> Option<ManagedRigidObject> {
        match self.objects.get(&object_id) {
            Some(ObjectEntry::Rigid(object)) => Some(Managed::new(object, object_id)),
            _ => None,
        }
    }

    /// Handle to an articulated object, `None` if `object_id` is not a live
    /// articulated object.
    pub fn articulated_object(&self, object_id: ObjectId) -> Option<ManagedArticulatedObject> {
        match self.objects.get(&object_id) {
            Some(ObjectEntry::Articulated(object)) => Some(Managed::new(object, object_id)),
            _ => None,
        }
    }

    /// Scene node of an object.
    pub fn object_scene_node(&self, object_id: ObjectId) -> NodeId {
        self.entry(object_id).scene_node()
    }

    /// Motion type of an object.
    pub fn object_motion_type(&self, object_id: ObjectId) -> MotionType {
        self.entry(object_id).motion_type()
    }

    /// Change the motion type of an object.
    pub fn set_object_motion_type(
        &mut self,
        object_id: ObjectId,
        motion_type: MotionType,
    ) -> Result<(), PhysicsError> {
        self.entry(object_id).set_motion_type(motion_type)
    }

    /// Number of awake objects.
    pub fn check_active_objects(&self) -> usize {
        self.objects.values().filter(|entry| entry.is_active()).count()
    }

    // Stepping

    /// Advance the world by `dt` seconds in fixed steps.
    ///
    /// Time that does not fill a whole step carries over to the next call; at
    /// most `max_substeps` steps are taken per call and any excess time is
    /// dropped. A negative `dt` takes exactly one step. Does nothing before
    /// [`initialize`](Self::initialize).
    pub fn step_physics(&mut self, dt: f64) {
        let Some(world) = &self.world else {
            return;
        };
        let backend = world.backend.clone();
        let timestep = self.config.timestep;
        let steps = if !dt.is_finite() {
            warn!(dt, "ignoring non-finite step length");
            return;
        } else if dt < 0.0 {
            1
        } else {
            self.time_accumulator += dt;
            let available = ((self.time_accumulator + STEP_EPSILON) / timestep).floor();
            self.time_accumulator = (self.time_accumulator - available * timestep).max(0.0);
            (available as u32).min(self.config.max_substeps)
        };

        for _ in 0..steps {
            for entry in self.objects.values() {
                if let ObjectEntry::Rigid(object) = entry {
                    object.borrow_mut().apply_velocity_control();
                }
            }
            backend.borrow_mut().step(timestep as f32);
            for entry in self.objects.values() {
                match entry {
                    ObjectEntry::Rigid(object) => object.borrow_mut().integrate(timestep as f32),
                    ObjectEntry::Articulated(object) => {
                        object.borrow_mut().integrate(timestep as f32)
                    }
                }
            }
            self.world_time += timestep;
        }

        for entry in self.objects.values() {
            match entry {
                ObjectEntry::Rigid(object) => object.borrow().update_nodes(),
                ObjectEntry::Articulated(object) => object.borrow_mut().update_nodes(false),
            }
        }
    }

    /// Fixed step length.
    pub fn timestep(&self) -> f64 {
        self.config.timestep
    }

    /// Set the fixed step length.
    pub fn set_timestep(&mut self, timestep: f64) {
        assert!(timestep > 0.0, "timestep must be positive, got {}", timestep);
        self.config.timestep = timestep;
    }

    /// Simulated time since creation or the last [`reset`](Self::reset).
    pub fn world_time(&self) -> f64 {
        self.world_time
    }

    /// Rewind the world clock. Object state is untouched.
    pub fn reset(&mut self) {
        self.world_time = 0.0;
        self.time_accumulator = 0.0;
    }

    /// Gravity; zero on the kinematic backend.
    pub fn gravity(&self) -> Vector3<f32> {
        self.world().backend.borrow().gravity()
    }

    /// Set gravity. Ignored by the kinematic backend.
    pub fn set_gravity(&mut self, gravity: Vector3<f32>) {
        self.config.gravity = gravity.into();
        self.world().backend.borrow_mut().set_gravity(gravity);
    }

    /// Dynamic-world membership transitions so far.
    pub fn membership_counts(&self) -> MembershipCounts {
        self.world().backend.borrow().membership_counts()
    }

    // Queries

    /// True if the object overlaps anything it collides with.
    pub fn contact_test(&self, object_id: ObjectId) -> bool {
        self.entry(object_id).contact_test()
    }

    /// All hits along `ray` up to `max_distance` ray lengths, nearest first.
    pub fn cast_ray(&self, ray: &Ray, max_distance: f32) -> RaycastResults {
        let mut results = RaycastResults::new(*ray);
        results.hits = self.world().backend.borrow_mut().cast_ray(ray, max_distance);
        results.sort_by_distance();
        results
    }

    /// First hit of a sphere swept along `ray`.
    pub fn cast_sphere(&self, ray: &Ray, radius: f32, max_distance: f32) -> RaycastResults {
        let mut results = RaycastResults::new(*ray);
        results.hits = self
            .world()
            .backend
            .borrow_mut()
            .cast_sphere(ray, radius, max_distance)
            .into_iter()
            .collect();
        results
    }

    /// Recompute contacts without advancing time.
    pub fn perform_discrete_collision_detection(&self) {
        self.world()
            .backend
            .borrow_mut()
            .perform_discrete_collision_detection();
    }

    /// Contacts from the last step or detection pass.
    pub fn contact_points(&self) -> Vec<ContactPointData> {
        self.world().backend.borrow().contact_points()
    }

    /// Number of active contact points.
    pub fn num_active_contact_points(&self) -> usize {
        self.world().backend.borrow().num_active_contact_points()
    }

    // Keyframes

    /// Snapshot every live object.
    pub fn capture_state(&self) -> Keyframe {
        let objects = self
            .objects
            .iter()
            .map(|(&object_id, entry)| match entry {
                ObjectEntry::Rigid(object) => {
                    let object = object.borrow();
                    ObjectState::new(object_id, &object.root_state(), object.motion_type())
                }
                ObjectEntry::Articulated(object) => {
                    let object = object.borrow();
                    let mut state =
                        ObjectState::new(object_id, &object.root_state(), object.motion_type());
                    state.joint_positions = object.joint_positions().to_vec();
                    state.joint_velocities = object.joint_velocities().to_vec();
                    state
                }
            })
            .collect();
        Keyframe {
            world_time: self.world_time,
            objects,
        }
    }

    /// Apply snapshots to live objects. States for unknown IDs are skipped.
    ///
    /// Every state is checked before any object is touched, so an error
    /// leaves the world as it was.
    pub fn restore_state(&mut self, states: &[ObjectState]) -> Result<(), PhysicsError> {
        let library = self.physics_library();
        for state in states {
            let Some(entry) = self.objects.get(&state.object_id) else {
                continue;
            };
            if state.motion_type == MotionType::Dynamic && library == PhysicsLibrary::NoPhysics {
                warn!(object_id = state.object_id, "cannot restore a dynamic object without dynamics");
                return Err(PhysicsError::UnsupportedMotionType(MotionType::Dynamic));
            }
            if let ObjectEntry::Articulated(object) = entry {
                let object = object.borrow();
                let sizes = [
                    ("positions", object.num_joint_positions(), state.joint_positions.len()),
                    ("velocities", object.num_dofs(), state.joint_velocities.len()),
                ];
                for (what, expected, actual) in sizes {
                    if expected != actual {
                        warn!(object_id = state.object_id, what, expected, actual, "keyframe joint vector size mismatch");
                        return Err(PhysicsError::JointVectorSize {
                            what,
                            expected,
                            actual,
                        });
                    }
                }
            }
        }

        for state in states {
            let Some(entry) = self.objects.get(&state.object_id) else {
                warn!(object_id = state.object_id, "no object to restore state into");
                continue;
            };
            entry.set_motion_type(state.motion_type)?;
            match entry {
                ObjectEntry::Rigid(object) => object.borrow_mut().set_root_state(state.root()),
                ObjectEntry::Articulated(object) => {
                    let mut object = object.borrow_mut();
                    object.set_root_state(state.root());
                    object.set_joint_positions(&state.joint_positions)?;
                    object.set_joint_velocities(&state.joint_velocities)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::STAGE_ID;
    use approx::assert_relative_eq;
    use embsim_metadata::{Geometry, JointKind, LinkBody, ModelJoint, Pose};
    use embsim_scene::SceneGraph;
    use nalgebra::Point3;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn templates() -> TemplateLibrary {
        let mut library = TemplateLibrary::new();
        library.register(ObjectAttributes::primitive(
            "cube",
            Geometry::Box { size: [1.0, 1.0, 1.0] },
        ));
        library.register(ObjectAttributes::primitive(
            "ball",
            Geometry::Sphere { radius: 0.5 },
        ));
        library
    }

    fn manager(library: PhysicsLibrary) -> (PhysicsManager, SharedSceneGraph) {
        let mut manager = PhysicsManager::new(
            PhysicsManagerAttributes::with_simulator(library),
            templates(),
        );
        let scene = SceneGraph::shared();
        let root = scene.borrow().root();
        manager.initialize(scene.clone(), root);
        (manager, scene)
    }

    fn hinge() -> ArticulatedModel {
        let mut model = ArticulatedModel::new(
            "hinge",
            LinkBody::new("base")
                .with_collision(Geometry::Box { size: [0.2, 0.2, 0.2] }, Pose::default()),
        );
        model.push_link(
            LinkBody::new("door").with_collision(
                Geometry::Box { size: [1.0, 0.1, 0.1] },
                Pose::from_translation(0.5, 0.0, 0.0),
            ),
            None,
            ModelJoint::new("hinge", JointKind::Revolute, Pose::default())
                .with_limits(0.0, FRAC_PI_2),
        );
        model
    }

    #[test]
    fn test_ids_recycled_lifo() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let ids: Vec<_> = (0..4)
            .map(|_| manager.add_object("cube", None, None).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        manager.remove_object(1, true, true);
        manager.remove_object(2, true, true);
        assert_eq!(manager.existing_object_ids(), vec![0, 3]);
        assert!(!manager.is_valid_object_id(2));

        assert_eq!(manager.add_object("ball", None, None).unwrap(), 2);
        assert_eq!(manager.add_object("ball", None, None).unwrap(), 1);
        assert_eq!(manager.add_object("ball", None, None).unwrap(), 4);
        assert_eq!(manager.num_objects(), 5);
    }

    #[test]
    fn test_unknown_template_releases_nothing() {
        let (mut manager, scene) = manager(PhysicsLibrary::NoPhysics);
        let nodes = scene.borrow().len();
        let err = manager.add_object("missing", None, None).unwrap_err();
        assert_eq!(err, PhysicsError::UnknownTemplate("missing".to_string()));
        assert!(manager.add_object(42, None, None).is_err());
        assert_eq!(scene.borrow().len(), nodes);
        assert_eq!(manager.add_object("cube", None, None).unwrap(), 0);
    }

    #[test]
    fn test_failed_build_recycles_id() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let mut instance = SceneObjectInstanceAttributes::new("cube");
        instance.motion_type = MotionType::Dynamic;
        assert!(matches!(
            manager.add_object_instance(&instance, None),
            Err(PhysicsError::UnsupportedMotionType(MotionType::Dynamic))
        ));
        assert_eq!(manager.num_objects(), 0);
        assert_eq!(manager.add_object("cube", None, None).unwrap(), 0);
    }

    #[test]
    #[should_panic(expected = "cannot remove unknown object 7")]
    fn test_remove_unknown_panics() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        manager.remove_object(7, true, true);
    }

    #[test]
    #[should_panic(expected = "already initialized")]
    fn test_double_initialize_panics() {
        let (mut manager, scene) = manager(PhysicsLibrary::NoPhysics);
        let root = scene.borrow().root();
        manager.initialize(scene, root);
    }

    #[test]
    fn test_remove_keeps_or_deletes_nodes() {
        let (mut manager, scene) = manager(PhysicsLibrary::NoPhysics);
        let a = manager.add_object("cube", None, None).unwrap();
        let b = manager.add_object("cube", None, None).unwrap();
        let node_a = manager.object_scene_node(a);
        let node_b = manager.object_scene_node(b);
        let visual_b = manager.rigid_object(b).unwrap().visual_scene_node().unwrap();

        manager.remove_object(a, true, true);
        assert!(!scene.borrow().contains(node_a));

        manager.remove_object(b, false, true);
        assert!(scene.borrow().contains(node_b));
        assert!(!scene.borrow().contains(visual_b));
    }

    #[test]
    fn test_motion_type_idempotent() {
        let (mut manager, _) = manager(PhysicsLibrary::Rapier);
        let id = manager.add_object("cube", None, None).unwrap();
        assert_eq!(manager.object_motion_type(id), MotionType::Dynamic);
        assert_eq!(manager.membership_counts().added, 1);

        manager.set_object_motion_type(id, MotionType::Dynamic).unwrap();
        manager.set_object_motion_type(id, MotionType::Undefined).unwrap();
        assert_eq!(manager.membership_counts().added, 1);

        manager.set_object_motion_type(id, MotionType::Kinematic).unwrap();
        manager.set_object_motion_type(id, MotionType::Static).unwrap();
        manager.set_object_motion_type(id, MotionType::Dynamic).unwrap();
        let counts = manager.membership_counts();
        assert_eq!((counts.added, counts.removed), (2, 1));
    }

    #[test]
    fn test_kinematic_backend_rejects_dynamic() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let id = manager.add_object("cube", None, None).unwrap();
        assert_eq!(manager.object_motion_type(id), MotionType::Kinematic);
        assert!(manager.set_object_motion_type(id, MotionType::Dynamic).is_err());
        assert_eq!(manager.object_motion_type(id), MotionType::Kinematic);
        assert_eq!(manager.gravity(), Vector3::zeros());
    }

    #[test]
    fn test_stage_exclusive() {
        let (mut manager, _) = manager(PhysicsLibrary::Rapier);
        let floor = [CollisionMeshData::cuboid([10.0, 0.2, 10.0])];
        manager.add_stage(StageAttributes::new("floor"), &floor).unwrap();
        assert_eq!(
            manager.add_stage(StageAttributes::new("floor"), &floor),
            Err(PhysicsError::StageExists)
        );
        assert!(manager.stage_is_collidable());
        manager.set_stage_friction_coefficient(0.9);
        assert_relative_eq!(manager.stage_friction_coefficient(), 0.9);
    }

    #[test]
    fn test_stage_defaults_without_dynamics() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        manager
            .add_stage(StageAttributes::new("floor"), &[CollisionMeshData::default()])
            .unwrap();
        assert!(!manager.stage_is_collidable());
        manager.set_stage_restitution_coefficient(0.7);
        assert_eq!(manager.stage_restitution_coefficient(), 0.0);
    }

    #[test]
    fn test_raycast_sorted() {
        let (mut manager, _) = manager(PhysicsLibrary::Rapier);
        manager
            .add_stage(
                StageAttributes::new("floor"),
                &[CollisionMeshData::cuboid([10.0, 0.2, 10.0])],
            )
            .unwrap();
        let far = manager.add_object("ball", None, None).unwrap();
        let near = manager.add_object("ball", None, None).unwrap();
        manager
            .rigid_object(far)
            .unwrap()
            .set_translation(Vector3::new(0.0, 2.0, 0.0));
        manager
            .rigid_object(near)
            .unwrap()
            .set_translation(Vector3::new(0.0, 5.0, 0.0));

        let ray = Ray::new(Point3::new(0.0, 10.0, 0.0), Vector3::new(0.0, -1.0, 0.0));
        let results = manager.cast_ray(&ray, 100.0);
        let ids: Vec<_> = results.hits.iter().map(|h| h.object_id).collect();
        assert_eq!(ids, vec![near, far, STAGE_ID]);
        assert!(results
            .hits
            .windows(2)
            .all(|w| w[0].ray_distance <= w[1].ray_distance));

        let sphere = manager.cast_sphere(&ray, 0.1, 100.0);
        assert_eq!(sphere.hits.len(), 1);
        assert_eq!(sphere.hits[0].object_id, near);
    }

    #[test]
    fn test_kinematic_backend_queries_empty() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let id = manager.add_object("cube", None, None).unwrap();
        let ray = Ray::new(Point3::new(0.0, 10.0, 0.0), Vector3::new(0.0, -1.0, 0.0));
        assert!(!manager.cast_ray(&ray, 100.0).has_hits());
        assert!(!manager.contact_test(id));
        manager.perform_discrete_collision_detection();
        assert_eq!(manager.num_active_contact_points(), 0);
    }

    #[test]
    fn test_step_accumulates_fixed_steps() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        manager.set_timestep(0.01);
        manager.step_physics(0.025);
        assert_relative_eq!(manager.world_time(), 0.02, epsilon = 1e-12);
        manager.step_physics(0.005);
        assert_relative_eq!(manager.world_time(), 0.03, epsilon = 1e-12);
        manager.step_physics(-1.0);
        assert_relative_eq!(manager.world_time(), 0.04, epsilon = 1e-12);
        manager.step_physics(10.0);
        assert_relative_eq!(manager.world_time(), 0.14, epsilon = 1e-9);
        manager.reset();
        assert_eq!(manager.world_time(), 0.0);
    }

    #[test]
    fn test_non_finite_step_is_ignored() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        manager.set_timestep(0.01);
        manager.step_physics(f64::NAN);
        manager.step_physics(f64::INFINITY);
        manager.step_physics(f64::NEG_INFINITY);
        assert_eq!(manager.world_time(), 0.0);

        manager.step_physics(0.015);
        assert_relative_eq!(manager.world_time(), 0.01, epsilon = 1e-12);
        manager.step_physics(0.005);
        assert_relative_eq!(manager.world_time(), 0.02, epsilon = 1e-12);
        manager.reset();
        assert_eq!(manager.world_time(), 0.0);
    }

    #[test]
    fn test_step_moves_objects_and_nodes() {
        let (mut manager, scene) = manager(PhysicsLibrary::Rapier);
        let id = manager.add_object("ball", None, None).unwrap();
        manager
            .rigid_object(id)
            .unwrap()
            .set_translation(Vector3::new(0.0, 5.0, 0.0));
        manager.step_physics(0.5);
        let y = manager.rigid_object(id).unwrap().translation().y;
        assert!(y < 5.0);
        let node = manager.object_scene_node(id);
        assert_relative_eq!(scene.borrow().absolute_translation(node).y, y, epsilon = 1e-5);
    }

    #[test]
    fn test_kinematic_velocity_control_steps() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let id = manager.add_object("cube", None, None).unwrap();
        let handle = manager.rigid_object(id).unwrap();
        let mut control = handle.velocity_control().unwrap();
        control.lin_vel = Vector3::new(0.0, 0.0, 1.0);
        control.controlling_lin_vel = true;
        handle.set_velocity_control(control);
        manager.step_physics(-1.0);
        let expected = manager.timestep() as f32;
        assert_relative_eq!(handle.translation().z, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_managed_defaults_after_removal() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let rigid_id = manager.add_object("cube", None, None).unwrap();
        let arm_id = manager
            .add_articulated_object(&hinge(), Isometry3::identity(), true)
            .unwrap();
        let rigid = manager.rigid_object(rigid_id).unwrap();
        let arm = manager.articulated_object(arm_id).unwrap();
        assert!(manager.rigid_object(arm_id).is_none());
        assert_eq!(arm.num_links(), 1);
        assert_eq!(arm.object_id(), arm_id);

        manager.remove_object(rigid_id, true, true);
        manager.remove_object(arm_id, true, true);

        assert!(!rigid.is_alive());
        assert_eq!(rigid.object_id(), crate::ID_UNDEFINED);
        assert_eq!(rigid.translation(), Vector3::zeros());
        assert_eq!(rigid.motion_type(), MotionType::Undefined);
        assert!(rigid.scene_node().is_none());
        rigid.set_translation(Vector3::new(1.0, 1.0, 1.0));

        assert_eq!(arm.num_links(), 0);
        assert!(arm.joint_positions().is_empty());
        assert_eq!(arm.link_joint_type(0), crate::JointType::Invalid);
        assert_eq!(arm.link_dof_offset(0), -1);
        assert!(arm.link_scene_node(0).is_none());
        assert!(!arm.is_active());
        assert!(arm.set_joint_positions(&[1.0, 2.0]).is_ok());
    }

    #[test]
    fn test_articulated_end_to_end() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let id = manager
            .add_articulated_object(&hinge(), Isometry3::identity(), true)
            .unwrap();
        let arm = manager.articulated_object(id).unwrap();
        arm.set_joint_positions(&[PI]).unwrap();
        arm.clamp_joint_limits();
        assert_relative_eq!(arm.joint_positions()[0], FRAC_PI_2);
        arm.reset();
        assert_eq!(arm.joint_positions(), vec![0.0]);
        assert_eq!(arm.joint_velocities(), vec![0.0]);
    }

    #[test]
    fn test_articulated_instance() {
        let (mut manager, _) = manager(PhysicsLibrary::Rapier);
        let mut instance = SceneObjectInstanceAttributes::new("hinge");
        instance.translation = [0.0, 1.0, 0.0];
        instance.motion_type = MotionType::Kinematic;
        instance.init_joint_positions = vec![0.5, 1.0];
        let id = manager
            .add_articulated_object_instance(&hinge(), &instance, true)
            .unwrap();
        let arm = manager.articulated_object(id).unwrap();
        assert_eq!(arm.joint_positions(), vec![0.5]);
        assert_eq!(arm.motion_type(), MotionType::Kinematic);
        assert_relative_eq!(arm.translation(), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(manager.membership_counts().added, 0);
    }

    #[test]
    fn test_capture_restore_roundtrip() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let cube = manager.add_object("cube", None, None).unwrap();
        let arm = manager
            .add_articulated_object(&hinge(), Isometry3::identity(), true)
            .unwrap();
        manager
            .rigid_object(cube)
            .unwrap()
            .set_translation(Vector3::new(1.0, 2.0, 3.0));
        manager
            .articulated_object(arm)
            .unwrap()
            .set_joint_positions(&[0.4])
            .unwrap();
        let keyframe = manager.capture_state();

        manager
            .rigid_object(cube)
            .unwrap()
            .set_translation(Vector3::zeros());
        manager.articulated_object(arm).unwrap().reset();
        manager.restore_state(&keyframe.objects).unwrap();

        assert_relative_eq!(
            manager.rigid_object(cube).unwrap().translation(),
            Vector3::new(1.0, 2.0, 3.0),
            epsilon = 1e-6
        );
        assert_eq!(manager.articulated_object(arm).unwrap().joint_positions(), vec![0.4]);
        assert_eq!(manager.capture_state(), keyframe);
    }

    #[test]
    fn test_restore_rejects_bad_keyframe_untouched() {
        let (mut manager, _) = manager(PhysicsLibrary::NoPhysics);
        let cube = manager.add_object("cube", None, None).unwrap();
        let arm = manager
            .add_articulated_object(&hinge(), Isometry3::identity(), true)
            .unwrap();
        manager
            .articulated_object(arm)
            .unwrap()
            .set_joint_positions(&[0.4])
            .unwrap();
        let before = manager.capture_state();

        let mut keyframe = before.clone();
        keyframe.objects[0].translation = [5.0, 5.0, 5.0];
        keyframe.objects[1].translation = [1.0, 0.0, 0.0];
        keyframe.objects[1].joint_positions = vec![0.1, 0.2];
        let err = manager.restore_state(&keyframe.objects).unwrap_err();
        assert_eq!(
            err,
            PhysicsError::JointVectorSize {
                what: "positions",
                expected: 1,
                actual: 2
            }
        );
        assert_eq!(manager.capture_state(), before);

        let mut keyframe = before.clone();
        keyframe.objects[0].translation = [5.0, 5.0, 5.0];
        keyframe.objects[1].motion_type = MotionType::Dynamic;
        assert!(manager.restore_state(&keyframe.objects).is_err());
        assert_eq!(manager.capture_state(), before);
        assert_eq!(manager.object_motion_type(cube), MotionType::Kinematic);
    }

    #[test]
    fn test_check_active_objects() {
        let (mut manager, _) = manager(PhysicsLibrary::Rapier);
        let a = manager.add_object("cube", None, None).unwrap();
        manager.add_object("cube", None, None).unwrap();
        assert_eq!(manager.check_active_objects(), 2);
        manager.rigid_object(a).unwrap().set_active(false);
        assert_eq!(manager.check_active_objects(), 1);
    }
}
