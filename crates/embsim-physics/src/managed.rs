//! Handles to manager-owned objects that survive the object's removal.
//!
//! A handle holds a weak reference. Every call re-checks liveness: getters on
//! a removed object return a fixed default and mutators do nothing.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use embsim_metadata::MotionType;
use embsim_scene::NodeId;
use nalgebra::{Isometry3, UnitQuaternion, Vector3};

use crate::articulated::{ArticulatedObject, JointType};
use crate::error::PhysicsError;
use crate::motion::VelocityControl;
use crate::rigid::RigidObject;
use crate::{ObjectId, ID_UNDEFINED};

/// Weak handle to an object owned by a [`PhysicsManager`](crate::PhysicsManager).
#[derive(Debug)]
pub struct Managed<T> {
    object: Weak<RefCell<T>>,
    object_id: ObjectId,
}

impl<T> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            object_id: self.object_id,
        }
    }
}

/// Handle to a rigid object.
pub type ManagedRigidObject = Managed<RigidObject>;

/// Handle to an articulated object.
pub type ManagedArticulatedObject = Managed<ArticulatedObject>;

impl<T> Managed<T> {
    pub(crate) fn new(object: &Rc<RefCell<T>>, object_id: ObjectId) -> Self {
        Self {
            object: Rc::downgrade(object),
            object_id,
        }
    }

    /// True while the object exists.
    pub fn is_alive(&self) -> bool {
        self.object.strong_count() > 0
    }

    /// Object ID, or [`ID_UNDEFINED`] after removal.
    pub fn object_id(&self) -> ObjectId {
        if self.is_alive() {
            self.object_id
        } else {
            ID_UNDEFINED
        }
    }

    fn read<R>(&self, default: R, f: impl FnOnce(&T) -> R) -> R {
        match self.object.upgrade() {
            Some(object) => {
                let object = object.borrow();
                f(&object)
            }
            None => default,
        }
    }

    fn write<R>(&self, default: R, f: impl FnOnce(&mut T) -> R) -> R {
        match self.object.upgrade() {
            Some(object) => {
                let mut object = object.borrow_mut();
                f(&mut object)
            }
            None => default,
        }
    }
}

impl Managed<RigidObject> {
    /// Template handle, empty after removal.
    pub fn handle(&self) -> String {
        self.read(String::new(), |o| o.handle().to_string())
    }

    /// Root scene node.
    pub fn scene_node(&self) -> Option<NodeId> {
        self.read(None, |o| Some(o.scene_node()))
    }

    /// Node carrying the render asset.
    pub fn visual_scene_node(&self) -> Option<NodeId> {
        self.read(None, |o| Some(o.visual_scene_node()))
    }

    /// World pose, identity after removal.
    pub fn root_state(&self) -> Isometry3<f32> {
        self.read(Isometry3::identity(), |o| o.root_state())
    }

    /// Teleport the object.
    pub fn set_root_state(&self, pose: Isometry3<f32>) {
        self.write((), |o| o.set_root_state(pose));
    }

    /// World translation.
    pub fn translation(&self) -> Vector3<f32> {
        self.read(Vector3::zeros(), |o| o.translation())
    }

    /// Set world translation.
    pub fn set_translation(&self, translation: Vector3<f32>) {
        self.write((), |o| o.set_translation(translation));
    }

    /// World rotation.
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.read(UnitQuaternion::identity(), |o| o.rotation())
    }

    /// Set world rotation.
    pub fn set_rotation(&self, rotation: UnitQuaternion<f32>) {
        self.write((), |o| o.set_rotation(rotation));
    }

    /// Motion type, `Undefined` after removal.
    pub fn motion_type(&self) -> MotionType {
        self.read(MotionType::Undefined, |o| o.motion_type())
    }

    /// Change the motion type.
    pub fn set_motion_type(&self, motion_type: MotionType) -> Result<(), PhysicsError> {
        self.write(Ok(()), |o| o.set_motion_type(motion_type))
    }

    /// Linear velocity.
    pub fn linear_velocity(&self) -> Vector3<f32> {
        self.read(Vector3::zeros(), |o| o.linear_velocity())
    }

    /// Set linear velocity.
    pub fn set_linear_velocity(&self, velocity: Vector3<f32>) {
        self.write((), |o| o.set_linear_velocity(velocity));
    }

    /// Angular velocity.
    pub fn angular_velocity(&self) -> Vector3<f32> {
        self.read(Vector3::zeros(), |o| o.angular_velocity())
    }

    /// Set angular velocity.
    pub fn set_angular_velocity(&self, velocity: Vector3<f32>) {
        self.write((), |o| o.set_angular_velocity(velocity));
    }

    /// Apply a force at an offset from the object origin.
    pub fn apply_force(&self, force: Vector3<f32>, relative_position: Vector3<f32>) {
        self.write((), |o| o.apply_force(force, relative_position));
    }

    /// Apply an impulse at an offset from the object origin.
    pub fn apply_impulse(&self, impulse: Vector3<f32>, relative_position: Vector3<f32>) {
        self.write((), |o| o.apply_impulse(impulse, relative_position));
    }

    /// Apply a torque.
    pub fn apply_torque(&self, torque: Vector3<f32>) {
        self.write((), |o| o.apply_torque(torque));
    }

    /// Awake state.
    pub fn is_active(&self) -> bool {
        self.read(false, |o| o.is_active())
    }

    /// Wake or sleep.
    pub fn set_active(&self, active: bool) {
        self.write((), |o| o.set_active(active));
    }

    /// Whether the object collides.
    pub fn is_collidable(&self) -> bool {
        self.read(false, |o| o.is_collidable())
    }

    /// Enable or disable collisions.
    pub fn set_collidable(&self, collidable: bool) {
        self.write((), |o| o.set_collidable(collidable));
    }

    /// Friction coefficient.
    pub fn friction_coefficient(&self) -> f32 {
        self.read(0.0, |o| o.friction_coefficient())
    }

    /// Set friction coefficient.
    pub fn set_friction_coefficient(&self, friction: f32) {
        self.write((), |o| o.set_friction_coefficient(friction));
    }

    /// Restitution coefficient.
    pub fn restitution_coefficient(&self) -> f32 {
        self.read(0.0, |o| o.restitution_coefficient())
    }

    /// Set restitution coefficient.
    pub fn set_restitution_coefficient(&self, restitution: f32) {
        self.write((), |o| o.set_restitution_coefficient(restitution));
    }

    /// Overlap test against everything the object collides with.
    pub fn contact_test(&self) -> bool {
        self.read(false, |o| o.contact_test())
    }

    /// Velocity command.
    pub fn velocity_control(&self) -> Option<VelocityControl> {
        self.read(None, |o| Some(*o.velocity_control()))
    }

    /// Replace the velocity command.
    pub fn set_velocity_control(&self, control: VelocityControl) {
        self.write((), |o| *o.velocity_control_mut() = control);
    }
}

impl Managed<ArticulatedObject> {
    /// Model name, empty after removal.
    pub fn handle(&self) -> String {
        self.read(String::new(), |o| o.handle().to_string())
    }

    /// Scene node of the base.
    pub fn scene_node(&self) -> Option<NodeId> {
        self.read(None, |o| Some(o.scene_node()))
    }

    /// Number of links, 0 after removal.
    pub fn num_links(&self) -> usize {
        self.read(0, |o| o.num_links())
    }

    /// Link IDs, empty after removal.
    pub fn link_ids(&self) -> Vec<usize> {
        self.read(Vec::new(), |o| o.link_ids())
    }

    /// Total DoFs.
    pub fn num_dofs(&self) -> usize {
        self.read(0, |o| o.num_dofs())
    }

    /// Total position variables.
    pub fn num_joint_positions(&self) -> usize {
        self.read(0, |o| o.num_joint_positions())
    }

    /// Joint type of a link, `Invalid` after removal.
    pub fn link_joint_type(&self, link_id: usize) -> JointType {
        self.read(JointType::Invalid, |o| o.link_joint_type(link_id))
    }

    /// DoF offset of a link, -1 after removal.
    pub fn link_dof_offset(&self, link_id: usize) -> i32 {
        self.read(-1, |o| o.link_dof_offset(link_id) as i32)
    }

    /// DoF count of a link.
    pub fn link_num_dofs(&self, link_id: usize) -> usize {
        self.read(0, |o| o.link_num_dofs(link_id))
    }

    /// Position offset of a link, -1 after removal.
    pub fn link_joint_pos_offset(&self, link_id: usize) -> i32 {
        self.read(-1, |o| o.link_joint_pos_offset(link_id) as i32)
    }

    /// Position variable count of a link.
    pub fn link_num_joint_pos(&self, link_id: usize) -> usize {
        self.read(0, |o| o.link_num_joint_pos(link_id))
    }

    /// Scene node of a link.
    pub fn link_scene_node(&self, link_id: usize) -> Option<NodeId> {
        self.read(None, |o| Some(o.link_scene_node(link_id)))
    }

    /// Visual nodes of a link.
    pub fn link_visual_scene_nodes(&self, link_id: usize) -> Vec<NodeId> {
        self.read(Vec::new(), |o| o.link_visual_scene_nodes(link_id).to_vec())
    }

    /// Apply a world-frame force to a link for the next step.
    pub fn add_link_force(&self, link_id: usize, force: Vector3<f32>) {
        self.write((), |o| o.add_link_force(link_id, force));
    }

    /// Friction of a link collider.
    pub fn link_friction(&self, link_id: usize) -> f32 {
        self.read(0.0, |o| o.link_friction(link_id))
    }

    /// Set friction of a link collider.
    pub fn set_link_friction(&self, link_id: usize, friction: f32) {
        self.write((), |o| o.set_link_friction(link_id, friction));
    }

    /// Joint positions.
    pub fn joint_positions(&self) -> Vec<f32> {
        self.read(Vec::new(), |o| o.joint_positions().to_vec())
    }

    /// Set joint positions.
    pub fn set_joint_positions(&self, positions: &[f32]) -> Result<(), PhysicsError> {
        self.write(Ok(()), |o| o.set_joint_positions(positions))
    }

    /// Joint velocities.
    pub fn joint_velocities(&self) -> Vec<f32> {
        self.read(Vec::new(), |o| o.joint_velocities().to_vec())
    }

    /// Set joint velocities.
    pub fn set_joint_velocities(&self, velocities: &[f32]) -> Result<(), PhysicsError> {
        self.write(Ok(()), |o| o.set_joint_velocities(velocities))
    }

    /// Joint forces pending for the next step.
    pub fn joint_forces(&self) -> Vec<f32> {
        self.read(Vec::new(), |o| o.joint_forces().to_vec())
    }

    /// Replace the joint forces.
    pub fn set_joint_forces(&self, forces: &[f32]) -> Result<(), PhysicsError> {
        self.write(Ok(()), |o| o.set_joint_forces(forces))
    }

    /// Add to the joint forces.
    pub fn add_joint_forces(&self, forces: &[f32]) -> Result<(), PhysicsError> {
        self.write(Ok(()), |o| o.add_joint_forces(forces))
    }

    /// Position limits, empty after removal.
    pub fn joint_position_limits(&self, upper: bool) -> Vec<f32> {
        self.read(Vec::new(), |o| o.joint_position_limits(upper))
    }

    /// Clamp joints into their limits.
    pub fn clamp_joint_limits(&self) {
        self.write((), |o| o.clamp_joint_limits());
    }

    /// Zero the joint state.
    pub fn reset(&self) {
        self.write((), |o| o.reset());
    }

    /// World pose of the base.
    pub fn root_state(&self) -> Isometry3<f32> {
        self.read(Isometry3::identity(), |o| o.root_state())
    }

    /// Move the base.
    pub fn set_root_state(&self, pose: Isometry3<f32>) {
        self.write((), |o| o.set_root_state(pose));
    }

    /// Base translation.
    pub fn translation(&self) -> Vector3<f32> {
        self.read(Vector3::zeros(), |o| o.translation())
    }

    /// Set the base translation.
    pub fn set_translation(&self, translation: Vector3<f32>) {
        self.write((), |o| o.set_translation(translation));
    }

    /// Base rotation.
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.read(UnitQuaternion::identity(), |o| o.rotation())
    }

    /// Set the base rotation.
    pub fn set_rotation(&self, rotation: UnitQuaternion<f32>) {
        self.write((), |o| o.set_rotation(rotation));
    }

    /// Base linear velocity.
    pub fn root_linear_velocity(&self) -> Vector3<f32> {
        self.read(Vector3::zeros(), |o| o.root_linear_velocity())
    }

    /// Set the base linear velocity.
    pub fn set_root_linear_velocity(&self, velocity: Vector3<f32>) {
        self.write((), |o| o.set_root_linear_velocity(velocity));
    }

    /// Base angular velocity.
    pub fn root_angular_velocity(&self) -> Vector3<f32> {
        self.read(Vector3::zeros(), |o| o.root_angular_velocity())
    }

    /// Set the base angular velocity.
    pub fn set_root_angular_velocity(&self, velocity: Vector3<f32>) {
        self.write((), |o| o.set_root_angular_velocity(velocity));
    }

    /// Motion type, `Undefined` after removal.
    pub fn motion_type(&self) -> MotionType {
        self.read(MotionType::Undefined, |o| o.motion_type())
    }

    /// Change the motion type.
    pub fn set_motion_type(&self, motion_type: MotionType) -> Result<(), PhysicsError> {
        self.write(Ok(()), |o| o.set_motion_type(motion_type))
    }

    /// Awake state.
    pub fn is_active(&self) -> bool {
        self.read(false, |o| o.is_active())
    }

    /// Wake or sleep.
    pub fn set_active(&self, active: bool) {
        self.write((), |o| o.set_active(active));
    }

    /// Whether the object may sleep.
    pub fn can_sleep(&self) -> bool {
        self.read(false, |o| o.can_sleep())
    }

    /// Overlap test with self-collision screening.
    pub fn contact_test(&self) -> bool {
        self.read(false, |o| o.contact_test())
    }

    /// Stop syncing scene nodes until the next node update.
    pub fn defer_updates(&self) {
        self.write((), |o| o.defer_updates());
    }

    /// Sync scene nodes.
    pub fn update_nodes(&self, force: bool) {
        self.write((), |o| o.update_nodes(force));
    }
}
