//! Links, joint types and joint-space layout of articulated objects.

use embsim_metadata::JointKind;
use embsim_scene::NodeId;
use nalgebra::{Isometry3, Quaternion, Translation3, Unit, UnitQuaternion, Vector3};

use crate::backend::ColliderKey;

/// Joint connecting a link to its parent, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointType {
    /// Rotation about an axis.
    Revolute,
    /// Translation along an axis.
    Prismatic,
    /// Ball joint.
    Spherical,
    /// Rigid attachment.
    Fixed,
    /// No joint (missing object or link).
    Invalid,
}

impl From<JointKind> for JointType {
    fn from(kind: JointKind) -> Self {
        match kind {
            JointKind::Revolute => JointType::Revolute,
            JointKind::Prismatic => JointType::Prismatic,
            JointKind::Spherical => JointType::Spherical,
            JointKind::Fixed => JointType::Fixed,
        }
    }
}

impl JointType {
    fn kind(self) -> Option<JointKind> {
        match self {
            JointType::Revolute => Some(JointKind::Revolute),
            JointType::Prismatic => Some(JointKind::Prismatic),
            JointType::Spherical => Some(JointKind::Spherical),
            JointType::Fixed => Some(JointKind::Fixed),
            JointType::Invalid => None,
        }
    }

    /// Number of position variables.
    pub fn num_positions(self) -> usize {
        self.kind().map_or(0, JointKind::num_positions)
    }

    /// Number of DoFs.
    pub fn num_dofs(self) -> usize {
        self.kind().map_or(0, JointKind::num_dofs)
    }
}

/// Position limits of a single-DoF joint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointLimit {
    /// Lower bound.
    pub lower: f32,
    /// Upper bound.
    pub upper: f32,
}

/// Collider and scene nodes of one rigid part (base or link).
#[derive(Debug, Clone)]
pub(crate) struct LinkParts {
    pub(crate) name: String,
    pub(crate) mass: f32,
    /// Point where gravity and link forces act, in the link frame.
    pub(crate) center_of_mass: Vector3<f32>,
    pub(crate) node: NodeId,
    pub(crate) visual_nodes: Vec<NodeId>,
    pub(crate) collider: Option<ColliderKey>,
    /// Collider placement in the link frame.
    pub(crate) collider_offset: Isometry3<f32>,
}

/// A non-base link and its joint to the parent.
#[derive(Debug, Clone)]
pub(crate) struct ArticulatedLink {
    pub(crate) parts: LinkParts,
    pub(crate) parent: Option<usize>,
    pub(crate) joint_type: JointType,
    pub(crate) joint_origin: Isometry3<f32>,
    pub(crate) axis: Unit<Vector3<f32>>,
    pub(crate) damping: f32,
    pub(crate) dof_offset: usize,
    pub(crate) num_dofs: usize,
    pub(crate) pos_offset: usize,
    pub(crate) num_pos: usize,
    /// World transform from the last kinematic update.
    pub(crate) world: Isometry3<f32>,
}

impl ArticulatedLink {
    /// Transform contributed by the joint at positions `q` (this link's slice).
    pub(crate) fn joint_motion(&self, q: &[f32]) -> Isometry3<f32> {
        match self.joint_type {
            JointType::Revolute => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&self.axis, q[0]),
            ),
            JointType::Prismatic => Isometry3::from_parts(
                Translation3::from(self.axis.into_inner() * q[0]),
                UnitQuaternion::identity(),
            ),
            JointType::Spherical => {
                Isometry3::from_parts(Translation3::identity(), spherical_rotation(q))
            }
            JointType::Fixed | JointType::Invalid => Isometry3::identity(),
        }
    }
}

/// Rotation of a spherical joint from its `[x, y, z, w]` position slice.
/// A zero quaternion reads as identity.
pub(crate) fn spherical_rotation(q: &[f32]) -> UnitQuaternion<f32> {
    let quat = Quaternion::new(q[3], q[0], q[1], q[2]);
    if quat.norm_squared() < 1e-12 {
        UnitQuaternion::identity()
    } else {
        UnitQuaternion::from_quaternion(quat)
    }
}

/// Offsets of each link into the flat DoF and position vectors.
///
/// Returns `(dof_offset, pos_offset)` per link plus the totals.
pub(crate) fn layout(joint_types: &[JointType]) -> (Vec<(usize, usize)>, usize, usize) {
    let mut offsets = Vec::with_capacity(joint_types.len());
    let (mut dofs, mut positions) = (0, 0);
    for joint_type in joint_types {
        offsets.push((dofs, positions));
        dofs += joint_type.num_dofs();
        positions += joint_type.num_positions();
    }
    (offsets, dofs, positions)
}
