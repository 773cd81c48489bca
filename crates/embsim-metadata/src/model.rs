//! Kinematic-tree descriptions of articulated objects.
//!
//! An [`ArticulatedModel`] is the already-parsed form of a robot description:
//! a base link plus an ordered list of child links, each attached to its
//! parent through one joint. Links must be listed in topological order
//! (parents before children).

use serde::{Deserialize, Serialize};

use crate::attributes::{Geometry, Pose};
use crate::error::{MetadataError, Result};

/// Joint type connecting a link to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    /// Rigid attachment, no DoFs.
    Fixed,
    /// Rotation about the joint axis.
    Revolute,
    /// Translation along the joint axis.
    Prismatic,
    /// Ball joint, quaternion position.
    Spherical,
}

impl JointKind {
    /// Number of position variables.
    pub fn num_positions(self) -> usize {
        match self {
            JointKind::Fixed => 0,
            JointKind::Revolute | JointKind::Prismatic => 1,
            JointKind::Spherical => 4,
        }
    }

    /// Number of velocity variables (DoFs).
    pub fn num_dofs(self) -> usize {
        match self {
            JointKind::Fixed => 0,
            JointKind::Revolute | JointKind::Prismatic => 1,
            JointKind::Spherical => 3,
        }
    }
}

/// RGBA material override for a visual shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialColor {
    /// Diffuse/ambient color.
    pub rgba: [f32; 4],
    /// Specular color.
    #[serde(default)]
    pub specular: [f32; 3],
}

/// One visual element of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualShape {
    /// Geometry to render.
    pub geometry: Geometry,
    /// Placement relative to the link frame.
    #[serde(default)]
    pub origin: Pose,
    /// Optional material override.
    #[serde(default)]
    pub material: Option<MaterialColor>,
}

/// One collision element of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionShape {
    /// Collision geometry.
    pub geometry: Geometry,
    /// Placement relative to the link frame.
    #[serde(default)]
    pub origin: Pose,
}

/// Mass and geometry of a link, shared by the base and child links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkBody {
    /// Link name.
    pub name: String,
    /// Mass in kg.
    #[serde(default = "default_link_mass")]
    pub mass: f32,
    /// Visual elements.
    #[serde(default)]
    pub visuals: Vec<VisualShape>,
    /// Collision elements.
    #[serde(default)]
    pub collisions: Vec<CollisionShape>,
    /// When false the link never collides (and may be merged into the
    /// fixed-base aggregate body).
    #[serde(default = "default_true")]
    pub collidable: bool,
}

fn default_link_mass() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

impl LinkBody {
    /// Massive link with no geometry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mass: default_link_mass(),
            visuals: Vec::new(),
            collisions: Vec::new(),
            collidable: true,
        }
    }

    /// Add a collision shape.
    pub fn with_collision(mut self, geometry: Geometry, origin: Pose) -> Self {
        self.collisions.push(CollisionShape { geometry, origin });
        self
    }

    /// Add a visual shape.
    pub fn with_visual(mut self, geometry: Geometry, origin: Pose) -> Self {
        self.visuals.push(VisualShape {
            geometry,
            origin,
            material: None,
        });
        self
    }
}

/// Joint attaching a link to its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelJoint {
    /// Joint name.
    pub name: String,
    /// Joint type.
    pub kind: JointKind,
    /// Joint frame relative to the parent link frame.
    #[serde(default)]
    pub origin: Pose,
    /// Axis in the joint frame (revolute/prismatic).
    #[serde(default = "default_axis")]
    pub axis: [f32; 3],
    /// `[lower, upper]` position limits (revolute/prismatic only).
    #[serde(default)]
    pub limits: Option<[f32; 2]>,
    /// Viscous damping.
    #[serde(default)]
    pub damping: f32,
}

fn default_axis() -> [f32; 3] {
    [0.0, 0.0, 1.0]
}

impl ModelJoint {
    /// Joint of the given kind about/along Z with no limits.
    pub fn new(name: impl Into<String>, kind: JointKind, origin: Pose) -> Self {
        Self {
            name: name.into(),
            kind,
            origin,
            axis: default_axis(),
            limits: None,
            damping: 0.0,
        }
    }

    /// Set the joint axis.
    pub fn with_axis(mut self, axis: [f32; 3]) -> Self {
        self.axis = axis;
        self
    }

    /// Set the position limits.
    pub fn with_limits(mut self, lower: f32, upper: f32) -> Self {
        self.limits = Some([lower, upper]);
        self
    }
}

/// A non-base link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLink {
    /// Mass and geometry.
    #[serde(flatten)]
    pub body: LinkBody,
    /// Index of the parent link in [`ArticulatedModel::links`]; `None` for the base.
    #[serde(default)]
    pub parent: Option<usize>,
    /// Joint to the parent.
    pub joint: ModelJoint,
}

/// Parsed kinematic tree of an articulated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticulatedModel {
    /// Model name, also used as template handle.
    pub name: String,
    /// Root link.
    pub base: LinkBody,
    /// Child links in topological order.
    #[serde(default)]
    pub links: Vec<ModelLink>,
    /// Whether links of this model collide with each other.
    #[serde(default)]
    pub self_collision: bool,
}

impl ArticulatedModel {
    /// Model with only a base link.
    pub fn new(name: impl Into<String>, base: LinkBody) -> Self {
        Self {
            name: name.into(),
            base,
            links: Vec::new(),
            self_collision: false,
        }
    }

    /// Append a link and return its index.
    pub fn push_link(&mut self, body: LinkBody, parent: Option<usize>, joint: ModelJoint) -> usize {
        self.links.push(ModelLink {
            body,
            parent,
            joint,
        });
        self.links.len() - 1
    }

    /// Parse and validate a model from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    /// Total position variables over all links.
    pub fn num_positions(&self) -> usize {
        self.links.iter().map(|l| l.joint.kind.num_positions()).sum()
    }

    /// Total DoFs over all links.
    pub fn num_dofs(&self) -> usize {
        self.links.iter().map(|l| l.joint.kind.num_dofs()).sum()
    }

    /// Check topology and joint data.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| MetadataError::InvalidModel {
            model: self.name.clone(),
            reason,
        };
        for (index, link) in self.links.iter().enumerate() {
            if let Some(parent) = link.parent {
                if parent >= index {
                    return Err(invalid(format!(
                        "link {} ({}) lists parent {} which is not an earlier link",
                        index, link.body.name, parent
                    )));
                }
            }
            let joint = &link.joint;
            if matches!(joint.kind, JointKind::Revolute | JointKind::Prismatic) {
                let [x, y, z] = joint.axis;
                if (x * x + y * y + z * z).sqrt() < 1e-9 {
                    return Err(invalid(format!("joint {} has a zero axis", joint.name)));
                }
            }
            if let Some([lower, upper]) = joint.limits {
                if !matches!(joint.kind, JointKind::Revolute | JointKind::Prismatic) {
                    return Err(invalid(format!(
                        "joint {} is {:?} and cannot be limited",
                        joint.name, joint.kind
                    )));
                }
                if !lower.is_finite() || !upper.is_finite() {
                    return Err(invalid(format!(
                        "joint {} has non-finite limits [{}, {}]",
                        joint.name, lower, upper
                    )));
                }
                if lower > upper {
                    return Err(invalid(format!(
                        "joint {} has lower limit {} above upper limit {}",
                        joint.name, lower, upper
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm() -> ArticulatedModel {
        let mut model = ArticulatedModel::new("arm", LinkBody::new("base"));
        let shoulder = model.push_link(
            LinkBody::new("upper"),
            None,
            ModelJoint::new("shoulder", JointKind::Revolute, Pose::default()).with_limits(-1.0, 1.0),
        );
        model.push_link(
            LinkBody::new("wrist"),
            Some(shoulder),
            ModelJoint::new("wrist", JointKind::Spherical, Pose::from_translation(0.0, 0.0, 0.5)),
        );
        model
    }

    #[test]
    fn test_counts() {
        let model = arm();
        assert_eq!(model.num_positions(), 5);
        assert_eq!(model.num_dofs(), 4);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_rejects_forward_parent() {
        let mut model = arm();
        model.links[0].parent = Some(1);
        assert!(matches!(
            model.validate(),
            Err(MetadataError::InvalidModel { .. })
        ));
    }

    #[test]
    fn test_rejects_limited_spherical() {
        let mut model = arm();
        model.links[1].joint.limits = Some([0.0, 1.0]);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_rejects_non_finite_limits() {
        let mut model = arm();
        model.links[0].joint.limits = Some([f32::NAN, 1.0]);
        assert!(model.validate().is_err());
        model.links[0].joint.limits = Some([-1.0, f32::INFINITY]);
        assert!(model.validate().is_err());
        model.links[0].joint.limits = Some([-1.0, -1.0]);
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let model = arm();
        let json = serde_json::to_string(&model).unwrap();
        let parsed = ArticulatedModel::from_json(&json).unwrap();
        assert_eq!(parsed, model);
    }
}
