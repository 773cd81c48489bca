//! Object, stage and scene-instance templates.

use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// How a simulated body responds to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionType {
    /// No body exists yet, or "leave unchanged" in instance attributes.
    #[default]
    Undefined,
    /// Immovable collision geometry.
    Static,
    /// Moved only by direct state sets or velocity control.
    Kinematic,
    /// Moved by forces, contacts and constraints.
    Dynamic,
}

/// A rigid placement: translation plus rotation quaternion `[x, y, z, w]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation.
    #[serde(default)]
    pub translation: [f32; 3],
    /// Rotation quaternion as `[x, y, z, w]`.
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
}

fn identity_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: identity_rotation(),
        }
    }
}

impl Pose {
    /// Pure translation.
    pub fn from_translation(x: f32, y: f32, z: f32) -> Self {
        Self {
            translation: [x, y, z],
            ..Self::default()
        }
    }

    /// Convert to an isometry. The rotation is renormalized.
    pub fn to_isometry(&self) -> Isometry3<f32> {
        let [x, y, z, w] = self.rotation;
        let rotation = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
        let [tx, ty, tz] = self.translation;
        Isometry3::from_parts(Translation3::new(tx, ty, tz), rotation)
    }

    /// Build from an isometry.
    pub fn from_isometry(iso: &Isometry3<f32>) -> Self {
        let t = iso.translation.vector;
        let q = iso.rotation.quaternion();
        Self {
            translation: [t.x, t.y, t.z],
            rotation: [q.i, q.j, q.k, q.w],
        }
    }
}

/// Analytic or mesh geometry, used for collision and visual shapes.
///
/// Cylinders and capsules are authored along the local Z axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    /// Box with the given full extents.
    Box {
        /// Full size along each axis.
        size: [f32; 3],
    },
    /// Sphere.
    Sphere {
        /// Radius.
        radius: f32,
    },
    /// Cylinder along Z.
    Cylinder {
        /// Radius.
        radius: f32,
        /// Full length.
        length: f32,
    },
    /// Capsule along Z.
    Capsule {
        /// Radius.
        radius: f32,
        /// Length of the cylindrical section.
        length: f32,
    },
    /// Externally loaded mesh.
    Mesh {
        /// Asset file name.
        file: String,
        /// Per-axis scale.
        #[serde(default = "unit_scale")]
        scale: [f32; 3],
    },
    /// Infinite plane `normal . x = constant`.
    Plane {
        /// Plane normal.
        normal: [f32; 3],
        /// Plane offset.
        constant: f32,
    },
}

fn unit_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

/// Strategy for turning a triangle mesh into a collision shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColliderStrategy {
    /// Convex hull (fast, approximate).
    #[default]
    ConvexHull,
    /// Triangle mesh (accurate, slower).
    TriMesh,
    /// Axis-aligned bounding box (fastest, rough).
    Aabb,
}

/// Collision triangle mesh already loaded by the asset layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionMeshData {
    /// Vertex positions.
    pub vertices: Vec<[f32; 3]>,
    /// Triangle vertex indices.
    pub indices: Vec<[u32; 3]>,
}

impl CollisionMeshData {
    /// Closed box mesh centered at the origin.
    pub fn cuboid(half_extents: [f32; 3]) -> Self {
        let [hx, hy, hz] = half_extents;
        let vertices = vec![
            [-hx, -hy, -hz],
            [hx, -hy, -hz],
            [hx, hy, -hz],
            [-hx, hy, -hz],
            [-hx, -hy, hz],
            [hx, -hy, hz],
            [hx, hy, hz],
            [-hx, hy, hz],
        ];
        let indices = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [0, 4, 7],
            [0, 7, 3],
        ];
        Self { vertices, indices }
    }

    /// True when the mesh has no triangles.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// True if every index refers to an existing vertex.
    pub fn indices_in_bounds(&self) -> bool {
        let n = self.vertices.len() as u32;
        self.indices.iter().flatten().all(|&i| i < n)
    }
}

/// Collision geometry of a rigid object template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectCollision {
    /// Analytic primitive.
    Primitive {
        /// Shape.
        geometry: Geometry,
    },
    /// Triangle mesh converted with a strategy.
    Mesh {
        /// Mesh data.
        mesh: CollisionMeshData,
        /// Conversion strategy.
        #[serde(default)]
        strategy: ColliderStrategy,
    },
}

/// Template describing an instantiable rigid object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    /// Unique template handle.
    pub handle: String,
    /// Template ID, assigned by [`crate::TemplateLibrary`].
    #[serde(default = "undefined_id")]
    pub id: i32,
    /// Render asset handle attached to the visual node.
    #[serde(default)]
    pub render_asset: Option<String>,
    /// Collision geometry.
    pub collision: ObjectCollision,
    /// Mass in kg.
    #[serde(default = "default_mass")]
    pub mass: f32,
    /// Friction coefficient.
    #[serde(default = "default_friction")]
    pub friction_coefficient: f32,
    /// Restitution coefficient.
    #[serde(default = "default_restitution")]
    pub restitution_coefficient: f32,
    /// Linear damping.
    #[serde(default = "default_damping")]
    pub linear_damping: f32,
    /// Angular damping.
    #[serde(default = "default_damping")]
    pub angular_damping: f32,
    /// Scale applied to the visual node at creation.
    #[serde(default = "unit_scale")]
    pub scale: [f32; 3],
    /// Whether the collider takes part in collision detection.
    #[serde(default = "default_true")]
    pub is_collidable: bool,
    /// Initial motion type. `Undefined` picks the backend default.
    #[serde(default)]
    pub motion_type: MotionType,
}

fn undefined_id() -> i32 {
    -1
}

fn default_mass() -> f32 {
    1.0
}

fn default_friction() -> f32 {
    0.5
}

fn default_restitution() -> f32 {
    0.1
}

fn default_damping() -> f32 {
    0.2
}

fn default_true() -> bool {
    true
}

impl ObjectAttributes {
    /// Template with a primitive collision shape and default physical properties.
    pub fn primitive(handle: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            handle: handle.into(),
            id: undefined_id(),
            render_asset: None,
            collision: ObjectCollision::Primitive { geometry },
            mass: default_mass(),
            friction_coefficient: default_friction(),
            restitution_coefficient: default_restitution(),
            linear_damping: default_damping(),
            angular_damping: default_damping(),
            scale: unit_scale(),
            is_collidable: true,
            motion_type: MotionType::Undefined,
        }
    }

    /// Parse a template from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Visual scale as a vector.
    pub fn scale_vector(&self) -> Vector3<f32> {
        Vector3::from(self.scale)
    }
}

/// Template describing the static stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAttributes {
    /// Unique template handle.
    pub handle: String,
    /// Render asset handle.
    #[serde(default)]
    pub render_asset: Option<String>,
    /// Friction coefficient.
    #[serde(default = "default_friction")]
    pub friction_coefficient: f32,
    /// Restitution coefficient.
    #[serde(default = "default_restitution")]
    pub restitution_coefficient: f32,
    /// Whether the stage takes part in collision detection.
    #[serde(default = "default_true")]
    pub is_collidable: bool,
}

impl StageAttributes {
    /// Stage template with default properties.
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            render_asset: None,
            friction_coefficient: default_friction(),
            restitution_coefficient: default_restitution(),
            is_collidable: true,
        }
    }
}

/// Placement of one template instance in a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObjectInstanceAttributes {
    /// Handle of the object template (or articulated model name).
    pub template_handle: String,
    /// World translation.
    #[serde(default)]
    pub translation: [f32; 3],
    /// World rotation `[x, y, z, w]`.
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
    /// Motion type override; `Undefined` keeps the template's.
    #[serde(default)]
    pub motion_type: MotionType,
    /// Initial joint positions, in position-variable order.
    #[serde(default)]
    pub init_joint_positions: Vec<f32>,
    /// Initial joint velocities, in DoF order.
    #[serde(default)]
    pub init_joint_velocities: Vec<f32>,
}

impl SceneObjectInstanceAttributes {
    /// Instance at the origin with no overrides.
    pub fn new(template_handle: impl Into<String>) -> Self {
        Self {
            template_handle: template_handle.into(),
            translation: [0.0; 3],
            rotation: identity_rotation(),
            motion_type: MotionType::Undefined,
            init_joint_positions: Vec::new(),
            init_joint_velocities: Vec::new(),
        }
    }

    /// World placement of the instance.
    pub fn pose(&self) -> Pose {
        Pose {
            translation: self.translation,
            rotation: self.rotation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_roundtrip() {
        let iso = Isometry3::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(0.0, 0.0, std::f32::consts::FRAC_PI_2),
        );
        let pose = Pose::from_isometry(&iso);
        let back = pose.to_isometry();
        assert_relative_eq!(back.translation.vector, iso.translation.vector, epsilon = 1e-6);
        assert_relative_eq!(back.rotation.angle(), iso.rotation.angle(), epsilon = 1e-6);
    }

    #[test]
    fn test_object_attributes_defaults() {
        let json = r#"{
            "handle": "chair",
            "collision": { "kind": "primitive", "geometry": { "type": "sphere", "radius": 0.25 } }
        }"#;
        let attrs = ObjectAttributes::from_json(json).unwrap();
        assert_eq!(attrs.id, -1);
        assert_eq!(attrs.mass, 1.0);
        assert!(attrs.is_collidable);
        assert_eq!(attrs.motion_type, MotionType::Undefined);
        assert_eq!(
            attrs.collision,
            ObjectCollision::Primitive {
                geometry: Geometry::Sphere { radius: 0.25 }
            }
        );
    }

    #[test]
    fn test_cuboid_mesh() {
        let mesh = CollisionMeshData::cuboid([1.0, 1.0, 1.0]);
        assert_eq!(mesh.triangle_count(), 12);
        assert!(mesh.indices_in_bounds());
        assert!(!mesh.is_empty());
        assert!(CollisionMeshData::default().is_empty());
    }
}
