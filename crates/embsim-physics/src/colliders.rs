//! Collision shape generation from template geometry.

use embsim_metadata::{ColliderStrategy, CollisionMeshData, Geometry};
use nalgebra::{Isometry3, Point3, Translation3, Unit, UnitQuaternion, Vector3};
use parry3d::shape::{ConvexPolyhedron, SharedShape, TriMesh};

use crate::error::PhysicsError;

/// A collision shape and its placement in the owner's frame.
pub type PlacedShape = (SharedShape, Isometry3<f32>);

/// Generate a collision shape from a triangle mesh.
///
/// # Arguments
///
/// * `mesh` - The triangle mesh to convert
/// * `strategy` - The collision shape strategy to use
/// * `scale` - Per-axis scale applied to the vertices
/// * `name` - Name for error messages
///
/// # Returns
///
/// A shared collision shape and the offset it must be placed at.
pub fn mesh_to_shape(
    mesh: &CollisionMeshData,
    strategy: ColliderStrategy,
    scale: Vector3<f32>,
    name: &str,
) -> Result<PlacedShape, PhysicsError> {
    if mesh.is_empty() {
        return Err(PhysicsError::CollisionShape {
            name: name.to_string(),
            reason: "Empty mesh".to_string(),
        });
    }
    if !mesh.indices_in_bounds() {
        return Err(PhysicsError::CollisionShape {
            name: name.to_string(),
            reason: "Triangle index out of bounds".to_string(),
        });
    }

    let points: Vec<Point3<f32>> = mesh
        .vertices
        .iter()
        .map(|v| Point3::new(v[0] * scale.x, v[1] * scale.y, v[2] * scale.z))
        .collect();

    match strategy {
        ColliderStrategy::ConvexHull => create_convex_hull(&points),
        ColliderStrategy::TriMesh => create_trimesh(points, mesh, name),
        ColliderStrategy::Aabb => Ok(create_aabb(&points)),
    }
}

fn create_convex_hull(points: &[Point3<f32>]) -> Result<PlacedShape, PhysicsError> {
    if points.len() < 4 {
        return Ok(create_aabb(points));
    }
    match ConvexPolyhedron::from_convex_hull(points) {
        Some(hull) => Ok((SharedShape::new(hull), Isometry3::identity())),
        // Flat or otherwise degenerate point sets have no hull.
        None => Ok(create_aabb(points)),
    }
}

fn create_trimesh(
    vertices: Vec<Point3<f32>>,
    mesh: &CollisionMeshData,
    name: &str,
) -> Result<PlacedShape, PhysicsError> {
    match TriMesh::new(vertices, mesh.indices.clone()) {
        Ok(trimesh) => Ok((SharedShape::new(trimesh), Isometry3::identity())),
        Err(e) => Err(PhysicsError::CollisionShape {
            name: name.to_string(),
            reason: format!("Failed to create trimesh: {:?}", e),
        }),
    }
}

fn create_aabb(points: &[Point3<f32>]) -> PlacedShape {
    let mut min = Vector3::repeat(f32::INFINITY);
    let mut max = Vector3::repeat(f32::NEG_INFINITY);
    for p in points {
        min = min.inf(&p.coords);
        max = max.sup(&p.coords);
    }

    // Thin boxes still need some volume for contact generation.
    let half_extents = ((max - min) / 2.0).map(|h| h.max(1e-4));
    let center = (max + min) / 2.0;

    (
        SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z),
        Isometry3::from_parts(Translation3::from(center), UnitQuaternion::identity()),
    )
}

/// Generate a collision shape from analytic geometry.
///
/// Cylinders and capsules are authored along Z, so their shapes come back
/// rotated onto that axis. Meshes referenced by file cannot be loaded here.
pub fn geometry_to_shape(geometry: &Geometry, name: &str) -> Result<PlacedShape, PhysicsError> {
    let z_up = Isometry3::rotation(Vector3::x() * std::f32::consts::FRAC_PI_2);
    let shape = match geometry {
        Geometry::Box { size } => (
            SharedShape::cuboid(size[0] / 2.0, size[1] / 2.0, size[2] / 2.0),
            Isometry3::identity(),
        ),
        Geometry::Sphere { radius } => (SharedShape::ball(*radius), Isometry3::identity()),
        Geometry::Cylinder { radius, length } => {
            (SharedShape::cylinder(length / 2.0, *radius), z_up)
        }
        Geometry::Capsule { radius, length } => {
            (SharedShape::capsule_y(length / 2.0, *radius), z_up)
        }
        Geometry::Plane { normal, constant } => {
            let normal = Vector3::from(*normal);
            let Some(unit) = Unit::try_new(normal, 1e-9) else {
                return Err(PhysicsError::CollisionShape {
                    name: name.to_string(),
                    reason: "Plane normal is zero".to_string(),
                });
            };
            (
                SharedShape::halfspace(unit),
                Isometry3::from_parts(
                    Translation3::from(unit.into_inner() * *constant),
                    UnitQuaternion::identity(),
                ),
            )
        }
        Geometry::Mesh { file, .. } => {
            return Err(PhysicsError::CollisionShape {
                name: name.to_string(),
                reason: format!("Mesh asset {} must be loaded as collision mesh data", file),
            })
        }
    };
    Ok(shape)
}

/// Merge placed shapes into one. A single shape at identity is returned as is.
pub fn combine_shapes(mut shapes: Vec<PlacedShape>) -> Option<PlacedShape> {
    match shapes.len() {
        0 => None,
        1 => shapes.pop(),
        _ => {
            let parts = shapes.into_iter().map(|(shape, pose)| (pose, shape)).collect();
            Some((SharedShape::compound(parts), Isometry3::identity()))
        }
    }
}

/// Estimate mass from mesh volume assuming uniform density.
///
/// # Arguments
///
/// * `mesh` - The triangle mesh
/// * `density` - Density in kg/m³
///
/// # Returns
///
/// Estimated mass in kg.
pub fn estimate_mass(mesh: &CollisionMeshData, density: f32) -> f32 {
    let vertex = |i: u32| Vector3::from(mesh.vertices[i as usize]);
    let mut volume = 0.0f32;

    for [a, b, c] in &mesh.indices {
        // Signed volume of tetrahedron with origin
        volume += vertex(*a).dot(&vertex(*b).cross(&vertex(*c))) / 6.0;
    }

    (volume.abs() * density).max(0.001) // Minimum mass of 1 gram
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_scale() -> Vector3<f32> {
        Vector3::new(1.0, 1.0, 1.0)
    }

    #[test]
    fn test_convex_hull() {
        let mesh = CollisionMeshData::cuboid([0.5, 0.5, 0.5]);
        let (shape, _) = mesh_to_shape(&mesh, ColliderStrategy::ConvexHull, unit_scale(), "test")
            .unwrap();
        assert!(shape.as_convex_polyhedron().is_some());
    }

    #[test]
    fn test_trimesh() {
        let mesh = CollisionMeshData::cuboid([0.5, 0.5, 0.5]);
        let (shape, _) =
            mesh_to_shape(&mesh, ColliderStrategy::TriMesh, unit_scale(), "test").unwrap();
        assert!(shape.as_trimesh().is_some());
    }

    #[test]
    fn test_aabb_is_offset() {
        let mut mesh = CollisionMeshData::cuboid([0.5, 0.5, 0.5]);
        for v in &mut mesh.vertices {
            v[0] += 2.0;
        }
        let (shape, offset) =
            mesh_to_shape(&mesh, ColliderStrategy::Aabb, unit_scale(), "test").unwrap();
        let cuboid = shape.as_cuboid().unwrap();
        assert_relative_eq!(cuboid.half_extents, Vector3::new(0.5, 0.5, 0.5), epsilon = 1e-6);
        assert_relative_eq!(offset.translation.vector.x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let mesh = CollisionMeshData::default();
        let err = mesh_to_shape(&mesh, ColliderStrategy::TriMesh, unit_scale(), "empty");
        assert!(matches!(err, Err(PhysicsError::CollisionShape { .. })));
    }

    #[test]
    fn test_cylinder_along_z() {
        let (shape, pose) =
            geometry_to_shape(&Geometry::Cylinder { radius: 0.1, length: 2.0 }, "c").unwrap();
        assert!(shape.as_cylinder().is_some());
        let axis = pose.rotation * Vector3::y();
        assert_relative_eq!(axis, Vector3::z(), epsilon = 1e-6);
    }

    #[test]
    fn test_mesh_geometry_unsupported() {
        let geometry = Geometry::Mesh {
            file: "chair.glb".to_string(),
            scale: [1.0; 3],
        };
        assert!(geometry_to_shape(&geometry, "chair").is_err());
    }

    #[test]
    fn test_combine_shapes() {
        assert!(combine_shapes(Vec::new()).is_none());

        let offset = Isometry3::translation(0.0, 0.0, 1.0);
        let (single, pose) = combine_shapes(vec![(SharedShape::ball(0.5), offset)]).unwrap();
        assert!(single.as_ball().is_some());
        assert_eq!(pose, offset);

        let (compound, pose) = combine_shapes(vec![
            (SharedShape::ball(0.5), Isometry3::translation(-1.0, 0.0, 0.0)),
            (SharedShape::cuboid(0.1, 0.1, 0.1), Isometry3::translation(1.0, 0.0, 0.0)),
        ])
        .unwrap();
        assert_eq!(pose, Isometry3::identity());
        let parts = compound.as_compound().unwrap().shapes();
        assert_eq!(parts.len(), 2);
        assert_relative_eq!(parts[0].0.translation.vector.x, -1.0);
        assert!(parts[0].1.as_ball().is_some());
        assert!(parts[1].1.as_cuboid().is_some());
    }

    #[test]
    fn test_estimate_mass() {
        let mesh = CollisionMeshData::cuboid([0.5, 0.5, 0.5]);
        assert_relative_eq!(estimate_mass(&mesh, 1000.0), 1000.0, epsilon = 1e-2);
    }
}
