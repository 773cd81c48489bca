//! Render attachments for articulated links.

use embsim_metadata::{Geometry, VisualShape};
use embsim_scene::{NodeId, NodeType, SceneGraph};
use nalgebra::{Isometry3, Vector3};
use tracing::warn;

/// Primitive asset for a unit cube spanning `[-1, 1]`.
pub const CUBE_ASSET: &str = "cubeSolid";
/// Primitive asset for a unit icosphere.
pub const SPHERE_ASSET: &str = "icosphereSolid_subdivs_1";
/// Primitive asset for a unit-radius cylinder of half-length 1 along Y.
pub const CYLINDER_ASSET: &str =
    "cylinderSolid_rings_1_segments_12_halfLen_1_useTexCoords_false_useTangents_false_capEnds_true";

/// Asset handle, node scale and local correction for one visual geometry.
fn render_asset(geometry: &Geometry) -> Option<(String, Vector3<f32>, Isometry3<f32>)> {
    let z_up = Isometry3::rotation(Vector3::x() * std::f32::consts::FRAC_PI_2);
    match geometry {
        Geometry::Box { size } => Some((
            CUBE_ASSET.to_string(),
            Vector3::from(*size) * 0.5,
            Isometry3::identity(),
        )),
        Geometry::Sphere { radius } => Some((
            SPHERE_ASSET.to_string(),
            Vector3::repeat(*radius),
            Isometry3::identity(),
        )),
        Geometry::Cylinder { radius, length } => Some((
            CYLINDER_ASSET.to_string(),
            Vector3::new(*radius, length / 2.0, *radius),
            z_up,
        )),
        Geometry::Capsule { radius, length } => {
            let half_len = if *radius > 0.0 { length / (2.0 * radius) } else { 0.0 };
            Some((
                format!(
                    "capsule3DSolid_hemiRings_4_cylRings_1_segments_12_halfLen_{}_useTexCoords_false_useTangents_false",
                    half_len
                ),
                Vector3::repeat(*radius),
                z_up,
            ))
        }
        Geometry::Mesh { file, scale } => {
            Some((file.clone(), Vector3::from(*scale), Isometry3::identity()))
        }
        Geometry::Plane { .. } => None,
    }
}

/// Create one visual child of `link_node` per shape.
///
/// Unsupported geometry is skipped with a warning. Returns the created nodes
/// and whether every shape was attached.
pub(crate) fn attach_geometry(
    scene: &mut SceneGraph,
    link_node: NodeId,
    link_name: &str,
    visuals: &[VisualShape],
) -> (Vec<NodeId>, bool) {
    let mut nodes = Vec::with_capacity(visuals.len());
    let mut complete = true;
    for visual in visuals {
        let Some((asset, scale, correction)) = render_asset(&visual.geometry) else {
            warn!(link = link_name, geometry = ?visual.geometry, "unsupported visual geometry");
            complete = false;
            continue;
        };
        let node = scene.create_child(link_node);
        scene.set_type(node, NodeType::Visual);
        scene.set_isometry(node, &(visual.origin.to_isometry() * correction));
        scene.set_scale(node, scale);
        scene.set_render_asset(node, asset);
        if let Some(material) = &visual.material {
            scene.set_material_color(node, material.rgba);
        }
        nodes.push(node);
    }
    (nodes, complete)
}
