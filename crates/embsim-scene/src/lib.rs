#![warn(missing_docs)]

//! Scene graph for the embsim simulator.
//!
//! A [`SceneGraph`] is an arena of transform nodes. Each node stores a local
//! translation, rotation and scale relative to its parent; absolute transforms
//! are composed on demand. Physics objects create child nodes and write their
//! transforms into them, but the graph owns every node.
//!
//! Node IDs are generational, so an ID that outlived its node is detected
//! instead of aliasing a newer node.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{Isometry3, Matrix4, Translation3, UnitQuaternion, Vector3};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Identifier of a node in a [`SceneGraph`].
    pub struct NodeId;
}

/// Scene graph shared between the physics manager and its objects.
pub type SharedSceneGraph = Rc<RefCell<SceneGraph>>;

/// Role of a node, for consumers such as renderers and recorders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeType {
    /// Grouping node.
    #[default]
    Empty,
    /// Root of a simulated object or link.
    Object,
    /// Static stage geometry.
    Stage,
    /// Leaf carrying a render asset.
    Visual,
}

/// A node in the transform hierarchy.
#[derive(Debug, Clone)]
pub struct SceneNode {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    translation: Vector3<f32>,
    rotation: UnitQuaternion<f32>,
    scale: Vector3<f32>,
    node_type: NodeType,
    render_asset: Option<String>,
    material_color: Option<[f32; 4]>,
}

impl SceneNode {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
            node_type: NodeType::Empty,
            render_asset: None,
            material_color: None,
        }
    }

    /// Parent node, `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Child nodes in creation order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Local translation.
    pub fn translation(&self) -> Vector3<f32> {
        self.translation
    }

    /// Local rotation.
    pub fn rotation(&self) -> UnitQuaternion<f32> {
        self.rotation
    }

    /// Local scale.
    pub fn scale(&self) -> Vector3<f32> {
        self.scale
    }

    /// Node role.
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    /// Render asset attached to this node.
    pub fn render_asset(&self) -> Option<&str> {
        self.render_asset.as_deref()
    }

    /// RGBA override for the render asset's material.
    pub fn material_color(&self) -> Option<[f32; 4]> {
        self.material_color
    }

    /// Local transform as `T * R * S`.
    pub fn transformation(&self) -> Matrix4<f32> {
        Translation3::from(self.translation).to_homogeneous()
            * self.rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }
}

/// Arena of scene nodes rooted at a single root node.
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: SlotMap<NodeId, SceneNode>,
    root: NodeId,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    /// Graph containing only the root node.
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(SceneNode::new(None));
        Self { nodes, root }
    }

    /// New graph behind a shared handle.
    pub fn shared() -> SharedSceneGraph {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the root cannot be removed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Node by ID.
    ///
    /// # Panics
    ///
    /// Panics if the node does not exist.
    pub fn node(&self, id: NodeId) -> &SceneNode {
        self.nodes
            .get(id)
            .unwrap_or_else(|| panic!("scene node {:?} does not exist", id))
    }

    fn node_mut(&mut self, id: NodeId) -> &mut SceneNode {
        self.nodes
            .get_mut(id)
            .unwrap_or_else(|| panic!("scene node {:?} does not exist", id))
    }

    /// Create a child of `parent` with identity transform.
    pub fn create_child(&mut self, parent: NodeId) -> NodeId {
        assert!(self.contains(parent), "parent node {:?} does not exist", parent);
        let child = self.nodes.insert(SceneNode::new(Some(parent)));
        self.node_mut(parent).children.push(child);
        child
    }

    /// Remove `id` and all of its descendants. Returns the number of removed nodes.
    ///
    /// # Panics
    ///
    /// Panics when asked to remove the root.
    pub fn remove_subtree(&mut self, id: NodeId) -> usize {
        assert!(id != self.root, "the scene root cannot be removed");
        let Some(parent) = self.node(id).parent else {
            return 0;
        };
        self.node_mut(parent).children.retain(|&c| c != id);
        let doomed = self.subtree(id);
        for node in &doomed {
            self.nodes.remove(*node);
        }
        doomed.len()
    }

    /// `id` and all of its descendants, parents first.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(self.node(node).children.iter().rev().copied());
        }
        out
    }

    /// Set local translation.
    pub fn set_translation(&mut self, id: NodeId, translation: Vector3<f32>) {
        self.node_mut(id).translation = translation;
    }

    /// Set local rotation.
    pub fn set_rotation(&mut self, id: NodeId, rotation: UnitQuaternion<f32>) {
        self.node_mut(id).rotation = rotation;
    }

    /// Set local scale.
    pub fn set_scale(&mut self, id: NodeId, scale: Vector3<f32>) {
        self.node_mut(id).scale = scale;
    }

    /// Set local translation and rotation from an isometry; scale is untouched.
    pub fn set_isometry(&mut self, id: NodeId, iso: &Isometry3<f32>) {
        let node = self.node_mut(id);
        node.translation = iso.translation.vector;
        node.rotation = iso.rotation;
    }

    /// Local translation and rotation as an isometry.
    pub fn isometry(&self, id: NodeId) -> Isometry3<f32> {
        let node = self.node(id);
        Isometry3::from_parts(Translation3::from(node.translation), node.rotation)
    }

    /// Set the node role.
    pub fn set_type(&mut self, id: NodeId, node_type: NodeType) {
        self.node_mut(id).node_type = node_type;
    }

    /// Attach a render asset handle.
    pub fn set_render_asset(&mut self, id: NodeId, asset: impl Into<String>) {
        self.node_mut(id).render_asset = Some(asset.into());
    }

    /// Override the material color of the attached render asset.
    pub fn set_material_color(&mut self, id: NodeId, rgba: [f32; 4]) {
        self.node_mut(id).material_color = Some(rgba);
    }

    /// World transform composed from the root down.
    pub fn absolute_transformation(&self, id: NodeId) -> Matrix4<f32> {
        let node = self.node(id);
        match node.parent {
            Some(parent) => self.absolute_transformation(parent) * node.transformation(),
            None => node.transformation(),
        }
    }

    /// World translation of the node origin.
    pub fn absolute_translation(&self, id: NodeId) -> Vector3<f32> {
        let m = self.absolute_transformation(id);
        Vector3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)])
    }
}
