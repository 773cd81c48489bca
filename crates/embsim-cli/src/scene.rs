//! TOML scene files: physics settings, templates, stage, objects and
//! articulated models in one document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use embsim_metadata::{
    ArticulatedModel, CollisionMeshData, MotionType, ObjectAttributes, PhysicsManagerAttributes,
    SceneObjectInstanceAttributes, StageAttributes, TemplateLibrary,
};
use embsim_physics::{ObjectId, PhysicsManager};
use embsim_scene::{SceneGraph, SharedSceneGraph};
use serde::Deserialize;
use tracing::info;

/// Parsed scene file.
#[derive(Debug, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub physics: PhysicsManagerAttributes,
    #[serde(default)]
    pub templates: Vec<ObjectAttributes>,
    #[serde(default)]
    pub stage: Option<StageSpec>,
    #[serde(default)]
    pub objects: Vec<SceneObjectInstanceAttributes>,
    #[serde(default)]
    pub articulated: Vec<ArticulatedSpec>,
}

/// Stage built from boxes centered at the origin.
#[derive(Debug, Deserialize)]
pub struct StageSpec {
    #[serde(flatten)]
    pub attributes: StageAttributes,
    /// Half extents of each box.
    #[serde(default)]
    pub cuboids: Vec<[f32; 3]>,
}

/// An articulated model file plus its placement.
#[derive(Debug, Deserialize)]
pub struct ArticulatedSpec {
    /// Model JSON, relative to the scene file.
    pub model: PathBuf,
    #[serde(default)]
    pub fixed_base: bool,
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
    #[serde(default)]
    pub motion_type: MotionType,
    #[serde(default)]
    pub init_joint_positions: Vec<f32>,
    #[serde(default)]
    pub init_joint_velocities: Vec<f32>,
}

fn identity_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl ArticulatedSpec {
    fn instance(&self, model: &ArticulatedModel) -> SceneObjectInstanceAttributes {
        SceneObjectInstanceAttributes {
            translation: self.translation,
            rotation: self.rotation,
            motion_type: self.motion_type,
            init_joint_positions: self.init_joint_positions.clone(),
            init_joint_velocities: self.init_joint_velocities.clone(),
            ..SceneObjectInstanceAttributes::new(model.name.clone())
        }
    }
}

/// A populated world.
pub struct LoadedScene {
    pub manager: PhysicsManager,
    pub graph: SharedSceneGraph,
    pub articulated_ids: Vec<ObjectId>,
}

impl SceneFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse scene file")
    }

    /// Read a scene file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In {}", path.display()))
    }

    /// Build a manager and instantiate everything. Articulated model paths
    /// resolve against `base_dir`.
    pub fn build(&self, base_dir: &Path) -> Result<LoadedScene> {
        let mut templates = TemplateLibrary::new();
        for template in &self.templates {
            templates.register(template.clone());
        }

        let mut manager = PhysicsManager::new(self.physics.clone(), templates);
        let graph = SceneGraph::shared();
        let root = graph.borrow().root();
        manager.initialize(graph.clone(), root);

        if let Some(stage) = &self.stage {
            let meshes: Vec<_> = stage
                .cuboids
                .iter()
                .map(|half| CollisionMeshData::cuboid(*half))
                .collect();
            manager
                .add_stage(stage.attributes.clone(), &meshes)
                .with_context(|| format!("Failed to add stage {}", stage.attributes.handle))?;
        }

        for instance in &self.objects {
            manager
                .add_object_instance(instance, None)
                .with_context(|| format!("Failed to add object {}", instance.template_handle))?;
        }

        let mut articulated_ids = Vec::new();
        for spec in &self.articulated {
            let path = base_dir.join(&spec.model);
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let model = ArticulatedModel::from_json(&json)
                .with_context(|| format!("Invalid model {}", path.display()))?;
            let id = manager
                .add_articulated_object_instance(&model, &spec.instance(&model), spec.fixed_base)
                .with_context(|| format!("Failed to add articulated object {}", model.name))?;
            articulated_ids.push(id);
        }

        info!(
            objects = manager.num_objects(),
            simulator = ?manager.physics_library(),
            "scene loaded"
        );
        Ok(LoadedScene {
            manager,
            graph,
            articulated_ids,
        })
    }
}
