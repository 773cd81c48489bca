//! Physics manager configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, Result};

/// Dynamics implementation driving a physics manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicsLibrary {
    /// Kinematics only: static and kinematic bodies, no collision queries.
    #[default]
    NoPhysics,
    /// Full dynamics through rapier3d.
    Rapier,
}

/// Settings used to create a physics manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsManagerAttributes {
    /// Simulation library.
    pub simulator: PhysicsLibrary,
    /// Fixed integration step in seconds.
    pub timestep: f64,
    /// Maximum fixed steps taken by one `step_physics` call.
    pub max_substeps: u32,
    /// Gravity vector.
    pub gravity: [f32; 3],
    /// Default friction coefficient.
    pub friction_coefficient: f32,
    /// Default restitution coefficient.
    pub restitution_coefficient: f32,
    /// Largest collision mesh (in triangles) accepted by the dynamics backend.
    pub max_collision_mesh_triangles: usize,
}

impl Default for PhysicsManagerAttributes {
    fn default() -> Self {
        Self {
            simulator: PhysicsLibrary::NoPhysics,
            timestep: 1.0 / 240.0,
            max_substeps: 10,
            gravity: [0.0, -9.8, 0.0],
            friction_coefficient: 0.4,
            restitution_coefficient: 0.1,
            max_collision_mesh_triangles: 1 << 20,
        }
    }
}

impl PhysicsManagerAttributes {
    /// Default settings with the given library.
    pub fn with_simulator(simulator: PhysicsLibrary) -> Self {
        Self {
            simulator,
            ..Self::default()
        }
    }

    /// Parse from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse from TOML. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from a `.json` or `.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("toml") => Self::from_toml(&text),
            other => Err(MetadataError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_partial() {
        let cfg = PhysicsManagerAttributes::from_toml(
            r#"
            simulator = "rapier"
            timestep = 0.01
            "#,
        )
        .unwrap();
        assert_eq!(cfg.simulator, PhysicsLibrary::Rapier);
        assert_eq!(cfg.timestep, 0.01);
        assert_eq!(cfg.max_substeps, 10);
    }

    #[test]
    fn test_json_defaults() {
        let cfg = PhysicsManagerAttributes::from_json("{}").unwrap();
        assert_eq!(cfg, PhysicsManagerAttributes::default());
    }

    #[test]
    fn test_unknown_extension() {
        let path = std::env::temp_dir().join("embsim_physics_config.yaml");
        std::fs::write(&path, "timestep: 1").unwrap();
        let err = PhysicsManagerAttributes::load(&path).unwrap_err();
        assert!(matches!(err, MetadataError::UnsupportedFormat(_)));
        let _ = std::fs::remove_file(&path);
    }
}
