//! Serializable object state for keyframe capture and restore.

use embsim_metadata::{MotionType, Pose};
use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

use crate::ObjectId;

/// State of one simulated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    /// Object ID at capture time.
    pub object_id: ObjectId,
    /// Root translation.
    pub translation: [f32; 3],
    /// Root rotation `[x, y, z, w]`.
    pub rotation: [f32; 4],
    /// Motion type.
    pub motion_type: MotionType,
    /// Joint positions (articulated objects only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joint_positions: Vec<f32>,
    /// Joint velocities (articulated objects only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joint_velocities: Vec<f32>,
}

impl ObjectState {
    /// State of a single-body object.
    pub fn new(object_id: ObjectId, root: &Isometry3<f32>, motion_type: MotionType) -> Self {
        let pose = Pose::from_isometry(root);
        Self {
            object_id,
            translation: pose.translation,
            rotation: pose.rotation,
            motion_type,
            joint_positions: Vec::new(),
            joint_velocities: Vec::new(),
        }
    }

    /// Root pose.
    pub fn root(&self) -> Isometry3<f32> {
        Pose {
            translation: self.translation,
            rotation: self.rotation,
        }
        .to_isometry()
    }
}

/// All object states at one point in simulated time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Simulated time of the capture.
    pub world_time: f64,
    /// Captured objects in ID order.
    pub objects: Vec<ObjectState>,
}

impl Keyframe {
    /// Serialize to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_keyframe_json() {
        let root = Isometry3::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.0, 0.5, 0.0));
        let mut arm = ObjectState::new(1, &root, MotionType::Dynamic);
        arm.joint_positions = vec![0.1, 0.2];
        arm.joint_velocities = vec![0.0, -1.0];
        let keyframe = Keyframe {
            world_time: 0.5,
            objects: vec![ObjectState::new(0, &Isometry3::identity(), MotionType::Static), arm],
        };

        let json = keyframe.to_json().unwrap();
        assert!(!json.contains("\"joint_positions\": []"));
        let parsed = Keyframe::from_json(&json).unwrap();
        assert_eq!(parsed, keyframe);
        assert_relative_eq!(
            parsed.objects[1].root().translation.vector,
            root.translation.vector
        );
    }
}
