//! Result records for contact and ray queries.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::ObjectId;

/// Object ID reported for contacts and hits on the stage.
pub const STAGE_ID: ObjectId = -1;

/// Object ID reported for colliders that belong to no simulated object.
pub const NO_OBJECT_ID: ObjectId = -2;

/// A ray. Distances along it are measured in units of `direction`'s length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    /// Start point.
    pub origin: Point3<f32>,
    /// Direction, not necessarily normalized.
    pub direction: Vector3<f32>,
}

impl Ray {
    /// New ray.
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self { origin, direction }
    }

    /// Point at parameter `t`.
    pub fn point_at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }
}

/// One ray or sphere-cast hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RayHitInfo {
    /// Object that was hit, [`STAGE_ID`] for the stage.
    pub object_id: ObjectId,
    /// Link index for articulated objects.
    pub link_id: Option<usize>,
    /// World hit point.
    pub point: Point3<f32>,
    /// World surface normal at the hit point.
    pub normal: Vector3<f32>,
    /// Distance along the ray in units of ray length.
    pub ray_distance: f32,
}

/// All hits of a ray query, nearest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaycastResults {
    /// The query ray.
    pub ray: Ray,
    /// Hits sorted by `ray_distance`.
    pub hits: Vec<RayHitInfo>,
}

impl RaycastResults {
    /// Empty result for `ray`.
    pub fn new(ray: Ray) -> Self {
        Self {
            ray,
            hits: Vec::new(),
        }
    }

    /// True if anything was hit.
    pub fn has_hits(&self) -> bool {
        !self.hits.is_empty()
    }

    /// Sort hits by ascending distance.
    pub fn sort_by_distance(&mut self) {
        self.hits
            .sort_by(|a, b| a.ray_distance.total_cmp(&b.ray_distance));
    }
}

/// One contact point between two colliders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactPointData {
    /// First object, [`STAGE_ID`] for the stage or [`NO_OBJECT_ID`].
    pub object_id_a: ObjectId,
    /// Second object.
    pub object_id_b: ObjectId,
    /// Link of the first object, if articulated.
    pub link_id_a: Option<usize>,
    /// Link of the second object, if articulated.
    pub link_id_b: Option<usize>,
    /// World contact point on A.
    pub position_on_a_in_ws: Point3<f32>,
    /// World contact point on B.
    pub position_on_b_in_ws: Point3<f32>,
    /// Contact normal on B, pointing towards A.
    pub contact_normal_on_b_in_ws: Vector3<f32>,
    /// Signed distance; negative values are penetration.
    pub contact_distance: f32,
    /// Normal force applied by the solver during the last step.
    pub normal_force: f32,
    /// First friction force magnitude.
    pub linear_friction_force1: f32,
    /// Second friction force magnitude.
    pub linear_friction_force2: f32,
    /// First friction direction.
    pub linear_friction_direction1: Vector3<f32>,
    /// Second friction direction.
    pub linear_friction_direction2: Vector3<f32>,
    /// Whether the contact took part in the last solve.
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(d: f32) -> RayHitInfo {
        RayHitInfo {
            object_id: 0,
            link_id: None,
            point: Point3::origin(),
            normal: Vector3::y(),
            ray_distance: d,
        }
    }

    #[test]
    fn test_sort_by_distance() {
        let mut results = RaycastResults::new(Ray::new(Point3::origin(), Vector3::x()));
        assert!(!results.has_hits());
        results.hits = vec![hit(3.0), hit(0.5), hit(1.0)];
        results.sort_by_distance();
        let d: Vec<f32> = results.hits.iter().map(|h| h.ray_distance).collect();
        assert_eq!(d, vec![0.5, 1.0, 3.0]);
    }
}
