//! Velocity control and pose integration helpers.

use nalgebra::{Isometry3, Translation3, Unit, UnitQuaternion, Vector3};

/// Rotate `rotation` by angular velocity `omega` (world frame) over `dt`.
pub fn integrate_rotation(
    rotation: UnitQuaternion<f32>,
    omega: Vector3<f32>,
    dt: f32,
) -> UnitQuaternion<f32> {
    let omega_norm = omega.norm();
    let angle = omega_norm * dt;
    // Skip if angle is negligible (avoids division by zero)
    if angle <= 1e-10 {
        return rotation;
    }
    let axis = Unit::new_normalize(omega / omega_norm);
    UnitQuaternion::from_axis_angle(&axis, angle) * rotation
}

/// Commanded velocities for a kinematically driven object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityControl {
    /// Commanded linear velocity.
    pub lin_vel: Vector3<f32>,
    /// Commanded angular velocity.
    pub ang_vel: Vector3<f32>,
    /// Apply the linear command.
    pub controlling_lin_vel: bool,
    /// Apply the angular command.
    pub controlling_ang_vel: bool,
    /// Linear command is in the object's local frame.
    pub lin_vel_is_local: bool,
    /// Angular command is in the object's local frame.
    pub ang_vel_is_local: bool,
}

impl Default for VelocityControl {
    fn default() -> Self {
        Self {
            lin_vel: Vector3::zeros(),
            ang_vel: Vector3::zeros(),
            controlling_lin_vel: false,
            controlling_ang_vel: false,
            lin_vel_is_local: false,
            ang_vel_is_local: false,
        }
    }
}

impl VelocityControl {
    /// True if either command is active.
    pub fn is_active(&self) -> bool {
        self.controlling_lin_vel || self.controlling_ang_vel
    }

    /// Commanded linear velocity in world frame, if controlled.
    pub fn world_lin_vel(&self, pose: &Isometry3<f32>) -> Option<Vector3<f32>> {
        self.controlling_lin_vel.then(|| {
            if self.lin_vel_is_local {
                pose.rotation * self.lin_vel
            } else {
                self.lin_vel
            }
        })
    }

    /// Commanded angular velocity in world frame, if controlled.
    pub fn world_ang_vel(&self, pose: &Isometry3<f32>) -> Option<Vector3<f32>> {
        self.controlling_ang_vel.then(|| {
            if self.ang_vel_is_local {
                pose.rotation * self.ang_vel
            } else {
                self.ang_vel
            }
        })
    }

    /// Advance `pose` by the active commands over `dt`.
    pub fn integrate_transform(&self, dt: f32, pose: &Isometry3<f32>) -> Isometry3<f32> {
        let mut translation = pose.translation.vector;
        let mut rotation = pose.rotation;
        if let Some(v) = self.world_lin_vel(pose) {
            translation += v * dt;
        }
        if let Some(w) = self.world_ang_vel(pose) {
            rotation = integrate_rotation(rotation, w, dt);
        }
        Isometry3::from_parts(Translation3::from(translation), rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_inactive_control_keeps_pose() {
        let control = VelocityControl {
            lin_vel: Vector3::x(),
            ..VelocityControl::default()
        };
        let pose = Isometry3::translation(1.0, 2.0, 3.0);
        assert_eq!(control.integrate_transform(1.0, &pose), pose);
    }

    #[test]
    fn test_local_linear_velocity() {
        let control = VelocityControl {
            lin_vel: Vector3::x(),
            controlling_lin_vel: true,
            lin_vel_is_local: true,
            ..VelocityControl::default()
        };
        let pose = Isometry3::rotation(Vector3::z() * FRAC_PI_2);
        let next = control.integrate_transform(2.0, &pose);
        assert_relative_eq!(next.translation.vector, Vector3::new(0.0, 2.0, 0.0), epsilon = 1e-5);
    }

    #[test]
    fn test_angular_velocity() {
        let control = VelocityControl {
            ang_vel: Vector3::new(0.0, FRAC_PI_2, 0.0),
            controlling_ang_vel: true,
            ..VelocityControl::default()
        };
        let next = control.integrate_transform(1.0, &Isometry3::identity());
        assert_relative_eq!(next.rotation.angle(), FRAC_PI_2, epsilon = 1e-5);
    }
}
