use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Server-side movement tuning. Distances are in world units, Z up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementConfig {
    pub forward_speed: f32,
    pub side_speed: f32,
    pub max_speed: f32,

    pub sprint_mult: f32,
    pub duck_mult: f32,

    pub accel_speed: f32,
    pub accel_speed_air: f32,

    pub jump_force: f32,

    pub stop_speed: f32,
    pub friction: f32,
    pub friction_enabled: bool,

    pub gravity: f32,

    /// Physics material friction of the player body.
    pub player_friction: f32,
    /// Height of the body center above the player's origin.
    pub player_offset: f32,
    pub player_mass: f32,
    pub player_radius: f32,
    pub player_height: f32,

    /// Steepest walkable slope, in degrees.
    pub max_slope_angle: f32,
    /// Contacts farther apart than this do not count as touching.
    pub max_separation: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            forward_speed: 250.0,
            side_speed: 250.0,
            max_speed: 250.0,

            sprint_mult: 2.4,
            duck_mult: 0.5,

            accel_speed: 10.0,
            accel_speed_air: 30.0,

            jump_force: 250.0,

            stop_speed: 25.0,
            friction: 8.0,
            friction_enabled: true,

            gravity: 800.0,

            player_friction: 0.01,
            player_offset: 40.0,
            player_mass: 200.0,
            player_radius: 16.0,
            player_height: 72.0,

            max_slope_angle: 40.0,
            max_separation: 1.0,
        }
    }
}

impl MovementConfig {
    pub fn gravity_vector(&self) -> Vec3 {
        Vec3::new(0.0, 0.0, -self.gravity)
    }

    /// Half length of the capsule's inner segment.
    pub fn capsule_half_height(&self) -> f32 {
        (self.player_height * 0.5 - self.player_radius).max(0.0)
    }
}

/// Camera-only smoothing. None of this feeds back into the authoritative
/// position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    pub view_height: f32,
    pub view_height_duck: f32,
    pub duck_time: f32,

    pub land_smoothing: bool,
    pub land_max_speed: f32,
    pub land_vel_scale: f32,
    pub land_power_scale: f32,
    pub land_time_scale: f32,

    pub bob_enabled: bool,
    pub bob_magnitude: f32,
    pub bob_freq: f32,
    pub bob_speed_scale: f32,
    pub bob_exit_lerp: f32,
    pub bob_offset: f32,
    pub bob_time_offset: f32,

    pub tilt_enabled: bool,
    pub tilt_lerp: f32,
    pub tilt_speed_scale: f32,
    pub tilt_scale: f32,
    pub tilt_threshold: f32,

    pub fov: f32,

    pub flashlight_brightness: f32,
    pub flashlight_offset: Vec3,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            view_height: 67.0,
            view_height_duck: 36.0,
            duck_time: 0.4,

            land_smoothing: true,
            land_max_speed: 1000.0,
            land_vel_scale: 1.0,
            land_power_scale: 100.0,
            land_time_scale: 2.0,

            bob_enabled: true,
            bob_magnitude: 2.0,
            bob_freq: 4.5,
            bob_speed_scale: 0.013,
            bob_exit_lerp: 0.1,
            bob_offset: 0.25,
            bob_time_offset: -0.6,

            tilt_enabled: true,
            tilt_lerp: 10.0,
            tilt_speed_scale: 0.043,
            tilt_scale: 0.2,
            tilt_threshold: 12.0,

            fov: 106.0,

            flashlight_brightness: 10.0,
            flashlight_offset: Vec3::splat(-4.0),
        }
    }
}
