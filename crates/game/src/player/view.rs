//! Camera math and the cosmetic view effects: duck smoothing, landing dip,
//! view bob and strafe tilt.

use std::f32::consts::PI;

use glam::{Vec2, Vec3};

use crate::entity::components::{Direction, MoveType, PlayerFlags};
use crate::entity::{EntityId, EntityStore};

use super::config::ViewConfig;
use super::parts::PlayerParts;
use super::MovementError;

pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

/// Wraps an angle into `[0, 360)`.
pub fn constrain_degrees(angle: f32) -> f32 {
    let angle = angle % 360.0;
    if angle < 0.0 { angle + 360.0 } else { angle }
}

/// Pitch clamped to ±90, yaw wrapped.
pub fn clamp_view_angles(mut angles: Vec3) -> Vec3 {
    angles[YAW] = constrain_degrees(angles[YAW]);
    angles[PITCH] = angles[PITCH].clamp(-90.0, 90.0);
    angles
}

/// Forward, right and up for pitch/yaw/roll in degrees. Zero angles give
/// forward +X, right +Y, up +Z. Positive pitch looks down.
pub fn direction_vectors(angles: Vec3) -> (Vec3, Vec3, Vec3) {
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    let forward = Vec3::new(cp * cy, cp * sy, -sp);
    let flat_right = Vec3::new(-sy, cy, 0.0);
    let flat_up = forward.cross(flat_right);

    let right = flat_right * cr + flat_up * sr;
    let up = flat_up * cr - flat_right * sr;
    (forward, right, up)
}

pub fn set_direction(direction: &mut Direction, angles: Vec3) {
    let (forward, right, up) = direction_vectors(angles);
    direction.forward.set(forward);
    direction.right.set(right);
    direction.up.set(up);
}

pub fn ease_out_quart(x: f32) -> f32 {
    1.0 - (1.0 - x).powi(4)
}

/// Where `current` sits between `min` and `max`, scaled by `mult`.
pub fn lerp_duration(max: f32, min: f32, current: f32, mult: f32) -> f32 {
    if max == min {
        return 0.0;
    }
    (current - min) / (max - min) * mult
}

/// Vertical camera dip after a landing of the given power.
pub fn land_offset(power: f32, time: f32) -> f32 {
    if power <= 0.0 {
        return 0.0;
    }
    -power * (time / power).sin() / (time / power).exp()
}

/// Land power in `[0, 1]` for an impact at vertical speed `vel_z`.
pub fn land_power(vel_z: f32, config: &ViewConfig) -> f32 {
    let base = (vel_z * config.land_vel_scale).abs() / config.land_max_speed;
    let land_vel = (base * PI).clamp(0.0, PI);
    (1.0 - land_vel.cos()) / 2.0
}

pub fn bob_speed_factor(horizontal_speed: f32, config: &ViewConfig) -> f32 {
    (horizontal_speed * config.bob_speed_scale + 1.0).ln()
}

/// Bob offset at `walk_time`. Zero at the start of a step.
pub fn bob_offset(walk_time: f32, speed_factor: f32, config: &ViewConfig) -> f32 {
    let wave = |t: f32| t.cos().tan().cos().sin();
    let rest = wave(0.0) + config.bob_offset;
    config.bob_magnitude * speed_factor * (wave(walk_time + config.bob_time_offset) - rest)
}

/// Roll toward the side the player strafes to, smoothed against the
/// previous tilt.
pub fn view_tilt(prev_tilt: f32, side_speed: f32, config: &ViewConfig, dt: f32) -> f32 {
    let side = if side_speed < 0.0 { -1.0 } else { 1.0 };
    let scaled = (side_speed.abs() * config.tilt_speed_scale + 1.0 - config.tilt_threshold).max(0.0);
    let speed_factor = scaled.ln().max(0.0);
    let target = speed_factor * side * config.tilt_scale;
    prev_tilt + (target - prev_tilt) * (config.tilt_lerp * dt)
}

/// Eye height the command asks for.
pub fn view_height_for(duck: bool, config: &ViewConfig) -> f32 {
    if duck {
        config.view_height_duck
    } else {
        config.view_height
    }
}

/// Advances the duck transition and writes the eye height to the camera.
pub(crate) fn smooth_duck(parts: &mut PlayerParts, duck: bool, config: &ViewConfig, dt: f32) {
    let flags = parts.move_data.player_flags.value();
    let prev_flags = parts.move_data.prev_player_flags.value();
    let mv = &mut parts.move_data;

    if flags.contains(PlayerFlags::ON_GROUND) && mv.move_type.value() == MoveType::Walk {
        let target = view_height_for(duck, config);
        if mv.target_view_height.value() != target {
            mv.prev_view_height.set(mv.out_view_height.value());
            mv.target_view_height.set(target);
            mv.duck_time.set(0.0);

            let mut duration = lerp_duration(
                config.view_height,
                config.view_height_duck,
                mv.prev_view_height.value(),
                1.0,
            );
            if target == config.view_height {
                duration = 1.0 - duration;
            }
            mv.duck_duration.set(duration * config.duck_time);
        }
    } else if prev_flags.contains(PlayerFlags::ON_GROUND) {
        mv.prev_view_height.set(mv.out_view_height.value());
        mv.duck_duration.set(lerp_duration(
            config.view_height,
            config.view_height_duck,
            mv.prev_view_height.value(),
            config.duck_time,
        ));
        mv.duck_time.set(0.0);
    }

    mv.duck_time.set(mv.duck_time.value() + dt);

    let duration = mv.duck_duration.value();
    let time = mv.duck_time.value();
    if duration > 0.0 && duration >= time {
        let curve = ease_out_quart(time / duration);
        let prev = mv.prev_view_height.value();
        let target = mv.target_view_height.value();
        mv.out_view_height.set(prev + (target - prev) * curve);
    } else {
        mv.out_view_height.set(mv.target_view_height.value());
    }

    parts.cam_transform.pos.edit().z = mv.out_view_height.value();
}

/// Applies the landing dip to the camera.
pub(crate) fn apply_land_offset(parts: &mut PlayerParts, config: &ViewConfig) {
    if !config.land_smoothing || parts.move_data.move_type.value() != MoveType::Walk {
        return;
    }
    let power = parts.move_data.land_power.value();
    if power > 0.0 {
        let time = parts.move_data.land_time.value();
        parts.cam_transform.pos.edit().z += land_offset(power, time) * config.land_power_scale;
    }
}

fn apply_view_bob(parts: &mut PlayerParts, config: &ViewConfig, dt: f32) {
    if !config.bob_enabled {
        return;
    }
    let mv = &mut parts.move_data;

    if !mv.player_flags.value().contains(PlayerFlags::ON_GROUND) {
        // ease back instead of snapping
        mv.walk_time = 0.0;
        let amount = mv.bob_offset_amount.value();
        mv.bob_offset_amount
            .set(amount + (0.0 - amount) * config.bob_exit_lerp);
        parts.cam_transform.pos.edit().z += mv.bob_offset_amount.value();
        return;
    }

    let vel = parts.rigid_body.vel.value();
    let speed = Vec2::new(vel.x, vel.y).length();
    let speed_factor = bob_speed_factor(speed, config);

    mv.walk_time += dt * speed_factor * config.bob_freq;
    let offset = bob_offset(mv.walk_time, speed_factor, config);
    mv.bob_offset_amount.set(offset);
    if offset == 0.0 {
        mv.walk_time = 0.0;
    }

    parts.cam_transform.pos.edit().z += offset;
}

fn apply_view_tilt(parts: &mut PlayerParts, config: &ViewConfig, dt: f32) {
    if !config.tilt_enabled {
        return;
    }
    let side_speed = parts
        .rigid_body
        .vel
        .value()
        .dot(parts.direction.right.value());
    let tilt = view_tilt(parts.move_data.prev_view_tilt.value(), side_speed, config, dt);

    parts.cam_transform.ang.edit()[ROLL] = tilt;
    parts.move_data.prev_view_tilt.set(tilt);
}

/// Recomputes the player's and the camera's direction vectors.
pub(crate) fn update_directions(parts: &mut PlayerParts) {
    let angles = clamp_view_angles(parts.cam_transform.ang.value());
    parts.cam_transform.ang.set(angles);

    set_direction(&mut parts.direction, parts.transform.ang.value());
    set_direction(&mut parts.cam_direction, angles);
}

/// Per-frame camera pass for a player the local client is watching.
pub fn update_local_view(
    store: &mut EntityStore,
    player: EntityId,
    config: &ViewConfig,
    dt: f32,
) -> Result<(), MovementError> {
    let mut parts = PlayerParts::load(store, player)?;

    parts.cam_transform.pos.edit().z = parts.move_data.out_view_height.value();

    if parts.move_data.move_type.value() == MoveType::Walk {
        apply_land_offset(&mut parts, config);
        apply_view_bob(&mut parts, config, dt);
        apply_view_tilt(&mut parts, config, dt);
    }

    update_directions(&mut parts);
    parts.commit(store);
    Ok(())
}
