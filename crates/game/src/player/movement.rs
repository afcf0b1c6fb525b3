//! Authoritative player movement. Quake style acceleration on top of a
//! dynamic capsule that the physics step resolves against the world.

use glam::Vec3;

use crate::entity::components::{MoveType, PhysObject, PlayerFlags, PlayerMoveData};
use crate::entity::{Component, EntityId, EntityStore};
use crate::net::{Buttons, UserCmd};
use crate::physics::PhysicsBody;

use super::config::{MovementConfig, ViewConfig};
use super::parts::PlayerParts;
use super::view;
use super::MovementError;

/// Clamps `wish_vel` to `max_speed` and returns its direction and speed.
pub fn wish_speed(wish_vel: &mut Vec3, max_speed: f32) -> (Vec3, f32) {
    let wish_dir = wish_vel.normalize_or_zero();
    let mut speed = wish_vel.length();

    if speed > max_speed {
        *wish_vel *= max_speed / speed;
        speed = max_speed;
    }
    (wish_dir, speed)
}

/// Adds speed along `wish_dir` without pushing the projection past the wish
/// speed. In the air `wish_dir` is the unnormalized wish velocity: its length
/// caps the target speed together with `accel_speed_air`, and only its
/// direction is used to push, so the air gain never scales with the wish
/// speed.
pub fn accelerate(
    vel: Vec3,
    wish_dir: Vec3,
    wish_speed: f32,
    in_air: bool,
    config: &MovementConfig,
    dt: f32,
) -> Vec3 {
    let (dir, base_speed) = if in_air {
        (
            wish_dir.normalize_or_zero(),
            config.accel_speed_air.min(wish_dir.length()),
        )
    } else {
        (wish_dir, wish_speed)
    };

    let add_speed = base_speed - vel.dot(dir);
    if add_speed <= 0.0 {
        return vel;
    }

    let accel_speed = add_speed.min(config.accel_speed * dt * wish_speed);
    vel + dir * accel_speed
}

pub fn apply_friction(vel: Vec3, config: &MovementConfig, dt: f32) -> Vec3 {
    let speed = vel.length();
    if speed == 0.0 {
        return vel;
    }

    let control = speed.max(config.stop_speed);
    let new_speed = (speed - dt * control * config.friction).max(0.0);
    vel * (new_speed / speed)
}

/// Walkable when the ground normal is within `max_slope_angle` of up.
pub fn is_on_ground(
    move_type: MoveType,
    ground_normal: Option<Vec3>,
    gravity: Vec3,
    max_slope_angle: f32,
) -> bool {
    if move_type != MoveType::Walk {
        return false;
    }
    let Some(normal) = ground_normal else {
        return false;
    };

    let up = -gravity.normalize_or_zero();
    normal.dot(up) > max_slope_angle.to_radians().cos()
}

fn calc_on_ground(parts: &mut PlayerParts, config: &MovementConfig, set_flag: bool) -> bool {
    let on_ground = is_on_ground(
        parts.move_data.move_type.value(),
        parts.move_data.ground_normal,
        config.gravity_vector(),
        config.max_slope_angle,
    );
    if set_flag && on_ground {
        parts.move_data.player_flags.edit().insert(PlayerFlags::ON_GROUND);
    }
    on_ground
}

fn read_inputs(parts: &mut PlayerParts, buttons: Buttons, config: &MovementConfig) {
    parts.rigid_body.accel.set(Vec3::ZERO);
    parts
        .move_data
        .prev_player_flags
        .set(parts.move_data.player_flags.value());

    let mut flags = PlayerFlags::empty();
    let mult = if buttons.contains(Buttons::DUCK) {
        flags.insert(PlayerFlags::IN_DUCK);
        config.duck_mult
    } else if buttons.contains(Buttons::SPRINT) {
        flags.insert(PlayerFlags::IN_SPRINT);
        config.sprint_mult
    } else {
        1.0
    };
    parts.move_data.max_speed.set(config.max_speed * mult);

    let forward_speed = config.forward_speed * mult;
    let side_speed = config.side_speed * mult;

    let mut accel = Vec3::ZERO;
    if buttons.contains(Buttons::FORWARD) {
        accel.x += forward_speed;
    }
    if buttons.contains(Buttons::BACK) {
        accel.x -= forward_speed;
    }
    if buttons.contains(Buttons::LEFT) {
        accel.y -= side_speed;
    }
    if buttons.contains(Buttons::RIGHT) {
        accel.y += side_speed;
    }
    parts.rigid_body.accel.set(accel);

    if buttons.contains(Buttons::JUMP) && calc_on_ground(parts, config, false) {
        parts.rigid_body.vel.edit().z = config.jump_force;
    }

    // on ground is re-derived right after
    parts.move_data.player_flags.set(flags);
}

fn smooth_land(parts: &mut PlayerParts, was_on_ground: bool, on_ground: bool, view: &ViewConfig, dt: f32) {
    if view.land_smoothing && on_ground && !was_on_ground {
        let power = view::land_power(parts.rigid_body.vel.value().z, view);
        parts.move_data.land_power.set(power);
        parts.move_data.land_time.set(0.0);
    }

    let time = parts.move_data.land_time.value() + dt * view.land_time_scale;
    parts.move_data.land_time.set(time);
    view::apply_land_offset(parts, view);
}

fn walk_move(
    parts: &mut PlayerParts,
    body: &mut dyn PhysicsBody,
    config: &MovementConfig,
    view: &ViewConfig,
    dt: f32,
) {
    let accel = parts.rigid_body.accel.value();
    let mut wish_vel =
        parts.direction.forward.value() * accel.x + parts.direction.right.value() * accel.y;
    wish_vel.z = 0.0;

    let (wish_dir, speed) = wish_speed(&mut wish_vel, parts.move_data.max_speed.value());

    let was_on_ground = parts
        .move_data
        .prev_player_flags
        .value()
        .contains(PlayerFlags::ON_GROUND);
    let on_ground = calc_on_ground(parts, config, false);

    let mut vel = parts.rigid_body.vel.value();
    if on_ground {
        if config.friction_enabled {
            vel = apply_friction(vel, config, dt);
        }
        vel = accelerate(vel, wish_dir, speed, false, config, dt);
    } else {
        vel = accelerate(vel, wish_vel, speed, true, config, dt);
    }

    body.set_linear_velocity(vel);
    parts.rigid_body.vel.set(body.linear_velocity());

    smooth_land(parts, was_on_ground, on_ground, view, dt);
}

/// Shared by Fly and NoClip. Moves along the camera's full 3D basis.
fn fly_move(parts: &mut PlayerParts, body: &mut dyn PhysicsBody, config: &MovementConfig, dt: f32) {
    let accel = parts.rigid_body.accel.value();
    let mut wish_vel = parts.cam_direction.forward.value() * accel.x
        + parts.cam_direction.right.value() * accel.y;

    let (wish_dir, speed) = wish_speed(&mut wish_vel, parts.move_data.max_speed.value());

    let mut vel = parts.rigid_body.vel.value();
    if config.friction_enabled {
        vel = apply_friction(vel, config, dt);
    }
    vel = accelerate(vel, wish_dir, speed, false, config, dt);

    body.set_linear_velocity(vel);
    parts.rigid_body.vel.set(body.linear_velocity());
}

/// Runs one command for `player` before the physics step.
pub fn move_player(
    store: &mut EntityStore,
    player: EntityId,
    cmd: &UserCmd,
    body: &mut dyn PhysicsBody,
    config: &MovementConfig,
    view: &ViewConfig,
    dt: f32,
) -> Result<(), MovementError> {
    let mut parts = PlayerParts::load(store, player)?;
    let buttons = cmd.buttons();

    parts.rigid_body.vel.set(body.linear_velocity());

    read_inputs(&mut parts, buttons, config);
    calc_on_ground(&mut parts, config, true);
    view::smooth_duck(&mut parts, buttons.contains(Buttons::DUCK), view, dt);

    match parts.move_data.move_type.value() {
        MoveType::Walk => walk_move(&mut parts, body, config, view, dt),
        MoveType::Fly | MoveType::NoClip => fly_move(&mut parts, body, config, dt),
    }

    parts.commit(store);
    Ok(())
}

/// Contact normal most opposed to gravity, if any contact faces against it.
fn find_ground(body: &dyn PhysicsBody, config: &MovementConfig) -> Option<Vec3> {
    let gravity = config.gravity_vector();
    let mut best: Option<(f32, Vec3)> = None;

    body.check_collision(config.max_separation, &mut |contact| {
        let along = contact.normal.dot(gravity);
        if along < best.map_or(0.0, |(dot, _)| dot) {
            best = Some((along, contact.normal));
        }
    });

    best.map(|(_, normal)| normal)
}

/// Post-physics pass: copies the resolved position back and refreshes the
/// ground contact for the next tick.
pub fn update_position(
    store: &mut EntityStore,
    player: EntityId,
    body: &dyn PhysicsBody,
    config: &MovementConfig,
) -> Result<(), MovementError> {
    let mut parts = PlayerParts::load(store, player)?;
    let move_type = parts.move_data.move_type.value();

    parts
        .transform
        .pos
        .set(body.position() - Vec3::Z * config.player_offset);

    parts.move_data.ground_normal = if move_type == MoveType::NoClip {
        None
    } else {
        find_ground(body, config)
    };

    if move_type == MoveType::Walk && calc_on_ground(&mut parts, config, false) {
        parts.rigid_body.vel.edit().z = 0.0;
    }

    parts.commit(store);
    Ok(())
}

fn missing<C: Component>(entity: EntityId) -> MovementError {
    MovementError::MissingComponent {
        entity,
        component: C::NAME,
    }
}

/// Switches the movement mode together with the body's gravity and
/// collision response. Nothing is touched unless every part is present.
pub fn set_move_type(
    store: &mut EntityStore,
    player: EntityId,
    move_type: MoveType,
    body: &mut dyn PhysicsBody,
) -> Result<(), MovementError> {
    if !store.has::<PhysObject>(player) {
        return Err(missing::<PhysObject>(player));
    }
    if !store.has::<PlayerMoveData>(player) {
        return Err(missing::<PlayerMoveData>(player));
    }

    let (gravity, collision) = match move_type {
        MoveType::NoClip => (false, false),
        MoveType::Fly => (false, true),
        MoveType::Walk => (true, true),
    };

    if let Some(move_data) = store.get_mut::<PlayerMoveData>(player) {
        move_data.move_type.set(move_type);
        if move_type == MoveType::NoClip {
            move_data.ground_normal = None;
        }
    }
    if let Some(phys) = store.get_mut::<PhysObject>(player) {
        phys.gravity.set(gravity);
        phys.enable_collision.set(collision);
    }

    body.set_gravity_enabled(gravity);
    body.set_collision_enabled(collision);

    log::debug!("player {} move type {:?}", player, move_type);
    Ok(())
}

/// `noclip` and `fly` flip between the requested mode and Walk.
pub fn toggle_move_type(
    store: &mut EntityStore,
    player: EntityId,
    move_type: MoveType,
    body: &mut dyn PhysicsBody,
) -> Result<MoveType, MovementError> {
    let current = store
        .get::<PlayerMoveData>(player)
        .map(|m| m.move_type.value())
        .ok_or_else(|| missing::<PlayerMoveData>(player))?;

    let next = if current == move_type {
        MoveType::Walk
    } else {
        move_type
    };
    set_move_type(store, player, next, body)?;
    Ok(next)
}
