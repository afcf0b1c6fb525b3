use glam::{Vec3, Vec4};

use crate::entity::components::{
    Camera, Direction, Health, Light, LightType, MoveType, PhysObject, PlayerInfo,
    PlayerMoveData, PlayerSpawn, PlayerZoom, Renderable, RigidBody, Transform,
};
use crate::entity::{Color4, EntityId, EntityStore};
use crate::net::UserCmd;
use crate::netvar::NetVar;
use crate::physics::{PhysicsBody, PhysicsWorld};

use super::config::{MovementConfig, ViewConfig};
use super::movement::{move_player, set_move_type};
use super::parts::PlayerParts;
use super::view::{self, PITCH, ROLL, YAW};
use super::MovementError;

pub const PLAYER_MODEL: &str = "models/player.glb";

fn flashlight(view: &ViewConfig) -> Light {
    Light {
        light_type: NetVar::new(LightType::Cone),
        color: NetVar::new(Color4::new(1.0, 1.0, 1.0, view.flashlight_brightness)),
        inner_fov: NetVar::new(0.0),
        outer_fov: NetVar::new(45.0),
        enabled: NetVar::new(false),
        use_transform: NetVar::new(false),
        ..Light::default()
    }
}

fn attach_player(
    store: &mut EntityStore,
    player: EntityId,
    camera: EntityId,
    physics: &mut PhysicsWorld,
    config: &MovementConfig,
    view: &ViewConfig,
) -> Result<(), MovementError> {
    store.add::<PlayerMoveData>(player)?;
    store.add::<RigidBody>(player)?;
    store.add::<Direction>(player)?;
    store.insert(
        player,
        Renderable {
            path: NetVar::new(PLAYER_MODEL.to_string()),
            ..Renderable::default()
        },
    )?;
    store.insert(player, flashlight(view))?;
    store.insert(
        player,
        PlayerZoom {
            orig_fov: NetVar::new(view.fov),
            new_fov: NetVar::new(view.fov),
            was_zoomed: NetVar::new(false),
        },
    )?;
    store.add::<Transform>(player)?;
    store.add::<Health>(player)?;

    let body = physics.add_player(
        Vec3::Z * config.player_offset,
        config.player_radius,
        config.capsule_half_height(),
        config.player_mass,
        config.player_friction,
    );
    store.insert(
        player,
        PhysObject {
            body: Some(body),
            ..PhysObject::default()
        },
    )?;

    store.add::<Transform>(camera)?;
    store.add::<Direction>(camera)?;
    store.insert(
        camera,
        Camera {
            fov: NetVar::new(view.fov),
        },
    )?;

    store.insert(
        player,
        PlayerInfo {
            camera: NetVar::new(camera),
            // the player entity carries its own flashlight
            flashlight: NetVar::new(player),
        },
    )?;
    Ok(())
}

/// Creates a player entity, its camera entity and its physics capsule. The
/// player is not placed in the world until [`spawn`].
pub fn create_player(
    store: &mut EntityStore,
    physics: &mut PhysicsWorld,
    config: &MovementConfig,
    view: &ViewConfig,
) -> Result<EntityId, MovementError> {
    let player = store.create_entity();
    let camera = store.create_entity();

    if let Err(e) = attach_player(store, player, camera, physics, config, view) {
        remove_player(store, physics, player);
        store.delete_entity(camera);
        return Err(e);
    }

    log::info!("Created player {} with camera {}", player, camera);
    Ok(player)
}

/// Deletes the player, its camera and its physics body.
pub fn remove_player(store: &mut EntityStore, physics: &mut PhysicsWorld, player: EntityId) -> bool {
    if let Some(handle) = store.get::<PhysObject>(player).and_then(|p| p.body) {
        physics.remove_body(handle);
    }
    if let Some(camera) = store.get::<PlayerInfo>(player).map(|i| i.camera.value()) {
        if camera.is_some() && camera != player {
            store.delete_entity(camera);
        }
    }
    store.delete_entity(player)
}

/// Puts a created player into Walk mode and at a spawn point.
pub fn spawn(
    store: &mut EntityStore,
    player: EntityId,
    body: &mut dyn PhysicsBody,
    config: &MovementConfig,
    view: &ViewConfig,
) -> Result<(), MovementError> {
    set_move_type(store, player, MoveType::Walk, body)?;

    let mut parts = PlayerParts::load(store, player)?;
    parts.cam_transform.pos.set(Vec3::Z * view.view_height);
    parts.commit(store);

    respawn(store, player, body, config, view)
}

/// Position and yaw of the spawn point assigned to `player`. Players are
/// spread over the spawn points by id; with no spawn points it is the
/// origin.
fn spawn_point(store: &EntityStore, player: EntityId) -> (Vec3, f32) {
    let Ok(ty) = store.type_of::<PlayerSpawn>() else {
        return (Vec3::ZERO, 0.0);
    };

    let mut spots: Vec<EntityId> = store
        .entities_with(ty)
        .filter(|e| store.has::<Transform>(*e))
        .collect();
    if spots.is_empty() {
        return (Vec3::ZERO, 0.0);
    }
    spots.sort();

    let spot = spots[player.raw() as usize % spots.len()];
    store
        .get::<Transform>(spot)
        .map(|t| (t.pos.value(), t.ang.value()[YAW]))
        .unwrap_or((Vec3::ZERO, 0.0))
}

pub fn respawn(
    store: &mut EntityStore,
    player: EntityId,
    body: &mut dyn PhysicsBody,
    config: &MovementConfig,
    view: &ViewConfig,
) -> Result<(), MovementError> {
    let (pos, yaw) = spawn_point(store, player);
    let angles = Vec3::new(0.0, yaw, 0.0);

    let mut parts = PlayerParts::load(store, player)?;

    parts.transform.pos.set(pos);
    parts.transform.ang.set(angles);
    parts.rigid_body.vel.set(Vec3::ZERO);
    parts.rigid_body.accel.set(Vec3::ZERO);
    parts.cam_transform.ang.set(angles);

    let mv = &mut parts.move_data;
    mv.prev_view_height.set(view.view_height);
    mv.target_view_height.set(view.view_height);
    mv.out_view_height.set(view.view_height);
    mv.duck_duration.set(0.0);
    mv.duck_time.set(0.0);
    mv.land_power.set(0.0);
    mv.ground_normal = None;

    view::update_directions(&mut parts);
    parts.commit(store);

    if let Some(zoom) = store.get_mut::<PlayerZoom>(player) {
        zoom.orig_fov.set(view.fov);
        zoom.new_fov.set(view.fov);
    }

    body.set_linear_velocity(Vec3::ZERO);
    body.set_position(pos + Vec3::Z * config.player_offset);

    log::info!("Player {} spawned at {}", player, pos);
    Ok(())
}

pub fn reset_velocity(
    store: &mut EntityStore,
    player: EntityId,
    body: &mut dyn PhysicsBody,
) -> Result<(), MovementError> {
    let rigid_body = store
        .get_mut::<RigidBody>(player)
        .ok_or(MovementError::MissingComponent {
            entity: player,
            component: "rigidBody",
        })?;
    rigid_body.vel.set(Vec3::ZERO);
    body.set_linear_velocity(Vec3::ZERO);
    Ok(())
}

fn flashlight_entity(store: &EntityStore, player: EntityId) -> Result<EntityId, MovementError> {
    store
        .get::<PlayerInfo>(player)
        .map(|info| info.flashlight.value())
        .filter(|e| e.is_some())
        .ok_or(MovementError::MissingComponent {
            entity: player,
            component: "playerInfo",
        })
}

/// Flips the player's flashlight and returns the new state.
pub fn toggle_flashlight(store: &mut EntityStore, player: EntityId) -> Result<bool, MovementError> {
    let entity = flashlight_entity(store, player)?;
    let light = store
        .get_mut::<Light>(entity)
        .ok_or(MovementError::MissingComponent {
            entity,
            component: "light",
        })?;

    let enabled = !light.enabled.value();
    light.enabled.set(enabled);
    Ok(enabled)
}

/// Handles the toggle edge and keeps a lit flashlight aimed along the view.
pub fn update_flashlight(
    store: &mut EntityStore,
    player: EntityId,
    toggle: bool,
    view: &ViewConfig,
) -> Result<(), MovementError> {
    if toggle {
        toggle_flashlight(store, player)?;
    }

    let entity = flashlight_entity(store, player)?;
    let enabled = store
        .get::<Light>(entity)
        .map(|l| l.enabled.value())
        .unwrap_or(false);
    if !enabled {
        return Ok(());
    }

    let parts = PlayerParts::load(store, player)?;
    let cam = parts.cam_transform.ang.value();
    let ang = Vec3::new(cam[ROLL], -cam[PITCH] + 90.0, -cam[YAW] - 90.0);
    let pos = parts.transform.pos.value()
        + parts.cam_transform.pos.value()
        + view.flashlight_offset * parts.cam_direction.up.value();

    if let Some(light) = store.get_mut::<Light>(entity) {
        light.color.set(Color4(Vec4::new(1.0, 1.0, 1.0, view.flashlight_brightness)));
        light.ang.set(ang);
        light.pos.set(pos);
    }
    Ok(())
}

/// One server tick for one player: view angles from the command, movement,
/// then the flashlight.
pub fn update_player(
    store: &mut EntityStore,
    player: EntityId,
    cmd: &UserCmd,
    body: &mut dyn PhysicsBody,
    config: &MovementConfig,
    view: &ViewConfig,
    dt: f32,
) -> Result<(), MovementError> {
    let mut parts = PlayerParts::load(store, player)?;
    let angles = view::clamp_view_angles(cmd.angles());
    parts.cam_transform.ang.set(angles);
    parts.transform.ang.set(Vec3::new(0.0, angles[YAW], 0.0));
    view::update_directions(&mut parts);
    parts.commit(store);

    move_player(store, player, cmd, body, config, view, dt)?;
    update_flashlight(store, player, cmd.flashlight, view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Buttons;
    use crate::player::test_support::{test_store, MockBody};

    fn setup() -> (EntityStore, PhysicsWorld, EntityId) {
        let mut store = test_store();
        let config = MovementConfig::default();
        let mut physics = PhysicsWorld::new(config.gravity);
        let player = create_player(&mut store, &mut physics, &config, &ViewConfig::default()).unwrap();
        (store, physics, player)
    }

    #[test]
    fn created_player_is_complete() {
        let (store, physics, player) = setup();

        assert_eq!(physics.body_count(), 1);
        assert_eq!(store.get::<Health>(player).unwrap().health.value(), 100);
        assert_eq!(store.get::<Renderable>(player).unwrap().path.get(), PLAYER_MODEL);

        let light = store.get::<Light>(player).unwrap();
        assert_eq!(light.light_type.value(), LightType::Cone);
        assert!(!light.enabled.value());
        assert_eq!(light.outer_fov.value(), 45.0);
        assert_eq!(light.color.value(), Color4::new(1.0, 1.0, 1.0, 10.0));

        let info = store.get::<PlayerInfo>(player).unwrap();
        assert_eq!(info.flashlight.value(), player);
        let camera = info.camera.value();
        assert_eq!(store.get::<Camera>(camera).unwrap().fov.value(), 106.0);
        assert!(store.has::<Transform>(camera));
    }

    #[test]
    fn spawn_uses_spawn_points() {
        let (mut store, _physics, player) = setup();
        let spot = store.create_entity();
        store.add::<PlayerSpawn>(spot).unwrap();
        let transform = store.add::<Transform>(spot).unwrap();
        transform.pos.set(Vec3::new(100.0, -50.0, 8.0));
        transform.ang.set(Vec3::new(0.0, 90.0, 0.0));

        let mut body = MockBody::default();
        spawn(&mut store, player, &mut body, &MovementConfig::default(), &ViewConfig::default())
            .unwrap();

        let transform = store.get::<Transform>(player).unwrap();
        assert_eq!(transform.pos.value(), Vec3::new(100.0, -50.0, 8.0));
        assert_eq!(transform.ang.value(), Vec3::new(0.0, 90.0, 0.0));
        assert_eq!(body.position, Vec3::new(100.0, -50.0, 48.0));
        assert_eq!(body.velocity, Vec3::ZERO);

        let move_data = store.get::<PlayerMoveData>(player).unwrap();
        assert_eq!(move_data.move_type.value(), MoveType::Walk);
        assert_eq!(move_data.out_view_height.value(), 67.0);
    }

    #[test]
    fn spawn_without_points_uses_origin() {
        let (mut store, _physics, player) = setup();
        let mut body = MockBody {
            velocity: Vec3::new(5.0, 5.0, 5.0),
            ..MockBody::default()
        };
        spawn(&mut store, player, &mut body, &MovementConfig::default(), &ViewConfig::default())
            .unwrap();
        assert_eq!(store.get::<Transform>(player).unwrap().pos.value(), Vec3::ZERO);
        assert_eq!(body.velocity, Vec3::ZERO);

        let camera = store.get::<PlayerInfo>(player).unwrap().camera.value();
        assert_eq!(store.get::<Transform>(camera).unwrap().pos.value().z, 67.0);
    }

    #[test]
    fn flashlight_toggles_on_edge() {
        let (mut store, _physics, player) = setup();
        let view = ViewConfig::default();

        update_flashlight(&mut store, player, true, &view).unwrap();
        let light = store.get::<Light>(player).unwrap();
        assert!(light.enabled.value());
        assert_eq!(light.ang.value(), Vec3::new(0.0, 90.0, -90.0));

        update_flashlight(&mut store, player, false, &view).unwrap();
        assert!(store.get::<Light>(player).unwrap().enabled.value());

        assert!(!toggle_flashlight(&mut store, player).unwrap());
    }

    #[test]
    fn update_player_applies_view_angles() {
        let (mut store, _physics, player) = setup();
        let config = MovementConfig::default();
        let view = ViewConfig::default();
        let mut body = MockBody::default();
        spawn(&mut store, player, &mut body, &config, &view).unwrap();

        let cmd = UserCmd::new(Vec3::new(130.0, 450.0, 0.0), Buttons::empty(), false);
        update_player(&mut store, player, &cmd, &mut body, &config, &view, 0.016).unwrap();

        assert_eq!(store.get::<Transform>(player).unwrap().ang.value(), Vec3::new(0.0, 90.0, 0.0));
        let forward = store.get::<Direction>(player).unwrap().forward.value();
        assert!((forward - Vec3::Y).length() < 1e-5);

        let camera = store.get::<PlayerInfo>(player).unwrap().camera.value();
        let cam = store.get::<Transform>(camera).unwrap().ang.value();
        assert_eq!(cam, Vec3::new(90.0, 90.0, 0.0));
    }

    #[test]
    fn reset_and_remove() {
        let (mut store, mut physics, player) = setup();
        let mut body = MockBody {
            velocity: Vec3::X * 300.0,
            ..MockBody::default()
        };
        store.get_mut::<RigidBody>(player).unwrap().vel.set(Vec3::X * 300.0);

        reset_velocity(&mut store, player, &mut body).unwrap();
        assert_eq!(body.velocity, Vec3::ZERO);
        assert_eq!(store.get::<RigidBody>(player).unwrap().vel.value(), Vec3::ZERO);

        let camera = store.get::<PlayerInfo>(player).unwrap().camera.value();
        assert!(remove_player(&mut store, &mut physics, player));
        assert!(!store.is_alive(player));
        assert!(!store.is_alive(camera));
        assert_eq!(physics.body_count(), 0);
    }
}
