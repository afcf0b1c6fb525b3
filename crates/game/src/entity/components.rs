//! Component types shared by server and client.

use bitflags::bitflags;
use glam::Vec3;

use crate::net_field;
use crate::netvar::NetVar;
use crate::physics::BodyHandle;

use super::light::LightSystem;
use super::registry::{
    ComponentFlags, ComponentRegistry, FieldValue, NetFieldType, NetType, NetValue, RegistryError,
};
use super::{Color4, Component, EntityId, Side};

#[derive(Debug, Clone)]
pub struct Transform {
    pub pos: NetVar<Vec3>,
    pub ang: NetVar<Vec3>,
    pub scale: NetVar<Vec3>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            pos: NetVar::default(),
            ang: NetVar::default(),
            scale: NetVar::new(Vec3::ONE),
        }
    }
}

impl Component for Transform {
    const NAME: &'static str = "transform";
}

#[derive(Debug, Clone, Default)]
pub struct RigidBody {
    pub vel: NetVar<Vec3>,
    pub accel: NetVar<Vec3>,
}

impl Component for RigidBody {
    const NAME: &'static str = "rigidBody";
}

/// Basis vectors derived from an entity's angles. Z is up.
#[derive(Debug, Clone)]
pub struct Direction {
    pub forward: NetVar<Vec3>,
    pub up: NetVar<Vec3>,
    pub right: NetVar<Vec3>,
}

impl Default for Direction {
    fn default() -> Self {
        Self {
            forward: NetVar::new(Vec3::X),
            up: NetVar::new(Vec3::Z),
            right: NetVar::new(Vec3::Y),
        }
    }
}

impl Component for Direction {
    const NAME: &'static str = "direction";
}

#[derive(Debug, Clone)]
pub struct Renderable {
    pub path: NetVar<String>,
    pub test_vis: NetVar<bool>,
    pub cast_shadow: NetVar<bool>,
    pub visible: NetVar<bool>,
}

impl Default for Renderable {
    fn default() -> Self {
        Self {
            path: NetVar::default(),
            test_vis: NetVar::new(true),
            cast_shadow: NetVar::new(true),
            visible: NetVar::new(true),
        }
    }
}

impl Component for Renderable {
    const NAME: &'static str = "renderable";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum LightType {
    Directional = 0,
    #[default]
    Point = 1,
    Cone = 2,
    Capsule = 3,
}

impl NetValue for LightType {
    const FIELD_TYPE: NetFieldType = NetFieldType::S32;

    fn to_field(&self) -> FieldValue {
        FieldValue::S32(*self as i32)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::S32(0) => Some(LightType::Directional),
            FieldValue::S32(1) => Some(LightType::Point),
            FieldValue::S32(2) => Some(LightType::Cone),
            FieldValue::S32(3) => Some(LightType::Capsule),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Light {
    pub light_type: NetVar<LightType>,
    pub color: NetVar<Color4>,
    pub pos: NetVar<Vec3>,
    pub ang: NetVar<Vec3>,
    pub inner_fov: NetVar<f32>,
    pub outer_fov: NetVar<f32>,
    pub radius: NetVar<f32>,
    pub length: NetVar<f32>,
    pub shadow: NetVar<bool>,
    pub enabled: NetVar<bool>,
    pub use_transform: NetVar<bool>,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            light_type: NetVar::default(),
            color: NetVar::new(Color4::WHITE),
            pos: NetVar::default(),
            ang: NetVar::default(),
            inner_fov: NetVar::new(45.0),
            outer_fov: NetVar::new(45.0),
            radius: NetVar::new(1.0),
            length: NetVar::default(),
            shadow: NetVar::new(true),
            enabled: NetVar::new(true),
            use_transform: NetVar::new(true),
        }
    }
}

impl Component for Light {
    const NAME: &'static str = "light";
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub fov: NetVar<f32>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov: NetVar::new(90.0),
        }
    }
}

impl Component for Camera {
    const NAME: &'static str = "camera";
}

#[derive(Debug, Clone, Default)]
pub struct Map;

impl Component for Map {
    const NAME: &'static str = "map";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum MoveType {
    NoClip = 0,
    Fly = 1,
    #[default]
    Walk = 2,
}

impl NetValue for MoveType {
    const FIELD_TYPE: NetFieldType = NetFieldType::S32;

    fn to_field(&self) -> FieldValue {
        FieldValue::S32(*self as i32)
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::S32(0) => Some(MoveType::NoClip),
            FieldValue::S32(1) => Some(MoveType::Fly),
            FieldValue::S32(2) => Some(MoveType::Walk),
            _ => None,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlayerFlags: u8 {
        const IN_SPRINT = 1 << 0;
        const IN_DUCK = 1 << 1;
        const ON_GROUND = 1 << 2;
    }
}

impl NetValue for PlayerFlags {
    const FIELD_TYPE: NetFieldType = NetFieldType::U8;

    fn to_field(&self) -> FieldValue {
        FieldValue::U8(self.bits())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::U8(bits) => Some(PlayerFlags::from_bits_truncate(*bits)),
            _ => None,
        }
    }
}

/// Movement and camera smoothing state of a player.
#[derive(Debug, Clone, Default)]
pub struct PlayerMoveData {
    pub move_type: NetVar<MoveType>,
    pub player_flags: NetVar<PlayerFlags>,
    pub prev_player_flags: NetVar<PlayerFlags>,
    pub max_speed: NetVar<f32>,

    /// Normal of the contact most opposed to gravity, from the last
    /// collision check. Local to the simulating side.
    pub ground_normal: Option<Vec3>,

    // view bob and tilt
    pub walk_time: f32,
    pub bob_offset_amount: NetVar<f32>,
    pub prev_view_tilt: NetVar<f32>,

    // landing
    pub land_power: NetVar<f32>,
    pub land_time: NetVar<f32>,

    // smooth duck
    pub prev_view_height: NetVar<f32>,
    pub target_view_height: NetVar<f32>,
    pub out_view_height: NetVar<f32>,
    pub duck_duration: NetVar<f32>,
    pub duck_time: NetVar<f32>,

    pub last_step_time: NetVar<f32>,
}

impl Component for PlayerMoveData {
    const NAME: &'static str = "playerMoveData";
}

#[derive(Debug, Clone, Default)]
pub struct PlayerInfo {
    pub camera: NetVar<EntityId>,
    pub flashlight: NetVar<EntityId>,
}

impl Component for PlayerInfo {
    const NAME: &'static str = "playerInfo";
}

#[derive(Debug, Clone, Default)]
pub struct PlayerZoom {
    pub orig_fov: NetVar<f32>,
    pub new_fov: NetVar<f32>,
    pub was_zoomed: NetVar<bool>,
}

impl Component for PlayerZoom {
    const NAME: &'static str = "playerZoom";
}

/// Link between an entity and its physics body. The handle itself is
/// meaningful only on the side that owns the physics world.
#[derive(Debug, Clone)]
pub struct PhysObject {
    pub gravity: NetVar<bool>,
    pub enable_collision: NetVar<bool>,
    pub body: Option<BodyHandle>,
}

impl Default for PhysObject {
    fn default() -> Self {
        Self {
            gravity: NetVar::new(true),
            enable_collision: NetVar::new(true),
            body: None,
        }
    }
}

impl Component for PhysObject {
    const NAME: &'static str = "physObject";
}

#[derive(Debug, Clone)]
pub struct Health {
    pub health: NetVar<i32>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            health: NetVar::new(100),
        }
    }
}

impl Component for Health {
    const NAME: &'static str = "health";
}

#[derive(Debug, Clone, Default)]
pub struct PlayerSpawn;

impl Component for PlayerSpawn {
    const NAME: &'static str = "playerSpawn";
}

/// Registers every component type above, with its fields and systems.
pub fn register_base_components(registry: &mut ComponentRegistry) -> Result<(), RegistryError> {
    let ty = registry.register::<Transform>(NetType::Both, true)?;
    registry.register_field(ty, net_field!(Transform, pos, "pos"))?;
    registry.register_field(ty, net_field!(Transform, ang, "ang"))?;
    registry.register_field(ty, net_field!(Transform, scale, "scale"))?;

    let ty = registry.register::<RigidBody>(NetType::Both, true)?;
    registry.register_field(ty, net_field!(RigidBody, vel, "vel"))?;
    registry.register_field(ty, net_field!(RigidBody, accel, "accel"))?;

    let ty = registry.register::<Direction>(NetType::Both, true)?;
    registry.register_field(ty, net_field!(Direction, forward, "forward"))?;
    registry.register_field(ty, net_field!(Direction, up, "up"))?;
    registry.register_field(ty, net_field!(Direction, right, "right"))?;

    let ty = registry.register::<Renderable>(NetType::Both, true)?;
    registry.register_field(ty, net_field!(Renderable, path, "path"))?;
    registry.register_field(ty, net_field!(Renderable, test_vis, "testVis"))?;
    registry.register_field(ty, net_field!(Renderable, cast_shadow, "castShadow"))?;
    registry.register_field(ty, net_field!(Renderable, visible, "visible"))?;

    let ty = registry.register::<Light>(NetType::Both, true)?;
    registry.register_field(ty, net_field!(Light, light_type, "type"))?;
    registry.register_field(ty, net_field!(Light, color, "color"))?;
    registry.register_field(ty, net_field!(Light, pos, "pos"))?;
    registry.register_field(ty, net_field!(Light, ang, "ang"))?;
    registry.register_field(ty, net_field!(Light, inner_fov, "innerFov"))?;
    registry.register_field(ty, net_field!(Light, outer_fov, "outerFov"))?;
    registry.register_field(ty, net_field!(Light, radius, "radius"))?;
    registry.register_field(ty, net_field!(Light, length, "length"))?;
    registry.register_field(ty, net_field!(Light, shadow, "shadow"))?;
    registry.register_field(ty, net_field!(Light, enabled, "enabled"))?;
    registry.register_field(ty, net_field!(Light, use_transform, "useTransform"))?;
    registry.register_system(ty, Side::Client, || Box::new(LightSystem::default()))?;

    // the client drives its own fov
    let ty = registry.register::<Camera>(NetType::Both, false)?;
    registry.register_field(ty, net_field!(Camera, fov, "fov"))?;
    registry.set_flags(ty, ComponentFlags::DONT_OVERRIDE_CLIENT)?;

    registry.register::<Map>(NetType::Both, false)?;

    let ty = registry.register::<PlayerMoveData>(NetType::Both, false)?;
    registry.register_field(ty, net_field!(PlayerMoveData, move_type, "moveType"))?;
    registry.register_field(ty, net_field!(PlayerMoveData, player_flags, "playerFlags"))?;
    registry.register_field(
        ty,
        net_field!(PlayerMoveData, prev_player_flags, "prevPlayerFlags"),
    )?;
    registry.register_field(ty, net_field!(PlayerMoveData, max_speed, "maxSpeed"))?;
    registry.register_field(
        ty,
        net_field!(PlayerMoveData, bob_offset_amount, "bobOffsetAmount"),
    )?;
    registry.register_field(ty, net_field!(PlayerMoveData, prev_view_tilt, "prevViewTilt"))?;
    registry.register_field(ty, net_field!(PlayerMoveData, land_power, "landPower"))?;
    registry.register_field(ty, net_field!(PlayerMoveData, land_time, "landTime"))?;
    registry.register_field(
        ty,
        net_field!(PlayerMoveData, prev_view_height, "prevViewHeight"),
    )?;
    registry.register_field(
        ty,
        net_field!(PlayerMoveData, target_view_height, "targetViewHeight"),
    )?;
    registry.register_field(
        ty,
        net_field!(PlayerMoveData, out_view_height, "outViewHeight"),
    )?;
    registry.register_field(ty, net_field!(PlayerMoveData, duck_duration, "duckDuration"))?;
    registry.register_field(ty, net_field!(PlayerMoveData, duck_time, "duckTime"))?;
    registry.register_field(ty, net_field!(PlayerMoveData, last_step_time, "lastStepTime"))?;

    let ty = registry.register::<PlayerInfo>(NetType::Both, false)?;
    registry.register_field(ty, net_field!(PlayerInfo, camera, "camera"))?;
    registry.register_field(ty, net_field!(PlayerInfo, flashlight, "flashlight"))?;

    let ty = registry.register::<PlayerZoom>(NetType::Both, false)?;
    registry.register_field(ty, net_field!(PlayerZoom, orig_fov, "origFov"))?;
    registry.register_field(ty, net_field!(PlayerZoom, new_fov, "newFov"))?;
    registry.register_field(ty, net_field!(PlayerZoom, was_zoomed, "wasZoomed"))?;
    registry.set_flags(ty, ComponentFlags::DONT_OVERRIDE_CLIENT)?;

    let ty = registry.register::<PhysObject>(NetType::Both, false)?;
    registry.register_field(ty, net_field!(PhysObject, gravity, "gravity"))?;
    registry.register_field(ty, net_field!(PhysObject, enable_collision, "enableCollision"))?;

    let ty = registry.register::<Health>(NetType::Both, false)?;
    registry.register_field(ty, net_field!(Health, health, "health"))?;

    registry.register::<PlayerSpawn>(NetType::ServerOnly, true)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        register_base_components(&mut registry).unwrap();
        registry
    }

    #[test]
    fn registers_once() {
        let mut registry = registry();
        assert!(matches!(
            register_base_components(&mut registry),
            Err(RegistryError::DuplicateName(name)) if name == "transform"
        ));
    }

    #[test]
    fn transform_factory_scales_to_one() {
        let registry = registry();
        let desc = registry.by_name("transform").unwrap();
        let data = desc.create();
        let transform = data.downcast_ref::<Transform>().unwrap();
        assert_eq!(transform.scale.value(), Vec3::ONE);
        assert!(!transform.scale.is_dirty());
    }

    #[test]
    fn light_fields_and_system() {
        let registry = registry();
        let desc = registry.by_name("light").unwrap();
        let enabled = desc.field(desc.field_index("enabled").unwrap()).unwrap();
        assert_eq!(enabled.field_type(), NetFieldType::Bool);
        assert_eq!(desc.fields().len(), 11);
        assert!(desc.has_system(Side::Client));
        assert!(!desc.has_system(Side::Server));
    }

    #[test]
    fn client_owned_components() {
        let registry = registry();
        for name in ["camera", "playerZoom"] {
            let flags = registry.by_name(name).unwrap().flags();
            assert!(flags.contains(ComponentFlags::DONT_OVERRIDE_CLIENT), "{name}");
        }
        assert_eq!(
            registry.by_name("playerSpawn").unwrap().net_type(),
            NetType::ServerOnly
        );
    }

    #[test]
    fn enum_fields_reject_out_of_range() {
        assert_eq!(MoveType::from_field(&FieldValue::S32(1)), Some(MoveType::Fly));
        assert_eq!(MoveType::from_field(&FieldValue::S32(7)), None);
        assert_eq!(LightType::from_field(&FieldValue::U8(2)), None);
        assert_eq!(
            PlayerFlags::from_field(&FieldValue::U8(0b101)),
            Some(PlayerFlags::IN_SPRINT | PlayerFlags::ON_GROUND)
        );
    }
}
