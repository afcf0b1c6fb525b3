pub mod components;
pub mod light;
pub mod registry;
pub mod store;
pub mod system;

use std::any::Any;
use std::fmt;

use glam::Vec4;
use serde::{Deserialize, Serialize};

pub use components::register_base_components;
pub use light::{LightInstance, LightSystem};
pub use registry::{
    ComponentData, ComponentFlags, ComponentRegistry, ComponentTypeDescriptor, ComponentTypeId,
    FieldDescriptor, FieldValue, NetFieldType, NetType, NetValue, RegistryError,
};
pub use store::{EntityStore, StoreError};
pub use system::ComponentSystem;

/// Opaque entity handle. Zero is never handed out and means "no entity".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct EntityId(u32);

impl EntityId {
    pub const NONE: EntityId = EntityId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_some(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process role. Selects which component systems a store runs and which
/// component types may live in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Server,
    Client,
}

/// A registered component struct. `NAME` is the key used on the wire and in
/// the registry.
pub trait Component: Any + Send {
    const NAME: &'static str;
}

/// RGBA color, alpha doubling as intensity for lights.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color4(pub Vec4);

impl Color4 {
    pub const WHITE: Color4 = Color4(Vec4::ONE);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self(Vec4::new(r, g, b, a))
    }
}
