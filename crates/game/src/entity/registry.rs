use std::any::Any;
use std::collections::HashMap;

use bitflags::bitflags;
use glam::{Vec2, Vec3, Vec4};
use rkyv::{Archive, Deserialize, Serialize};

use crate::netvar::NetVar;

use super::system::ComponentSystem;
use super::{Color4, Component, EntityId, Side};

/// Type-erased storage for one component instance.
pub type ComponentData = dyn Any + Send;

type FactoryFn = Box<dyn Fn() -> Box<ComponentData> + Send + Sync>;
type DestructorFn = Box<dyn Fn(Box<ComponentData>) + Send + Sync>;
type SystemFactory = Box<dyn Fn() -> Box<dyn ComponentSystem> + Send + Sync>;
type ReadFn = Box<dyn Fn(&ComponentData) -> Option<(FieldValue, bool)> + Send + Sync>;
type WriteFn = Box<dyn Fn(&mut ComponentData, &FieldValue) -> bool + Send + Sync>;
type ClearFn = Box<dyn Fn(&mut ComponentData) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where instances of a component type live and whether they cross the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NetType {
    /// Exists on both sides, never replicated.
    None,
    ServerOnly,
    ClientOnly,
    Both,
}

impl NetType {
    pub fn exists_on(self, side: Side) -> bool {
        match self {
            NetType::None | NetType::Both => true,
            NetType::ServerOnly => side == Side::Server,
            NetType::ClientOnly => side == Side::Client,
        }
    }

    pub fn is_replicated(self) -> bool {
        self == NetType::Both
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ComponentFlags: u8 {
        /// Incoming updates never overwrite the client's copy.
        const DONT_OVERRIDE_CLIENT = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NetFieldType {
    Bool,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    Float,
    Double,
    String,
    Vec2,
    Vec3,
    Vec4,
    Color4,
    Entity,
}

/// One field value on the wire, tagged by its [`NetFieldType`].
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum FieldValue {
    Bool(bool),
    S8(i8),
    S16(i16),
    S32(i32),
    S64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Float(f32),
    Double(f64),
    String(String),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Color4([f32; 4]),
    Entity(u32),
}

impl FieldValue {
    pub fn field_type(&self) -> NetFieldType {
        match self {
            FieldValue::Bool(_) => NetFieldType::Bool,
            FieldValue::S8(_) => NetFieldType::S8,
            FieldValue::S16(_) => NetFieldType::S16,
            FieldValue::S32(_) => NetFieldType::S32,
            FieldValue::S64(_) => NetFieldType::S64,
            FieldValue::U8(_) => NetFieldType::U8,
            FieldValue::U16(_) => NetFieldType::U16,
            FieldValue::U32(_) => NetFieldType::U32,
            FieldValue::U64(_) => NetFieldType::U64,
            FieldValue::Float(_) => NetFieldType::Float,
            FieldValue::Double(_) => NetFieldType::Double,
            FieldValue::String(_) => NetFieldType::String,
            FieldValue::Vec2(_) => NetFieldType::Vec2,
            FieldValue::Vec3(_) => NetFieldType::Vec3,
            FieldValue::Vec4(_) => NetFieldType::Vec4,
            FieldValue::Color4(_) => NetFieldType::Color4,
            FieldValue::Entity(_) => NetFieldType::Entity,
        }
    }
}

/// A value type that can sit inside a replicated [`NetVar`].
pub trait NetValue: Clone + PartialEq + Send + 'static {
    const FIELD_TYPE: NetFieldType;

    fn to_field(&self) -> FieldValue;
    fn from_field(value: &FieldValue) -> Option<Self>;
}

macro_rules! net_value_copy {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl NetValue for $ty {
                const FIELD_TYPE: NetFieldType = NetFieldType::$variant;

                fn to_field(&self) -> FieldValue {
                    FieldValue::$variant(*self)
                }

                fn from_field(value: &FieldValue) -> Option<Self> {
                    match value {
                        FieldValue::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

net_value_copy! {
    bool => Bool,
    i8 => S8,
    i16 => S16,
    i32 => S32,
    i64 => S64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => Float,
    f64 => Double,
}

impl NetValue for String {
    const FIELD_TYPE: NetFieldType = NetFieldType::String;

    fn to_field(&self) -> FieldValue {
        FieldValue::String(self.clone())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl NetValue for Vec2 {
    const FIELD_TYPE: NetFieldType = NetFieldType::Vec2;

    fn to_field(&self) -> FieldValue {
        FieldValue::Vec2(self.to_array())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Vec2(v) => Some(Vec2::from_array(*v)),
            _ => None,
        }
    }
}

impl NetValue for Vec3 {
    const FIELD_TYPE: NetFieldType = NetFieldType::Vec3;

    fn to_field(&self) -> FieldValue {
        FieldValue::Vec3(self.to_array())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Vec3(v) => Some(Vec3::from_array(*v)),
            _ => None,
        }
    }
}

impl NetValue for Vec4 {
    const FIELD_TYPE: NetFieldType = NetFieldType::Vec4;

    fn to_field(&self) -> FieldValue {
        FieldValue::Vec4(self.to_array())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Vec4(v) => Some(Vec4::from_array(*v)),
            _ => None,
        }
    }
}

impl NetValue for Color4 {
    const FIELD_TYPE: NetFieldType = NetFieldType::Color4;

    fn to_field(&self) -> FieldValue {
        FieldValue::Color4(self.0.to_array())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Color4(v) => Some(Color4(Vec4::from_array(*v))),
            _ => None,
        }
    }
}

impl NetValue for EntityId {
    const FIELD_TYPE: NetFieldType = NetFieldType::Entity;

    fn to_field(&self) -> FieldValue {
        FieldValue::Entity(self.raw())
    }

    fn from_field(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::Entity(id) => Some(EntityId::new(*id)),
            _ => None,
        }
    }
}

/// Name and typed accessors for one field of a component.
///
/// Accessors are closures over the concrete component type, so the codec can
/// read and write fields by index without knowing the struct layout.
pub struct FieldDescriptor {
    name: String,
    field_type: NetFieldType,
    replicate: bool,
    read: ReadFn,
    write: WriteFn,
    clear: ClearFn,
}

impl FieldDescriptor {
    pub fn new<C, T>(
        name: &str,
        replicate: bool,
        get: fn(&C) -> &NetVar<T>,
        get_mut: fn(&mut C) -> &mut NetVar<T>,
    ) -> Self
    where
        C: Any + Send,
        T: NetValue,
    {
        Self {
            name: name.to_string(),
            field_type: T::FIELD_TYPE,
            replicate,
            read: Box::new(move |data| {
                data.downcast_ref::<C>().map(|component| {
                    let var = get(component);
                    (var.get().to_field(), var.is_dirty())
                })
            }),
            write: Box::new(move |data, value| {
                let Some(component) = data.downcast_mut::<C>() else {
                    return false;
                };
                let Some(value) = T::from_field(value) else {
                    return false;
                };
                get_mut(component).apply_remote(value);
                true
            }),
            clear: Box::new(move |data| {
                if let Some(component) = data.downcast_mut::<C>() {
                    get_mut(component).clear_dirty();
                }
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> NetFieldType {
        self.field_type
    }

    pub fn replicate(&self) -> bool {
        self.replicate
    }

    pub fn read(&self, data: &ComponentData) -> Option<FieldValue> {
        (self.read)(data).map(|(value, _)| value)
    }

    pub fn is_dirty(&self, data: &ComponentData) -> bool {
        (self.read)(data).is_some_and(|(_, dirty)| dirty)
    }

    /// Returns false on a type mismatch, leaving the component untouched.
    pub fn write(&self, data: &mut ComponentData, value: &FieldValue) -> bool {
        if value.field_type() != self.field_type {
            return false;
        }
        (self.write)(data, value)
    }

    pub fn clear_dirty(&self, data: &mut ComponentData) {
        (self.clear)(data)
    }
}

impl std::fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("replicate", &self.replicate)
            .finish()
    }
}

/// Builds a [`FieldDescriptor`] for a `NetVar` field of a component struct.
#[macro_export]
macro_rules! net_field {
    ($component:ty, $field:ident, $name:expr) => {
        $crate::net_field!($component, $field, $name, true)
    };
    ($component:ty, $field:ident, $name:expr, $replicate:expr) => {
        $crate::entity::FieldDescriptor::new::<$component, _>(
            $name,
            $replicate,
            |c| &c.$field,
            |c| &mut c.$field,
        )
    };
}

pub struct ComponentTypeDescriptor {
    id: ComponentTypeId,
    name: String,
    factory: FactoryFn,
    destructor: DestructorFn,
    save_to_map: bool,
    net_type: NetType,
    flags: ComponentFlags,
    fields: Vec<FieldDescriptor>,
    systems: HashMap<Side, SystemFactory>,
}

impl ComponentTypeDescriptor {
    pub fn id(&self) -> ComponentTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn save_to_map(&self) -> bool {
        self.save_to_map
    }

    pub fn net_type(&self) -> NetType {
        self.net_type
    }

    pub fn flags(&self) -> ComponentFlags {
        self.flags
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn has_system(&self, side: Side) -> bool {
        self.systems.contains_key(&side)
    }

    pub(crate) fn create(&self) -> Box<ComponentData> {
        (self.factory)()
    }

    pub(crate) fn destroy(&self, data: Box<ComponentData>) {
        (self.destructor)(data)
    }

    pub(crate) fn create_system(&self, side: Side) -> Option<Box<dyn ComponentSystem>> {
        self.systems.get(&side).map(|factory| factory())
    }
}

impl std::fmt::Debug for ComponentTypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentTypeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("net_type", &self.net_type)
            .field("flags", &self.flags)
            .field("fields", &self.fields)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("component \"{0}\" is already registered")]
    DuplicateName(String),
    #[error("unknown component type {0:?}")]
    UnknownComponentType(ComponentTypeId),
    #[error("component \"{name}\" already has a {side:?} system")]
    SystemAlreadyAttached { name: String, side: Side },
}

/// Process-wide table of component types, built once at startup and shared
/// read-only afterwards.
#[derive(Default)]
pub struct ComponentRegistry {
    types: Vec<ComponentTypeDescriptor>,
    by_name: HashMap<String, ComponentTypeId>,
    system_order: Vec<(ComponentTypeId, Side)>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_component<C, F, D>(
        &mut self,
        name: &str,
        factory: F,
        destructor: D,
        save_to_map: bool,
        net_type: NetType,
    ) -> Result<ComponentTypeId, RegistryError>
    where
        C: Any + Send,
        F: Fn() -> C + Send + Sync + 'static,
        D: Fn(C) + Send + Sync + 'static,
    {
        if self.by_name.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }

        let id = ComponentTypeId(self.types.len() as u32);
        self.types.push(ComponentTypeDescriptor {
            id,
            name: name.to_string(),
            factory: Box::new(move || Box::new(factory())),
            destructor: Box::new(move |data| {
                if let Ok(component) = data.downcast::<C>() {
                    destructor(*component);
                }
            }),
            save_to_map,
            net_type,
            flags: ComponentFlags::empty(),
            fields: Vec::new(),
            systems: HashMap::new(),
        });
        self.by_name.insert(name.to_string(), id);

        log::debug!("Registered component \"{}\" ({:?})", name, net_type);
        Ok(id)
    }

    /// Registers `C` under its own name with a default factory.
    pub fn register<C: Component + Default>(
        &mut self,
        net_type: NetType,
        save_to_map: bool,
    ) -> Result<ComponentTypeId, RegistryError> {
        self.register_component(C::NAME, C::default, drop::<C>, save_to_map, net_type)
    }

    pub fn register_field(
        &mut self,
        ty: ComponentTypeId,
        field: FieldDescriptor,
    ) -> Result<(), RegistryError> {
        let desc = self
            .types
            .get_mut(ty.index())
            .ok_or(RegistryError::UnknownComponentType(ty))?;

        if desc.fields.iter().any(|f| f.name == field.name) {
            log::warn!(
                "Component \"{}\" registers field \"{}\" twice",
                desc.name,
                field.name
            );
        }

        desc.fields.push(field);
        Ok(())
    }

    pub fn set_flags(
        &mut self,
        ty: ComponentTypeId,
        flags: ComponentFlags,
    ) -> Result<(), RegistryError> {
        let desc = self
            .types
            .get_mut(ty.index())
            .ok_or(RegistryError::UnknownComponentType(ty))?;
        desc.flags = flags;
        Ok(())
    }

    /// Attaches the system a store on `side` instantiates for this type.
    pub fn register_system<F>(
        &mut self,
        ty: ComponentTypeId,
        side: Side,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn ComponentSystem> + Send + Sync + 'static,
    {
        let desc = self
            .types
            .get_mut(ty.index())
            .ok_or(RegistryError::UnknownComponentType(ty))?;

        if desc.systems.contains_key(&side) {
            return Err(RegistryError::SystemAlreadyAttached {
                name: desc.name.clone(),
                side,
            });
        }

        desc.systems.insert(side, Box::new(factory));
        self.system_order.push((ty, side));
        Ok(())
    }

    pub fn get(&self, ty: ComponentTypeId) -> Option<&ComponentTypeDescriptor> {
        self.types.get(ty.index())
    }

    pub fn by_name(&self, name: &str) -> Option<&ComponentTypeDescriptor> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    pub fn type_id(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentTypeDescriptor> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Systems in the order they were registered for `side`.
    pub(crate) fn systems_for(&self, side: Side) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.system_order
            .iter()
            .filter(move |(_, s)| *s == side)
            .map(|(ty, _)| *ty)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.types.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone)]
    struct Counter {
        count: NetVar<u32>,
        label: NetVar<String>,
    }

    impl Component for Counter {
        const NAME: &'static str = "counter";
    }

    fn registry() -> (ComponentRegistry, ComponentTypeId) {
        let mut registry = ComponentRegistry::new();
        let ty = registry.register::<Counter>(NetType::Both, false).unwrap();
        registry
            .register_field(ty, crate::net_field!(Counter, count, "count"))
            .unwrap();
        registry
            .register_field(ty, crate::net_field!(Counter, label, "label", false))
            .unwrap();
        (registry, ty)
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (mut registry, _) = registry();
        let result = registry.register::<Counter>(NetType::ServerOnly, false);
        assert!(matches!(result, Err(RegistryError::DuplicateName(name)) if name == "counter"));
    }

    #[test]
    fn lookup_by_name_and_id() {
        let (registry, ty) = registry();
        let desc = registry.by_name("counter").unwrap();
        assert_eq!(desc.id(), ty);
        assert_eq!(registry.get(ty).unwrap().name(), "counter");
        assert_eq!(desc.fields().len(), 2);
        assert_eq!(desc.field_index("label"), Some(1));
        assert!(!desc.field(1).unwrap().replicate());
    }

    #[test]
    fn field_accessors_round_trip() {
        let (registry, ty) = registry();
        let desc = registry.get(ty).unwrap();
        let mut data = desc.create();

        let count = desc.field(0).unwrap();
        assert_eq!(count.field_type(), NetFieldType::U32);
        assert!(count.write(data.as_mut(), &FieldValue::U32(9)));
        assert_eq!(count.read(data.as_ref()), Some(FieldValue::U32(9)));
        assert!(!count.is_dirty(data.as_ref()));

        // wrong tag leaves the value alone
        assert!(!count.write(data.as_mut(), &FieldValue::Float(1.0)));
        assert_eq!(count.read(data.as_ref()), Some(FieldValue::U32(9)));

        data.downcast_mut::<Counter>().unwrap().count.set(10);
        assert!(count.is_dirty(data.as_ref()));
        count.clear_dirty(data.as_mut());
        assert!(!count.is_dirty(data.as_ref()));
    }

    #[test]
    fn one_system_per_side() {
        struct Nop;
        impl ComponentSystem for Nop {}

        let (mut registry, ty) = registry();
        registry
            .register_system(ty, Side::Client, || Box::new(Nop))
            .unwrap();
        registry
            .register_system(ty, Side::Server, || Box::new(Nop))
            .unwrap();
        assert!(matches!(
            registry.register_system(ty, Side::Client, || Box::new(Nop)),
            Err(RegistryError::SystemAlreadyAttached { side: Side::Client, .. })
        ));
        assert_eq!(registry.systems_for(Side::Client).count(), 1);
    }

    #[test]
    fn net_type_sides() {
        assert!(NetType::ServerOnly.exists_on(Side::Server));
        assert!(!NetType::ServerOnly.exists_on(Side::Client));
        assert!(!NetType::ClientOnly.exists_on(Side::Server));
        assert!(NetType::Both.is_replicated());
        assert!(!NetType::None.is_replicated());
    }
}
