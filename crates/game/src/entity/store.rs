use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use super::registry::{ComponentData, ComponentRegistry, ComponentTypeId};
use super::system::ComponentSystem;
use super::{Component, EntityId, Side};

/// Number of replication flushes a destroyed id waits before it is handed out
/// again, so in-flight ENTITY_LIST messages never alias a new entity.
pub const ID_QUARANTINE_FLUSHES: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity {0} does not exist")]
    EntityNotFound(EntityId),
    #[error("entity {0} already exists")]
    EntityExists(EntityId),
    #[error("entity {entity} already has component \"{component}\"")]
    AlreadyPresent { entity: EntityId, component: String },
    #[error("unknown component \"{0}\"")]
    UnknownComponent(String),
    #[error("component \"{component}\" does not exist on the {side:?}")]
    WrongSide { component: String, side: Side },
}

struct ComponentSlot {
    data: Box<ComponentData>,
    predicted: bool,
}

struct SystemSlot {
    system: Option<Box<dyn ComponentSystem>>,
    entities: Vec<EntityId>,
}

/// Structural changes since the last replication flush.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub created: BTreeSet<EntityId>,
    pub destroyed: BTreeSet<EntityId>,
    pub added: BTreeSet<(EntityId, ComponentTypeId)>,
    pub removed: BTreeSet<(EntityId, ComponentTypeId)>,
}

impl ChangeSet {
    fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.destroyed.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

/// Owns every entity and component instance of one simulation.
pub struct EntityStore {
    registry: Arc<ComponentRegistry>,
    side: Side,
    entities: BTreeSet<EntityId>,
    components: Vec<BTreeMap<EntityId, ComponentSlot>>,
    systems: Vec<SystemSlot>,
    system_by_type: HashMap<ComponentTypeId, usize>,
    next_id: u32,
    released: VecDeque<(EntityId, u64)>,
    flush_count: u64,
    changes: ChangeSet,
}

impl EntityStore {
    pub fn new(registry: Arc<ComponentRegistry>, side: Side) -> Self {
        let mut systems = Vec::new();
        let mut system_by_type = HashMap::new();

        for ty in registry.systems_for(side) {
            let Some(system) = registry.get(ty).and_then(|desc| desc.create_system(side)) else {
                continue;
            };
            system_by_type.insert(ty, systems.len());
            systems.push(SystemSlot {
                system: Some(system),
                entities: Vec::new(),
            });
        }

        let components = (0..registry.len()).map(|_| BTreeMap::new()).collect();

        Self {
            registry,
            side,
            entities: BTreeSet::new(),
            components,
            systems,
            system_by_type,
            next_id: 1,
            released: VecDeque::new(),
            flush_count: 0,
            changes: ChangeSet::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn side(&self) -> Side {
        self.side
    }

    // Entities

    pub fn create_entity(&mut self) -> EntityId {
        let reusable = self
            .released
            .front()
            .is_some_and(|(_, at)| self.flush_count >= at + ID_QUARANTINE_FLUSHES);

        let id = match reusable.then(|| self.released.pop_front()).flatten() {
            Some((id, _)) => id,
            None => {
                let id = EntityId::new(self.next_id);
                self.next_id += 1;
                id
            }
        };

        self.insert_entity(id);
        id
    }

    /// Creates an entity with an id chosen by the authority.
    pub fn create_entity_with_id(&mut self, id: EntityId) -> Result<EntityId, StoreError> {
        if !id.is_some() || self.entities.contains(&id) {
            return Err(StoreError::EntityExists(id));
        }

        self.released.retain(|(released, _)| *released != id);
        if id.raw() >= self.next_id {
            self.next_id = id.raw() + 1;
        }

        self.insert_entity(id);
        Ok(id)
    }

    fn insert_entity(&mut self, id: EntityId) {
        self.entities.insert(id);
        if self.tracks_changes() {
            self.changes.created.insert(id);
        }
    }

    /// Removes every component, firing removal callbacks before each
    /// destructor, then frees the id.
    pub fn delete_entity(&mut self, entity: EntityId) -> bool {
        if !self.entities.contains(&entity) {
            log::warn!("Tried to delete nonexistent entity {}", entity);
            return false;
        }

        let attached: Vec<ComponentTypeId> = self
            .components
            .iter()
            .enumerate()
            .filter(|(_, map)| map.contains_key(&entity))
            .map(|(index, _)| ComponentTypeId(index as u32))
            .collect();

        for ty in attached {
            self.remove_component(entity, ty);
        }

        self.entities.remove(&entity);
        self.released.push_back((entity, self.flush_count));

        if self.tracks_changes() {
            self.changes.added.retain(|(e, _)| *e != entity);
            self.changes.removed.retain(|(e, _)| *e != entity);
            if !self.changes.created.remove(&entity) {
                self.changes.destroyed.insert(entity);
            }
        }

        true
    }

    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.contains(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().copied()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // Components

    pub fn add_component(
        &mut self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Result<&mut ComponentData, StoreError> {
        let registry = Arc::clone(&self.registry);
        let desc = registry
            .get(ty)
            .ok_or_else(|| StoreError::UnknownComponent(format!("{:?}", ty)))?;
        self.insert_component(entity, ty, desc.create())
    }

    pub fn add_component_by_name(
        &mut self,
        entity: EntityId,
        name: &str,
    ) -> Result<&mut ComponentData, StoreError> {
        let ty = self
            .registry
            .type_id(name)
            .ok_or_else(|| StoreError::UnknownComponent(name.to_string()))?;
        self.add_component(entity, ty)
    }

    pub fn type_of<C: Component>(&self) -> Result<ComponentTypeId, StoreError> {
        self.registry
            .type_id(C::NAME)
            .ok_or_else(|| StoreError::UnknownComponent(C::NAME.to_string()))
    }

    /// Adds `C` built by its registered factory.
    pub fn add<C: Component>(&mut self, entity: EntityId) -> Result<&mut C, StoreError> {
        let ty = self.type_of::<C>()?;
        let data = self.add_component(entity, ty)?;
        data.downcast_mut::<C>()
            .ok_or_else(|| StoreError::UnknownComponent(C::NAME.to_string()))
    }

    /// Adds `C` with the given initial value instead of the factory default.
    pub fn insert<C: Component>(&mut self, entity: EntityId, value: C) -> Result<&mut C, StoreError> {
        let ty = self.type_of::<C>()?;
        let data = self.insert_component(entity, ty, Box::new(value))?;
        data.downcast_mut::<C>()
            .ok_or_else(|| StoreError::UnknownComponent(C::NAME.to_string()))
    }

    fn insert_component(
        &mut self,
        entity: EntityId,
        ty: ComponentTypeId,
        data: Box<ComponentData>,
    ) -> Result<&mut ComponentData, StoreError> {
        let registry = Arc::clone(&self.registry);
        let desc = registry
            .get(ty)
            .ok_or_else(|| StoreError::UnknownComponent(format!("{:?}", ty)))?;

        if !self.entities.contains(&entity) {
            return Err(StoreError::EntityNotFound(entity));
        }
        if !desc.net_type().exists_on(self.side) {
            return Err(StoreError::WrongSide {
                component: desc.name().to_string(),
                side: self.side,
            });
        }
        if self.components[ty.index()].contains_key(&entity) {
            return Err(StoreError::AlreadyPresent {
                entity,
                component: desc.name().to_string(),
            });
        }

        self.components[ty.index()].insert(
            entity,
            ComponentSlot {
                data,
                predicted: false,
            },
        );

        // removed and re-added within one window goes out as destroy + create
        if self.tracks_changes() {
            self.changes.added.insert((entity, ty));
        }

        let slot = self.components[ty.index()]
            .get_mut(&entity)
            .ok_or(StoreError::EntityNotFound(entity))?;

        if let Some(&index) = self.system_by_type.get(&ty) {
            let system_slot = &mut self.systems[index];
            system_slot.entities.push(entity);
            if let Some(system) = system_slot.system.as_mut() {
                system.component_added(entity, slot.data.as_ref());
            }
        }

        Ok(slot.data.as_mut())
    }

    /// Returns false when the component was not present.
    pub fn remove_component(&mut self, entity: EntityId, ty: ComponentTypeId) -> bool {
        let Some(slot) = self
            .components
            .get_mut(ty.index())
            .and_then(|map| map.remove(&entity))
        else {
            return false;
        };

        if let Some(&index) = self.system_by_type.get(&ty) {
            let system_slot = &mut self.systems[index];
            system_slot.entities.retain(|e| *e != entity);
            if let Some(system) = system_slot.system.as_mut() {
                system.component_removed(entity, slot.data.as_ref());
            }
        }

        if let Some(desc) = self.registry.get(ty) {
            desc.destroy(slot.data);
        }

        if self.tracks_changes() && !self.changes.added.remove(&(entity, ty)) {
            self.changes.removed.insert((entity, ty));
        }

        true
    }

    pub fn remove<C: Component>(&mut self, entity: EntityId) -> bool {
        match self.registry.type_id(C::NAME) {
            Some(ty) => self.remove_component(entity, ty),
            None => false,
        }
    }

    pub fn has_component(&self, entity: EntityId, ty: ComponentTypeId) -> bool {
        self.components
            .get(ty.index())
            .is_some_and(|map| map.contains_key(&entity))
    }

    pub fn has<C: Component>(&self, entity: EntityId) -> bool {
        self.registry
            .type_id(C::NAME)
            .is_some_and(|ty| self.has_component(entity, ty))
    }

    pub fn get_component(&self, entity: EntityId, ty: ComponentTypeId) -> Option<&ComponentData> {
        self.components
            .get(ty.index())?
            .get(&entity)
            .map(|slot| slot.data.as_ref())
    }

    pub fn get_component_mut(
        &mut self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Option<&mut ComponentData> {
        self.components
            .get_mut(ty.index())?
            .get_mut(&entity)
            .map(|slot| slot.data.as_mut())
    }

    pub fn get<C: Component>(&self, entity: EntityId) -> Option<&C> {
        let ty = self.registry.type_id(C::NAME)?;
        self.get_component(entity, ty)?.downcast_ref::<C>()
    }

    pub fn get_mut<C: Component>(&mut self, entity: EntityId) -> Option<&mut C> {
        let ty = self.registry.type_id(C::NAME)?;
        self.get_component_mut(entity, ty)?.downcast_mut::<C>()
    }

    /// Entities holding a component of type `ty`, in id order.
    pub fn entities_with(&self, ty: ComponentTypeId) -> impl Iterator<Item = EntityId> + '_ {
        self.components
            .get(ty.index())
            .into_iter()
            .flat_map(|map| map.keys().copied())
    }

    pub fn components_of(&self, entity: EntityId) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.components
            .iter()
            .enumerate()
            .filter(move |(_, map)| map.contains_key(&entity))
            .map(|(index, _)| ComponentTypeId(index as u32))
    }

    /// Predicted components keep their local values when an update arrives.
    pub fn set_predicted(&mut self, entity: EntityId, ty: ComponentTypeId, predicted: bool) -> bool {
        match self
            .components
            .get_mut(ty.index())
            .and_then(|map| map.get_mut(&entity))
        {
            Some(slot) => {
                slot.predicted = predicted;
                true
            }
            None => false,
        }
    }

    pub fn is_predicted(&self, entity: EntityId, ty: ComponentTypeId) -> bool {
        self.components
            .get(ty.index())
            .and_then(|map| map.get(&entity))
            .is_some_and(|slot| slot.predicted)
    }

    /// Fires `component_updated` on the type's system, if it has one.
    pub fn notify_updated(&mut self, entity: EntityId, ty: ComponentTypeId) {
        let Some(&index) = self.system_by_type.get(&ty) else {
            return;
        };
        let Some(slot) = self
            .components
            .get(ty.index())
            .and_then(|map| map.get(&entity))
        else {
            return;
        };
        if let Some(system) = self.systems[index].system.as_mut() {
            system.component_updated(entity, slot.data.as_ref());
        }
    }

    // Systems

    /// Runs every system's `update` once, in registration order.
    pub fn run_systems(&mut self, dt: f32) {
        for index in 0..self.systems.len() {
            let Some(mut system) = self.systems[index].system.take() else {
                continue;
            };
            let entities = self.systems[index].entities.clone();
            system.update(self, &entities, dt);
            self.systems[index].system = Some(system);
        }
    }

    /// Entities the system for `ty` is tracking.
    pub fn system_entities(&self, ty: ComponentTypeId) -> Option<&[EntityId]> {
        self.system_by_type
            .get(&ty)
            .map(|&index| self.systems[index].entities.as_slice())
    }

    pub fn system<S: ComponentSystem + 'static>(&self, ty: ComponentTypeId) -> Option<&S> {
        let index = *self.system_by_type.get(&ty)?;
        let system: &dyn std::any::Any = self.systems[index].system.as_deref()?;
        system.downcast_ref::<S>()
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    // Replication bookkeeping

    fn tracks_changes(&self) -> bool {
        self.side == Side::Server
    }

    pub(crate) fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub(crate) fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Ends a replication window.
    pub(crate) fn finish_flush(&mut self) {
        self.changes = ChangeSet::default();
        self.flush_count += 1;
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }
}

impl Drop for EntityStore {
    fn drop(&mut self) {
        let entities: Vec<EntityId> = self.entities.iter().copied().collect();
        for entity in entities {
            self.delete_entity(entity);
        }
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("side", &self.side)
            .field("entities", &self.entities.len())
            .field("systems", &self.systems.len())
            .field("flush_count", &self.flush_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::registry::NetType;
    use crate::netvar::NetVar;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Marker {
        value: NetVar<i32>,
    }

    impl Component for Marker {
        const NAME: &'static str = "marker";
    }

    #[derive(Debug, Default)]
    struct Secret;

    impl Component for Secret {
        const NAME: &'static str = "secret";
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Added(EntityId),
        Removed(EntityId),
        Updated(EntityId),
        Update(Vec<EntityId>),
    }

    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl ComponentSystem for Recorder {
        fn component_added(&mut self, entity: EntityId, _: &ComponentData) {
            self.0.lock().unwrap().push(Call::Added(entity));
        }

        fn component_removed(&mut self, entity: EntityId, component: &ComponentData) {
            assert!(component.downcast_ref::<Marker>().is_some());
            self.0.lock().unwrap().push(Call::Removed(entity));
        }

        fn component_updated(&mut self, entity: EntityId, _: &ComponentData) {
            self.0.lock().unwrap().push(Call::Updated(entity));
        }

        fn update(&mut self, _: &mut EntityStore, entities: &[EntityId], _: f32) {
            self.0.lock().unwrap().push(Call::Update(entities.to_vec()));
        }
    }

    fn store_with_recorder(side: Side) -> (EntityStore, Arc<Mutex<Vec<Call>>>, ComponentTypeId) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        let ty = registry.register::<Marker>(NetType::Both, false).unwrap();
        registry.register::<Secret>(NetType::ServerOnly, false).unwrap();
        let sink = Arc::clone(&calls);
        registry
            .register_system(ty, side, move || Box::new(Recorder(Arc::clone(&sink))))
            .unwrap();
        (EntityStore::new(Arc::new(registry), side), calls, ty)
    }

    #[test]
    fn add_twice_fails() {
        let (mut store, _, _) = store_with_recorder(Side::Server);
        let e = store.create_entity();
        store.add::<Marker>(e).unwrap();
        assert!(matches!(
            store.add::<Marker>(e),
            Err(StoreError::AlreadyPresent { .. })
        ));
    }

    #[test]
    fn missing_component_is_soft() {
        let (mut store, _, ty) = store_with_recorder(Side::Server);
        let e = store.create_entity();
        assert!(store.get::<Marker>(e).is_none());
        assert!(store.get_component(EntityId::new(999), ty).is_none());
        assert!(!store.remove::<Marker>(e));
    }

    #[test]
    fn callbacks_and_cached_entities() {
        let (mut store, calls, ty) = store_with_recorder(Side::Server);
        let a = store.create_entity();
        let b = store.create_entity();
        store.add::<Marker>(a).unwrap();
        store.add::<Marker>(b).unwrap();
        store.notify_updated(a, ty);
        store.run_systems(0.01);
        store.delete_entity(a);
        store.run_systems(0.01);

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                Call::Added(a),
                Call::Added(b),
                Call::Updated(a),
                Call::Update(vec![a, b]),
                Call::Removed(a),
                Call::Update(vec![b]),
            ]
        );
        assert_eq!(store.system_entities(ty), Some(&[b][..]));
    }

    #[test]
    fn systems_are_per_side() {
        let (mut server, server_calls, ty) = store_with_recorder(Side::Client);
        let e = server.create_entity_with_id(EntityId::new(5)).unwrap();
        server.add::<Marker>(e).unwrap();
        assert_eq!(*server_calls.lock().unwrap(), vec![Call::Added(e)]);

        let mut registry = ComponentRegistry::new();
        registry.register::<Marker>(NetType::Both, false).unwrap();
        let mut plain = EntityStore::new(Arc::new(registry), Side::Server);
        let e = plain.create_entity();
        plain.add::<Marker>(e).unwrap();
        assert_eq!(plain.system_count(), 0);
        assert!(plain.system_entities(ty).is_none());
    }

    #[test]
    fn server_only_component_rejected_on_client() {
        let (mut client, _, _) = store_with_recorder(Side::Client);
        let e = client.create_entity_with_id(EntityId::new(3)).unwrap();
        assert!(matches!(
            client.add::<Secret>(e),
            Err(StoreError::WrongSide { side: Side::Client, .. })
        ));
    }

    #[test]
    fn explicit_id_collision() {
        let (mut store, _, _) = store_with_recorder(Side::Client);
        store.create_entity_with_id(EntityId::new(42)).unwrap();
        assert!(matches!(
            store.create_entity_with_id(EntityId::new(42)),
            Err(StoreError::EntityExists(_))
        ));
        assert_ne!(store.create_entity(), EntityId::new(42));
    }

    #[test]
    fn ids_are_quarantined() {
        let (mut store, _, _) = store_with_recorder(Side::Server);
        let first = store.create_entity();
        store.delete_entity(first);

        store.finish_flush();
        let second = store.create_entity();
        assert_ne!(second, first);

        store.finish_flush();
        let third = store.create_entity();
        assert_eq!(third, first);
    }

    #[test]
    fn created_then_deleted_leaves_no_trace() {
        let (mut store, _, _) = store_with_recorder(Side::Server);
        let e = store.create_entity();
        store.add::<Marker>(e).unwrap();
        store.delete_entity(e);
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn predicted_flag() {
        let (mut store, _, ty) = store_with_recorder(Side::Client);
        let e = store.create_entity_with_id(EntityId::new(1)).unwrap();
        assert!(!store.set_predicted(e, ty, true));
        store.add::<Marker>(e).unwrap();
        assert!(store.set_predicted(e, ty, true));
        assert!(store.is_predicted(e, ty));
    }

    #[test]
    fn insert_keeps_value() {
        let (mut store, _, _) = store_with_recorder(Side::Server);
        let e = store.create_entity();
        store
            .insert(e, Marker { value: NetVar::new(12) })
            .unwrap();
        assert_eq!(store.get::<Marker>(e).unwrap().value.value(), 12);
    }
}
