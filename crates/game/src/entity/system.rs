use std::any::Any;

use super::registry::ComponentData;
use super::{EntityId, EntityStore};

/// Behaviour attached to one component type on one side.
///
/// Lifecycle callbacks fire synchronously from the store. `update` runs once
/// per tick, in registration order, over the entities currently holding the
/// component.
pub trait ComponentSystem: Any + Send {
    fn component_added(&mut self, _entity: EntityId, _component: &ComponentData) {}

    /// Called before the component is destroyed.
    fn component_removed(&mut self, _entity: EntityId, _component: &ComponentData) {}

    /// Called after replicated values were written into the component.
    fn component_updated(&mut self, _entity: EntityId, _component: &ComponentData) {}

    fn update(&mut self, _store: &mut EntityStore, _entities: &[EntityId], _dt: f32) {}
}
