use std::collections::HashMap;

use glam::Vec3;

use super::components::{Light, LightType, Transform};
use super::registry::ComponentData;
use super::system::ComponentSystem;
use super::{Color4, EntityId, EntityStore};

/// Renderer-facing copy of a light component.
#[derive(Debug, Clone, PartialEq)]
pub struct LightInstance {
    pub kind: LightType,
    /// Bumped every time the instance is recreated.
    pub generation: u32,
    pub color: Color4,
    pub pos: Vec3,
    pub ang: Vec3,
    pub inner_fov: f32,
    pub outer_fov: f32,
    pub radius: f32,
    pub length: f32,
    pub shadow: bool,
    pub enabled: bool,
}

impl LightInstance {
    fn new(kind: LightType, generation: u32) -> Self {
        Self {
            kind,
            generation,
            color: Color4::WHITE,
            pos: Vec3::ZERO,
            ang: Vec3::ZERO,
            inner_fov: 0.0,
            outer_fov: 0.0,
            radius: 0.0,
            length: 0.0,
            shadow: false,
            enabled: false,
        }
    }

    fn copy_from(&mut self, light: &Light, transform: Option<&Transform>) {
        match transform.filter(|_| light.use_transform.value()) {
            Some(transform) => {
                self.pos = transform.pos.value();
                self.ang = transform.ang.value();
            }
            None => {
                self.pos = light.pos.value();
                self.ang = light.ang.value();
            }
        }

        self.color = light.color.value();
        self.inner_fov = light.inner_fov.value();
        self.outer_fov = light.outer_fov.value();
        self.radius = light.radius.value();
        self.length = light.length.value();
        self.shadow = light.shadow.value();
        self.enabled = light.enabled.value();
    }
}

/// Client-side system keeping one light instance per `light` component.
#[derive(Debug, Default)]
pub struct LightSystem {
    lights: HashMap<EntityId, LightInstance>,
    next_generation: u32,
}

impl LightSystem {
    pub fn light(&self, entity: EntityId) -> Option<&LightInstance> {
        self.lights.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    fn create(&mut self, kind: LightType) -> LightInstance {
        self.next_generation += 1;
        LightInstance::new(kind, self.next_generation)
    }
}

impl ComponentSystem for LightSystem {
    fn component_removed(&mut self, entity: EntityId, _component: &ComponentData) {
        if self.lights.remove(&entity).is_some() {
            log::debug!("Destroyed light for entity {}", entity);
        }
    }

    fn component_updated(&mut self, entity: EntityId, component: &ComponentData) {
        let Some(light) = component.downcast_ref::<Light>() else {
            return;
        };
        let kind = light.light_type.value();

        let needs_new = self.lights.get(&entity).is_none_or(|inst| inst.kind != kind);
        if needs_new {
            let instance = self.create(kind);
            log::debug!("Created {:?} light for entity {}", kind, entity);
            self.lights.insert(entity, instance);
        }

        if let Some(instance) = self.lights.get_mut(&entity) {
            instance.copy_from(light, None);
        }
    }

    fn update(&mut self, store: &mut EntityStore, entities: &[EntityId], _dt: f32) {
        for &entity in entities {
            let Some(light) = store.get::<Light>(entity) else {
                continue;
            };
            let Some(instance) = self.lights.get_mut(&entity) else {
                continue;
            };
            instance.copy_from(light, store.get::<Transform>(entity));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{register_base_components, ComponentRegistry, Side};
    use std::sync::Arc;

    fn client_store() -> EntityStore {
        let mut registry = ComponentRegistry::new();
        register_base_components(&mut registry).unwrap();
        EntityStore::new(Arc::new(registry), Side::Client)
    }

    fn lights(store: &EntityStore) -> &LightSystem {
        let ty = store.type_of::<Light>().unwrap();
        store.system::<LightSystem>(ty).unwrap()
    }

    #[test]
    fn created_on_first_update_and_recreated_on_type_change() {
        let mut store = client_store();
        let ty = store.type_of::<Light>().unwrap();
        let e = store.create_entity_with_id(EntityId::new(42)).unwrap();
        store.add::<Light>(e).unwrap();
        assert!(lights(&store).light(e).is_none());

        store.notify_updated(e, ty);
        let first = lights(&store).light(e).unwrap().generation;

        store.get_mut::<Light>(e).unwrap().enabled.set(false);
        store.notify_updated(e, ty);
        let same = lights(&store).light(e).unwrap();
        assert_eq!(same.generation, first);
        assert!(!same.enabled);

        store.get_mut::<Light>(e).unwrap().light_type.set(LightType::Cone);
        store.notify_updated(e, ty);
        let recreated = lights(&store).light(e).unwrap();
        assert_ne!(recreated.generation, first);
        assert_eq!(recreated.kind, LightType::Cone);
    }

    #[test]
    fn follows_transform() {
        let mut store = client_store();
        let ty = store.type_of::<Light>().unwrap();
        let e = store.create_entity_with_id(EntityId::new(3)).unwrap();
        store.add::<Light>(e).unwrap();
        store.add::<Transform>(e).unwrap().pos.set(Vec3::new(1.0, 2.0, 3.0));
        store.notify_updated(e, ty);

        store.run_systems(0.016);
        assert_eq!(lights(&store).light(e).unwrap().pos, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn removed_with_entity() {
        let mut store = client_store();
        let ty = store.type_of::<Light>().unwrap();
        let e = store.create_entity_with_id(EntityId::new(9)).unwrap();
        store.add::<Light>(e).unwrap();
        store.notify_updated(e, ty);
        assert_eq!(lights(&store).len(), 1);

        store.delete_entity(e);
        assert!(lights(&store).is_empty());
    }
}
