use glam::Vec3;

use crate::entity::components::{Light, LightType, Map, PlayerSpawn, Transform};
use crate::entity::{EntityId, EntityStore, StoreError};
use crate::physics::PhysicsWorld;

use super::{MapObject, MapObjectKind};

/// The built-in map every server can host without files on disk.
pub struct TestingGround {
    objects: Vec<MapObject>,
}

impl Default for TestingGround {
    fn default() -> Self {
        Self::new()
    }
}

impl TestingGround {
    pub const NAME: &'static str = "de_test";

    const GROUND_SIZE: f32 = 2048.0;

    pub fn new() -> Self {
        let mut objects = vec![MapObject::ground(Vec3::ZERO, Self::GROUND_SIZE)];

        Self::add_platform_obstacles(&mut objects);
        Self::add_stairs(&mut objects);

        objects.push(MapObject::player_spawn(Vec3::new(0.0, 0.0, 0.0), 0.0));
        objects.push(MapObject::player_spawn(Vec3::new(-256.0, 128.0, 0.0), 90.0));
        objects.push(MapObject::point_light(Vec3::new(0.0, 0.0, 512.0), 2048.0));

        Self { objects }
    }

    fn add_platform_obstacles(objects: &mut Vec<MapObject>) {
        for (i, height) in [8.0, 16.0, 32.0, 48.0, 64.0].into_iter().enumerate() {
            objects.push(MapObject::static_box(
                Vec3::new(256.0 + i as f32 * 128.0, 0.0, height * 0.5),
                Vec3::new(48.0, 48.0, height * 0.5),
            ));
        }
    }

    fn add_stairs(objects: &mut Vec<MapObject>) {
        let start = Vec3::new(-384.0, -256.0, 0.0);
        let step_height = 12.0;
        let step_depth = 16.0;

        for i in 0..10 {
            let top = step_height * (i + 1) as f32;
            objects.push(MapObject::static_box(
                Vec3::new(start.x, start.y + step_depth * i as f32, top * 0.5),
                Vec3::new(64.0, step_depth * 0.5, top * 0.5),
            ));
        }
    }

    pub fn objects(&self) -> &[MapObject] {
        &self.objects
    }

    /// Builds the map's colliders and entities. Returns the map entity.
    pub fn spawn(
        &self,
        store: &mut EntityStore,
        physics: &mut PhysicsWorld,
    ) -> Result<EntityId, StoreError> {
        let map = store.create_entity();
        store.add::<Map>(map)?;

        for object in &self.objects {
            match object.kind {
                MapObjectKind::Ground | MapObjectKind::StaticBox => {
                    physics.add_static_box(object.position, object.half_extents);
                }
                MapObjectKind::PlayerSpawn => {
                    let spawn = store.create_entity();
                    let transform = store.add::<Transform>(spawn)?;
                    transform.pos.set(object.position);
                    transform.ang.set(Vec3::new(0.0, object.yaw, 0.0));
                    store.add::<PlayerSpawn>(spawn)?;
                }
                MapObjectKind::PointLight => {
                    let entity = store.create_entity();
                    store.add::<Transform>(entity)?.pos.set(object.position);
                    let light = store.add::<Light>(entity)?;
                    light.light_type.set(LightType::Point);
                    light.radius.set(object.half_extents.x);
                }
            }
        }

        log::info!(
            "Spawned map {} with {} objects",
            Self::NAME,
            self.objects.len()
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entity::{register_base_components, ComponentRegistry, Side};

    #[test]
    fn testing_ground_spawns_objects() {
        let mut registry = ComponentRegistry::new();
        register_base_components(&mut registry).unwrap();
        let mut store = EntityStore::new(Arc::new(registry), Side::Server);
        let mut physics = PhysicsWorld::new(800.0);

        let ground = TestingGround::new();
        let map = ground.spawn(&mut store, &mut physics).unwrap();

        assert!(store.has::<Map>(map));
        let spawn_ty = store.type_of::<PlayerSpawn>().unwrap();
        assert_eq!(store.entities_with(spawn_ty).count(), 2);
        assert_eq!(
            physics.colliders.len(),
            ground.objects().iter().filter(|o| o.is_solid()).count()
        );
    }
}
