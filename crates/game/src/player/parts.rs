use crate::entity::components::{
    Direction, PhysObject, PlayerInfo, PlayerMoveData, RigidBody, Transform,
};
use crate::entity::{Component, EntityId, EntityStore};

use super::MovementError;

/// Working copies of the components one player tick touches. Changes reach
/// the store only through [`PlayerParts::commit`], so a failed lookup never
/// leaves a half-updated player behind.
#[derive(Debug, Clone)]
pub(crate) struct PlayerParts {
    pub player: EntityId,
    pub camera: EntityId,
    pub move_data: PlayerMoveData,
    pub rigid_body: RigidBody,
    pub transform: Transform,
    pub direction: Direction,
    pub cam_transform: Transform,
    pub cam_direction: Direction,
    pub phys: PhysObject,
}

fn fetch<C: Component + Clone>(store: &EntityStore, entity: EntityId) -> Result<C, MovementError> {
    store
        .get::<C>(entity)
        .cloned()
        .ok_or(MovementError::MissingComponent {
            entity,
            component: C::NAME,
        })
}

fn put<C: Component>(store: &mut EntityStore, entity: EntityId, value: C) {
    if let Some(slot) = store.get_mut::<C>(entity) {
        *slot = value;
    }
}

impl PlayerParts {
    pub fn load(store: &EntityStore, player: EntityId) -> Result<Self, MovementError> {
        let info: PlayerInfo = fetch(store, player)?;
        let camera = info.camera.value();
        if !camera.is_some() {
            return Err(MovementError::MissingCamera(player));
        }

        Ok(Self {
            player,
            camera,
            move_data: fetch(store, player)?,
            rigid_body: fetch(store, player)?,
            transform: fetch(store, player)?,
            direction: fetch(store, player)?,
            cam_transform: fetch(store, camera)?,
            cam_direction: fetch(store, camera)?,
            phys: fetch(store, player)?,
        })
    }

    pub fn commit(self, store: &mut EntityStore) {
        put(store, self.player, self.move_data);
        put(store, self.player, self.rigid_body);
        put(store, self.player, self.transform);
        put(store, self.player, self.direction);
        put(store, self.player, self.phys);
        put(store, self.camera, self.cam_transform);
        put(store, self.camera, self.cam_direction);
    }
}
