mod config;
mod movement;
mod parts;
mod spawn;
pub mod view;

use thiserror::Error;

use crate::entity::{EntityId, StoreError};

pub use config::{MovementConfig, ViewConfig};
pub use movement::{
    accelerate, apply_friction, is_on_ground, move_player, set_move_type, toggle_move_type,
    update_position, wish_speed,
};
pub use spawn::{
    create_player, remove_player, reset_velocity, respawn, spawn, toggle_flashlight,
    update_flashlight, update_player, PLAYER_MODEL,
};
pub use view::update_local_view;

#[derive(Debug, Error)]
pub enum MovementError {
    #[error("entity {entity} has no {component} component")]
    MissingComponent {
        entity: EntityId,
        component: &'static str,
    },

    #[error("player {0} has no camera")]
    MissingCamera(EntityId),

    #[error("player {0} has no physics body")]
    NoPhysicsBody(EntityId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use glam::Vec3;

    use crate::entity::{register_base_components, ComponentRegistry, EntityStore, Side};
    use crate::physics::{Contact, PhysicsBody};

    pub fn test_store() -> EntityStore {
        let mut registry = ComponentRegistry::new();
        register_base_components(&mut registry).unwrap();
        EntityStore::new(Arc::new(registry), Side::Server)
    }

    /// Body that records what movement asks of it and reports canned
    /// contacts.
    #[derive(Debug)]
    pub struct MockBody {
        pub position: Vec3,
        pub velocity: Vec3,
        pub gravity: bool,
        pub collision: bool,
        pub contacts: Vec<Contact>,
        pub toggle_calls: usize,
    }

    impl Default for MockBody {
        fn default() -> Self {
            Self {
                position: Vec3::ZERO,
                velocity: Vec3::ZERO,
                gravity: true,
                collision: true,
                contacts: Vec::new(),
                toggle_calls: 0,
            }
        }
    }

    impl PhysicsBody for MockBody {
        fn linear_velocity(&self) -> Vec3 {
            self.velocity
        }

        fn set_linear_velocity(&mut self, velocity: Vec3) {
            self.velocity = velocity;
        }

        fn position(&self) -> Vec3 {
            self.position
        }

        fn set_position(&mut self, position: Vec3) {
            self.position = position;
        }

        fn set_gravity_enabled(&mut self, enabled: bool) {
            self.gravity = enabled;
            self.toggle_calls += 1;
        }

        fn set_collision_enabled(&mut self, enabled: bool) {
            self.collision = enabled;
            self.toggle_calls += 1;
        }

        fn check_collision(&self, max_separation: f32, collector: &mut dyn FnMut(Contact)) {
            for contact in &self.contacts {
                if contact.distance <= max_separation {
                    collector(*contact);
                }
            }
        }
    }
}
