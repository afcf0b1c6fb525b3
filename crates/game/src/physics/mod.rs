mod body;
mod world;

pub use body::{Contact, PhysicsBody};
pub use world::{BodyHandle, PhysicsWorld, RapierBody};
