pub mod console;
pub mod entity;
pub mod map;
pub mod net;
pub mod netvar;
pub mod physics;
pub mod player;
pub mod simulation;

pub use console::{CommandSource, ConsoleCommand, ConsoleError};
pub use entity::{
    register_base_components, Color4, Component, ComponentRegistry, ComponentSystem, EntityId,
    EntityStore, Side, StoreError,
};
pub use map::{BuiltinMaps, MapError, MapProvider, TestingGround};
pub use net::{
    ClientConfig, ClientConnection, ClientEvent, ClientState, ClientTable, ConnectError,
    NetworkStats, UdpTransport, UserCmd, DEFAULT_PORT, DEFAULT_TICK_RATE,
};
pub use netvar::NetVar;
pub use physics::{Contact, PhysicsBody, PhysicsWorld};
pub use player::{MovementConfig, MovementError, ViewConfig};
pub use simulation::{FixedTimestep, GameClock};
