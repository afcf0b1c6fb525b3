mod client;
mod connection;
mod input;
mod protocol;
pub mod replication;
mod transport;

pub use client::{ClientConfig, ClientConnection, ClientEvent, ClientState, ConnectError};
pub use connection::{ClientRecord, ClientTable, ClientTableError, DEFAULT_CLIENT_TIMEOUT};
pub use input::{ButtonState, InputState};
pub use protocol::{
    Buttons, ClientInfo, ClientMessage, ClientMessageType, ConVar, Disconnect, Envelope,
    ProtocolError, ServerInfo, ServerMessage, ServerMessageType, UserCmd, DEFAULT_PORT,
    DEFAULT_TICK_RATE, MAX_PACKET_SIZE, MAX_USERNAME_LEN, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
pub use replication::{
    ApplyStats, ComponentUpdate, EntityList, EntityUpdate, FieldUpdate, UpdateState,
};
pub use transport::{resolve_address, NetworkStats, UdpTransport};
