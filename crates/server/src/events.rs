use std::net::SocketAddr;

use chroma::EntityId;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: u32,
        name: String,
        addr: SocketAddr,
        entity: EntityId,
    },
    ClientDisconnected {
        client_id: u32,
        name: String,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Command {
        client_id: u32,
        command: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub enum DisconnectReason {
    Graceful(String),
    Timeout,
    Kicked,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::Graceful(reason) => reason,
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
        }
    }
}
