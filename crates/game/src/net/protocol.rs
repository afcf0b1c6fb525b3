use bitflags::bitflags;
use glam::Vec3;
use rkyv::util::AlignedVec;
use rkyv::{rancor, Archive, Deserialize, Serialize};

use super::replication::EntityList;

/// Largest payload a single UDP datagram can carry.
pub const MAX_PACKET_SIZE: usize = 65_507;
pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x4348_524D;
pub const DEFAULT_PORT: u16 = 27016;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const MAX_USERNAME_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),
    #[error("message of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
}

fn aligned(data: &[u8]) -> AlignedVec {
    let mut buffer = AlignedVec::with_capacity(data.len());
    buffer.extend_from_slice(data);
    buffer
}

/// Outer frame of every datagram: a type tag and the tagged message's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Envelope {
    pub magic: u32,
    pub version: u32,
    pub msg_type: u8,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(msg_type: u8, payload: Vec<u8>) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            msg_type,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let data = rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(ProtocolError::Serialize)?;

        if data.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = rkyv::from_bytes::<Self, rancor::Error>(&aligned(data))
            .map_err(ProtocolError::Deserialize)?;

        if envelope.magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic(envelope.magic));
        }
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

trait Payload: Sized {
    fn to_payload(&self) -> Result<Vec<u8>, ProtocolError>;
    fn from_payload(data: &[u8]) -> Result<Self, ProtocolError>;
}

macro_rules! payload {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Payload for $ty {
                fn to_payload(&self) -> Result<Vec<u8>, ProtocolError> {
                    rkyv::to_bytes::<rancor::Error>(self)
                        .map(|aligned| aligned.into_vec())
                        .map_err(ProtocolError::Serialize)
                }

                fn from_payload(data: &[u8]) -> Result<Self, ProtocolError> {
                    rkyv::from_bytes::<Self, rancor::Error>(&aligned(data))
                        .map_err(ProtocolError::Deserialize)
                }
            }
        )*
    };
}

payload!(Disconnect, ServerInfo, ConVar, ClientInfo, UserCmd, EntityList);

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Disconnect {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ServerInfo {
    pub name: String,
    pub map_name: String,
    pub player_entity_id: u32,
    /// -1 leaves the port unchanged.
    pub new_port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ConVar {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ClientInfo {
    pub name: String,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Buttons: u32 {
        const FORWARD = 1 << 0;
        const BACK = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const JUMP = 1 << 4;
        const DUCK = 1 << 5;
        const SPRINT = 1 << 6;
        const ZOOM = 1 << 7;
    }
}

/// One tick of player input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct UserCmd {
    /// Pitch, yaw, roll in degrees.
    pub angles: [f32; 3],
    pub buttons: u32,
    /// Set on the tick the flashlight key went down.
    pub flashlight: bool,
}

impl UserCmd {
    pub fn new(angles: Vec3, buttons: Buttons, flashlight: bool) -> Self {
        Self {
            angles: angles.to_array(),
            buttons: buttons.bits(),
            flashlight,
        }
    }

    pub fn angles(&self) -> Vec3 {
        Vec3::from_array(self.angles)
    }

    pub fn buttons(&self) -> Buttons {
        Buttons::from_bits_truncate(self.buttons)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMessageType {
    Disconnect = 0,
    ServerInfo = 1,
    ConVar = 2,
    EntityList = 3,
}

impl TryFrom<u8> for ServerMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disconnect),
            1 => Ok(Self::ServerInfo),
            2 => Ok(Self::ConVar),
            3 => Ok(Self::EntityList),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Disconnect(Disconnect),
    ServerInfo(ServerInfo),
    ConVar(ConVar),
    EntityList(EntityList),
}

impl ServerMessage {
    pub fn message_type(&self) -> ServerMessageType {
        match self {
            ServerMessage::Disconnect(_) => ServerMessageType::Disconnect,
            ServerMessage::ServerInfo(_) => ServerMessageType::ServerInfo,
            ServerMessage::ConVar(_) => ServerMessageType::ConVar,
            ServerMessage::EntityList(_) => ServerMessageType::EntityList,
        }
    }

    pub fn disconnect(reason: impl Into<String>) -> Self {
        ServerMessage::Disconnect(Disconnect {
            reason: reason.into(),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            ServerMessage::Disconnect(msg) => msg.to_payload()?,
            ServerMessage::ServerInfo(msg) => msg.to_payload()?,
            ServerMessage::ConVar(msg) => msg.to_payload()?,
            ServerMessage::EntityList(msg) => msg.to_payload()?,
        };
        Envelope::new(self.message_type() as u8, payload).encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = Envelope::decode(data)?;
        let payload = envelope.payload.as_slice();

        Ok(match ServerMessageType::try_from(envelope.msg_type)? {
            ServerMessageType::Disconnect => {
                ServerMessage::Disconnect(Disconnect::from_payload(payload)?)
            }
            ServerMessageType::ServerInfo => {
                ServerMessage::ServerInfo(ServerInfo::from_payload(payload)?)
            }
            ServerMessageType::ConVar => ServerMessage::ConVar(ConVar::from_payload(payload)?),
            ServerMessageType::EntityList => {
                ServerMessage::EntityList(EntityList::from_payload(payload)?)
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageType {
    ClientInfo = 0,
    UserCmd = 1,
    ConVar = 2,
    Disconnect = 3,
}

impl TryFrom<u8> for ClientMessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::ClientInfo),
            1 => Ok(Self::UserCmd),
            2 => Ok(Self::ConVar),
            3 => Ok(Self::Disconnect),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    ClientInfo(ClientInfo),
    UserCmd(UserCmd),
    ConVar(ConVar),
    Disconnect(Disconnect),
}

impl ClientMessage {
    pub fn message_type(&self) -> ClientMessageType {
        match self {
            ClientMessage::ClientInfo(_) => ClientMessageType::ClientInfo,
            ClientMessage::UserCmd(_) => ClientMessageType::UserCmd,
            ClientMessage::ConVar(_) => ClientMessageType::ConVar,
            ClientMessage::Disconnect(_) => ClientMessageType::Disconnect,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            ClientMessage::ClientInfo(msg) => msg.to_payload()?,
            ClientMessage::UserCmd(msg) => msg.to_payload()?,
            ClientMessage::ConVar(msg) => msg.to_payload()?,
            ClientMessage::Disconnect(msg) => msg.to_payload()?,
        };
        Envelope::new(self.message_type() as u8, payload).encode()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = Envelope::decode(data)?;
        let payload = envelope.payload.as_slice();

        Ok(match ClientMessageType::try_from(envelope.msg_type)? {
            ClientMessageType::ClientInfo => {
                ClientMessage::ClientInfo(ClientInfo::from_payload(payload)?)
            }
            ClientMessageType::UserCmd => ClientMessage::UserCmd(UserCmd::from_payload(payload)?),
            ClientMessageType::ConVar => ClientMessage::ConVar(ConVar::from_payload(payload)?),
            ClientMessageType::Disconnect => {
                ClientMessage::Disconnect(Disconnect::from_payload(payload)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_survives_the_wire() {
        let msg = ServerMessage::ServerInfo(ServerInfo {
            name: "TestServer".to_string(),
            map_name: "de_test".to_string(),
            player_entity_id: 7,
            new_port: -1,
        });

        let bytes = msg.encode().unwrap();
        assert_eq!(ServerMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn user_cmd_buttons() {
        let cmd = UserCmd::new(
            Vec3::new(10.0, 90.0, 0.0),
            Buttons::FORWARD | Buttons::DUCK,
            true,
        );
        let bytes = ClientMessage::UserCmd(cmd).encode().unwrap();

        let ClientMessage::UserCmd(decoded) = ClientMessage::decode(&bytes).unwrap() else {
            panic!("wrong message type");
        };
        assert_eq!(decoded.buttons(), Buttons::FORWARD | Buttons::DUCK);
        assert_eq!(decoded.angles(), Vec3::new(10.0, 90.0, 0.0));
        assert!(decoded.flashlight);
    }

    #[test]
    fn unknown_type_is_reported() {
        let bytes = Envelope::new(200, Vec::new()).encode().unwrap();
        assert!(matches!(
            ServerMessage::decode(&bytes),
            Err(ProtocolError::UnknownMessageType(200))
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut envelope = Envelope::new(ServerMessageType::Disconnect as u8, Vec::new());
        envelope.magic = 0xDEAD_BEEF;
        let bytes = envelope.encode().unwrap();
        assert!(matches!(
            ServerMessage::decode(&bytes),
            Err(ProtocolError::BadMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn garbage_does_not_panic() {
        assert!(ClientMessage::decode(&[1, 2, 3]).is_err());
        assert!(ClientMessage::decode(&[]).is_err());
    }
}
