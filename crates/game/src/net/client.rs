use std::io;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::console::{self, CommandSource, ConsoleCommand};
use crate::entity::{EntityId, EntityStore};
use crate::map::MapProvider;

use super::protocol::{
    ClientInfo, ClientMessage, ConVar, Disconnect, ServerInfo, ServerMessage, UserCmd,
    MAX_USERNAME_LEN,
};
use super::replication::{self, ApplyStats};
use super::transport::{resolve_address, UdpTransport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Seconds to wait for SERVER_INFO after the handshake.
    pub connect_timeout: f64,
    /// Seconds of silence before a connected client gives up.
    pub timeout: f64,
    /// Seconds of silence before the connection-problem warning.
    pub timeout_threshold: f64,
    pub username: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30.0,
            timeout: 120.0,
            timeout_threshold: 4.0,
            username: "greg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    RecvServerInfo,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid address \"{address}\": {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("username is {0} characters, the limit is {max}", max = MAX_USERNAME_LEN)]
    UsernameTooLong(usize),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

/// What happened during one [`ClientConnection::update`].
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged { from: ClientState, to: ClientState },
    ServerInfo(ServerInfo),
    /// A command the server asked this client to run.
    Command(ConsoleCommand),
    EntitiesApplied(ApplyStats),
    ConnectionProblem { silent_for: f64 },
    Disconnected { reason: String },
}

/// Client side of the connection lifecycle:
/// `Idle -> RecvServerInfo -> Connecting -> Connected -> Idle`.
pub struct ClientConnection {
    config: ClientConfig,
    state: ClientState,
    transport: UdpTransport,
    server_addr: Option<SocketAddr>,
    /// Game clock deadline for SERVER_INFO. Zero when unarmed.
    connect_deadline: f64,
    timeout_remaining: f64,
    warned: bool,
    server_info: Option<ServerInfo>,
    pending_commands: Vec<String>,
    hosting: bool,
    events: Vec<ClientEvent>,
}

impl ClientConnection {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            timeout_remaining: config.timeout,
            config,
            state: ClientState::Idle,
            transport: UdpTransport::closed(),
            server_addr: None,
            connect_deadline: 0.0,
            warned: false,
            server_info: None,
            pending_commands: Vec::new(),
            hosting: false,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server_addr
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// The player entity the server assigned to us.
    pub fn local_player(&self) -> Option<EntityId> {
        self.server_info
            .as_ref()
            .map(|info| EntityId::new(info.player_entity_id))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn connect_deadline(&self) -> f64 {
        self.connect_deadline
    }

    pub fn timeout_remaining(&self) -> f64 {
        self.timeout_remaining
    }

    pub fn transport(&self) -> &UdpTransport {
        &self.transport
    }

    /// A client running inside the server process skips the map check.
    pub fn set_hosting(&mut self, hosting: bool) {
        self.hosting = hosting;
    }

    pub fn set_username(&mut self, username: &str) -> Result<(), ConnectError> {
        let len = username.chars().count();
        if len > MAX_USERNAME_LEN {
            return Err(ConnectError::UsernameTooLong(len));
        }
        self.config.username = username.to_string();
        Ok(())
    }

    /// Queues a command for the server. Everything queued goes out as one
    /// CON_VAR on the next connected tick.
    pub fn queue_command(&mut self, command: impl Into<String>) {
        self.pending_commands.push(command.into());
    }

    pub fn pending_commands(&self) -> &[String] {
        &self.pending_commands
    }

    pub fn connect(&mut self, address: &str, now: f64) -> Result<(), ConnectError> {
        if let Some(event) = self.disconnect("Connecting to another server") {
            self.events.push(event);
        }

        let len = self.config.username.chars().count();
        if len > MAX_USERNAME_LEN {
            return Err(ConnectError::UsernameTooLong(len));
        }

        let server_addr =
            resolve_address(address).map_err(|source| ConnectError::InvalidAddress {
                address: address.to_string(),
                source,
            })?;

        self.transport = UdpTransport::open_for(server_addr).inspect_err(|e| {
            log::error!("Failed to open socket: {}", e);
        })?;
        self.server_addr = Some(server_addr);

        let handshake = ClientMessage::ClientInfo(ClientInfo {
            name: self.config.username.clone(),
        });
        if let Err(e) = self.send(&handshake) {
            log::error!("Failed to send handshake to {}: {}", server_addr, e);
            self.disconnect("Failed to send handshake");
            return Err(e.into());
        }

        log::info!(
            "Connecting to {} as \"{}\"",
            server_addr,
            self.config.username
        );
        self.set_state(ClientState::RecvServerInfo);
        self.connect_deadline = now + self.config.connect_timeout;
        Ok(())
    }

    /// Safe from any state. Returns an event only when a connection was
    /// actually torn down.
    pub fn disconnect(&mut self, reason: &str) -> Option<ClientEvent> {
        if self.state == ClientState::Idle {
            self.transport.close();
            self.server_addr = None;
            self.connect_deadline = 0.0;
            return None;
        }

        // best effort; the server times us out otherwise
        let goodbye = ClientMessage::Disconnect(Disconnect {
            reason: reason.to_string(),
        });
        if let Err(e) = self.send(&goodbye) {
            log::debug!("Disconnect notice not sent: {}", e);
        }

        self.transport.close();
        self.server_addr = None;
        self.connect_deadline = 0.0;
        self.server_info = None;
        self.pending_commands.clear();
        self.warned = false;

        log::info!("Disconnected: {}", reason);
        self.set_state(ClientState::Idle);

        Some(ClientEvent::Disconnected {
            reason: reason.to_string(),
        })
    }

    /// Advances the state machine by one tick. `now` is the game clock and
    /// `frame_time` the seconds since the previous call.
    pub fn update(
        &mut self,
        now: f64,
        frame_time: f64,
        maps: &mut dyn MapProvider,
        store: &mut EntityStore,
        cmd: Option<UserCmd>,
    ) -> Vec<ClientEvent> {
        match self.state {
            ClientState::Idle => {}
            ClientState::RecvServerInfo => self.recv_server_info(now),
            ClientState::Connecting => self.check_map(maps),
            ClientState::Connected => self.update_connected(frame_time, store, cmd),
        }

        // the handshake may finish within a single tick
        if self.state == ClientState::Connecting {
            self.check_map(maps);
        }

        std::mem::take(&mut self.events)
    }

    fn recv_server_info(&mut self, now: f64) {
        loop {
            let (data, from) = match self.transport.read() {
                Ok(Some((data, from))) => (data.to_vec(), from),
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read from socket: {}", e);
                    self.disconnect_with_event("Socket error");
                    return;
                }
            };

            match ServerMessage::decode(&data) {
                Ok(ServerMessage::ServerInfo(info)) => {
                    // the reply comes from the address we should talk to
                    let mut server_addr = from;
                    if info.new_port >= 0 {
                        match u16::try_from(info.new_port) {
                            Ok(port) => server_addr.set_port(port),
                            Err(_) => log::warn!("Ignoring bad port {}", info.new_port),
                        }
                    }
                    self.server_addr = Some(server_addr);
                    self.connect_deadline = 0.0;
                    self.timeout_remaining = self.config.timeout;
                    self.apply_server_info(info);
                    self.set_state(ClientState::Connecting);
                    return;
                }
                Ok(ServerMessage::Disconnect(msg)) => {
                    self.disconnect_with_event(&msg.reason);
                    return;
                }
                Ok(other) => {
                    log::debug!(
                        "Ignoring {:?} while waiting for server info",
                        other.message_type()
                    );
                }
                Err(e) => log::warn!("Bad packet from {}: {}", from, e),
            }
        }

        if now >= self.connect_deadline {
            log::warn!("No server info after {}s", self.config.connect_timeout);
            self.disconnect_with_event("Connection timed out");
        }
    }

    fn check_map(&mut self, maps: &mut dyn MapProvider) {
        if !self.hosting {
            let Some(map_name) = self.server_info.as_ref().map(|i| i.map_name.clone()) else {
                self.disconnect_with_event("Missing Map");
                return;
            };

            if !maps.find_map(&map_name) {
                log::warn!("Map \"{}\" is not available", map_name);
                self.disconnect_with_event("Missing Map");
                return;
            }
            if let Err(e) = maps.load_map(&map_name) {
                log::error!("{}", e);
                self.disconnect_with_event("Failed to Load Map");
                return;
            }
        }

        self.set_state(ClientState::Connected);
    }

    fn update_connected(
        &mut self,
        frame_time: f64,
        store: &mut EntityStore,
        cmd: Option<UserCmd>,
    ) {
        loop {
            let (data, from) = match self.transport.read() {
                Ok(Some((data, from))) => (data.to_vec(), from),
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read from socket: {}", e);
                    self.disconnect_with_event("Socket error");
                    return;
                }
            };

            if Some(from) != self.server_addr {
                log::debug!("Dropping packet from stranger {}", from);
                continue;
            }

            self.timeout_remaining = self.config.timeout;
            self.warned = false;

            let message = match ServerMessage::decode(&data) {
                Ok(message) => message,
                Err(e) => {
                    log::warn!("Bad packet from server: {}", e);
                    continue;
                }
            };

            match message {
                ServerMessage::Disconnect(msg) => {
                    self.disconnect_with_event(&msg.reason);
                    return;
                }
                ServerMessage::ServerInfo(info) => self.apply_server_info(info),
                ServerMessage::ConVar(msg) => self.run_server_command(&msg.command),
                ServerMessage::EntityList(list) => {
                    let stats = replication::apply(store, &list);
                    self.events.push(ClientEvent::EntitiesApplied(stats));
                }
            }
        }

        self.timeout_remaining -= frame_time;
        if self.timeout_remaining <= 0.0 {
            log::warn!("Server timed out after {}s", self.config.timeout);
            self.disconnect_with_event("Connection timed out");
            return;
        }

        let silent_for = self.config.timeout - self.timeout_remaining;
        if silent_for > self.config.timeout_threshold && !self.warned {
            log::warn!("Connection problem: nothing from server for {:.1}s", silent_for);
            self.warned = true;
            self.events.push(ClientEvent::ConnectionProblem { silent_for });
        }

        if !self.pending_commands.is_empty() {
            let command = console::join_commands(self.pending_commands.drain(..));
            if let Err(e) = self.send(&ClientMessage::ConVar(ConVar { command })) {
                log::error!("Failed to send commands: {}", e);
            }
        }

        if let Some(cmd) = cmd {
            if let Err(e) = self.send(&ClientMessage::UserCmd(cmd)) {
                log::error!("Failed to send user command: {}", e);
            }
        }
    }

    fn run_server_command(&mut self, line: &str) {
        for parsed in console::parse_line(line) {
            let command = match parsed {
                Ok(command) => command,
                Err(e) => {
                    log::warn!("Server sent bad command \"{}\": {}", line, e);
                    continue;
                }
            };
            match command.check_permission(CommandSource::Server) {
                Ok(()) => self.events.push(ClientEvent::Command(command)),
                Err(e) => log::warn!("Refused server command: {}", e),
            }
        }
    }

    fn apply_server_info(&mut self, info: ServerInfo) {
        log::info!(
            "Server \"{}\" on map {}, player entity {}",
            info.name,
            info.map_name,
            info.player_entity_id
        );
        self.events.push(ClientEvent::ServerInfo(info.clone()));
        self.server_info = Some(info);
    }

    fn disconnect_with_event(&mut self, reason: &str) {
        if let Some(event) = self.disconnect(reason) {
            self.events.push(event);
        }
    }

    fn set_state(&mut self, state: ClientState) {
        if self.state == state {
            return;
        }
        log::debug!("Client state {:?} -> {:?}", self.state, state);
        self.events.push(ClientEvent::StateChanged {
            from: self.state,
            to: state,
        });
        self.state = state;
    }

    fn send(&mut self, message: &ClientMessage) -> io::Result<usize> {
        let addr = self
            .server_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no server address"))?;
        let data = message
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.transport.write(&data, addr)
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("state", &self.state)
            .field("server_addr", &self.server_addr)
            .field("timeout_remaining", &self.timeout_remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entity::{register_base_components, ComponentRegistry, Side};
    use crate::map::{BuiltinMaps, MapError};
    use crate::net::protocol::ClientMessageType;

    struct NoMaps;

    impl MapProvider for NoMaps {
        fn find_map(&self, _name: &str) -> bool {
            false
        }

        fn load_map(&mut self, name: &str) -> Result<(), MapError> {
            Err(MapError::NotFound(name.to_string()))
        }
    }

    struct BrokenMaps;

    impl MapProvider for BrokenMaps {
        fn find_map(&self, _name: &str) -> bool {
            true
        }

        fn load_map(&mut self, name: &str) -> Result<(), MapError> {
            Err(MapError::Load {
                name: name.to_string(),
                reason: "corrupt".to_string(),
            })
        }
    }

    fn client_store() -> EntityStore {
        let mut registry = ComponentRegistry::new();
        register_base_components(&mut registry).unwrap();
        EntityStore::new(Arc::new(registry), Side::Client)
    }

    fn wait_for_packet(server: &mut UdpTransport) -> (Vec<u8>, SocketAddr) {
        let start = std::time::Instant::now();
        loop {
            if let Some((data, from)) = server.read().unwrap() {
                return (data.to_vec(), from);
            }
            assert!(start.elapsed().as_millis() < 1000, "no packet");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// Runs the handshake against a bare socket and returns it with the
    /// client's address.
    fn handshake(
        client: &mut ClientConnection,
        maps: &mut dyn MapProvider,
        store: &mut EntityStore,
    ) -> (UdpTransport, SocketAddr) {
        let mut server = UdpTransport::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();

        client.connect(&server_addr.to_string(), 0.0).unwrap();
        assert_eq!(client.state(), ClientState::RecvServerInfo);

        let (data, from) = wait_for_packet(&mut server);
        let hello = ClientMessage::decode(&data).unwrap();
        assert_eq!(hello.message_type(), ClientMessageType::ClientInfo);

        let info = ServerMessage::ServerInfo(ServerInfo {
            name: "TestServer".into(),
            map_name: "de_test".into(),
            player_entity_id: 7,
            new_port: -1,
        });
        server.write(&info.encode().unwrap(), from).unwrap();

        let start = std::time::Instant::now();
        while client.state() == ClientState::RecvServerInfo {
            client.update(0.0, 0.0, maps, store, None);
            assert!(start.elapsed().as_millis() < 1000, "no server info");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        (server, from)
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut client = ClientConnection::new(ClientConfig::default());
        assert!(client.disconnect("bye").is_none());
        assert!(client.disconnect("bye").is_none());
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(client.connect_deadline(), 0.0);
    }

    #[test]
    fn connect_timeout_returns_to_idle() {
        let mut client = ClientConnection::new(ClientConfig::default());
        let mut store = client_store();
        let mut maps = BuiltinMaps::default();

        // nothing listens here
        let silent = UdpTransport::bind("127.0.0.1:0").unwrap();
        client
            .connect(&silent.local_addr().unwrap().to_string(), 100.0)
            .unwrap();
        assert_eq!(client.connect_deadline(), 130.0);

        client.update(120.0, 0.1, &mut maps, &mut store, None);
        assert_eq!(client.state(), ClientState::RecvServerInfo);

        let events = client.update(130.0, 0.1, &mut maps, &mut store, None);
        assert_eq!(client.state(), ClientState::Idle);
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::Disconnected { .. })));
        assert!(client.local_addr().is_none());
    }

    #[test]
    fn missing_map_disconnects() {
        let mut client = ClientConnection::new(ClientConfig::default());
        let mut store = client_store();
        let mut maps = NoMaps;

        handshake(&mut client, &mut maps, &mut store);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn missing_map_reason() {
        let mut client = ClientConnection::new(ClientConfig::default());
        let mut store = client_store();
        let mut server = UdpTransport::bind("127.0.0.1:0").unwrap();
        client
            .connect(&server.local_addr().unwrap().to_string(), 0.0)
            .unwrap();
        let (_, from) = wait_for_packet(&mut server);
        let info = ServerMessage::ServerInfo(ServerInfo {
            name: "TestServer".into(),
            map_name: "de_nowhere".into(),
            player_entity_id: 7,
            new_port: -1,
        });
        server.write(&info.encode().unwrap(), from).unwrap();

        let start = std::time::Instant::now();
        let reason = loop {
            let events = client.update(0.0, 0.0, &mut NoMaps, &mut store, None);
            if let Some(reason) = events.iter().find_map(|e| match e {
                ClientEvent::Disconnected { reason } => Some(reason.clone()),
                _ => None,
            }) {
                break reason;
            }
            assert!(start.elapsed().as_millis() < 1000, "never disconnected");
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        assert_eq!(reason, "Missing Map");
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn failed_load_disconnects() {
        let mut client = ClientConnection::new(ClientConfig::default());
        let mut store = client_store();
        let mut maps = BrokenMaps;

        handshake(&mut client, &mut maps, &mut store);
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn hosting_skips_map_check() {
        let mut client = ClientConnection::new(ClientConfig::default());
        client.set_hosting(true);
        let mut store = client_store();
        let mut maps = NoMaps;

        handshake(&mut client, &mut maps, &mut store);
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(client.local_player(), Some(EntityId::new(7)));
    }

    #[test]
    fn silence_times_out_once() {
        let config = ClientConfig {
            timeout: 1.0,
            timeout_threshold: 0.25,
            ..Default::default()
        };
        let mut client = ClientConnection::new(config);
        let mut store = client_store();
        let mut maps = BuiltinMaps::default();

        let (_server, _) = handshake(&mut client, &mut maps, &mut store);
        assert_eq!(client.state(), ClientState::Connected);

        let mut problems = 0;
        let mut disconnects = 0;
        for _ in 0..20 {
            for event in client.update(0.0, 0.1, &mut maps, &mut store, None) {
                match event {
                    ClientEvent::ConnectionProblem { .. } => problems += 1,
                    ClientEvent::Disconnected { .. } => disconnects += 1,
                    _ => {}
                }
            }
        }

        assert_eq!(problems, 1);
        assert_eq!(disconnects, 1);
        assert_eq!(client.state(), ClientState::Idle);
        assert!(client.disconnect("again").is_none());
    }

    #[test]
    fn pending_commands_go_out_joined() {
        let mut client = ClientConnection::new(ClientConfig::default());
        let mut store = client_store();
        let mut maps = BuiltinMaps::default();

        let (mut server, _) = handshake(&mut client, &mut maps, &mut store);
        client.queue_command("respawn");
        client.queue_command("noclip");
        client.update(0.0, 0.016, &mut maps, &mut store, Some(UserCmd::default()));
        assert!(client.pending_commands().is_empty());

        let (data, _) = wait_for_packet(&mut server);
        assert_eq!(
            ClientMessage::decode(&data).unwrap(),
            ClientMessage::ConVar(ConVar {
                command: "respawn;noclip".into()
            })
        );
        let (data, _) = wait_for_packet(&mut server);
        assert_eq!(
            ClientMessage::decode(&data).unwrap().message_type(),
            ClientMessageType::UserCmd
        );
    }

    #[test]
    fn server_commands_are_checked() {
        let mut client = ClientConnection::new(ClientConfig::default());
        let mut store = client_store();
        let mut maps = BuiltinMaps::default();

        let (mut server, client_addr) = handshake(&mut client, &mut maps, &mut store);
        let msg = ServerMessage::ConVar(ConVar {
            command: "connect 10.0.0.1;connect localhost".into(),
        });
        server.write(&msg.encode().unwrap(), client_addr).unwrap();

        let start = std::time::Instant::now();
        let commands = loop {
            let commands: Vec<ConsoleCommand> = client
                .update(0.0, 0.0, &mut maps, &mut store, None)
                .into_iter()
                .filter_map(|e| match e {
                    ClientEvent::Command(c) => Some(c),
                    _ => None,
                })
                .collect();
            if !commands.is_empty() {
                break commands;
            }
            assert!(start.elapsed().as_millis() < 1000, "no command");
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        assert_eq!(commands, vec![ConsoleCommand::Connect("localhost".into())]);
    }

    #[test]
    fn username_limit() {
        let mut client = ClientConnection::new(ClientConfig::default());
        let err = client.set_username(&"x".repeat(33)).unwrap_err();
        assert_eq!(err.to_string(), "username is 33 characters, the limit is 32");
        client.set_username("alice").unwrap();
        assert_eq!(client.config().username, "alice");
    }
}
