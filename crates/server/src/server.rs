use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use chroma::console::{self, CommandSource};
use chroma::entity::components::{MoveType, PhysObject};
use chroma::map::TestingGround;
use chroma::net::{
    replication, ClientMessage, ClientTable, ClientTableError, ConVar, NetworkStats,
    ServerInfo, ServerMessage, UdpTransport, UserCmd, MAX_USERNAME_LEN,
};
use chroma::physics::BodyHandle;
use chroma::player::{self, MovementError};
use chroma::{
    register_base_components, ComponentRegistry, ConsoleCommand, EntityId, EntityStore,
    FixedTimestep, GameClock, PhysicsWorld, Side,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};

pub struct GameServer {
    transport: UdpTransport,
    clients: ClientTable,
    config: ServerConfig,
    store: EntityStore,
    physics: PhysicsWorld,
    map: EntityId,
    timestep: FixedTimestep,
    clock: GameClock,
    last_tick_time: Instant,
    running: Arc<AtomicBool>,
    start_time: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> Result<Self> {
        if config.map != TestingGround::NAME {
            bail!("unknown map \"{}\"", config.map);
        }

        let transport = UdpTransport::bind(bind_addr)
            .with_context(|| format!("failed to bind {}", bind_addr))?;

        let mut registry = ComponentRegistry::new();
        register_base_components(&mut registry)?;
        let mut store = EntityStore::new(Arc::new(registry), Side::Server);

        let timestep = FixedTimestep::new(config.tick_rate);
        let mut physics = PhysicsWorld::new(config.movement.gravity);
        physics.set_timestep(timestep.dt());

        let map = TestingGround::new().spawn(&mut store, &mut physics)?;

        Ok(Self {
            transport,
            clients: ClientTable::with_timeout(config.max_clients, config.client_timeout),
            store,
            physics,
            map,
            timestep,
            clock: GameClock::new(),
            last_tick_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Ticks until [`running`](Self::running) is cleared.
    pub fn run(&mut self, mut on_event: impl FnMut(&ServerEvent)) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.pending_events.drain(..) {
                on_event(&event);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown_connections();
    }

    pub fn shutdown_connections(&mut self) {
        let client_ids: Vec<u32> = self.clients.iter().map(|c| c.client_id).collect();
        for client_id in client_ids {
            self.drop_client(client_id, "Server shutting down", DisconnectReason::Kicked);
        }
    }

    pub fn kick_client(&mut self, client_id: u32) {
        self.drop_client(client_id, "Kicked", DisconnectReason::Kicked);
    }

    fn drop_client(&mut self, client_id: u32, message: &str, reason: DisconnectReason) {
        let Some(addr) = self.clients.get(client_id).map(|c| c.addr) else {
            return;
        };
        self.send(&ServerMessage::disconnect(message), addr);

        if let Some(record) = self.clients.remove_by_addr(&addr) {
            self.remove_client_entity(record.entity);
            log::info!("Client {} ({}) {}", record.client_id, record.name, reason.as_str());
            self.pending_events.push_back(ServerEvent::ClientDisconnected {
                client_id: record.client_id,
                name: record.name,
                reason,
            });
        }
    }

    fn remove_client_entity(&mut self, entity: Option<EntityId>) {
        if let Some(player) = entity {
            player::remove_player(&mut self.store, &mut self.physics, player);
        }
    }

    /// Reads the socket, then runs as many fixed ticks as real time allows.
    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.timestep.accumulate(delta.as_secs_f32());

        if let Err(e) = self.process_network() {
            log::error!("Network error: {}", e);
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            });
        }

        while self.timestep.consume_tick() {
            self.tick(self.timestep.dt());
        }
    }

    fn tick(&mut self, dt: f32) {
        self.clock.advance(dt);

        self.update_players(dt);
        self.physics.step();
        self.update_positions();

        self.store.run_systems(dt);

        self.broadcast_entities();
        self.check_timeouts();
    }

    fn body_of(&self, player: EntityId) -> Option<BodyHandle> {
        self.store.get::<PhysObject>(player).and_then(|p| p.body)
    }

    fn update_players(&mut self, dt: f32) {
        let players: Vec<(EntityId, UserCmd)> = self
            .clients
            .iter_mut()
            .filter_map(|record| {
                let cmd = record.user_cmd;
                // the toggle edge is consumed once
                record.user_cmd.flashlight = false;
                record.entity.map(|e| (e, cmd))
            })
            .collect();

        for (player, cmd) in players {
            let result = match self.body_of(player).and_then(|h| self.physics.body_mut(h)) {
                Some(mut body) => player::update_player(
                    &mut self.store,
                    player,
                    &cmd,
                    &mut body,
                    &self.config.movement,
                    &self.config.view,
                    dt,
                ),
                None => Err(MovementError::NoPhysicsBody(player)),
            };
            if let Err(e) = result {
                log::error!("Failed to update player {}: {}", player, e);
            }
        }
    }

    fn update_positions(&mut self) {
        let players: Vec<EntityId> = self.clients.iter().filter_map(|c| c.entity).collect();

        for player in players {
            let result = match self.body_of(player).and_then(|h| self.physics.body_mut(h)) {
                Some(body) => {
                    player::update_position(&mut self.store, player, &body, &self.config.movement)
                }
                None => Err(MovementError::NoPhysicsBody(player)),
            };
            if let Err(e) = result {
                log::error!("Failed to update position of {}: {}", player, e);
            }
        }
    }

    /// One delta per tick shared by every peer. Peers that just joined get a
    /// full snapshot instead, and keep asking for one until it goes out.
    fn broadcast_entities(&mut self) {
        let list = replication::encode_delta(&self.store);
        let delta = match ServerMessage::EntityList(list.clone()).encode() {
            Ok(bytes) => {
                replication::commit_delta(&mut self.store, &list);
                Some(bytes)
            }
            Err(e) => {
                // uncommitted, so the same changes are retried next tick
                log::error!("Failed to encode entity list: {}", e);
                None
            }
        };

        let targets: Vec<(SocketAddr, bool)> = self
            .clients
            .iter()
            .map(|record| (record.addr, record.needs_full_state))
            .collect();

        let mut full = None;
        for (addr, needs_full) in targets {
            if !needs_full {
                if let Some(delta) = &delta {
                    if let Err(e) = self.transport.write(delta, addr) {
                        log::error!("Failed to send entities to {}: {}", addr, e);
                    }
                }
                continue;
            }

            let full = full.get_or_insert_with(|| {
                ServerMessage::EntityList(replication::encode_full(&self.store)).encode()
            });
            let bytes = match full {
                Ok(bytes) => bytes.as_slice(),
                Err(e) => {
                    log::error!("Failed to encode full state for {}: {}", addr, e);
                    continue;
                }
            };
            match self.transport.write(bytes, addr) {
                Ok(_) => {
                    if let Some(record) = self.clients.get_by_addr_mut(&addr) {
                        record.needs_full_state = false;
                    }
                }
                Err(e) => log::error!("Failed to send full state to {}: {}", addr, e),
            }
        }
    }

    fn check_timeouts(&mut self) {
        for record in self.clients.cleanup_timed_out(self.clock.now()) {
            log::warn!("Client {} ({}) timed out", record.client_id, record.name);
            self.send(&ServerMessage::disconnect("Timed out"), record.addr);
            self.remove_client_entity(record.entity);
            self.pending_events.push_back(ServerEvent::ClientDisconnected {
                client_id: record.client_id,
                name: record.name,
                reason: DisconnectReason::Timeout,
            });
        }
    }

    fn process_network(&mut self) -> io::Result<()> {
        for (data, addr) in self.transport.read_all()? {
            match ClientMessage::decode(&data) {
                Ok(message) => self.handle_message(message, addr),
                Err(e) => log::warn!("Bad packet from {}: {}", addr, e),
            }
        }
        Ok(())
    }

    fn handle_message(&mut self, message: ClientMessage, addr: SocketAddr) {
        let now = self.clock.now();
        if !matches!(message, ClientMessage::ClientInfo(_)) && !self.clients.touch(&addr, now) {
            log::debug!("Dropping {:?} from unknown peer {}", message.message_type(), addr);
            return;
        }

        match message {
            ClientMessage::ClientInfo(info) => self.handle_client_info(&info.name, addr),
            ClientMessage::UserCmd(cmd) => {
                if let Some(record) = self.clients.get_by_addr_mut(&addr) {
                    let flashlight = record.user_cmd.flashlight || cmd.flashlight;
                    record.user_cmd = cmd;
                    record.user_cmd.flashlight = flashlight;
                }
            }
            ClientMessage::ConVar(ConVar { command }) => self.handle_commands(&command, addr),
            ClientMessage::Disconnect(msg) => {
                if let Some(record) = self.clients.remove_by_addr(&addr) {
                    log::info!("Client {} ({}) left: {}", record.client_id, record.name, msg.reason);
                    self.remove_client_entity(record.entity);
                    self.pending_events.push_back(ServerEvent::ClientDisconnected {
                        client_id: record.client_id,
                        name: record.name,
                        reason: DisconnectReason::Graceful(msg.reason),
                    });
                }
            }
        }
    }

    fn deny(&mut self, addr: SocketAddr, reason: &str) {
        log::warn!("Connection denied to {}: {}", addr, reason);
        self.send(&ServerMessage::disconnect(reason), addr);
        self.pending_events.push_back(ServerEvent::ConnectionDenied {
            addr,
            reason: reason.to_string(),
        });
    }

    fn handle_client_info(&mut self, name: &str, addr: SocketAddr) {
        if name.chars().count() > MAX_USERNAME_LEN {
            self.deny(addr, "Username too long");
            return;
        }

        let now = self.clock.now();
        let (client_id, existing) = match self.clients.get_or_create(addr, name, now) {
            Ok((record, created)) => (record.client_id, record.entity.filter(|_| !created)),
            Err(ClientTableError::Full) => {
                self.deny(addr, "Server full");
                return;
            }
        };

        // a repeated handshake gets the same player back
        let entity = match existing {
            Some(entity) => entity,
            None => match self.spawn_player() {
                Ok(entity) => entity,
                Err(e) => {
                    log::error!("Failed to spawn player for {}: {}", addr, e);
                    self.clients.remove_by_addr(&addr);
                    self.deny(addr, "Failed to spawn player");
                    return;
                }
            },
        };

        if let Some(record) = self.clients.get_by_addr_mut(&addr) {
            record.entity = Some(entity);
            record.needs_full_state = true;
        }

        let info = ServerMessage::ServerInfo(ServerInfo {
            name: self.config.name.clone(),
            map_name: self.config.map.clone(),
            player_entity_id: entity.raw(),
            new_port: -1,
        });
        self.send(&info, addr);

        if existing.is_none() {
            log::info!("Client {} ({}) connected from {} as {}", client_id, name, addr, entity);
            self.pending_events.push_back(ServerEvent::ClientConnected {
                client_id,
                name: name.to_string(),
                addr,
                entity,
            });
        }
    }

    fn spawn_player(&mut self) -> Result<EntityId, MovementError> {
        let player = player::create_player(
            &mut self.store,
            &mut self.physics,
            &self.config.movement,
            &self.config.view,
        )?;

        let result = match self.body_of(player).and_then(|h| self.physics.body_mut(h)) {
            Some(mut body) => player::spawn(
                &mut self.store,
                player,
                &mut body,
                &self.config.movement,
                &self.config.view,
            ),
            None => Err(MovementError::NoPhysicsBody(player)),
        };

        if let Err(e) = result {
            player::remove_player(&mut self.store, &mut self.physics, player);
            return Err(e);
        }
        Ok(player)
    }

    /// Runs forwarded console commands against the sender's player.
    fn handle_commands(&mut self, line: &str, addr: SocketAddr) {
        let Some((client_id, player)) = self
            .clients
            .get_by_addr(&addr)
            .and_then(|c| c.entity.map(|e| (c.client_id, e)))
        else {
            return;
        };

        for parsed in console::parse_line(line) {
            let command = match parsed.and_then(|c| c.check_permission(CommandSource::Client).map(|_| c)) {
                Ok(command) if command.is_forwarded() => command,
                Ok(command) => {
                    log::warn!("Client {} sent local command \"{}\"", client_id, command);
                    continue;
                }
                Err(e) => {
                    log::warn!("Client {} sent bad command: {}", client_id, e);
                    continue;
                }
            };

            if let Err(e) = self.run_player_command(player, &command) {
                log::error!("\"{}\" failed for {}: {}", command, player, e);
                continue;
            }
            self.pending_events.push_back(ServerEvent::Command {
                client_id,
                command: command.to_string(),
            });
        }
    }

    fn run_player_command(
        &mut self,
        player: EntityId,
        command: &ConsoleCommand,
    ) -> Result<(), MovementError> {
        let Some(mut body) = self.body_of(player).and_then(|h| self.physics.body_mut(h)) else {
            return Err(MovementError::NoPhysicsBody(player));
        };
        let store = &mut self.store;
        let movement = &self.config.movement;

        match command {
            ConsoleCommand::Respawn => {
                player::respawn(store, player, &mut body, movement, &self.config.view)
            }
            ConsoleCommand::ResetVelocity => player::reset_velocity(store, player, &mut body),
            ConsoleCommand::NoClip => {
                player::toggle_move_type(store, player, MoveType::NoClip, &mut body).map(|_| ())
            }
            ConsoleCommand::Fly => {
                player::toggle_move_type(store, player, MoveType::Fly, &mut body).map(|_| ())
            }
            ConsoleCommand::Connect(_) | ConsoleCommand::Disconnect | ConsoleCommand::Name(_) => {
                Ok(())
            }
        }
    }

    fn send(&mut self, message: &ServerMessage, addr: SocketAddr) {
        let result = message
            .encode()
            .map_err(io::Error::other)
            .and_then(|bytes| self.transport.write(&bytes, addr));
        if let Err(e) = result {
            log::error!("Failed to send {:?} to {}: {}", message.message_type(), addr, e);
        }
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.clock.tick(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            client_count: self.clients.len(),
            max_clients: self.clients.max_clients(),
            entity_count: self.store.entity_count(),
            map_name: self.config.map.clone(),
            map_entity: self.map,
            network_stats: self.transport.stats().clone(),
        }
    }

    pub fn client_infos(&self) -> Vec<crate::tui::ClientInfo> {
        let now = self.clock.now();
        self.clients
            .iter()
            .map(|c| crate::tui::ClientInfo {
                client_id: c.client_id,
                name: c.name.clone(),
                addr: c.addr.to_string(),
                entity: c.entity,
                idle_secs: now - c.last_receive_time,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u64,
    pub uptime_secs: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub map_name: String,
    pub map_entity: EntityId,
    pub network_stats: NetworkStats,
}
