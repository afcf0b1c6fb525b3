use std::sync::Arc;

use chroma::console::{self, CommandSource};
use chroma::entity::components::{Light, Transform};
use chroma::entity::LightSystem;
use chroma::net::InputState;
use chroma::player::{self, ViewConfig};
use chroma::{
    register_base_components, ClientConfig, ClientConnection, ClientEvent, ClientState,
    ComponentRegistry, ConsoleCommand, EntityStore, GameClock, Side,
};

use crate::maps::MapDirectory;

/// Lines the client handles itself instead of parsing as console commands.
const QUIT: &str = "quit";
const STATUS: &str = "status";

pub struct App {
    connection: ClientConnection,
    registry: Arc<ComponentRegistry>,
    store: EntityStore,
    maps: MapDirectory,
    view: ViewConfig,
    input: InputState,
    clock: GameClock,
    running: bool,
}

impl App {
    pub fn new(config: ClientConfig, maps: MapDirectory) -> Result<Self, chroma::entity::RegistryError> {
        let mut registry = ComponentRegistry::new();
        register_base_components(&mut registry)?;
        let registry = Arc::new(registry);

        Ok(Self {
            connection: ClientConnection::new(config),
            store: EntityStore::new(Arc::clone(&registry), Side::Client),
            registry,
            maps,
            view: ViewConfig::default(),
            input: InputState::default(),
            clock: GameClock::new(),
            running: true,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> ClientState {
        self.connection.state()
    }

    /// One client tick: network, replication, then the local view.
    pub fn tick(&mut self, dt: f32) {
        self.clock.advance(dt);

        let cmd = (self.connection.state() == ClientState::Connected)
            .then(|| self.input.to_command());
        let events = self.connection.update(
            self.clock.now(),
            f64::from(dt),
            &mut self.maps,
            &mut self.store,
            cmd,
        );
        for event in events {
            self.handle_event(event);
        }

        self.store.run_systems(dt);

        if let Some(player) = self.connection.local_player() {
            // the player arrives with the first entity list
            if let Err(e) = player::update_local_view(&mut self.store, player, &self.view, dt) {
                log::debug!("Local view not updated: {}", e);
            }
        }
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::StateChanged { from, to } => {
                log::debug!("Connection state {:?} -> {:?}", from, to);
                if to == ClientState::Connected {
                    log::info!("Connected");
                }
            }
            ClientEvent::ServerInfo(info) => {
                log::debug!("Server info: {:?}", info);
            }
            ClientEvent::Command(command) => self.run_local(command),
            ClientEvent::EntitiesApplied(stats) => {
                log::trace!("Applied entity list: {:?}", stats);
            }
            ClientEvent::ConnectionProblem { silent_for } => {
                log::warn!("Connection problem ({:.1}s without data)", silent_for);
            }
            ClientEvent::Disconnected { reason } => {
                log::info!("Disconnected: {}", reason);
                self.reset_store();
            }
        }
    }

    fn reset_store(&mut self) {
        self.store = EntityStore::new(Arc::clone(&self.registry), Side::Client);
    }

    /// Runs one line typed at the console.
    pub fn handle_line(&mut self, line: &str) {
        match line.trim() {
            "" => return,
            QUIT => {
                if let Some(event) = self.connection.disconnect("Quit") {
                    self.handle_event(event);
                }
                self.running = false;
                return;
            }
            STATUS => {
                self.print_status();
                return;
            }
            _ => {}
        }

        for parsed in console::parse_line(line) {
            let command = match parsed {
                Ok(command) => command,
                Err(e) => {
                    log::warn!("{}", e);
                    continue;
                }
            };
            if let Err(e) = command.check_permission(CommandSource::Client) {
                log::warn!("{}", e);
                continue;
            }

            if command.is_forwarded() {
                if self.connection.state() == ClientState::Connected {
                    self.connection.queue_command(command.to_string());
                } else {
                    log::warn!("\"{}\" needs a connection", command.name());
                }
            } else {
                self.run_local(command);
            }
        }
    }

    fn run_local(&mut self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Connect(address) => {
                if let Err(e) = self.connection.connect(&address, self.clock.now()) {
                    log::error!("Failed to connect to {}: {}", address, e);
                }
            }
            ConsoleCommand::Disconnect => {
                if let Some(event) = self.connection.disconnect("Disconnect by user") {
                    self.handle_event(event);
                }
            }
            ConsoleCommand::Name(username) => match self.connection.set_username(&username) {
                Ok(()) => log::info!("Username set to \"{}\"", username),
                Err(e) => log::warn!("{}", e),
            },
            forwarded => self.connection.queue_command(forwarded.to_string()),
        }
    }

    fn print_status(&self) {
        let state = self.connection.state();
        match self.connection.server_info() {
            Some(info) => log::info!(
                "{:?} to \"{}\" on {} ({} entities)",
                state,
                info.name,
                info.map_name,
                self.store.entity_count()
            ),
            None => log::info!("{:?}", state),
        }

        if let Some(player) = self.connection.local_player() {
            if let Some(transform) = self.store.get::<Transform>(player) {
                log::info!("Player {} at {}", player, transform.pos.value());
            }
            if let Some(light) = self.store.get::<Light>(player) {
                log::info!(
                    "Flashlight {}",
                    if light.enabled.value() { "on" } else { "off" }
                );
            }
        }

        let lights = self
            .store
            .type_of::<Light>()
            .ok()
            .and_then(|ty| self.store.system::<LightSystem>(ty))
            .map_or(0, LightSystem::len);
        log::info!("{} active light instances", lights);
    }
}
