use chroma::{MovementConfig, ViewConfig, DEFAULT_TICK_RATE};
use chroma::map::TestingGround;
use chroma::net::DEFAULT_CLIENT_TIMEOUT;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Sent to clients in SERVER_INFO.
    pub name: String,
    pub map: String,
    pub tick_rate: u32,
    pub max_clients: usize,
    /// Seconds of silence before a peer is dropped.
    pub client_timeout: f64,
    pub movement: MovementConfig,
    pub view: ViewConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "TestServer".to_string(),
            map: TestingGround::NAME.to_string(),
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
            movement: MovementConfig::default(),
            view: ViewConfig::default(),
        }
    }
}
