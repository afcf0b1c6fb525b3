mod config;
mod events;
mod server;
mod tui;

use std::io;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerConfig;
use events::ServerEvent;
use server::GameServer;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "chroma-server")]
#[command(about = "Chroma dedicated server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = chroma::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = chroma::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(short, long, help = "Server name sent to clients")]
    name: Option<String>,

    #[arg(long, help = "Map to load")]
    map: Option<String>,

    #[arg(long, help = "Seconds of silence before a client is dropped")]
    timeout: Option<f64>,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        name: args.name.unwrap_or(defaults.name.clone()),
        map: args.map.unwrap_or(defaults.map.clone()),
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        client_timeout: args.timeout.unwrap_or(defaults.client_timeout),
        ..defaults
    };

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut server = GameServer::new(&bind_addr, config)?;

    if args.headless {
        match server.local_addr() {
            Some(addr) => log::info!("Server started on {}", addr),
            None => log::info!("Server started on {}", bind_addr),
        }
        server.run(log_event);
        log::info!("Server shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected { .. }
        | ServerEvent::ClientDisconnected { .. }
        | ServerEvent::Command { .. } => log::info!("{}", describe(event)),
        ServerEvent::ConnectionDenied { .. } => log::warn!("{}", describe(event)),
        ServerEvent::Error { .. } => log::error!("{}", describe(event)),
    }
}

fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::ClientConnected {
            client_id,
            name,
            addr,
            entity,
        } => format!(
            "Client {} ({}) connected from {} as {}",
            client_id, name, addr, entity
        ),
        ServerEvent::ClientDisconnected {
            client_id,
            name,
            reason,
        } => format!("Client {} ({}) {}", client_id, name, reason.as_str()),
        ServerEvent::ConnectionDenied { addr, reason } => {
            format!("Connection denied to {}: {}", addr, reason)
        }
        ServerEvent::Command { client_id, command } => {
            format!("Client {} ran \"{}\"", client_id, command)
        }
        ServerEvent::Error { message } => message.clone(),
    }
}

fn run_with_tui(server: &mut GameServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();

    if let Some(addr) = server.local_addr() {
        tui_state.log_info(format!("Server started on {}", addr));
    }

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            let message = describe(&event);
            match event {
                ServerEvent::ConnectionDenied { .. } => tui_state.log_warn(message),
                ServerEvent::Error { .. } => tui_state.log_error(message),
                _ => tui_state.log_info(message),
            }
        }

        if let Some(client_id) = tui_state.take_pending_kick() {
            server.kick_client(client_id);
        }

        if event::poll(Duration::from_millis(1))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let clients = server.client_infos();
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => {
                            running.store(false, Ordering::SeqCst);
                        }
                        KeyCode::Up => tui_state.select_prev(clients.len()),
                        KeyCode::Down => tui_state.select_next(clients.len()),
                        KeyCode::Char('k') | KeyCode::Char('K') => {
                            tui_state.request_kick(&clients);
                        }
                        _ => {}
                    }
                }
            }
        }

        let stats = server.stats();
        let clients = server.client_infos();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients);
        })?;
    }

    server.shutdown_connections();

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
