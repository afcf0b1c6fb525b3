mod app;
mod maps;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use app::App;
use chroma::ClientConfig;
use maps::MapDirectory;

#[derive(Parser)]
#[command(name = "chroma-client")]
#[command(about = "Headless Chroma client")]
struct Args {
    #[arg(
        short,
        long,
        help = "Server address to connect to (e.g., 127.0.0.1:27016)"
    )]
    connect: Option<String>,

    #[arg(short, long, help = "Username, at most 32 characters")]
    username: Option<String>,

    #[arg(long, default_value = "maps", help = "Directory searched for maps")]
    maps: PathBuf,

    #[arg(short, long, default_value_t = chroma::DEFAULT_TICK_RATE)]
    tick_rate: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    anyhow::ensure!(args.tick_rate > 0, "tick rate must be positive");

    let mut app = App::new(ClientConfig::default(), MapDirectory::new(&args.maps))?;

    if let Some(username) = &args.username {
        app.handle_line(&format!("name {}", username));
    }
    if let Some(address) = &args.connect {
        app.handle_line(&format!("connect {}", address));
    }

    let dt = 1.0 / args.tick_rate as f32;
    let mut interval = tokio::time::interval(Duration::from_secs_f32(dt));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    while app.is_running() {
        tokio::select! {
            _ = interval.tick() => app.tick(dt),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => app.handle_line(&line),
                Ok(None) => {
                    log::debug!("stdin closed");
                    stdin_open = false;
                }
                Err(e) => {
                    log::error!("Failed to read console: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    Ok(())
}
