/*!
 * LMS Bluetooth Capture Control Daemon
 * Starts and pauses LMS capture as a Bluetooth audio source comes and goes
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::time::{interval_at, Duration, Instant};
use tracing::info;

mod bluetooth;
mod config;
mod controller;
mod lms;

use bluetooth::BluetoothListener;
use config::DaemonConfig;
use controller::PlaybackController;
use lms::LmsClient;

const PLAYER_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Log events from this crate carry the bin target `lmsbtd`, not the
/// package name.
fn log_filter(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!("lmsbtd={}", level)
}

#[derive(Parser)]
#[command(name = "lmsbtd")]
#[command(about = "LMS Bluetooth capture control daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/lmsbt/lmsbtd.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// List the players known to the configured server
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.debug))
        .init();

    info!("LMS Bluetooth capture control daemon starting...");

    // Load configuration
    let config = DaemonConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Check => check_server(config).await,
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    let client = LmsClient::new(&config.server.host, config.server.port)?;
    let player = client.find_player(&config.server.player).await?;
    info!("controlling player {}", player.name());

    let mut listener = BluetoothListener::connect(&config.bluetooth).await?;
    let mut controller = PlaybackController::new(player, config.capture.input_device.clone());

    // A source may already be connected when we start.
    if let Some(event) = listener.scan().await? {
        controller.handle(event).await;
    }

    info!("watching BlueZ for media player events");

    let mut player_check = interval_at(
        Instant::now() + PLAYER_CHECK_INTERVAL,
        PLAYER_CHECK_INTERVAL,
    );

    loop {
        tokio::select! {
            event = listener.next_event() => controller.handle(event?).await,
            _ = player_check.tick() => {
                controller.control_mut().ensure_powered(&config.server.player).await;
            }
        }
    }
}

async fn check_server(config: DaemonConfig) -> Result<()> {
    let client = LmsClient::new(&config.server.host, config.server.port)?;
    let players = client.players().await?;
    println!(
        "{} player(s) on {}:{}",
        players.len(),
        config.server.host,
        config.server.port
    );
    for player in players {
        let power = if player.power != 0 { "on" } else { "off" };
        println!("  {} [{}] power {}", player.name, player.playerid, power);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_names_the_crate_target() {
        let crate_target = module_path!().split("::").next().unwrap();
        assert_eq!(log_filter(false), format!("{}=info", crate_target));
        assert_eq!(log_filter(true), format!("{}=debug", crate_target));
    }
}
