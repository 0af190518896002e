//! homegate-ctl - command-line client for homegated
//!
//! Lets an admin inspect and configure the service, and stands in for the
//! presence and foreground-app monitors when testing by hand.

mod render;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use homegate_api::{Command, ResponseResult};
use homegate_ipc::IpcClient;
use homegate_util::default_socket_path;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// homegate-ctl - talk to the homegated service
#[derive(Parser, Debug)]
#[command(name = "homegate-ctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Socket path (or set HOMEGATE_SOCKET env var)
    #[arg(short, long, env = "HOMEGATE_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Print raw JSON responses and events
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Presence {
    Home,
    Away,
}

impl Presence {
    fn at_home(self) -> bool {
        self == Presence::Home
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the composed status
    Status,

    /// Set the presence signal directly
    Presence {
        #[arg(value_enum)]
        location: Presence,
    },

    /// Report a location fix; presence is derived from the home profile
    Locate {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// SSID of the connected Wi-Fi network
        #[arg(long)]
        wifi: Option<String>,
    },

    /// Ask for a verdict, with the stored presence unless one is given
    Evaluate {
        #[arg(long, value_enum)]
        presence: Option<Presence>,
    },

    /// The restricted app came to the foreground
    Opened,

    /// The restricted app left the foreground
    Closed,

    /// Set the daily limit in minutes (admin)
    Limit { minutes: u32 },

    /// Use one of this month's emergency overrides
    Override,

    /// Set the home profile (admin)
    Home {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// Home Wi-Fi SSID
        #[arg(long)]
        wifi: Option<String>,
    },

    /// Record agent setup progress (admin)
    Setup {
        #[arg(long)]
        monitor: Option<bool>,
        #[arg(long)]
        enforcement: Option<bool>,
    },

    /// Show service health
    Health,

    /// Stream events until interrupted
    Watch,
}

impl Commands {
    /// Protocol command for one-shot subcommands; `None` for `watch`
    fn to_command(&self) -> Option<Command> {
        let command = match self {
            Commands::Status => Command::GetStatus,
            Commands::Presence { location } => Command::SetPresence {
                at_home: location.at_home(),
            },
            Commands::Locate { lat, lon, wifi } => Command::ReportLocation {
                latitude: *lat,
                longitude: *lon,
                wifi_ssid: wifi.clone(),
            },
            Commands::Evaluate { presence } => Command::Evaluate {
                presence: presence.map(Presence::at_home),
            },
            Commands::Opened => Command::AppOpened,
            Commands::Closed => Command::AppClosed,
            Commands::Limit { minutes } => Command::SetDailyLimit { minutes: *minutes },
            Commands::Override => Command::ActivateOverride,
            Commands::Home { lat, lon, wifi } => Command::SetHomeProfile {
                latitude: *lat,
                longitude: *lon,
                wifi_ssid: wifi.clone(),
            },
            Commands::Setup {
                monitor,
                enforcement,
            } => Command::SetSetupFlags {
                monitor_enabled: *monitor,
                enforcement_enabled: *enforcement,
            },
            Commands::Health => Command::GetHealth,
            Commands::Watch => return None,
        };
        Some(command)
    }
}

async fn run_once(cli: &Cli, command: Command) -> Result<()> {
    let mut client = connect(cli).await?;
    let response = client.send(command).await.context("Request failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    match response.result {
        ResponseResult::Ok(payload) => {
            if !cli.json {
                println!("{}", render::render_payload(&payload));
            }
            Ok(())
        }
        ResponseResult::Err(e) => bail!("{:?}: {}", e.code, e.message),
    }
}

async fn watch(cli: &Cli) -> Result<()> {
    let client = connect(cli).await?;
    let mut events = client.subscribe().await.context("Subscribe failed")?;

    loop {
        let event = match events.next().await {
            Ok(event) => event,
            Err(e) if e.is_disconnect() => {
                eprintln!("Connection to homegated closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if cli.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", render::render_event(&event));
        }
    }
}

async fn connect(cli: &Cli) -> Result<IpcClient> {
    tracing::debug!(socket = %cli.socket.display(), "Connecting");
    IpcClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to homegated at {:?}", cli.socket))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.to_command() {
        Some(command) => run_once(&cli, command).await,
        None => watch(&cli).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["homegate-ctl", "--socket", "/tmp/test.sock"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn presence_subcommand() {
        let cli = parse(&["presence", "home"]);
        assert!(matches!(
            cli.command.to_command(),
            Some(Command::SetPresence { at_home: true })
        ));
    }

    #[test]
    fn locate_accepts_negative_longitude() {
        let cli = parse(&["locate", "--lat", "47.6", "--lon", "-122.3", "--wifi", "HomeNet"]);
        match cli.command.to_command() {
            Some(Command::ReportLocation {
                latitude,
                longitude,
                wifi_ssid,
            }) => {
                assert_eq!(latitude, 47.6);
                assert_eq!(longitude, -122.3);
                assert_eq!(wifi_ssid.as_deref(), Some("HomeNet"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn setup_flags_are_optional() {
        let cli = parse(&["setup", "--monitor", "true"]);
        assert!(matches!(
            cli.command.to_command(),
            Some(Command::SetSetupFlags {
                monitor_enabled: Some(true),
                enforcement_enabled: None
            })
        ));
    }

    #[test]
    fn evaluate_and_watch() {
        let cli = parse(&["evaluate", "--presence", "away"]);
        assert!(matches!(
            cli.command.to_command(),
            Some(Command::Evaluate {
                presence: Some(false)
            })
        ));

        assert!(parse(&["watch"]).command.to_command().is_none());
        assert!(parse(&["--json", "status"]).json);
    }
}
