use std::path::PathBuf;

use clap::Parser;
use mpvlink::mpv::RecvError;
use mpvlink::{MpvClient, PlayerConfig, PlayerEvent};
use tracing_subscriber::EnvFilter;

/// Run MPV and print its player events.
#[derive(Debug, Parser)]
#[command(name = "mpvlink", version, about)]
struct Cli {
  /// Config file (defaults to <config dir>/mpvlink/config.json).
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// MPV executable to use instead of the one found on PATH.
  #[arg(long)]
  mpv: Option<PathBuf>,

  /// IPC socket/pipe path.
  #[arg(long)]
  socket: Option<String>,

  /// Log every message and event.
  #[arg(short, long)]
  verbose: bool,

  /// Log player errors and restart progress.
  #[arg(short, long)]
  debug: bool,

  /// File or URL to play once connected.
  file: Option<String>,
}

fn init_logging(verbose: bool) {
  let default_level = if verbose { "debug" } else { "info" };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> Result<PlayerConfig, mpvlink::ConfigError> {
  let mut config = match &cli.config {
    Some(path) => PlayerConfig::load(path)?,
    None => PlayerConfig::load_or_default()?,
  };

  if let Some(mpv) = &cli.mpv {
    config.mpv_path = Some(mpv.to_string_lossy().into_owned());
  }
  if let Some(socket) = &cli.socket {
    config.socket_path = Some(socket.clone());
  }
  config.verbose |= cli.verbose;
  config.debug |= cli.debug;
  config.validate()?;
  Ok(config)
}

fn describe(event: &PlayerEvent) -> String {
  match event {
    PlayerEvent::StatusChange(snapshot) => {
      let fields: Vec<String> = snapshot.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
      format!("statuschange {}", fields.join(" "))
    }
    PlayerEvent::GetRequest { request_id, data } => format!("getrequest {} {}", request_id, data),
    other => other.name().to_string(),
  }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let config = load_config(&cli)?;
  let client = MpvClient::new(config);
  let mut events = client.events();

  client.start().await?;

  if let Some(file) = &cli.file {
    client.loadfile(file).await?;
  }

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        log::info!("Interrupted, quitting MPV");
        break;
      }
      event = events.recv() => match event {
        Ok(event) => println!("{}", describe(&event)),
        Err(RecvError::Lagged(n)) => log::warn!("Missed {} player events", n),
        Err(RecvError::Closed) => break,
      },
    }
  }

  client.quit().await?;
  Ok(())
}
