use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use driftpad::config::Config;
use driftpad::dispatch::CommandDispatcher;
use driftpad::events::{ClientEvent, TilePush};
use driftpad::protocol::Packet;
use driftpad::session::{HmacAuthenticator, SessionChannel};
use driftpad::tiles::TileGridEngine;
use driftpad::transport::tcp::TcpConnector;

#[derive(Parser, Debug)]
#[command(name = "driftpad", about = "Remote-control a desktop host")]
struct Cli {
    /// Host to connect to (overrides DRIFTPAD_HOST)
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long, short = 'p', env = "DRIFTPAD_PASSWORD")]
    password: String,

    /// Emit events as JSON lines instead of plain text
    #[arg(long)]
    json: bool,

    /// Transport command to fire once connected, e.g. `pause` or `seek 00:41:02`
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let host = cli
        .host
        .or(config.host.clone())
        .context("no host given; pass --host or set DRIFTPAD_HOST")?;
    let port = cli.port.unwrap_or(config.port);

    let connector = Arc::new(TcpConnector::new(&host, port));
    let auth = Arc::new(HmacAuthenticator::new(config.min_host_revision));
    let (session, streams) = SessionChannel::new(connector, auth, config.session_tuning());
    let (mut events_rx, mut tiles_rx) = (streams.events, streams.tiles);
    let dispatcher = Arc::new(CommandDispatcher::spawn(
        Arc::clone(&session),
        cli.password.clone(),
    ));
    let tiles = Arc::new(TileGridEngine::new(dispatcher.clone()));

    let session_id = session
        .connect(&cli.password)
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;
    tracing::info!(target = "driftpad", %session_id, "connected");

    if !cli.command.is_empty() {
        let mut parts = cli.command.into_iter();
        let name = parts.next().unwrap_or_default();
        dispatcher.enqueue(Packet::Command {
            name,
            args: parts.collect(),
        });
    }

    // No UI shell here: feed the tile engine and print the event stream until
    // the host goes away or we are interrupted.
    let tile_engine = Arc::clone(&tiles);
    tokio::spawn(async move {
        while let Some(push) = tiles_rx.recv().await {
            match push {
                TilePush::ScreenInfo {
                    width,
                    height,
                    tile_size,
                } => tile_engine.on_screen_info(width, height, tile_size),
                TilePush::Tile {
                    tile_x,
                    tile_y,
                    image,
                } => tile_engine.on_tile_received(tile_x, tile_y, image),
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.disconnect().await;
                return Ok(());
            }
            event = events_rx.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                print_event(&event, cli.json)?;
                if matches!(event, ClientEvent::ConnectionFailure) {
                    anyhow::bail!("connection lost");
                }
            }
        }
    }
}

fn print_event(event: &ClientEvent, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{event:?}");
    }
    Ok(())
}
