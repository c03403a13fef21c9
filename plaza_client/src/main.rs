//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p plaza_client -- [--addr 127.0.0.1:40000] [--name Ann] [--tick-hz 60] [--config client.json]
//!
//! The client connects to the server, registers its name, and runs the
//! synchronization loop. Keyboard state comes from console commands.
//!
//! Console commands:
//!   hold <dir>      - Start holding a movement key (left, right, up, down)
//!   release [dir]   - Release one key, or all of them
//!   emote <1-4|txt> - Send an emote
//!   dance [variant] - Toggle a dance (dance1, dance2, dance3)
//!   stop            - Stop dancing
//!   wheel           - Toggle the emote wheel (suppresses movement)
//!   status          - Show client status
//!   quit            - Exit client

use std::collections::HashMap;
use std::env;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use plaza_client::anim::AnimationKey;
use plaza_client::client::{ClientState, GameClient};
use plaza_client::render::{EntityView, Presentation};
use plaza_shared::config::ClientConfig;
use tokio::sync::mpsc;
use tracing::{debug, info};

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ClientConfig::from_file(Path::new(&args[i + 1]))?,
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Logs animation changes instead of drawing.
#[derive(Default)]
struct LogPresentation {
    shown: HashMap<String, AnimationKey>,
}

impl Presentation for LogPresentation {
    fn upsert_entity(&mut self, id: &str, view: EntityView<'_>) {
        if self.shown.get(id) != Some(view.animation) {
            debug!(
                id,
                label = view.label,
                x = view.position.x,
                y = view.position.y,
                animation = %view.animation,
                emote = ?view.emote,
                "Entity pose changed"
            );
            self.shown.insert(id.to_string(), view.animation.clone());
        }
    }

    fn remove_entity(&mut self, id: &str) {
        self.shown.remove(id);
        info!(id, "Entity removed");
    }

    fn set_camera_follow(&mut self, id: &str) {
        info!(id, "Camera following");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    let mut presentation = LogPresentation::default();
    client.init(&mut presentation).await?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let mut interval = tokio::time::interval(Duration::from_secs_f32(1.0 / cfg.tick_hz as f32));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut was_connected = true;
    'run: loop {
        interval.tick().await;

        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            if matches!(line.as_str(), "quit" | "exit") {
                break 'run;
            }
            match client.exec_console(&line) {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {}", e);
                }
            }
        }

        client.tick(&mut presentation).await?;

        // Entities hold their last known state until the user quits.
        let connected = client.state != ClientState::Disconnected;
        if was_connected && !connected {
            println!("Disconnected from server. Type 'quit' to exit.");
        }
        was_connected = connected;

        let stats = client.core.stats();
        if stats.ticks % 300 == 0 {
            info!(
                ticks = stats.ticks,
                snapshots = stats.snapshots,
                entities = client.core.entities().count(),
                pending = client.core.pending().len(),
                "Sync status"
            );
        }
    }

    client.teardown(&mut presentation);
    Ok(())
}
