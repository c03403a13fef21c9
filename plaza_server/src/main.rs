//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p plaza_server -- [--addr 127.0.0.1:40000] [--tick-hz 20] [--config server.json]
//!
//! The server accepts client connections, applies their inputs and
//! broadcasts the plaza state to every connected client.
//!
//! Console commands:
//!   status     - Show server status
//!   kick <id>  - Disconnect a player
//!   quit       - Shutdown server

use std::env;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::Context;
use plaza_server::server::GameServer;
use plaza_shared::config::ServerConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ServerConfig::from_file(Path::new(&args[i + 1]))?,
        _ => ServerConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().context("parse --tick-hz")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    anyhow::ensure!(cfg.tick_hz > 0, "tick_hz must be positive");
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.listen_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = GameServer::new(cfg.clone()).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

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

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    while !server.quit_requested() {
        // Accept new clients (non-blocking).
        if let Ok(Some(cid)) = server.try_accept(std::time::Duration::from_millis(1)).await {
            info!(client_id = %cid, "New client accepted");
        }

        server.step().await?;

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
    Ok(())
}
