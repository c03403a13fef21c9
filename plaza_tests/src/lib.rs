//! Helpers shared by the integration tests.

use std::{net::SocketAddr, time::Duration};

use plaza_client::{render::RecordingPresentation, GameClient};
use plaza_server::server::bind_ephemeral;
use plaza_shared::config::ClientConfig;
use tokio::task::JoinHandle;

/// Routes `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Starts a server on an ephemeral port, stepping until the handle is aborted.
pub async fn spawn_server(
    tick_hz: u32,
) -> anyhow::Result<(SocketAddr, JoinHandle<anyhow::Result<()>>)> {
    let (mut server, _cfg) = bind_ephemeral(tick_hz).await?;
    let addr = server.local_addr()?;
    let handle = tokio::spawn(async move { server.run_for_ticks(u32::MAX).await });
    Ok((addr, handle))
}

pub fn client_config(addr: SocketAddr, name: &str) -> ClientConfig {
    ClientConfig {
        server_addr: addr.to_string(),
        tick_hz: 60,
        player_name: name.to_string(),
        ..Default::default()
    }
}

/// A connected client with a presentation that records what it was told.
pub struct TestClient {
    pub client: GameClient,
    pub view: RecordingPresentation,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr, name: &str) -> anyhow::Result<Self> {
        let cfg = client_config(addr, name);
        let mut client = tokio::time::timeout(Duration::from_secs(5), GameClient::connect(&cfg))
            .await
            .map_err(|_| anyhow::anyhow!("connect timed out"))??;
        let mut view = RecordingPresentation::default();
        client.init(&mut view).await?;
        Ok(Self { client, view })
    }

    pub fn id(&self) -> String {
        self.client.local_id().to_string()
    }
}

/// Ticks every client at roughly 60 Hz until `done` holds or `timeout` elapses.
pub async fn tick_until<F>(
    clients: &mut [&mut TestClient],
    timeout: Duration,
    mut done: F,
) -> anyhow::Result<bool>
where
    F: FnMut(&[&mut TestClient]) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        for c in clients.iter_mut() {
            c.client.tick(&mut c.view).await?;
        }
        if done(&*clients) {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(16)).await;
    }
    Ok(false)
}
