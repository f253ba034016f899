use std::sync::Arc;
use std::time::Duration;

use portwatch_service::config::Config;
use portwatch_service::notify::LogObserver;
use portwatch_service::{Clock, ManualClock, Monitor, SystemClock, TcpProber};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub struct Harness {
    pub monitor: Monitor,
    pub clock: Arc<ManualClock>,
    _dir: TempDir,
}

/// Engine on a fresh database with a manually driven clock
pub async fn harness() -> anyhow::Result<Harness> {
    let _ = logger::try_init_tracing();

    let dir = tempfile::tempdir()?;
    let mut config = Config::default();
    config.database.path = dir.path().join("portwatch.db").to_string_lossy().into_owned();

    let store = portwatch_service::LibsqlStore::connect(&config.database.path, 4).await?;
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let monitor = Monitor::from_parts(
        Arc::new(store),
        Arc::new(TcpProber::new(Duration::from_millis(500))),
        clock.clone(),
        Arc::new(LogObserver),
        &config,
    );

    Ok(Harness { monitor, clock, _dir: dir })
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
