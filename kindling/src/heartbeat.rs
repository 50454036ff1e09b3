//! Diagnostic uptime heartbeat.

use std::time::{Duration, Instant};

use tracing::info;

const INTERVAL: Duration = Duration::from_secs(60);

/// Start the heartbeat on a dedicated OS thread.
///
/// The loop blocks in `thread::sleep`, so it must not run on the tokio
/// worker pool. The thread is detached; it lives for the rest of the
/// process.
pub fn start() {
    std::thread::spawn(|| {
        let started = Instant::now();
        loop {
            std::thread::sleep(INTERVAL);
            info!(uptime_secs = started.elapsed().as_secs(), "Heartbeat");
        }
    });
}
