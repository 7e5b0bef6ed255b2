use std::time::Duration;

pub const LOCAL_WS_URL: &str = "ws://localhost:3001/ws";

/// Current application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Seeks closer than this to the known position are neither sent nor applied
pub const SEEK_TOLERANCE_SECS: f64 = 0.5;

/// How long a local action counts as in flight for echo suppression
pub const LOCAL_ECHO_WINDOW: Duration = Duration::from_secs(1);

/// Player progress callback cadence
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);
