pub mod backoff;
pub mod config;
pub mod diff;
pub mod feed;
pub mod notify;
pub mod shutdown;
pub mod state;
pub mod telemetry;
pub mod version;
pub mod watcher;
