//! Tracing setup for embedders.
//!
//! The runtime itself only emits `tracing` events; whoever wires a `Router`
//! together decides how they are rendered. Call [`init_tracing`] once during
//! process startup, before registering services or starting the drain worker,
//! so registration and drain events are captured from the first tick.
//! Embedders that install their own subscriber stack can skip this entirely;
//! the runtime's events flow into whatever subscriber is active.

use std::sync::OnceLock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the process-wide default subscriber.
///
/// Idempotent: later calls are no-ops, as is a call that races a subscriber
/// installed elsewhere. `RUST_LOG` controls the filter (default `info`);
/// `MESH_LOG_FORMAT=json` switches the compact human format to JSON lines.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("MESH_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}
