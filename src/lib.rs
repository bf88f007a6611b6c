// =============================================================================
// FlowTrace — shared library
// =============================================================================
//
// Both binaries (`flowtrace` and `persistence-service`) link against this
// crate so the IPC wire types, domain value objects and error taxonomy
// cannot drift between processes (SPEC_FULL §0).
// =============================================================================

pub mod api;
pub mod app_state;
pub mod binance;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ingestor;
pub mod ipc;
pub mod persistence;
pub mod recovery;
pub mod routing;
pub mod supervisor;

use tracing_subscriber::EnvFilter;

/// Shared by both binaries' `main`, matching the teacher's `main.rs` setup
/// (`RUST_LOG` env var, falling back to `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
