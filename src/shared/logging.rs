//! Tracing subscriber setup helper.
//!
//! The crate logs through [`tracing`] everywhere; this module only wires a
//! default subscriber for binaries and tests that do not install their own.
//! Gated behind the `logging` feature (on by default).

/// Installs a formatted `tracing` subscriber honoring `RUST_LOG`, falling
/// back to `info`. Safe to call more than once; later calls are no-ops.
///
/// # Examples
///
/// ```
/// batchswarm::shared::init_tracing();
/// tracing::info!("manager starting");
/// ```
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
