//! Diagnostics for the backend process.
//!
//! Output goes to stderr in compact format. The filter sits behind a reload
//! layer so `VERBOSE:` control messages can switch the whole process to
//! `debug` and back without a restart.

use anyhow::{Context, Result};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

const VERBOSE_FILTER: &str = "debug";

/// Handle for switching the process-wide log filter at runtime.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    base: String,
}

impl LogHandle {
    pub fn set_verbose(&self, verbose: bool) -> Result<()> {
        let directives = if verbose { VERBOSE_FILTER } else { self.base.as_str() };
        self.handle
            .reload(EnvFilter::new(directives))
            .context("reload log filter")
    }
}

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` for the base filter, defaulting to `warn`. With `verbose`
/// the process starts at `debug`.
///
/// # Example
/// ```bash
/// RUST_LOG=awesh_backend=debug awesh-backend serve
/// ```
pub fn init(verbose: bool) -> LogHandle {
    let base = std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "warn".to_string());
    let initial = if verbose { VERBOSE_FILTER } else { base.as_str() };
    let (filter, handle) = reload::Layer::new(EnvFilter::new(initial));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();

    LogHandle { handle, base }
}
