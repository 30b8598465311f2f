//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_DIRECTIVES: &str = "info,vp_rhi=info,vp_renderer=debug";

/// Initialize the logging system with tracing.
///
/// `RUST_LOG` takes precedence over `directives`. Validation-layer output
/// arrives under the `vp_rhi::instance` target, so it can be filtered
/// separately from the renderer's own messages.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber in place.
///
/// # Example
/// ```
/// vp_core::init_logging(vp_core::DEFAULT_DIRECTIVES);
/// tracing::info!("viewer starting");
/// ```
pub fn init_logging(directives: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
