//! Tracing setup for the command line front end.

use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "CLOUDTRIM_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install a stderr subscriber filtered by `CLOUDTRIM_LOG` (default `info`).
///
/// Stdout stays reserved for command output so JSON can be piped.
pub fn init() {
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let filter_layer =
        EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter_layer)
        .init();
}
