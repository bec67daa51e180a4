//! Tracing subscriber setup.

use std::env;
use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Logging flags from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFlags {
    pub quiet: bool,
    pub verbose: u8,
    pub json: bool,
    pub no_color: bool,
}

/// Level name after applying `-q` and `-v` over the configured default.
pub fn effective_level(flags: LogFlags, config: &LoggingConfig) -> &str {
    if flags.quiet {
        return "error";
    }
    match flags.verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
pub fn init_logging(flags: LogFlags, config: &LoggingConfig) {
    let level = effective_level(flags, config);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hapi_core={level},hapi_ctl={level},hapictl={level}")));

    if flags.json || config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        let disable_color =
            flags.no_color || env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(!disable_color)
                    .with_target(flags.verbose > 1),
            )
            .try_init()
            .ok();
    }
}
