use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes console logging on stderr.
///
/// `RUST_LOG` takes precedence; otherwise `verbosity` picks the level
/// (0 = info, 1 = debug, 2+ = trace).
pub fn init_logging(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "geochart=info",
        1 => "geochart=debug",
        _ => "geochart=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // stdout stays free for the summary
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}
