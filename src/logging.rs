use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ANYTHING_LOG";

/// Installs the global fmt subscriber on stderr.
///
/// `ANYTHING_LOG` wins over `verbosity` when set. Calling this twice is harmless.
pub fn init(verbosity: u8) {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
