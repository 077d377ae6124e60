use env_logger::{Builder, Env};

/// `RUST_LOG` wins over the verbosity flag when set.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .try_init()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize logger: {}. Logging might not work as expected.", e);
        });
}
