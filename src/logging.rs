use env_logger::Env;

/// Installs the process-wide logger. `RUST_LOG` overrides the default
/// `info` filter. Calling it again is harmless.
pub fn init() {
    init_with_default("info");
}

pub fn init_with_default(filter: &str) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}
