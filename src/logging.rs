use std::sync::Once;

use env_logger::{Builder, Env};

static INIT: Once = Once::new();

/// Installs `env_logger` as the global logger. Later calls do nothing.
///
/// The filter comes from `RUST_LOG`; without it everything at `info` and above
/// is printed.
pub fn init() {
    INIT.call_once(|| {
        let env = Env::default().default_filter_or("info");
        if Builder::from_env(env).try_init().is_ok() {
            log::debug!("logging initialized");
        }
    });
}

/// Pushes out anything the logger still buffers.
pub fn flush() {
    log::logger().flush();
}
