//! Logger setup and module-switchable logging macros.
//!
//! Modules that log on every heartbeat declare a flag and use the macros so
//! their output can be silenced without touching `RUST_LOG`:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn, log_error};
//!
//! log_info!("billed {}s", 5);
//! ```

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs `env_logger` once, reading `RUST_LOG` and defaulting to `info`.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .format_timestamp_millis()
        .try_init();
    });
}

/// Info log gated by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn log gated by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error log gated by the calling module's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    mod silenced {
        use std::cell::Cell;

        const ENABLE_LOGS: bool = false;

        pub fn log_all(calls: &Cell<u32>) {
            let bump = || {
                calls.set(calls.get() + 1);
                "ignored"
            };
            crate::log_info!("{}", bump());
            crate::log_warn!("{}", bump());
            crate::log_error!("{}", bump());
        }
    }

    mod enabled {
        use std::cell::Cell;

        const ENABLE_LOGS: bool = true;

        pub fn log_all(calls: &Cell<u32>) {
            let bump = || {
                calls.set(calls.get() + 1);
                "logged"
            };
            crate::log_info!("{}", bump());
            crate::log_warn!("{}", bump());
            crate::log_error!("{}", bump());
        }
    }

    #[test]
    fn disabled_flag_skips_every_level() {
        let calls = Cell::new(0);
        silenced::log_all(&calls);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn enabled_flag_formats_every_level() {
        // The `log` macros only evaluate their arguments when a logger is
        // installed at that level.
        super::init_logging();
        log::set_max_level(log::LevelFilter::Info);
        let calls = Cell::new(0);
        enabled::log_all(&calls);
        assert_eq!(calls.get(), 3);
    }
}
