//! Logger setup and conditional logging macros.
//!
//! Modules opt in to the macros by defining a flag next to their imports:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("tick {} analyzed", generation);
//! ```
//! Flipping the flag to `false` silences that module without touching `RUST_LOG`.

use std::io::Write;

use chrono::Utc;
use log::LevelFilter;

/// Target used for the per-call inference audit trail.
pub const AUDIT_TARGET: &str = "audit";

/// Install `env_logger` as the global logger.
///
/// `RUST_LOG` still wins when set; `debug` only lowers the fallback level.
pub fn init_logging(debug: bool) {
    let fallback = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(fallback);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} | {} | {}: {}",
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            record.level(),
            record.target(),
            record.args()
        )
    });

    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}

/// Conditional info logging gated on the caller's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional warn logging gated on the caller's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional error logging gated on the caller's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Conditional debug logging gated on the caller's `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}
