//! Structured JSON logging.
//!
//! Call sites use the `debug!`/`info!`/`warn!`/`error!` macros with
//! `"key" => value` pairs; values go through `serde_json::to_value`. Records
//! are rendered on a background worker and written to standard error plus an
//! optional daily file, never to standard output.

pub mod builder;
pub mod core;
pub mod transports;
pub mod worker;

pub use builder::{Logger, LoggerBuilder};
pub use core::LogLevel;
pub use transports::{FileTransport, StderrTransport, Transport};

#[macro_export]
macro_rules! log_base {
    ($logger:expr, $level:expr, $msg:expr $(, $k:expr => $v:expr )* $(,)? ) => {{
        let logger = &$logger;
        if logger.enabled($level) {
            #[allow(unused_mut)]
            let mut ctx = std::collections::BTreeMap::new();
            $(
                ctx.insert($k.to_string(), serde_json::to_value($v).unwrap_or(serde_json::Value::Null));
            )*
            logger.emit($level, module_path!(), $msg, ctx);
        }
    }};
}

#[macro_export]
macro_rules! debug {
    ($logger:expr, $msg:expr $(, $k:expr => $v:expr )* $(,)? ) => {
        $crate::log_base!($logger, $crate::loggers::core::LogLevel::Debug, $msg $(, $k => $v )* )
    };
}

#[macro_export]
macro_rules! info {
    ($logger:expr, $msg:expr $(, $k:expr => $v:expr )* $(,)? ) => {
        $crate::log_base!($logger, $crate::loggers::core::LogLevel::Info, $msg $(, $k => $v )* )
    };
}

#[macro_export]
macro_rules! warn {
    ($logger:expr, $msg:expr $(, $k:expr => $v:expr )* $(,)? ) => {
        $crate::log_base!($logger, $crate::loggers::core::LogLevel::Warn, $msg $(, $k => $v )* )
    };
}

#[macro_export]
macro_rules! error {
    ($logger:expr, $msg:expr $(, $k:expr => $v:expr )* $(,)? ) => {
        $crate::log_base!($logger, $crate::loggers::core::LogLevel::Error, $msg $(, $k => $v )* )
    };
}
