//! Ad hoc logging for the Monitor.
//!
//! Mirrors the teacher crate's own `crate::log` module rather than pulling
//! in the `log` ecosystem crate: a small `LogLevel`, a `log!` macro that
//! prefixes and flushes to stderr, and category/verbosity gates read from
//! an environment variable at first use.

use std::collections::HashMap;
use std::env;

#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::LogFatal => "FATAL",
            LogLevel::LogError => "ERROR",
            LogLevel::LogWarn => "WARN",
            LogLevel::LogInfo => "INFO",
            LogLevel::LogDebug => "DEBUG",
        }
    }
}

bitflags::bitflags! {
    /// The four logging categories named in the external interface spec.
    pub struct LogCategory: u32 {
        const TRACE_SYSCALL = 1 << 0;
        const MEMORY        = 1 << 1;
        const REGISTERS     = 1 << 2;
        const PROCESS       = 1 << 3;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verbosity {
    Short,
    Long,
}

struct LogConfig {
    /// Category -> minimum verbosity enabled. Absence means disabled.
    enabled: HashMap<&'static str, Verbosity>,
}

const CATEGORY_NAMES: &[(&str, LogCategory)] = &[
    ("trace-syscall", LogCategory::TRACE_SYSCALL),
    ("memory", LogCategory::MEMORY),
    ("registers", LogCategory::REGISTERS),
    ("process", LogCategory::PROCESS),
];

fn parse_config() -> LogConfig {
    let mut enabled = HashMap::new();
    if let Ok(spec) = env::var("RD_MONITOR_LOG") {
        for entry in spec.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, verbosity) = match entry.split_once('=') {
                Some((n, "long")) => (n, Verbosity::Long),
                Some((n, _)) => (n, Verbosity::Short),
                None => (entry, Verbosity::Short),
            };
            for (cat_name, _) in CATEGORY_NAMES {
                if *cat_name == name {
                    enabled.insert(*cat_name, verbosity);
                }
            }
        }
    }
    LogConfig { enabled }
}

lazy_static::lazy_static! {
    static ref CONFIG: LogConfig = parse_config();
}

/// Returns the configured verbosity for `category`, if logging for it is
/// enabled at all. Categories not mentioned in `RD_MONITOR_LOG` are silent.
pub fn verbosity_for(category: LogCategory) -> Option<Verbosity> {
    for (name, bit) in CATEGORY_NAMES {
        if category.contains(*bit) {
            if let Some(v) = CONFIG.enabled.get(name) {
                return Some(*v);
            }
        }
    }
    None
}

pub fn should_log(category: LogCategory) -> bool {
    verbosity_for(category).is_some()
}

#[doc(hidden)]
pub fn write_line(level: LogLevel, args: std::fmt::Arguments) {
    eprintln!("[{}] {}", level.tag(), args);
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::write_line($level, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unmentioned_category_is_silent() {
        assert_eq!(verbosity_for(LogCategory::MEMORY), CONFIG.enabled.get("memory").copied());
    }
}
