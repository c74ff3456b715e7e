pub mod archive;
pub mod cache;
pub mod capture;
pub mod config;
pub mod diff;
pub mod error;
pub mod paths;
pub mod restore;
pub mod service;
pub mod watcher;

pub use config::{AppSettings, BackupStrategy, BackupType, ConfigRegistry, Target};
pub use error::{AppError, AppResult, HistoryError, HistoryResult};
pub use service::{CaptureSummary, DeleteOutcome, HistoryService, ServiceOptions};

// Test-only printing helper: expands to eprintln! during tests and debug builds.
// Usage in tests: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        if false { let _ = format!($($arg)*); }
    });
}
