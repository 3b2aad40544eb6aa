mod address;
pub mod api;
pub mod args;
mod cache;
pub mod commands;
mod config;
mod error;
mod fixext;
mod fs;
mod session;
mod sync;
mod utils;

pub use address::CellRange;
pub use cache::{CacheEntry, ContentCache};
pub use config::{Config, ConfigFile};
pub use error::{failure_kind, is_not_found, is_stale_identity, ApiError, FailureKind};
pub use error::Error;
pub use error::Result;
pub use fixext::{fix_excel_extension, fix_writeback_extension};
pub use sync::SyncCoordinator;
