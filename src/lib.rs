//! cronfleet library
//!
//! Core modules of the distributed cron worker.

use shadow_rs::shadow;
shadow!(build);

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod log_store;
pub mod logger;
pub mod repositories;
pub mod schema;
pub mod store;
pub mod worker;

pub use worker::Worker;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}
