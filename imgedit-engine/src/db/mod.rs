//! Database access for imgedit-engine
//!
//! Schema creation and migrations live in `imgedit_common::db`.

pub mod annotations;
pub mod history;
pub mod operations;
pub mod sessions;

pub use imgedit_common::db::init_database;
