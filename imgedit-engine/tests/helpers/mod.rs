//! Test Helper Utilities
//!
//! Shared utilities for testing imgedit-engine

#![allow(dead_code)]

pub mod db_utils;
pub mod image_generator;

// Re-export commonly used items
pub use db_utils::{
    create_test_db, create_test_engine, create_test_engine_with, get_table_columns,
    get_table_names, has_column, test_config,
};
pub use image_generator::{png_bytes, write_image, write_png};
