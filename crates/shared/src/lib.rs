//! Membrio Shared Types and Utilities
//!
//! This crate contains the domain model and database helpers shared across
//! the Membrio platform.

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
