//! Membrio API
//!
//! HTTP surface of the membership platform: registration and authentication,
//! catalog browsing, checkout, the member's payment view, unsubscribe and
//! the payment gateway's notification endpoint.

pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod routes;
pub mod state;
