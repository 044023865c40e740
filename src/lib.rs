//! Courier server library
//!
//! Exposes the server modules for integration tests and reuse.

pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rooms;
pub mod state;
pub mod validation;
