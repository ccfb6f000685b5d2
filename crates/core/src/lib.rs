//! Cartpool Core - Shared domain types.
//!
//! This crate provides the common types used across all Cartpool components:
//! - `server` - HTTP + WebSocket server coordinating group purchases
//! - `cli` - Command-line tools for migrations and link minting
//!
//! # Architecture
//!
//! The core crate contains only types and pure logic - no I/O, no database
//! access, no HTTP. Capability evaluation and token signing live here so they
//! can be tested exhaustively without a running server.
//!
//! # Modules
//!
//! - [`types`] - IDs, identities, orders, capabilities, and broadcast events
//! - [`token`] - Stateless signed invite and admin link tokens

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod token;
pub mod types;

pub use types::*;
