//! Core types for Cartpool.
//!
//! This module provides type-safe wrappers and pure logic for the domain:
//! who is acting, what they may do, and what changed.

pub mod capability;
pub mod event;
pub mod id;
pub mod identity;
pub mod order;

pub use capability::{Capabilities, CapabilitySet};
pub use event::{OrderEvent, SequencedEvent};
pub use id::*;
pub use identity::{Actor, ActorKey, Identity, Role};
pub use order::{Item, Order};
