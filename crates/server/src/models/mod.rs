//! Server-side data models.

pub mod session;
