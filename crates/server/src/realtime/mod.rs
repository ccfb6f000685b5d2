//! Realtime broadcast hub: one room per live order.
//!
//! Rooms exist only while someone is connected (plus a short grace window
//! for reconnects). Mutations publish to the room strictly after their
//! database commit; the room stamps each accepted event with a strictly
//! increasing, gap-free sequence number and fans it out to every subscriber
//! the view filter admits. A slow subscriber is evicted rather than allowed
//! to stall the rest.
//!
//! Nothing here is durable. A reconnecting client starts from a fresh
//! snapshot; storage holds the truth.

pub mod connection;
pub mod filter;
pub mod registry;
pub mod room;

pub use connection::{ConnectionLifecycle, ConnectionState, SnapshotFrame, ViewerInfo};
pub use filter::should_deliver;
pub use registry::RoomRegistry;
pub use room::{OrderRoom, PublishOutcome, Subscription};
