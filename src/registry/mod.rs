//! Connection registry
//!
//! Tracks which sinks are attached to which stream. A stream only has an
//! entry while at least one sink is attached.
//!
//! ```text
//!                      Arc<ConnectionRegistry>
//!                 ┌──────────────────────────────┐
//!                 │ streams: Mutex<HashMap<id,   │
//!                 │   StreamEntry {              │
//!                 │     sinks: {url -> att id},  │
//!                 │     generation,              │
//!                 │   }                          │
//!                 │ >>                           │
//!                 └──────────────┬───────────────┘
//!                                │
//!         ┌──────────────────────┼──────────────────────┐
//!         │                      │                      │
//!         ▼                      ▼                      ▼
//!   [control API]           [RelayTask]            [RelayTask]
//!   attach / detach         holds() per packet     release() on exit
//! ```
//!
//! Relay tasks only ever use their own [`Attachment`], so a task that
//! outlives a detach cannot see or remove a later attachment of the same
//! (stream, sink) pair.

pub mod entry;
pub mod store;

pub use entry::{Attachment, AttachmentId, StreamEntry, StreamStats};
pub use store::{AttachOutcome, ConnectionRegistry, DetachOutcome};
