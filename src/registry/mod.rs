//! Viewer registry for per-stream fan-out
//!
//! The registry tracks every connected viewer by stream name. It is the only
//! shared mutable state in the relay; sessions and connection tasks talk to
//! each other through it and through channels.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<ViewerRegistry>
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Name,  │
//!                     │   StreamViewers {       │
//!                     │     viewers,            │
//!                     │     greeting,           │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │ RegistryEvent (0 <-> 1)
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [FrameRelay]          [WebSocket task]        [WebSocket task]
//!    try_deliver()   ──►    rx.recv()        ──►    socket.send()
//! ```
//!
//! Chunks are `bytes::Bytes`, so every viewer queue shares one allocation.

pub mod error;
pub mod message;
pub mod store;
pub mod viewer;

pub use error::RegistryError;
pub use message::{CloseReason, Delivery, ViewerMessage, ViewerReceiver, ViewerSink};
pub use store::{RegistryEvent, ViewerRegistry};
pub use viewer::{Viewer, ViewerId, ViewerInfo};
