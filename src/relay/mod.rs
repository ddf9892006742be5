//! Frame relay buffer
//!
//! Moves transcoded chunks from a session's process to the viewer queues of
//! that stream, in arrival order.

pub mod buffer;
pub mod greeting;

pub use buffer::{FanOut, FrameRelay};
pub use greeting::{jsmpeg_header, JSMPEG_HEADER_LEN};
