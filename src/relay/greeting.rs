//! JSMpeg stream greeting
//!
//! JSMpeg's WebSocket source expects an optional 8-byte header before the
//! MPEG-TS data: the ASCII magic `jsmp` followed by the video width and
//! height as big-endian u16.

use bytes::{BufMut, Bytes, BytesMut};

/// Magic bytes opening the greeting
pub const JSMPEG_MAGIC: &[u8; 4] = b"jsmp";

/// Length of the greeting in bytes
pub const JSMPEG_HEADER_LEN: usize = 8;

/// Build the greeting for a stream of the given size
pub fn jsmpeg_header(width: u16, height: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(JSMPEG_HEADER_LEN);
    buf.put_slice(JSMPEG_MAGIC);
    buf.put_u16(width);
    buf.put_u16(height);
    buf.freeze()
}
