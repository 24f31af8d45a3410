//! Binary codec primitives: the frame type and header rules, the decode
//! cursor, and the encode builder.

pub mod builder;
pub mod cursor;
pub mod frame;

pub use builder::FrameBuilder;
pub use cursor::{BinaryCursor, Encoding};
pub use frame::{Frame, FrameHeader, FRAME_MARKER, HEADER_LEN, MAX_PAYLOAD_LEN};
