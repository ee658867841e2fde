//! # Event Record Format
//!
//! The binary envelope every event travels in.
//!
//! ## Wire Layout
//!
//! ```text
//! offset 0           u8   local byte size
//! offset 1           u8   reserved (0)
//! offset 2           u16  external byte size
//! offset 4           i32  type id
//! offset 8           local bytes     (0..=24)
//! offset 8 + local   external bytes  (0..=65535)
//!                    zero padding up to the next multiple of 8
//! ```
//!
//! A header-only event occupies exactly 8 bytes on the wire.
//!
//! ## In-Memory Layout
//!
//! Decoded events are fixed 32-byte values: the 8-byte header followed by
//! a 24-byte inline area. When external data is present, the last 8 bytes
//! of the inline area hold a pointer to it instead of local data.

mod event;
mod header;
mod size;

pub use event::{EventMut, EventRef, GenericEvent};
pub use header::EventHeader;
pub use size::{
    align_up, EventDataSize, ALIGNMENT, FIXED_EVENT_SIZE, HEADER_SIZE,
    MAX_EXTERNAL_DATA_BYTE_SIZE, MAX_LOCAL_DATA_BYTE_SIZE, MAX_LOCAL_DATA_WITH_EXTERNAL,
    SIZE_INFO_SIZE,
};
