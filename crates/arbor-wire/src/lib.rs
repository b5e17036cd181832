//! arbor-wire: Boundary types and transport decoding
//!
//! This crate defines the message records exchanged with the system of
//! record, the typed events carried by the incremental push transport, and
//! the decoder that turns raw response bytes into those events.

pub mod client;
pub mod decoder;
pub mod error;
pub mod stream;
pub mod types;

pub use client::ChatClient;
pub use decoder::{FRAME_PREFIX, FrameDecoder};
pub use error::{Error, Result};
pub use stream::{FrameStream, StreamEvent, decode_frames};
pub use types::*;
