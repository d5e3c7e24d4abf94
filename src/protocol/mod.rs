//! Wire protocol between the scraping tier and the processing tier.
//!
//! Each TCP connection carries one framed [`TaskRequest`] followed by one
//! framed [`TaskResponse`]. Worker processes on the processing tier speak the
//! same framing over their stdin/stdout.

pub mod codec;
mod message;

pub use codec::{FrameCodec, FrameError, MalformedFrame, HEADER_LEN};
pub use message::{TaskKind, TaskRequest, TaskResponse, UnknownTaskKind};
