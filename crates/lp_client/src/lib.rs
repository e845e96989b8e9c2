//! lp_client - what a Lockpost client does with messages
//!
//! - `outgoing` - compose, seal both envelopes, persist atomically, deliver
//! - `viewer`   - pick this viewer's envelope, decrypt, fall back, cache
//! - `transport` - delivery seam plus an in-process channel implementation
//!
//! Crypto failures stop here: `send_message` turns them into a
//! `PersistRejected` outcome, and the viewer turns them into a placeholder.

pub mod error;
pub mod outgoing;
pub mod transport;
pub mod viewer;

pub use error::{SendError, TransportError};
pub use outgoing::{send_message, SendOutcome};
pub use transport::{ChannelTransport, Transport};
pub use viewer::{
    render_content, spawn_key_load, ClientConfig, DisplayContent, FallbackCause, KeyStatus,
    MessageViewer,
};
