//! lp_proto - storage/wire types for Lockpost messages
//!
//! All envelope bytes that reach storage or a transport go through `codec`,
//! which is versioned independently of the cipher suite.
//!
//! # Modules
//! - `codec`     - Envelope encode/decode and slot classification
//! - `message`   - The persisted `Message` record and placeholder strings
//! - `lifecycle` - Per-message state machine

pub mod codec;
pub mod lifecycle;
pub mod message;

pub use codec::{classify_slot, decode, encode, is_structurally_valid, CodecError, EnvelopeSlot};
pub use lifecycle::{LifecycleError, MessageState};
pub use lp_crypto::Envelope;
pub use message::{Draft, Message};
