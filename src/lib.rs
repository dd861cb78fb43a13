//! A bidirectional push-to-talk voice bridge between a Zello Channels
//! endpoint and a USRP endpoint.
//!
//! The Zello side speaks JSON and Opus-framed binary messages over a
//! WebSocket; the USRP side speaks raw 16-bit PCM at 8 kHz over UDP, wrapped
//! in a 32-byte control header. The bridge relays keyed audio in both
//! directions, transcoding between the two, and mirrors each side's PTT
//! state onto the other so that neither side transmits while the other is
//! keyed.
//!
//! [`BridgeController`] wires the pieces together: two [`ByteQueue`]s carry
//! PCM between the endpoints, two [`PttFlag`]s carry keying state, and four
//! tasks (one ingress and one egress per side) run until shutdown.
//!
//! [`BridgeController`]: bridge::BridgeController
//! [`ByteQueue`]: queue::ByteQueue
//! [`PttFlag`]: queue::PttFlag

pub mod bridge;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod queue;
pub mod usrp;
pub mod zello;

mod internal;

pub use crate::error::{Error, Result};
