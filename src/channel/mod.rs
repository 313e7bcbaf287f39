//! Realtime profile updates over a Phoenix channel.
//!
//! One websocket, one channel: `user:<user_id>`, joined with the session
//! token. See [`ChannelClient`] for the state machine and [`frame`] for the
//! wire format.

mod client;
pub mod frame;

pub use client::{ChannelClient, ChannelHandler, ChannelState, ConnectOutcome};
