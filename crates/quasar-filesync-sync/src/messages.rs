//! Relay protocol frames.
//!
//! These wrap sync messages on their way through the Quasar relay. The
//! relay never looks inside `data` frames.

use serde::{Deserialize, Serialize};

/// Relay protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Relay-assigned client number, unique within a channel.
pub type ClientId = u64;

/// Frames sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayRequest {
    /// Ask for a pairing code pointing at our channel.
    GenerateCode,
    /// Forward `content` to the channel. The relay echoes it back to us.
    Data { content: String },
}

/// Frames received from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Sent once after the socket opens.
    ConnectionInfo {
        /// Our client id.
        id: ClientId,
        /// The joined channel.
        channel_uuid: String,
        /// Every client on the channel, including us.
        client_ids: Vec<ClientId>,
        protocol_version: u32,
    },
    /// Reply to [`RelayRequest::GenerateCode`].
    GeneratedCode { code: String },
    /// Content sent by any client on the channel, this one included.
    Data { content: String },
    /// Broadcast to everyone on the channel, the new client included.
    ClientConnected { id: ClientId },
    ClientDisconnected { id: ClientId },
}
