//! # Packet Payloads
//!
//! Payload types for the packets a client needs to get from the handshake
//! into the play phase and to stay there.
//!
//! | module | phase |
//! |---|---|
//! | [`handshake`] | HANDSHAKE |
//! | [`status`] | STATUS |
//! | [`login`] | LOGIN (plus `Disconnect` and `SetCompression`, reused later) |
//! | [`configuration`] | CONFIGURATION |
//! | [`play`] | PLAY |
//!
//! Handshake and status packets have the same ids in every version and are
//! registered by [`register_common`]. Everything else is registered by the
//! version adapters in [`crate::version`].

pub mod configuration;
pub mod handshake;
pub mod login;
pub mod play;
pub mod status;

pub use configuration::*;
pub use handshake::*;
pub use login::*;
pub use play::*;
pub use status::*;

use crate::mapping::PacketDescriptor;
use crate::protocol::Protocol;
use botwire_core::{Phase, Result};
use serde_json::Value;

/// Register the packets shared by every protocol version
pub fn register_common(protocol: &mut Protocol) -> Result<()> {
    protocol.register(
        PacketDescriptor::packet::<Handshake>(0x00, Phase::HANDSHAKE, "ServerboundHandshake")
            .alias("handshake")
            .build(),
    )?;

    protocol.register(
        PacketDescriptor::packet::<StatusRequest>(0x00, Phase::STATUS, "ServerboundStatusRequest")
            .alias("status_request")
            .build(),
    )?;
    protocol.register(
        PacketDescriptor::packet::<PingRequest>(0x01, Phase::STATUS, "ServerboundPingRequest")
            .alias("ping_request")
            .build(),
    )?;
    protocol.register(
        PacketDescriptor::packet::<StatusResponse>(0x00, Phase::STATUS, "StatusResponse")
            .alias("status_response")
            .build(),
    )?;
    protocol.register(
        PacketDescriptor::packet::<PongResponse>(0x01, Phase::STATUS, "PongResponse")
            .alias("pong_response")
            .build(),
    )?;
    Ok(())
}

/// Plain text of a JSON text component
///
/// Concatenates `text` (or `translate` when there is no text) of the
/// component and of its `extra` children, depth first. Formatting is dropped.
pub fn flatten_text(component: &Value) -> String {
    let mut out = String::new();
    flatten_into(component, &mut out);
    out
}

fn flatten_into(component: &Value, out: &mut String) {
    match component {
        Value::String(text) => out.push_str(text),
        Value::Array(parts) => parts.iter().for_each(|part| flatten_into(part, out)),
        Value::Object(fields) => {
            match (fields.get("text"), fields.get("translate")) {
                (Some(Value::String(text)), _) => out.push_str(text),
                (_, Some(Value::String(key))) => out.push_str(key),
                _ => {}
            }
            if let Some(extra) = fields.get("extra") {
                flatten_into(extra, out);
            }
        }
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => {}
    }
}
