//! Loopback coordination channel between UI processes and the execution host.
//!
//! Frames are single-line JSON objects terminated by `\n`. UI → host frames are
//! `UiMessage`s, host → UI frames are `HostEvent`s. Nothing on this channel is
//! authoritative: a lost frame only delays the host until its next re-evaluation.

pub mod client;
pub mod server;

pub use client::{CoordinationClient, EventStream};
pub use server::CoordinationServer;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Longest accepted frame; anything bigger is dropped.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

pub fn encode_frame<T: Serialize>(message: &T) -> serde_json::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_frame<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{HostEvent, UiMessage};

    #[test]
    fn frames_are_tagged_json_lines() {
        let bytes = encode_frame(&UiMessage::TaskCreated { id: 4 }).unwrap();
        assert_eq!(bytes, b"{\"type\":\"task_created\",\"id\":4}\n");

        let event: HostEvent =
            decode_frame("{\"type\":\"host_status\",\"status\":\"running\"}\n").unwrap();
        assert_eq!(
            event,
            HostEvent::HostStatus {
                status: crate::domain::HostStatus::Running
            }
        );
    }
}
