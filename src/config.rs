//! Decoder configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs for file decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Size in bytes of each prefetch buffer used by the buffered byte source.
    pub buffer_size: usize,

    /// Parse the entire file during load instead of incrementally.
    pub preload_all: bool,

    /// Record raw playback events for real-time output pass-through.
    pub capture_events: bool,

    /// Notes at or below this velocity are left out of the playback event
    /// queue. They are still materialized as notes.
    pub event_velocity_floor: u8,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256 * 1024,
            preload_all: false,
            capture_events: false,
            event_velocity_floor: 10,
        }
    }
}
