//! Core data types shared between the track parsers and the global model.

/// End tick has been observed.
const FLAG_HAS_END: u8 = 0b01;
/// Soft-deleted by eviction.
const FLAG_DELETED: u8 = 0b10;

/// A materialized note.
///
/// `end` is only meaningful once [`has_end`](Note::has_end) is true; a note
/// without an end is still sounding (its Note-Off has not been parsed yet).
/// The two lifecycle bits are packed into one flag byte to keep the struct
/// small enough for million-note files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub key: u8,
    pub velocity: u8,
    pub channel: u8,
    flags: u8,
    /// Index of the track chunk that produced this note.
    pub track: u32,
    /// Start tick, absolute within the file.
    pub start: u64,
    /// End tick; equals `start` until the note is closed.
    pub end: u64,
}

impl Note {
    /// A note opened by a Note-On at `start`, not yet closed.
    pub(crate) fn began(track: u32, channel: u8, key: u8, velocity: u8, start: u64) -> Self {
        Self {
            key,
            velocity,
            channel,
            flags: 0,
            track,
            start,
            end: start,
        }
    }

    /// Whether a matching Note-Off (or forced end-of-track closure) was seen.
    #[inline]
    pub fn has_end(&self) -> bool {
        self.flags & FLAG_HAS_END != 0
    }

    /// Whether the note was soft-deleted by eviction.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    /// Note length in ticks, or `None` while the note is still open.
    #[inline]
    pub fn duration(&self) -> Option<u64> {
        self.has_end().then(|| self.end - self.start)
    }

    #[inline]
    pub(crate) fn close(&mut self, end: u64) {
        self.end = end;
        self.flags |= FLAG_HAS_END;
    }

    #[inline]
    pub(crate) fn mark_deleted(&mut self) {
        self.flags |= FLAG_DELETED;
    }
}

/// A Set-Tempo meta event lifted out of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    /// Absolute tick the tempo takes effect at.
    pub tick: u64,
    /// Microseconds per quarter note.
    pub micros_per_quarter: u32,
}

/// Raw status/data bytes with the tick they fire at, for real-time output
/// pass-through. Not needed for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub tick: u64,
    pub data: [u8; 3],
    /// Valid bytes in `data` (1-3).
    pub len: u8,
}

impl PlaybackEvent {
    #[inline]
    pub(crate) fn new(tick: u64, data: [u8; 3], len: u8) -> Self {
        Self { tick, data, len }
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.data[0] & 0xF0
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        self.data[0] & 0x0F
    }

    /// The valid wire bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}
