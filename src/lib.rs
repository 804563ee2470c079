//! Streaming Standard MIDI File decoder for Tutti audio engine.
//!
//! Decodes SMF data into a time-ordered note model without holding the whole
//! file's event list in memory: each track chunk gets its own resumable
//! parser, tracks parse ahead of a playback cursor in parallel, and notes the
//! cursor has passed can be evicted. Built for very large (multi-hundred-MB)
//! files where a one-shot decode is too slow or too big.
//!
//! # Example
//!
//! ```ignore
//! use tutti_smf::{DecoderConfig, MidiFile};
//!
//! let file = MidiFile::open("song.mid", DecoderConfig::default())?;
//! println!("{:.1} s, {} tracks", file.duration_seconds(), file.track_count());
//!
//! // Each frame: materialize ahead of the cursor, drop what is behind it.
//! file.parse_up_to(cursor + lookahead);
//! for note in file.notes().range_by_start(cursor, cursor + window) {
//!     // render the note
//! }
//! file.evict_before(cursor.saturating_sub(tail));
//! ```

// Error types
pub mod error;
pub use error::{Error, Result};

// Main entry point - MidiFile
mod file;
pub use file::{Division, Format, MidiFile};

// Configuration
mod config;
pub use config::DecoderConfig;

// Essential types users need
mod note;
pub use note::{Note, PlaybackEvent, TempoChange};

mod store;
pub use store::{EventQueue, NoteHandle, NoteStore};

mod tempo;
pub use tempo::{TempoTimeline, DEFAULT_TEMPO};

// Lower-level building blocks, public for custom byte sources and fixtures
pub mod primitives;
pub mod reader;

mod track;
