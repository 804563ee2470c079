//! Per-track event state machine.
//!
//! Each parser owns one track chunk's byte source and a resumable cursor
//! (tick, remembered status, end-of-track flag). Two passes share the same
//! dispatch: the fast pass only advances the cursor while still capturing
//! Set-Tempo and End-of-Track, the full pass materializes notes and raw
//! playback events. Read failures are fail-soft: the track is marked ended
//! and its open notes are force-closed, siblings are unaffected.

use smallvec::SmallVec;
use tracing::debug;

use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::note::{Note, PlaybackEvent, TempoChange};
use crate::primitives::read_vlq;
use crate::reader::ByteSource;
use crate::store::NoteHandle;

const META_END_OF_TRACK: u8 = 0x2F;
const META_SET_TEMPO: u8 = 0x51;

/// 256 key bytes x 16 channels; a malformed key with the high bit set still
/// indexes in bounds.
const STACK_SLOTS: usize = 256 * 16;

/// Where an open note currently lives. Notes start in the track's pending
/// buffer and migrate to the global store at the next merge; the velocity
/// rides along for the playback-event filter.
#[derive(Debug, Clone, Copy)]
enum OpenNote {
    /// Index into the pending buffer.
    Local(u32, u8),
    /// Stable handle into the global store.
    Global(NoteHandle, u8),
}

/// Newest open note on top; Note-Off pairs with the most recent Note-On when
/// same-key notes overlap.
type ActiveStack = SmallVec<[OpenNote; 2]>;

#[inline]
fn stack_index(key: u8, channel: u8) -> usize {
    (usize::from(key) << 4) | usize::from(channel)
}

pub(crate) struct TrackParser {
    reader: Box<dyn ByteSource>,
    track: u32,
    tick: u64,
    /// Last status byte seen; 0 until the first one.
    last_status: u8,
    end_of_track: bool,
    capture_events: bool,
    velocity_floor: u8,
    active: Vec<ActiveStack>,
    /// Notes produced since the last merge.
    pending: Vec<Note>,
    /// End ticks for notes that already migrated to the global store.
    pending_closes: Vec<(NoteHandle, u64)>,
    events: Vec<PlaybackEvent>,
    tempo_changes: Vec<TempoChange>,
}

impl TrackParser {
    pub fn new(reader: Box<dyn ByteSource>, track: u32, config: &DecoderConfig) -> Self {
        Self {
            reader,
            track,
            tick: 0,
            last_status: 0,
            end_of_track: false,
            capture_events: config.capture_events,
            velocity_floor: config.event_velocity_floor,
            active: vec![ActiveStack::new(); STACK_SLOTS],
            pending: Vec::new(),
            pending_closes: Vec::new(),
            events: Vec::new(),
            tempo_changes: Vec::new(),
        }
    }

    /// Current tick cursor.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_finished(&self) -> bool {
        self.end_of_track
    }

    /// Run the fast pass to the end of the track, returning the final tick.
    /// Discovers tempo changes and the track length without materializing
    /// notes.
    pub fn scan(&mut self) -> u64 {
        while !self.end_of_track {
            if let Err(err) = self.read_event(false) {
                debug!("track {} scan stopped early: {err}", self.track);
                self.end_of_track = true;
            }
        }
        self.tick
    }

    /// Rewind the cursor for the materializing pass after the initial scan.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader.reset()?;
        self.tick = 0;
        self.last_status = 0;
        self.end_of_track = false;
        Ok(())
    }

    /// Continue the full pass until the tick cursor reaches `target_tick` or
    /// the track ends. Resumes where the previous call stopped; a read
    /// failure ends the track and force-closes its open notes.
    pub fn parse_up_to(&mut self, target_tick: u64) {
        while self.tick < target_tick && !self.end_of_track {
            if let Err(err) = self.read_event(true) {
                debug!("track {} ended early: {err}", self.track);
                self.end_of_track = true;
            }
        }
        if self.end_of_track {
            self.finish();
        }
    }

    /// Hand over the notes produced since the last merge. The coordinator
    /// must pass the assigned handles back via
    /// [`adopt_handles`](TrackParser::adopt_handles) before the next
    /// increment.
    pub fn take_pending_notes(&mut self) -> Vec<Note> {
        std::mem::take(&mut self.pending)
    }

    /// Convert local open-note references into the stable handles the
    /// coordinator assigned to the batch taken by
    /// [`take_pending_notes`](TrackParser::take_pending_notes).
    pub fn adopt_handles(&mut self, handles: &[NoteHandle]) {
        for stack in &mut self.active {
            for open in stack.iter_mut() {
                if let OpenNote::Local(index, velocity) = *open {
                    *open = OpenNote::Global(handles[index as usize], velocity);
                }
            }
        }
    }

    pub fn take_pending_closes(&mut self) -> Vec<(NoteHandle, u64)> {
        std::mem::take(&mut self.pending_closes)
    }

    pub fn take_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn take_tempo_changes(&mut self) -> Vec<TempoChange> {
        std::mem::take(&mut self.tempo_changes)
    }

    /// Read one delta time + event. `full` selects the materializing pass.
    fn read_event(&mut self, full: bool) -> Result<()> {
        let delta = read_vlq(self.reader.as_mut())?;
        self.tick += u64::from(delta);
        let status = self.reader.read_fast()?;
        self.dispatch(status, full)
    }

    fn dispatch(&mut self, mut status: u8, full: bool) -> Result<()> {
        if status < 0x80 {
            // Running status: the byte is data for the remembered status.
            if self.last_status == 0 {
                return Err(Error::OrphanRunningStatus(status));
            }
            self.reader.push_back(status);
            status = self.last_status;
        }
        match status >> 4 {
            0x8 => {
                self.last_status = status;
                if full {
                    self.note_off(status)?;
                } else {
                    self.reader.skip(2)?;
                }
            }
            0x9 => {
                self.last_status = status;
                if full {
                    self.note_on(status)?;
                } else {
                    self.reader.skip(2)?;
                }
            }
            0xA | 0xB | 0xE => {
                self.last_status = status;
                if full {
                    self.opaque(status, 2)?;
                } else {
                    self.reader.skip(2)?;
                }
            }
            0xC | 0xD => {
                self.last_status = status;
                if full {
                    self.opaque(status, 1)?;
                } else {
                    self.reader.skip(1)?;
                }
            }
            0xF => self.system(status)?,
            // Data nibbles were remapped above.
            _ => {}
        }
        Ok(())
    }

    /// Meta, SysEx and system-common events. Same in both passes: tempo and
    /// end-of-track are captured, everything else is skipped by length.
    fn system(&mut self, status: u8) -> Result<()> {
        match status {
            0xFF => {
                let meta_type = self.reader.read()?;
                let length = read_vlq(self.reader.as_mut())? as usize;
                match meta_type {
                    META_END_OF_TRACK => {
                        self.end_of_track = true;
                        // Normally empty; skipped for exactness.
                        self.reader.skip(length)?;
                    }
                    META_SET_TEMPO if length >= 3 => {
                        let mut tempo = 0u32;
                        for _ in 0..3 {
                            tempo = (tempo << 8) | u32::from(self.reader.read_fast()?);
                        }
                        self.tempo_changes.push(TempoChange {
                            tick: self.tick,
                            micros_per_quarter: tempo,
                        });
                        if length > 3 {
                            self.reader.skip(length - 3)?;
                        }
                    }
                    // Unknown meta types (and short tempo payloads) never
                    // abort parsing.
                    _ => self.reader.skip(length)?,
                }
            }
            0xF0 | 0xF7 => {
                let length = read_vlq(self.reader.as_mut())? as usize;
                self.reader.skip(length)?;
            }
            // MTC quarter frame / song select.
            0xF1 | 0xF3 => self.reader.skip(1)?,
            // Song position pointer.
            0xF2 => self.reader.skip(2)?,
            // Tune request and real-time messages carry no data.
            _ => {}
        }
        Ok(())
    }

    fn note_on(&mut self, status: u8) -> Result<()> {
        let key = self.reader.read()?;
        let velocity = self.reader.read_fast()?;
        if velocity == 0 {
            // Note-On with zero velocity is a Note-Off.
            self.close_note(status, key, velocity);
            return Ok(());
        }
        let channel = status & 0x0F;
        let note = Note::began(self.track, channel, key, velocity, self.tick);
        self.active[stack_index(key, channel)]
            .push(OpenNote::Local(self.pending.len() as u32, velocity));
        self.pending.push(note);
        if self.capture_events && velocity > self.velocity_floor {
            self.events
                .push(PlaybackEvent::new(self.tick, [status, key, velocity], 3));
        }
        Ok(())
    }

    fn note_off(&mut self, status: u8) -> Result<()> {
        let key = self.reader.read()?;
        let velocity = self.reader.read_fast()?;
        self.close_note(status, key, velocity);
        Ok(())
    }

    /// Pop the newest open note for `(key, channel)` and set its end tick.
    /// An Off with no matching On is dropped, not an error.
    fn close_note(&mut self, status: u8, key: u8, data2: u8) {
        let channel = status & 0x0F;
        let Some(open) = self.active[stack_index(key, channel)].pop() else {
            return;
        };
        let note_velocity = match open {
            OpenNote::Local(index, velocity) => {
                self.pending[index as usize].close(self.tick);
                velocity
            }
            OpenNote::Global(handle, velocity) => {
                self.pending_closes.push((handle, self.tick));
                velocity
            }
        };
        if self.capture_events && note_velocity > self.velocity_floor {
            self.events
                .push(PlaybackEvent::new(self.tick, [status, key, data2], 3));
        }
    }

    /// Events the model does not reconstruct (pressure, control change,
    /// program change, pitch bend): recorded opaquely for pass-through.
    fn opaque(&mut self, status: u8, data_len: u8) -> Result<()> {
        let d1 = self.reader.read()?;
        let d2 = if data_len == 2 {
            self.reader.read_fast()?
        } else {
            0
        };
        if self.capture_events {
            self.events
                .push(PlaybackEvent::new(self.tick, [status, d1, d2], 1 + data_len));
        }
        Ok(())
    }

    /// Force-close whatever is still open once the track has ended, so every
    /// surfaced note eventually gets an end tick. Idempotent: drained stacks
    /// stay empty.
    fn finish(&mut self) {
        let tick = self.tick;
        let Self {
            active,
            pending,
            pending_closes,
            ..
        } = self;
        for stack in active.iter_mut() {
            while let Some(open) = stack.pop() {
                match open {
                    OpenNote::Local(index, _) => pending[index as usize].close(tick),
                    OpenNote::Global(handle, _) => pending_closes.push((handle, tick)),
                }
            }
        }
    }
}
