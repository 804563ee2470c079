//! Global note arena and playback-event queue.
//!
//! Notes live in an append-only slot arena addressed by stable
//! [`NoteHandle`]s, so a track can close a note that already migrated into
//! the global model without the move invalidating anything. A separate slot
//! index is kept sorted by start tick for the consumer's per-frame
//! binary-search range scans; eviction soft-deletes a slot and recycles it.

use std::collections::VecDeque;

use crate::note::{Note, PlaybackEvent};

/// Stable reference to a note slot. Eviction invalidates the handle: the
/// slot may be recycled for a later note, so a stale handle must not be held
/// across [`evict_before`](NoteStore::evict_before).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteHandle(pub(crate) u32);

/// The merged, time-ordered note collection.
#[derive(Debug, Default)]
pub struct NoteStore {
    slots: Vec<Note>,
    free: Vec<u32>,
    /// Live slots, ascending by start tick after each merge.
    order: Vec<u32>,
}

impl NoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live notes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Look up a note by handle. `None` while the note's slot sits on the
    /// free list after eviction; once the slot is recycled the handle
    /// resolves to the new occupant.
    pub fn get(&self, handle: NoteHandle) -> Option<&Note> {
        let note = self.slots.get(handle.0 as usize)?;
        (!note.is_deleted()).then_some(note)
    }

    /// Append freshly parsed notes, pushing one handle per note (in order)
    /// onto `handles`. The index is not re-sorted here; call
    /// [`sort_by_start`](NoteStore::sort_by_start) once the batch loop is
    /// done.
    pub(crate) fn insert_batch(
        &mut self,
        notes: impl IntoIterator<Item = Note>,
        handles: &mut Vec<NoteHandle>,
    ) {
        for note in notes {
            let slot = match self.free.pop() {
                Some(slot) => {
                    self.slots[slot as usize] = note;
                    slot
                }
                None => {
                    self.slots.push(note);
                    (self.slots.len() - 1) as u32
                }
            };
            self.order.push(slot);
            handles.push(NoteHandle(slot));
        }
    }

    /// Restore ascending start-tick order after a merge.
    pub(crate) fn sort_by_start(&mut self) {
        let Self { slots, order, .. } = self;
        order.sort_by_key(|&slot| slots[slot as usize].start);
    }

    /// Set the end tick of a previously merged note.
    pub(crate) fn close(&mut self, handle: NoteHandle, end: u64) {
        self.slots[handle.0 as usize].close(end);
    }

    /// Live notes in ascending start order.
    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.order.iter().map(move |&slot| &self.slots[slot as usize])
    }

    /// Notes whose start tick falls in `[from, to)`, located by binary
    /// search over the sorted index.
    pub fn range_by_start(&self, from: u64, to: u64) -> impl Iterator<Item = &Note> {
        let lo = self
            .order
            .partition_point(|&slot| self.slots[slot as usize].start < from);
        let hi = self
            .order
            .partition_point(|&slot| self.slots[slot as usize].start < to);
        self.order[lo..hi]
            .iter()
            .map(move |&slot| &self.slots[slot as usize])
    }

    /// Drop every closed note that ended strictly before `horizon`, freeing
    /// its slot for reuse. Open notes are never evicted, whatever the
    /// horizon. Returns the number of notes removed.
    pub fn evict_before(&mut self, horizon: u64) -> usize {
        let Self { slots, free, order } = self;
        let before = order.len();
        order.retain(|&slot| {
            let note = &mut slots[slot as usize];
            if note.has_end() && note.end < horizon {
                note.mark_deleted();
                free.push(slot);
                false
            } else {
                true
            }
        });
        before - order.len()
    }
}

/// Time-ordered queue of raw playback events for the real-time output sink.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<PlaybackEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Next event to fire, if any.
    pub fn peek(&self) -> Option<&PlaybackEvent> {
        self.events.front()
    }

    /// Fold a per-increment batch in and restore ascending tick order.
    pub(crate) fn merge(&mut self, batch: &mut Vec<PlaybackEvent>) {
        if batch.is_empty() {
            return;
        }
        self.events.extend(batch.drain(..));
        self.events.make_contiguous().sort_by_key(|e| e.tick);
    }

    /// Pop every event scheduled at or before `tick` into `out`.
    pub fn pop_through(&mut self, tick: u64, out: &mut Vec<PlaybackEvent>) {
        while self.events.front().is_some_and(|e| e.tick <= tick) {
            if let Some(event) = self.events.pop_front() {
                out.push(event);
            }
        }
    }
}
