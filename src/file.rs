//! File-level decoding: chunk layout, the parallel initial scan, and the
//! incremental parse-ahead coordinator.
//!
//! [`MidiFile`] owns one resumable [`TrackParser`] per track chunk and merges
//! their output into a single time-ordered note store, event queue, and tempo
//! timeline. Tracks parse in parallel on the rayon pool; merging happens
//! under short locks so a consumer can query the model between increments.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::note::{PlaybackEvent, TempoChange};
use crate::primitives::{read_u16, read_u32};
use crate::reader::{BufferedByteSource, ByteSource, RegionByteSource};
use crate::store::{EventQueue, NoteStore};
use crate::tempo::TempoTimeline;
use crate::track::TrackParser;

const HEADER_MAGIC: u32 = u32::from_be_bytes(*b"MThd");
const TRACK_MAGIC: u32 = u32::from_be_bytes(*b"MTrk");

/// SMF format word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Format 0, one track.
    SingleTrack,
    /// Format 1, simultaneous tracks sharing one timeline.
    Parallel,
    /// Format 2, independent sequences.
    Sequential,
}

impl Format {
    fn from_raw(raw: u16) -> Result<Self> {
        match raw {
            0 => Ok(Self::SingleTrack),
            1 => Ok(Self::Parallel),
            2 => Ok(Self::Sequential),
            other => Err(Error::UnsupportedFormat(other)),
        }
    }
}

/// Time division from the header chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Division {
    /// Ticks per quarter note.
    Ppq(u16),
    /// SMPTE frames per second and ticks per frame.
    Smpte { fps: u8, ticks_per_frame: u8 },
}

impl Division {
    fn from_raw(raw: u16) -> Self {
        if raw & 0x8000 != 0 {
            // High byte is a negative SMPTE fps in two's complement.
            let fps = ((raw >> 8) as u8 as i8).unsigned_abs();
            Self::Smpte {
                fps,
                ticks_per_frame: raw as u8,
            }
        } else {
            Self::Ppq(raw)
        }
    }

    /// Effective ticks per quarter note for tempo math. For SMPTE division
    /// this is frames per second times ticks per frame, so the default
    /// 500000 us tempo yields the intended half second per "quarter".
    pub fn ticks_per_quarter(&self) -> u32 {
        match *self {
            Self::Ppq(ppq) => u32::from(ppq),
            Self::Smpte {
                fps,
                ticks_per_frame,
            } => u32::from(fps) * u32::from(ticks_per_frame),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackChunk {
    /// Absolute byte offset of the chunk body.
    offset: u64,
    /// Declared body length in bytes.
    length: u64,
}

/// Header fields and track chunk locations from one sequential pass over the
/// chunk structure.
struct FileLayout {
    format: Format,
    division: Division,
    chunks: Vec<TrackChunk>,
}

impl FileLayout {
    fn parse(source: &mut dyn ByteSource) -> Result<Self> {
        if read_u32(source)? != HEADER_MAGIC {
            return Err(Error::InvalidHeader("missing MThd chunk"));
        }
        let header_len = read_u32(source)?;
        if header_len < 6 {
            return Err(Error::InvalidHeader("header chunk shorter than 6 bytes"));
        }
        let format = Format::from_raw(read_u16(source)?)?;
        let declared_tracks = read_u16(source)?;
        let division = Division::from_raw(read_u16(source)?);
        if header_len > 6 {
            // Longer headers are valid; the extra bytes carry nothing we use.
            source.skip((header_len - 6) as usize)?;
        }

        let mut chunks = Vec::with_capacity(usize::from(declared_tracks));
        loop {
            let magic = match read_u32(source) {
                Ok(magic) => magic,
                // Clean end of file, or trailing garbage shorter than a
                // chunk header.
                Err(Error::EndOfRegion(_)) => break,
                Err(err) => return Err(err),
            };
            let length = match read_u32(source) {
                Ok(length) => u64::from(length),
                Err(Error::EndOfRegion(_)) => break,
                Err(err) => return Err(err),
            };
            if magic == TRACK_MAGIC {
                chunks.push(TrackChunk {
                    offset: source.location(),
                    length,
                });
            } else {
                warn!(
                    "skipping unknown chunk {:08x} ({length} bytes) at offset {}",
                    magic,
                    source.location()
                );
            }
            if source.skip(length as usize).is_err() {
                // Truncated final chunk; its parser fail-softs at the cut.
                break;
            }
        }

        if chunks.len() != usize::from(declared_tracks) {
            warn!(
                "header declares {declared_tracks} tracks, found {}",
                chunks.len()
            );
        }
        debug!(
            "layout: format {:?}, division {:?}, {} track chunks",
            format,
            division,
            chunks.len()
        );
        Ok(Self {
            format,
            division,
            chunks,
        })
    }
}

/// A decoded Standard MIDI File with incremental parse-ahead.
///
/// Construction scans every track once (in parallel) to learn the tempo map
/// and total length, then rewinds. Call [`parse_up_to`](MidiFile::parse_up_to)
/// ahead of the playback cursor to materialize notes and events
/// incrementally, and [`evict_before`](MidiFile::evict_before) behind it to
/// bound memory.
pub struct MidiFile {
    format: Format,
    division: Division,
    config: DecoderConfig,
    tracks: Vec<Mutex<TrackParser>>,
    notes: Mutex<NoteStore>,
    events: Mutex<EventQueue>,
    tempo: RwLock<TempoTimeline>,
    total_ticks: u64,
    seconds_length: f64,
    parsed_up_to: AtomicU64,
}

impl MidiFile {
    /// Decode from a file on disk, streaming each track region through a
    /// prefetching buffer over one shared handle.
    pub fn open<P: AsRef<Path>>(path: P, config: DecoderConfig) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let stream = Arc::new(Mutex::new(file));

        let layout = {
            let mut header = BufferedByteSource::new(stream.clone(), 0, len, config.buffer_size)?;
            FileLayout::parse(&mut header)?
        };
        let tracks = layout
            .chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| -> Result<_> {
                let source = BufferedByteSource::new(
                    stream.clone(),
                    chunk.offset,
                    chunk.length,
                    config.buffer_size,
                )?;
                Ok(Mutex::new(TrackParser::new(
                    Box::new(source),
                    index as u32,
                    &config,
                )))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::assemble(layout, tracks, config)
    }

    /// Decode from a memory-mapped file. Every track reads the mapping
    /// directly, so there is no prefetch thread or shared-handle lock.
    #[cfg(feature = "mmap")]
    pub fn open_mmap<P: AsRef<Path>>(path: P, config: DecoderConfig) -> Result<Self> {
        use crate::reader::MappedByteSource;

        let file = File::open(path)?;
        let map = MappedByteSource::map_file(&file)?;
        let len = map.len() as u64;

        let layout = FileLayout::parse(&mut RegionByteSource::new(map.clone(), 0, len))?;
        let tracks = Self::region_tracks(&layout, &map, &config);
        Self::assemble(layout, tracks, config)
    }

    /// Decode from bytes already in memory.
    pub fn from_bytes(bytes: Vec<u8>, config: DecoderConfig) -> Result<Self> {
        let data = Arc::new(bytes);
        let len = data.len() as u64;

        let layout = FileLayout::parse(&mut RegionByteSource::new(data.clone(), 0, len))?;
        let tracks = Self::region_tracks(&layout, &data, &config);
        Self::assemble(layout, tracks, config)
    }

    fn region_tracks<B: AsRef<[u8]> + Send + Sync + 'static>(
        layout: &FileLayout,
        data: &Arc<B>,
        config: &DecoderConfig,
    ) -> Vec<Mutex<TrackParser>> {
        layout
            .chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let source = RegionByteSource::new(data.clone(), chunk.offset, chunk.length);
                Mutex::new(TrackParser::new(Box::new(source), index as u32, config))
            })
            .collect()
    }

    fn assemble(
        layout: FileLayout,
        tracks: Vec<Mutex<TrackParser>>,
        config: DecoderConfig,
    ) -> Result<Self> {
        let mut file = Self {
            format: layout.format,
            division: layout.division,
            config,
            tracks,
            notes: Mutex::new(NoteStore::new()),
            events: Mutex::new(EventQueue::new()),
            tempo: RwLock::new(TempoTimeline::new()),
            total_ticks: 0,
            seconds_length: 0.0,
            parsed_up_to: AtomicU64::new(0),
        };
        file.initial_scan()?;
        if file.config.preload_all {
            file.parse_up_to(u64::MAX);
        }
        Ok(file)
    }

    /// Fast-pass every track in parallel to collect tempo changes and the
    /// file length, then rewind for the materializing pass.
    fn initial_scan(&mut self) -> Result<()> {
        let scanned = self
            .tracks
            .par_iter_mut()
            .map(|track| -> Result<(u64, Vec<TempoChange>)> {
                let parser = track.get_mut();
                let end = parser.scan();
                let changes = parser.take_tempo_changes();
                parser.rewind()?;
                Ok((end, changes))
            })
            .collect::<Result<Vec<_>>>()?;

        let timeline = self.tempo.get_mut();
        for (end, changes) in &scanned {
            self.total_ticks = self.total_ticks.max(*end);
            timeline.merge(changes);
        }
        self.seconds_length =
            timeline.tick_to_seconds(self.total_ticks, self.division.ticks_per_quarter());
        debug!(
            "scanned {} tracks: {} ticks, {:.3} s, {} tempo changes",
            self.tracks.len(),
            self.total_ticks,
            self.seconds_length,
            timeline.changes().len()
        );
        Ok(())
    }

    /// Advance every unfinished track to at least `target_tick` and merge the
    /// new notes, events, and tempo changes into the global model.
    ///
    /// Increments are cumulative: each call covers `[previous target,
    /// target_tick)` without re-parsing. Safe to call past the end of the
    /// file; tracks stop at their End-of-Track.
    pub fn parse_up_to(&self, target_tick: u64) {
        self.tracks.par_iter().for_each(|track| {
            let mut parser = track.lock();
            if !parser.is_finished() {
                parser.parse_up_to(target_tick);
            }
        });
        rayon::join(|| self.merge_notes(), || self.merge_events());
        self.parsed_up_to
            .fetch_max(target_tick.min(self.total_ticks), Ordering::AcqRel);
    }

    /// Move each track's pending output into the global store. Notes keep
    /// stable handles across the move so their tracks can close them later.
    fn merge_notes(&self) {
        let mut store = self.notes.lock();
        let mut handles = Vec::new();
        let mut fresh_tempo = Vec::new();
        let mut inserted = false;
        for track in &self.tracks {
            let mut parser = track.lock();
            let pending = parser.take_pending_notes();
            if !pending.is_empty() {
                handles.clear();
                store.insert_batch(pending, &mut handles);
                parser.adopt_handles(&handles);
                inserted = true;
            }
            for (handle, end) in parser.take_pending_closes() {
                store.close(handle, end);
            }
            fresh_tempo.append(&mut parser.take_tempo_changes());
        }
        if inserted {
            store.sort_by_start();
        }
        drop(store);
        // The full pass re-reads Set-Tempo events the scan already merged;
        // the timeline dedups them.
        if !fresh_tempo.is_empty() {
            self.tempo.write().merge(&fresh_tempo);
        }
    }

    fn merge_events(&self) {
        if !self.config.capture_events {
            return;
        }
        let mut batch = Vec::new();
        for track in &self.tracks {
            batch.append(&mut track.lock().take_events());
        }
        self.events.lock().merge(&mut batch);
    }

    /// Drop closed notes that ended strictly before `horizon`, returning how
    /// many were removed. Open notes survive any horizon.
    pub fn evict_before(&self, horizon: u64) -> usize {
        let evicted = self.notes.lock().evict_before(horizon);
        if evicted > 0 {
            debug!("evicted {evicted} notes before tick {horizon}");
        }
        evicted
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn division(&self) -> Division {
        self.division
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Largest end-of-track tick across all tracks, known from the initial
    /// scan.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Wall-clock length of the file in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.seconds_length
    }

    /// Tick every track has been materialized through.
    pub fn parsed_up_to(&self) -> u64 {
        self.parsed_up_to.load(Ordering::Acquire)
    }

    /// The merged note store. Hold the guard only briefly; merging blocks on
    /// it.
    pub fn notes(&self) -> MutexGuard<'_, NoteStore> {
        self.notes.lock()
    }

    /// The merged playback event queue. Empty unless
    /// [`capture_events`](DecoderConfig::capture_events) is set.
    pub fn events(&self) -> MutexGuard<'_, EventQueue> {
        self.events.lock()
    }

    /// The merged tempo timeline.
    pub fn tempo(&self) -> RwLockReadGuard<'_, TempoTimeline> {
        self.tempo.read()
    }

    /// Pop every captured event scheduled at or before `tick` into `out`.
    pub fn take_events_through(&self, tick: u64, out: &mut Vec<PlaybackEvent>) {
        self.events.lock().pop_through(tick, out);
    }

    /// Wall-clock seconds elapsed at `tick` under the merged tempo map.
    pub fn seconds_at_tick(&self, tick: u64) -> f64 {
        self.tempo
            .read()
            .tick_to_seconds(tick, self.division.ticks_per_quarter())
    }

    /// Tick reached after `seconds` of playback under the merged tempo map.
    pub fn tick_at_seconds(&self, seconds: f64) -> u64 {
        self.tempo
            .read()
            .seconds_to_tick(seconds, self.division.ticks_per_quarter())
    }
}
