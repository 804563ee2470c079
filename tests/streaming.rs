//! End-to-end decoding tests over synthetic SMF fixtures.
//!
//! Fixtures are built in memory with a small chunk builder; the same bytes
//! are fed through the in-memory, buffered-file, and memory-mapped paths.
//!
//! Run with:
//! ```bash
//! cargo test --test streaming
//! ```

use std::io::Write;

use tutti_smf::primitives::encode_vlq;
use tutti_smf::{DecoderConfig, Division, Format, MidiFile};

/// Builder for a complete SMF byte blob.
struct Smf {
    format: u16,
    division: u16,
    tracks: Vec<Vec<u8>>,
}

impl Smf {
    fn new(format: u16, division: u16) -> Self {
        Self {
            format,
            division,
            tracks: Vec::new(),
        }
    }

    /// Append a track; an End-of-Track meta is added automatically.
    fn track(mut self, events: &[(u32, &[u8])]) -> Self {
        let mut body = Vec::new();
        for &(delta, data) in events {
            encode_vlq(delta, &mut body);
            body.extend_from_slice(data);
        }
        encode_vlq(0, &mut body);
        body.extend_from_slice(&[0xFF, 0x2F, 0x00]);
        self.tracks.push(body);
        self
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = b"MThd".to_vec();
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&self.format.to_be_bytes());
        out.extend_from_slice(&(self.tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.division.to_be_bytes());
        for body in &self.tracks {
            out.extend_from_slice(b"MTrk");
            out.extend_from_slice(&(body.len() as u32).to_be_bytes());
            out.extend_from_slice(body);
        }
        out
    }

    fn decode(&self, config: DecoderConfig) -> MidiFile {
        MidiFile::from_bytes(self.bytes(), config).expect("fixture should decode")
    }
}

fn two_track_fixture() -> Smf {
    Smf::new(1, 480)
        .track(&[
            (0, &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]), // 500000 us
            (0, &[0x90, 60, 100]),
            (480, &[0x80, 60, 0]),
            (0, &[0x90, 64, 100]),
            (480, &[0x80, 64, 0]),
        ])
        .track(&[
            (240, &[0x91, 36, 110]),
            (240, &[0x81, 36, 0]),
            (960, &[0x91, 38, 110]),
            (240, &[0x81, 38, 0]),
        ])
}

#[test]
fn test_header_and_scan_metadata() {
    let file = two_track_fixture().decode(DecoderConfig::default());
    assert_eq!(file.format(), Format::Parallel);
    assert_eq!(file.division(), Division::Ppq(480));
    assert_eq!(file.track_count(), 2);
    // Track 2 is the longest: 240 + 240 + 960 + 240 = 1680 ticks.
    assert_eq!(file.total_ticks(), 1680);
    // 1680 ticks at 480 PPQ and 500 ms per quarter.
    assert!((file.duration_seconds() - 1.75).abs() < 1e-9);
    // Nothing is materialized until asked for.
    assert!(file.notes().is_empty());
    assert_eq!(file.parsed_up_to(), 0);
}

#[test]
fn test_incremental_parse_is_monotonic() {
    let file = two_track_fixture().decode(DecoderConfig::default());

    file.parse_up_to(500);
    let first: Vec<(u32, u8, u64)> = file
        .notes()
        .iter()
        .map(|n| (n.track, n.key, n.start))
        .collect();
    assert!(first.contains(&(0, 60, 0)));
    assert!(first.contains(&(1, 36, 240)));

    file.parse_up_to(2000);
    let all = file.notes();
    assert_eq!(all.len(), 4);
    // Earlier notes survive the later increment unchanged.
    for entry in &first {
        assert!(all.iter().any(|n| (n.track, n.key, n.start) == *entry));
    }
    // Global ordering is by start tick across tracks.
    let starts: Vec<u64> = all.iter().map(|n| n.start).collect();
    let mut sorted = starts.clone();
    sorted.sort_unstable();
    assert_eq!(starts, sorted);
}

#[test]
fn test_note_closed_after_it_was_merged() {
    // The note opens at tick 0 but closes at 960; an increment boundary in
    // between moves it to the global store while still open. The controller
    // at 150 is where the first increment stops.
    let file = Smf::new(0, 480)
        .track(&[
            (0, &[0x90, 60, 100]),
            (150, &[0xB0, 1, 64]),
            (810, &[0x80, 60, 0]),
        ])
        .decode(DecoderConfig::default());

    file.parse_up_to(100);
    {
        let notes = file.notes();
        assert_eq!(notes.len(), 1);
        assert!(!notes.iter().next().unwrap().has_end());
    }

    file.parse_up_to(2000);
    let notes = file.notes();
    let note = notes.iter().next().unwrap();
    assert!(note.has_end());
    assert_eq!(note.end, 960);
    assert_eq!(note.duration(), Some(960));
}

#[test]
fn test_eviction_window() {
    let file = two_track_fixture().decode(DecoderConfig::default());
    file.parse_up_to(u64::MAX);
    assert_eq!(file.notes().len(), 4);

    // Horizon 500: notes ending at 480 go, the rest stay.
    assert_eq!(file.evict_before(500), 2);
    assert_eq!(file.notes().len(), 2);
    assert_eq!(file.evict_before(500), 0);

    assert_eq!(file.evict_before(u64::MAX), 2);
    assert!(file.notes().is_empty());
}

#[test]
fn test_event_capture_and_pop() {
    let config = DecoderConfig {
        capture_events: true,
        ..DecoderConfig::default()
    };
    let file = two_track_fixture().decode(config);
    file.parse_up_to(u64::MAX);

    let mut fired = Vec::new();
    file.take_events_through(240, &mut fired);
    // Track 1's On(60) at 0, then track 2's On(36) at 240.
    let ticks: Vec<u64> = fired.iter().map(|e| e.tick).collect();
    assert_eq!(ticks, vec![0, 240]);
    assert_eq!(fired[0].bytes(), &[0x90, 60, 100]);
    assert_eq!(fired[1].bytes(), &[0x91, 36, 110]);

    fired.clear();
    file.take_events_through(u64::MAX, &mut fired);
    assert_eq!(fired.len(), 6);
    assert!(file.events().is_empty());
}

#[test]
fn test_events_disabled_by_default() {
    let file = two_track_fixture().decode(DecoderConfig::default());
    file.parse_up_to(u64::MAX);
    assert!(file.events().is_empty());
}

#[test]
fn test_tempo_changes_map_to_seconds() {
    // 120 BPM for one quarter, then 240 BPM.
    let file = Smf::new(0, 480)
        .track(&[
            (0, &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]), // 500000
            (480, &[0xFF, 0x51, 0x03, 0x03, 0xD0, 0x90]), // 250000
            (480, &[0x90, 60, 100]),
            (480, &[0x80, 60, 0]),
        ])
        .decode(DecoderConfig::default());

    assert_eq!(file.tempo().changes().len(), 2);
    assert_eq!(file.tempo().tempo_at(0), 500_000);
    assert_eq!(file.tempo().tempo_at(480), 250_000);

    // 0.5 s for the first quarter, 0.25 s each for the next two.
    assert!((file.seconds_at_tick(480) - 0.5).abs() < 1e-9);
    assert!((file.duration_seconds() - 1.0).abs() < 1e-9);
    assert_eq!(file.tick_at_seconds(0.75), 960);

    // Tempo is not duplicated by the materializing pass.
    file.parse_up_to(u64::MAX);
    assert_eq!(file.tempo().changes().len(), 2);
}

#[test]
fn test_smpte_division_timing() {
    // -25 fps, 40 ticks per frame: effective PPQ 25 x 40 = 1000, so 2000
    // ticks at the default 500000 us tempo come out to one second.
    let file = Smf::new(0, 0xE728)
        .track(&[(0, &[0x90, 60, 100]), (2000, &[0x80, 60, 0])])
        .decode(DecoderConfig::default());

    assert_eq!(
        file.division(),
        Division::Smpte {
            fps: 25,
            ticks_per_frame: 40
        }
    );
    assert!((file.duration_seconds() - 1.0).abs() < 1e-9);
}

#[test]
fn test_running_status_and_controllers_across_file() {
    let file = Smf::new(0, 96)
        .track(&[
            (0, &[0xC0, 5]),          // program change
            (0, &[0x90, 60, 100]),
            (24, &[62, 100]),         // running status Note-On
            (24, &[60, 0]),           // running status off (velocity 0)
            (24, &[62, 0]),
            (0, &[0xB0, 64, 127]),    // sustain pedal
        ])
        .decode(DecoderConfig::default());

    file.parse_up_to(u64::MAX);
    let notes = file.notes();
    assert_eq!(notes.len(), 2);
    let keys: Vec<u8> = notes.iter().map(|n| n.key).collect();
    assert_eq!(keys, vec![60, 62]);
    assert!(notes.iter().all(|n| n.has_end()));
}

#[test]
fn test_buffered_file_path_matches_in_memory() {
    let fixture = two_track_fixture();
    let bytes = fixture.bytes();

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&bytes).unwrap();
    tmp.flush().unwrap();

    // A tiny buffer forces many prefetch swaps.
    let config = DecoderConfig {
        buffer_size: 8,
        ..DecoderConfig::default()
    };
    let from_disk = MidiFile::open(tmp.path(), config).unwrap();
    let from_memory = fixture.decode(DecoderConfig::default());

    from_disk.parse_up_to(u64::MAX);
    from_memory.parse_up_to(u64::MAX);

    let disk: Vec<_> = from_disk
        .notes()
        .iter()
        .map(|n| (n.track, n.key, n.start, n.end))
        .collect();
    let memory: Vec<_> = from_memory
        .notes()
        .iter()
        .map(|n| (n.track, n.key, n.start, n.end))
        .collect();
    assert_eq!(disk, memory);
    assert_eq!(from_disk.total_ticks(), from_memory.total_ticks());
}

#[cfg(feature = "mmap")]
#[test]
fn test_mmap_path_matches_in_memory() {
    let fixture = two_track_fixture();

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&fixture.bytes()).unwrap();
    tmp.flush().unwrap();

    let mapped = MidiFile::open_mmap(tmp.path(), DecoderConfig::default()).unwrap();
    let memory = fixture.decode(DecoderConfig::default());

    mapped.parse_up_to(u64::MAX);
    memory.parse_up_to(u64::MAX);
    assert_eq!(mapped.notes().len(), memory.notes().len());
    assert_eq!(mapped.total_ticks(), memory.total_ticks());
}

#[test]
fn test_many_tracks_parallel() {
    let mut fixture = Smf::new(1, 480);
    for i in 0..32u32 {
        let key = 40 + (i % 40) as u8;
        let delta = (i * 10).min(127);
        fixture = fixture.track(&[
            (delta, &[0x90, key, 100]),
            (480, &[0x80, key, 0]),
        ]);
    }

    let file = fixture.decode(DecoderConfig::default());
    assert_eq!(file.track_count(), 32);

    file.parse_up_to(u64::MAX);
    let notes = file.notes();
    assert_eq!(notes.len(), 32);
    // One note per track, globally sorted by start.
    let starts: Vec<u64> = notes.iter().map(|n| n.start).collect();
    let mut sorted = starts.clone();
    sorted.sort_unstable();
    assert_eq!(starts, sorted);
}

#[test]
fn test_range_query_window() {
    let file = two_track_fixture().decode(DecoderConfig::default());
    file.parse_up_to(u64::MAX);

    let notes = file.notes();
    let window: Vec<u8> = notes.range_by_start(240, 960).map(|n| n.key).collect();
    // Starts at 240 (36) and 480 (64); 60 starts at 0, 38 at 1440.
    assert_eq!(window, vec![36, 64]);
}
