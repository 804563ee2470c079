//! Tempo timeline and tick/seconds conversion.

use crate::note::TempoChange;

/// Microseconds per quarter note assumed before the first Set-Tempo event
/// (120 BPM, the SMF default).
pub const DEFAULT_TEMPO: u32 = 500_000;

/// Sorted tempo map merged from every track's Set-Tempo events.
///
/// Kept ascending by tick; at most one tempo is in effect at any tick (the
/// most recent change at or before it).
#[derive(Debug, Clone, Default)]
pub struct TempoTimeline {
    changes: Vec<TempoChange>,
}

impl TempoTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The merged changes, ascending by tick.
    pub fn changes(&self) -> &[TempoChange] {
        &self.changes
    }

    /// Append changes not already present and restore ascending order.
    ///
    /// Incremental full-pass parsing rediscovers changes the initial scan
    /// already merged, so duplicates are filtered rather than stacked.
    pub fn merge(&mut self, new: &[TempoChange]) {
        let mut added = false;
        for &change in new {
            if !self.contains(change) {
                self.changes.push(change);
                added = true;
            }
        }
        if added {
            self.changes.sort_by_key(|c| c.tick);
        }
    }

    fn contains(&self, change: TempoChange) -> bool {
        let at_tick = self.changes.partition_point(|c| c.tick < change.tick);
        self.changes[at_tick..]
            .iter()
            .take_while(|c| c.tick == change.tick)
            .any(|c| c.micros_per_quarter == change.micros_per_quarter)
    }

    /// Tempo in effect at `tick`.
    pub fn tempo_at(&self, tick: u64) -> u32 {
        let after = self.changes.partition_point(|c| c.tick <= tick);
        if after == 0 {
            DEFAULT_TEMPO
        } else {
            self.changes[after - 1].micros_per_quarter
        }
    }

    /// Tempo at tick zero.
    pub fn initial_tempo(&self) -> u32 {
        self.tempo_at(0)
    }

    /// Wall-clock seconds elapsed at `tick`, integrating
    /// `ticks x (tempo / ticks_per_quarter) / 1e6` over the tempo segments.
    pub fn tick_to_seconds(&self, tick: u64, ticks_per_quarter: u32) -> f64 {
        let tpq = f64::from(ticks_per_quarter.max(1));
        let mut seconds = 0.0;
        let mut cursor = 0u64;
        let mut per_tick = f64::from(DEFAULT_TEMPO) / tpq / 1e6;
        for change in &self.changes {
            if change.tick >= tick {
                break;
            }
            seconds += (change.tick - cursor) as f64 * per_tick;
            cursor = change.tick;
            per_tick = f64::from(change.micros_per_quarter) / tpq / 1e6;
        }
        seconds + (tick - cursor) as f64 * per_tick
    }

    /// Inverse of [`tick_to_seconds`](TempoTimeline::tick_to_seconds):
    /// the tick reached after `seconds` of wall-clock playback.
    pub fn seconds_to_tick(&self, seconds: f64, ticks_per_quarter: u32) -> u64 {
        let tpq = f64::from(ticks_per_quarter.max(1));
        let mut remaining = seconds.max(0.0);
        let mut cursor = 0u64;
        let mut per_tick = f64::from(DEFAULT_TEMPO) / tpq / 1e6;
        for change in &self.changes {
            let span = (change.tick - cursor) as f64 * per_tick;
            if span > remaining {
                break;
            }
            remaining -= span;
            cursor = change.tick;
            per_tick = f64::from(change.micros_per_quarter) / tpq / 1e6;
        }
        if per_tick <= 0.0 {
            return cursor;
        }
        // Rounded so converting a tick to seconds and back lands on the same
        // tick despite floating-point error.
        cursor + (remaining / per_tick).round() as u64
    }
}
