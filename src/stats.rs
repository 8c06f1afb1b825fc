//! Cumulative run statistics, exposed read-only through the query surface.

use std::fmt;

/// Cumulative counters for a run. A plain value snapshot; producing one
/// never mutates core state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimStats {
    /// Broadcasts made.
    pub messages_sent: u64,
    /// Per-receiver transmissions lost to packet drops.
    pub messages_dropped: u64,
    /// Messages delivered to inboxes.
    pub messages_delivered: u64,
    /// Transitions into the yielding state.
    pub yields: u64,
    /// Ticks on which a pair of true positions came within the minimum
    /// physical separation, counted once per pair per tick.
    pub collisions: u64,
    /// Vehicles that reached their destination.
    pub vehicles_completed: u64,
    /// Vehicles excluded because no route existed.
    pub vehicles_stranded: u64,
    /// Total distance driven by all vehicles, in m.
    pub distance_traveled: f64,
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} dropped {} delivered {} | yields {} collisions {} | \
             completed {} stranded {} | {:.1}m driven",
            self.messages_sent,
            self.messages_dropped,
            self.messages_delivered,
            self.yields,
            self.collisions,
            self.vehicles_completed,
            self.vehicles_stranded,
            self.distance_traveled,
        )
    }
}
