//! Run configuration.
//!
//! All parameters are passed explicitly into the simulation at construction;
//! there is no hidden global state. The struct derives `Deserialize` so an
//! outer CLI or config-file collaborator can parse it from JSON.

use serde::Deserialize;

/// How agents learn about their neighbours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommsMode {
    /// Neighbour trajectories are synthesized from ground-truth position and
    /// velocity within sensing range. No messages are exchanged.
    Baseline,
    /// Neighbour trajectories are dead-reckoned from broadcast messages
    /// received over the lossy channel.
    V2v,
}

/// The full configuration of a run. Read-only once the run starts.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: CommsMode,
    /// Maximum distance at which a message can be received, in m.
    /// Also the sensing range in baseline mode.
    pub broadcast_radius: f64,
    /// Fixed message delivery delay, in s.
    pub latency: f64,
    /// Probability that any single transmission is lost.
    pub packet_loss: f64,
    /// The tick interval, in s. Also the trajectory sample spacing.
    pub dt: f64,
    /// Simulated seconds advanced per wall-clock second by an outer loop.
    /// The core itself is clocked purely by `dt`.
    pub speed_multiplier: f64,
    /// Number of trajectory samples predicted per tick.
    pub trajectory_horizon: usize,
    /// Minimum tolerable predicted separation between trajectories, in m.
    pub safety_buffer: f64,
    /// Consecutive conflict-free ticks before a yielding agent resumes.
    pub clear_ticks: u32,
    /// True separation below which a tick counts as a collision, in m.
    pub min_separation: f64,
    /// Seed for the packet-loss generator.
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: CommsMode::V2v,
            broadcast_radius: 50.0,
            latency: 0.0,
            packet_loss: 0.0,
            dt: 0.1,
            speed_multiplier: 1.0,
            trajectory_horizon: 10,
            safety_buffer: 2.0,
            clear_ticks: 5,
            min_separation: 1.0,
            seed: 0,
        }
    }
}
