//! Short-horizon trajectory prediction.
//!
//! Predictions use constant-velocity extrapolation only. Acceleration and
//! heading curvature are deliberately not modelled; every agent in a run
//! shares the same horizon and sample spacing, so two trajectories can be
//! compared sample-for-sample without interpolation.

use crate::comms::Message;
use crate::math::{distance, Point2d, Vector2d};
use smallvec::SmallVec;

/// A single predicted sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrajectorySample {
    /// Time offset from the prediction instant, in s.
    pub t: f64,
    /// The predicted position.
    pub position: Point2d,
}

/// A predicted future trajectory: `horizon` samples spaced `dt` apart.
/// Produced fresh each tick and never mutated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trajectory {
    samples: SmallVec<[TrajectorySample; 16]>,
}

/// A predicted separation violation between two trajectories.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Breach {
    /// Time offset of the first violating sample, in s.
    pub t: f64,
    /// The separation at that sample.
    pub distance: f64,
}

impl Trajectory {
    /// The predicted samples, in increasing time order.
    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The predicted positions without time offsets, as they appear in the
    /// message wire format.
    pub fn positions(&self) -> Vec<[f64; 2]> {
        self.samples
            .iter()
            .map(|s| [s.position.x, s.position.y])
            .collect()
    }

    /// The minimum separation between two trajectories over their shared
    /// horizon, comparing samples at matching time offsets.
    /// Returns `None` if either trajectory is empty.
    pub fn min_separation(&self, other: &Trajectory) -> Option<f64> {
        self.samples
            .iter()
            .zip(other.samples.iter())
            .map(|(a, b)| distance(a.position, b.position))
            .min_by(f64::total_cmp)
    }

    /// Finds the earliest sample offset at which the separation from `other`
    /// drops below `buffer`.
    pub fn earliest_breach(&self, other: &Trajectory, buffer: f64) -> Option<Breach> {
        self.samples
            .iter()
            .zip(other.samples.iter())
            .map(|(a, b)| Breach {
                t: a.t,
                distance: distance(a.position, b.position),
            })
            .find(|breach| breach.distance < buffer)
    }
}

/// Constant-velocity trajectory predictor. The horizon and sample interval
/// are fixed per run and identical for every agent.
#[derive(Clone, Copy, Debug)]
pub struct TrajectoryPredictor {
    /// Number of future samples per prediction.
    pub horizon: usize,
    /// Sample spacing in s.
    pub dt: f64,
}

impl TrajectoryPredictor {
    pub fn new(horizon: usize, dt: f64) -> Self {
        Self { horizon, dt }
    }

    /// Extrapolates a trajectory from a position and velocity.
    pub fn predict(&self, position: Point2d, velocity: Vector2d) -> Trajectory {
        let samples = (1..=self.horizon)
            .map(|step| {
                let t = step as f64 * self.dt;
                TrajectorySample {
                    t,
                    position: position + velocity * t,
                }
            })
            .collect();
        Trajectory { samples }
    }

    /// Predicts a neighbour's trajectory from its last received message.
    ///
    /// The recorded position is first advanced by the message's age
    /// (dead reckoning), compensating for transit delay, and then
    /// extrapolated as usual.
    pub fn predict_from_message(&self, message: &Message, now: f64) -> Trajectory {
        let age = (now - message.timestamp).max(0.0);
        let position = message.position() + message.velocity() * age;
        self.predict(position, message.velocity())
    }
}
