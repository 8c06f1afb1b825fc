//! Conflict detection and the deterministic right-of-way protocol.
//!
//! Conflicts are found by comparing two predicted trajectories sample-for-
//! sample at matching time offsets. When a pair is in conflict, the vehicle
//! with the numerically higher id yields; the lower id has right-of-way.
//! Because ids are a total order, exactly one side of any pairwise conflict
//! yields, which rules out both mutual-yield deadlock and mutual-proceed
//! collision. The rule is a deliberate placeholder for a richer
//! negotiation protocol.

use crate::graph::RoadGraph;
use crate::math::{distance, Point2d};
use crate::trajectory::Trajectory;
use crate::vehicle::{ConflictState, Intent, VehicleId};

/// Radius around an intersection node within which a yield is declared as
/// [Intent::Yield] rather than [Intent::Merge], in m.
const INTERSECTION_RADIUS: f64 = 5.0;

/// Fraction of the safety buffer below which the current separation forces
/// an emergency stop regardless of priority.
const EMERGENCY_FACTOR: f64 = 0.75;

/// Speed scale applied while a yield is damping out.
const DAMPING_SCALE: f64 = 0.6;

/// A neighbour as seen by one agent: its best current position estimate and
/// its predicted trajectory. In v2v mode both come from the last received
/// message (dead reckoned); in baseline mode from ground truth.
#[derive(Clone, Debug)]
pub struct NeighbourTrack {
    pub id: VehicleId,
    pub position: Point2d,
    pub trajectory: Trajectory,
}

/// The resolver's verdict for one agent for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    pub state: ConflictState,
    pub intent: Intent,
    /// Fraction of the preferred speed the agent may drive at.
    pub speed_scale: f64,
    /// Consecutive conflict-free ticks, carried while yielding.
    pub clear_streak: u32,
}

/// The conflict resolver. Pure: all per-agent state lives on the vehicle
/// and is passed in and returned through [Decision].
#[derive(Clone, Copy, Debug)]
pub struct ConflictResolver {
    /// Minimum tolerable predicted separation between trajectories, in m.
    pub safety_buffer: f64,
    /// Consecutive clear ticks required before a yielding agent resumes.
    pub clear_ticks: u32,
}

impl ConflictResolver {
    pub fn new(safety_buffer: f64, clear_ticks: u32) -> Self {
        Self {
            safety_buffer,
            clear_ticks,
        }
    }

    /// Resolves one agent's conflict state for this tick.
    ///
    /// Reads only the tick's snapshot: the agent's own predicted trajectory
    /// and the neighbour tracks derived from the previous tick.
    pub fn resolve(
        &self,
        self_id: VehicleId,
        position: Point2d,
        state: ConflictState,
        clear_streak: u32,
        trajectory: &Trajectory,
        neighbours: &[NeighbourTrack],
        aggressiveness: f64,
        graph: &RoadGraph,
    ) -> Decision {
        // A blocking obstacle, or a higher-priority neighbour already
        // inside the emergency distance, escalates to a full stop. The
        // stop clears once the condition does; right-of-way holders never
        // stop for proximity, so a close pair always resolves by id.
        if self.blocked_by_obstacle(position, trajectory, graph)
            || self.too_close(self_id, position, neighbours)
        {
            return Decision {
                state: ConflictState::Stopped,
                intent: Intent::Stop,
                speed_scale: 0.0,
                clear_streak: 0,
            };
        }

        // Scan every higher-priority neighbour (lower id) for a predicted
        // breach; the earliest threat governs the speed reduction.
        let threat = neighbours
            .iter()
            .filter(|n| n.id < self_id)
            .filter_map(|n| trajectory.earliest_breach(&n.trajectory, self.safety_buffer))
            .min_by(|a, b| a.t.total_cmp(&b.t));

        if let Some(breach) = threat {
            let horizon = trajectory.samples().last().map_or(breach.t, |s| s.t);
            let fraction = if horizon > 0.0 { breach.t / horizon } else { 0.0 };
            let intent = if graph.near_intersection(position, INTERSECTION_RADIUS) {
                Intent::Yield
            } else {
                Intent::Merge
            };
            return Decision {
                state: ConflictState::Yielding,
                intent,
                speed_scale: fraction * (0.5 + 0.5 * aggressiveness.clamp(0.0, 1.0)),
                clear_streak: 0,
            };
        }

        // No conflict this tick. A yielding agent resumes only after
        // `clear_ticks` consecutive clear ticks, damping prediction flicker.
        match state {
            ConflictState::Yielding if clear_streak + 1 < self.clear_ticks => Decision {
                state: ConflictState::Yielding,
                intent: Intent::Yield,
                speed_scale: DAMPING_SCALE,
                clear_streak: clear_streak + 1,
            },
            _ => Decision {
                state: ConflictState::Normal,
                intent: Intent::Straight,
                speed_scale: 1.0,
                clear_streak: 0,
            },
        }
    }

    /// Whether the predicted trajectory enters a static obstacle disk.
    fn blocked_by_obstacle(
        &self,
        position: Point2d,
        trajectory: &Trajectory,
        graph: &RoadGraph,
    ) -> bool {
        graph.obstacles().iter().any(|obstacle| {
            let reach = obstacle.radius + 0.5 * self.safety_buffer;
            distance(position, obstacle.position) < reach
                || trajectory
                    .samples()
                    .iter()
                    .any(|s| distance(s.position, obstacle.position) < reach)
        })
    }

    /// Whether any higher-priority neighbour is already within the
    /// emergency distance.
    fn too_close(&self, self_id: VehicleId, position: Point2d, neighbours: &[NeighbourTrack]) -> bool {
        neighbours
            .iter()
            .filter(|n| n.id < self_id)
            .any(|n| distance(position, n.position) < EMERGENCY_FACTOR * self.safety_buffer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{NodeId, Obstacle, RoadNode};
    use crate::trajectory::TrajectoryPredictor;
    use crate::math::Vector2d;

    fn empty_graph() -> RoadGraph {
        RoadGraph::new(
            vec![RoadNode {
                id: NodeId(0),
                position: Point2d::new(0.0, 0.0),
            }],
            vec![],
            vec![],
            vec![],
        )
        .unwrap()
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::new(2.0, 3)
    }

    fn head_on(separation: f64) -> (Trajectory, Trajectory, Point2d, Point2d) {
        let predictor = TrajectoryPredictor::new(10, 0.1);
        let a_pos = Point2d::new(0.0, 0.0);
        let b_pos = Point2d::new(separation, 0.0);
        let a = predictor.predict(a_pos, Vector2d::new(2.0, 0.0));
        let b = predictor.predict(b_pos, Vector2d::new(-2.0, 0.0));
        (a, b, a_pos, b_pos)
    }

    #[test]
    fn exactly_the_higher_id_yields() {
        let graph = empty_graph();
        let resolver = resolver();
        let (a_traj, b_traj, a_pos, b_pos) = head_on(5.0);

        let low = resolver.resolve(
            VehicleId(1),
            a_pos,
            ConflictState::Normal,
            0,
            &a_traj,
            &[NeighbourTrack {
                id: VehicleId(2),
                position: b_pos,
                trajectory: b_traj.clone(),
            }],
            0.5,
            &graph,
        );
        let high = resolver.resolve(
            VehicleId(2),
            b_pos,
            ConflictState::Normal,
            0,
            &b_traj,
            &[NeighbourTrack {
                id: VehicleId(1),
                position: a_pos,
                trajectory: a_traj,
            }],
            0.5,
            &graph,
        );

        assert_eq!(low.state, ConflictState::Normal);
        assert_eq!(high.state, ConflictState::Yielding);
        assert!(high.speed_scale < 1.0);
    }

    #[test]
    fn no_yield_when_separation_is_safe() {
        let graph = empty_graph();
        let resolver = resolver();
        let predictor = TrajectoryPredictor::new(10, 0.1);
        // Parallel courses 4m apart: min separation 4.0 >= buffer 2.0.
        let a = predictor.predict(Point2d::new(0.0, 0.0), Vector2d::new(2.0, 0.0));
        let b = predictor.predict(Point2d::new(0.0, 4.0), Vector2d::new(2.0, 0.0));

        let decision = resolver.resolve(
            VehicleId(5),
            Point2d::new(0.0, 0.0),
            ConflictState::Normal,
            0,
            &a,
            &[NeighbourTrack {
                id: VehicleId(1),
                position: Point2d::new(0.0, 4.0),
                trajectory: b,
            }],
            0.5,
            &graph,
        );
        assert_eq!(decision.state, ConflictState::Normal);
        assert_eq!(decision.speed_scale, 1.0);
    }

    #[test]
    fn yield_clears_after_hysteresis() {
        let graph = empty_graph();
        let resolver = resolver();
        let predictor = TrajectoryPredictor::new(10, 0.1);
        let own = predictor.predict(Point2d::new(0.0, 0.0), Vector2d::new(2.0, 0.0));

        let mut state = ConflictState::Yielding;
        let mut streak = 0;
        let mut ticks_to_clear = 0;
        for _ in 0..10 {
            let decision = resolver.resolve(
                VehicleId(3),
                Point2d::new(0.0, 0.0),
                state,
                streak,
                &own,
                &[],
                0.5,
                &graph,
            );
            state = decision.state;
            streak = decision.clear_streak;
            ticks_to_clear += 1;
            if state == ConflictState::Normal {
                break;
            }
        }
        assert_eq!(state, ConflictState::Normal);
        assert_eq!(ticks_to_clear, resolver.clear_ticks);
    }

    #[test]
    fn blocking_obstacle_stops_the_vehicle() {
        let graph = RoadGraph::new(
            vec![RoadNode {
                id: NodeId(0),
                position: Point2d::new(0.0, 0.0),
            }],
            vec![],
            vec![],
            vec![Obstacle {
                position: Point2d::new(2.0, 0.0),
                radius: 1.0,
            }],
        )
        .unwrap();
        let resolver = resolver();
        let predictor = TrajectoryPredictor::new(10, 0.1);
        let own = predictor.predict(Point2d::new(-1.0, 0.0), Vector2d::new(2.0, 0.0));

        let decision = resolver.resolve(
            VehicleId(0),
            Point2d::new(-1.0, 0.0),
            ConflictState::Normal,
            0,
            &own,
            &[],
            0.5,
            &graph,
        );
        assert_eq!(decision.state, ConflictState::Stopped);
        assert_eq!(decision.intent, Intent::Stop);
        assert_eq!(decision.speed_scale, 0.0);
    }

    #[test]
    fn identical_positions_resolve_by_id_without_panicking() {
        let graph = empty_graph();
        let resolver = resolver();
        let predictor = TrajectoryPredictor::new(10, 0.1);
        let pos = Point2d::new(1.0, 1.0);
        // Two agents at the same point with zero relative velocity.
        let traj = predictor.predict(pos, Vector2d::new(0.0, 0.0));

        let high = resolver.resolve(
            VehicleId(9),
            pos,
            ConflictState::Normal,
            0,
            &traj,
            &[NeighbourTrack {
                id: VehicleId(1),
                position: pos,
                trajectory: traj.clone(),
            }],
            0.5,
            &graph,
        );
        let low = resolver.resolve(
            VehicleId(1),
            pos,
            ConflictState::Normal,
            0,
            &traj,
            &[NeighbourTrack {
                id: VehicleId(9),
                position: pos,
                trajectory: traj.clone(),
            }],
            0.5,
            &graph,
        );
        // Zero separation never divides by zero: the higher id stops dead
        // and the lower id keeps right-of-way, so the pair can separate.
        assert_eq!(high.state, ConflictState::Stopped);
        assert_eq!(low.state, ConflictState::Normal);
    }
}
