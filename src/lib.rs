pub use cgmath;
pub use comms::{CommBus, Inbox, Message};
pub use config::{CommsMode, RunConfig};
pub use conflict::{ConflictResolver, Decision, NeighbourTrack};
pub use graph::{GraphError, NodeId, Obstacle, RoadEdge, RoadGraph, RoadNode};
pub use planner::{find_path, path_length, PathError};
pub use simulation::Simulation;
pub use stats::SimStats;
pub use trajectory::{Breach, Trajectory, TrajectoryPredictor, TrajectorySample};
pub use vehicle::{ConflictState, Intent, Vehicle, VehicleAttributes, VehicleId};

mod comms;
mod config;
mod conflict;
mod graph;
pub mod math;
mod planner;
mod simulation;
mod stats;
mod trajectory;
mod vehicle;

use std::collections::BTreeMap;

type VehicleSet = BTreeMap<VehicleId, Vehicle>;
