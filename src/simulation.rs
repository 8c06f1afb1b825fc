//! The simulation: agents, clock, and the barrier-separated tick.
//!
//! Each tick runs as one atomic transaction over the previous tick's
//! committed state: every agent predicts, broadcasts, drains its inbox and
//! resolves conflicts against that snapshot before any agent's state is
//! mutated. Decisions are collected first and committed together, so the
//! outcome never depends on agent iteration order.

use crate::comms::{CommBus, Message};
use crate::config::{CommsMode, RunConfig};
use crate::conflict::{ConflictResolver, Decision, NeighbourTrack};
use crate::graph::RoadGraph;
use crate::math::{distance, Point2d};
use crate::planner::{self, PathError};
use crate::stats::SimStats;
use crate::trajectory::TrajectoryPredictor;
use crate::vehicle::{ConflictState, Vehicle, VehicleAttributes, VehicleId};
use crate::VehicleSet;
use itertools::Itertools;
use log::{debug, warn};
use std::collections::BTreeMap;

/// A decentralized coordination simulation.
pub struct Simulation {
    /// The road network, read-only for the whole run.
    graph: RoadGraph,
    /// The run parameters, read-only for the whole run.
    config: RunConfig,
    /// The vehicles being simulated, keyed by id.
    vehicles: VehicleSet,
    /// The shared trajectory predictor (fixed horizon and spacing).
    predictor: TrajectoryPredictor,
    /// The conflict resolver.
    resolver: ConflictResolver,
    /// The simulated broadcast channel.
    bus: CommBus,
    /// Communication links that saw traffic in the last tick.
    active_links: Vec<(VehicleId, VehicleId)>,
    /// Cumulative counters other than the bus's own.
    stats: SimStats,
    /// The current simulation time in s.
    time: f64,
    /// The current tick index.
    tick: u64,
}

impl Simulation {
    /// Creates a simulation over a validated road graph.
    pub fn new(graph: RoadGraph, config: RunConfig) -> Self {
        Self {
            graph,
            config,
            vehicles: BTreeMap::new(),
            predictor: TrajectoryPredictor::new(config.trajectory_horizon, config.dt),
            resolver: ConflictResolver::new(config.safety_buffer, config.clear_ticks),
            bus: CommBus::new(
                config.broadcast_radius,
                config.latency,
                config.packet_loss,
                config.seed,
            ),
            active_links: vec![],
            stats: SimStats::default(),
            time: 0.0,
            tick: 0,
        }
    }

    /// Adds a vehicle from scenario attributes and plans its initial route.
    ///
    /// Route planning is independent of the communication mode. If no route
    /// exists the vehicle is parked permanently, the condition is reported
    /// to the caller, and the rest of the run is unaffected.
    pub fn add_vehicle(
        &mut self,
        id: VehicleId,
        attributes: &VehicleAttributes,
    ) -> Result<(), PathError> {
        let mut vehicle = Vehicle::new(id, attributes);
        let result = planner::find_path(&self.graph, attributes.spawn, attributes.destination);
        match result {
            Ok(waypoints) => {
                vehicle.set_waypoints(waypoints);
                self.vehicles.insert(id, vehicle);
                Ok(())
            }
            Err(err) => {
                warn!("vehicle {:?} has no route to its destination", id);
                vehicle.strand();
                self.stats.vehicles_stranded += 1;
                self.vehicles.insert(id, vehicle);
                Err(err)
            }
        }
    }

    /// Advances the simulation by one tick.
    pub fn step(&mut self) {
        let dt = self.config.dt;
        let now = self.time;

        // 1. Predict every agent's own trajectory from its start-of-tick state.
        for vehicle in self.vehicles.values_mut() {
            let trajectory = self
                .predictor
                .predict(vehicle.position(), vehicle.velocity());
            vehicle.set_trajectory(trajectory);
        }

        // The tick's immutable roster: ids and true positions.
        let roster: Vec<_> = self
            .vehicles
            .values()
            .map(|v| (v.id(), v.position()))
            .collect();

        // 2-3. Broadcast and drain, in v2v mode only.
        if self.config.mode == CommsMode::V2v {
            for vehicle in self.vehicles.values() {
                let message = Message::new(
                    vehicle.id(),
                    now,
                    vehicle.position(),
                    vehicle.velocity(),
                    vehicle.heading(),
                    vehicle.intent(),
                    vehicle.trajectory(),
                );
                self.bus.broadcast(message, &roster, now);
            }
            for (id, _) in &roster {
                let delivered = self.bus.drain(*id, now);
                if let Some(vehicle) = self.vehicles.get_mut(id) {
                    vehicle.receive(delivered);
                }
            }
        }

        // 4. Resolve conflicts for every agent against the snapshot.
        let decisions: Vec<(VehicleId, Decision)> = self
            .vehicles
            .values()
            .filter(|vehicle| !vehicle.is_stranded())
            .map(|vehicle| {
                let neighbours = match self.config.mode {
                    CommsMode::V2v => self.neighbours_from_inbox(vehicle, &roster, now),
                    CommsMode::Baseline => self.neighbours_from_ground_truth(vehicle),
                };
                let decision = self.resolver.resolve(
                    vehicle.id(),
                    vehicle.position(),
                    vehicle.state(),
                    vehicle.clear_streak(),
                    vehicle.trajectory(),
                    &neighbours,
                    vehicle.aggressiveness(),
                    &self.graph,
                );
                (vehicle.id(), decision)
            })
            .collect();

        // 5-6. Commit: apply every decision, then steer and integrate.
        // No agent observed any of these writes while deciding.
        for (id, decision) in decisions {
            if let Some(vehicle) = self.vehicles.get_mut(&id) {
                if decision.state == ConflictState::Yielding
                    && vehicle.state() != ConflictState::Yielding
                {
                    self.stats.yields += 1;
                }
                vehicle.set_conflict(decision.state, decision.intent, decision.clear_streak);
                let before = vehicle.position();
                vehicle.integrate(dt, decision.speed_scale);
                self.stats.distance_traveled += distance(before, vehicle.position());
            }
        }

        // Retire vehicles that reached their destination.
        let arrived: Vec<_> = self
            .vehicles
            .values()
            .filter(|v| v.has_arrived())
            .map(|v| v.id())
            .collect();
        for id in arrived {
            debug!("vehicle {:?} arrived", id);
            self.vehicles.remove(&id);
            self.bus.remove_receiver(id);
            self.stats.vehicles_completed += 1;
        }

        // Count collisions between true positions, once per pair per tick.
        for (a, b) in self.vehicles.values().tuple_combinations() {
            if distance(a.position(), b.position()) < self.config.min_separation {
                self.stats.collisions += 1;
            }
        }

        self.active_links = self.bus.take_recent_links();
        self.time += dt;
        self.tick += 1;
    }

    /// Builds neighbour tracks from the messages in an agent's inbox,
    /// dead-reckoning each sender forward by its message's age.
    fn neighbours_from_inbox(
        &self,
        vehicle: &Vehicle,
        roster: &[(VehicleId, Point2d)],
        now: f64,
    ) -> Vec<NeighbourTrack> {
        vehicle
            .inbox()
            .values()
            .filter(|message| {
                // Senders that left the simulation are no longer neighbours.
                roster
                    .binary_search_by_key(&message.sender, |(id, _)| *id)
                    .is_ok()
            })
            .map(|message| {
                let age = (now - message.timestamp).max(0.0);
                NeighbourTrack {
                    id: message.sender,
                    position: message.position() + message.velocity() * age,
                    trajectory: self.predictor.predict_from_message(message, now),
                }
            })
            .collect()
    }

    /// Builds neighbour tracks from ground truth, for baseline mode:
    /// every other vehicle within sensing range, no lag, no loss.
    fn neighbours_from_ground_truth(&self, vehicle: &Vehicle) -> Vec<NeighbourTrack> {
        self.vehicles
            .values()
            .filter(|other| {
                other.id() != vehicle.id()
                    && distance(other.position(), vehicle.position()) <= self.bus.radius()
            })
            .map(|other| NeighbourTrack {
                id: other.id(),
                position: other.position(),
                trajectory: other.trajectory().clone(),
            })
            .collect()
    }

    // Read-only query surface.

    /// The current simulation time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// The current tick index.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The road graph.
    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    /// The run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn get_vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    /// Communication links with traffic in the last tick, as
    /// `(sender, receiver)` pairs.
    pub fn active_links(&self) -> &[(VehicleId, VehicleId)] {
        &self.active_links
    }

    /// A snapshot of the cumulative run counters.
    pub fn stats(&self) -> SimStats {
        let mut stats = self.stats;
        stats.messages_sent = self.bus.sent();
        stats.messages_dropped = self.bus.dropped();
        stats.messages_delivered = self.bus.delivered();
        stats
    }
}
