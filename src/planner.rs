//! A* route planning over the road network.
//!
//! Search order is fully deterministic: the frontier is ordered by
//! `f = g + h`, with ties broken by lower accumulated cost `g` and then by
//! lower node id, so identical inputs always expand nodes in the same order.

use crate::graph::{NodeId, RoadGraph};
use crate::math::{angle_difference, distance, Point2d};
use itertools::Itertools;
use log::debug;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use thiserror::Error;

/// Angle below which consecutive path segments are considered colinear, in rad.
const COLINEAR_EPSILON: f64 = 0.05;

/// An error raised during route planning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    /// The start and goal positions lie in disconnected graph components.
    #[error("no route exists between the start and goal positions")]
    NotFound,
}

/// An entry in the A* frontier. The natural ordering is the expansion
/// priority: by `f`, then by `g`, then by node id.
#[derive(Clone, Copy, Debug)]
struct FrontierEntry {
    f: f64,
    g: f64,
    node: NodeId,
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.f
            .total_cmp(&other.f)
            .then(self.g.total_cmp(&other.g))
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FrontierEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for FrontierEntry {}

/// Finds a route from `start` to `goal`, snapping both endpoints to their
/// nearest graph nodes.
///
/// Returns the ordered waypoints to follow. The final waypoint is the exact
/// `goal` position rather than the snapped node. Waypoints that are colinear
/// within a small angular epsilon are collapsed to avoid needless steering
/// oscillation.
pub fn find_path(
    graph: &RoadGraph,
    start: Point2d,
    goal: Point2d,
) -> Result<Vec<Point2d>, PathError> {
    let start_node = graph.nearest_node(start).ok_or(PathError::NotFound)?;
    let goal_node = graph.nearest_node(goal).ok_or(PathError::NotFound)?;

    if start_node == goal_node {
        return Ok(vec![goal]);
    }

    let mut frontier = BinaryHeap::new();
    let mut came_from: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    let mut g_score: BTreeMap<NodeId, f64> = BTreeMap::new();

    g_score.insert(start_node, 0.0);
    frontier.push(Reverse(FrontierEntry {
        f: graph.node_distance(start_node, goal_node),
        g: 0.0,
        node: start_node,
    }));

    while let Some(Reverse(entry)) = frontier.pop() {
        if entry.node == goal_node {
            let mut path = reconstruct(graph, &came_from, goal_node);
            *path.last_mut().unwrap() = goal;
            let path = collapse_colinear(path);
            debug!(
                "planned route {:?} -> {:?} with {} waypoints",
                start_node,
                goal_node,
                path.len()
            );
            return Ok(path);
        }

        // A stale frontier entry for an already-improved node.
        if entry.g > g_score[&entry.node] {
            continue;
        }

        for neighbour in graph.neighbours(entry.node) {
            let tentative_g = entry.g + graph.node_distance(entry.node, *neighbour);
            if g_score.get(neighbour).map_or(true, |g| tentative_g < *g) {
                came_from.insert(*neighbour, entry.node);
                g_score.insert(*neighbour, tentative_g);
                frontier.push(Reverse(FrontierEntry {
                    f: tentative_g + graph.node_distance(*neighbour, goal_node),
                    g: tentative_g,
                    node: *neighbour,
                }));
            }
        }
    }

    debug!("no route from {:?} to {:?}", start_node, goal_node);
    Err(PathError::NotFound)
}

/// Walks the `came_from` chain back from the goal node.
fn reconstruct(
    graph: &RoadGraph,
    came_from: &BTreeMap<NodeId, NodeId>,
    goal_node: NodeId,
) -> Vec<Point2d> {
    let mut nodes = vec![goal_node];
    let mut current = goal_node;
    while let Some(prev) = came_from.get(&current) {
        nodes.push(*prev);
        current = *prev;
    }
    nodes.reverse();
    nodes
        .into_iter()
        .filter_map(|id| graph.node_position(id))
        .collect()
}

/// Removes interior waypoints where the route's direction change is within
/// [COLINEAR_EPSILON].
fn collapse_colinear(path: Vec<Point2d>) -> Vec<Point2d> {
    if path.len() <= 2 {
        return path;
    }
    let mut out = vec![path[0]];
    for (prev, curr, next) in path.iter().tuple_windows() {
        let inbound = (curr.y - prev.y).atan2(curr.x - prev.x);
        let outbound = (next.y - curr.y).atan2(next.x - curr.x);
        if angle_difference(inbound, outbound).abs() > COLINEAR_EPSILON {
            out.push(*curr);
        }
    }
    out.push(path[path.len() - 1]);
    out
}

/// The total length of a waypoint sequence.
pub fn path_length(path: &[Point2d]) -> f64 {
    path.iter()
        .tuple_windows()
        .map(|(a, b)| distance(*a, *b))
        .sum()
}
