//! The road network, represented as an undirected-traversable weighted graph.
//!
//! The graph is produced by an external map-loading collaborator and is
//! validated once at construction. After that it is immutable and the core
//! treats it as read-only shared input.

use crate::math::{distance, Point2d};
use std::collections::BTreeMap;
use thiserror::Error;

/// Unique ID of a road network node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// A node in the road network.
#[derive(Clone, Copy, Debug)]
pub struct RoadNode {
    pub id: NodeId,
    pub position: Point2d,
}

/// An edge between two nodes. Traversable from either endpoint.
#[derive(Clone, Copy, Debug)]
pub struct RoadEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// The lane width in m.
    pub width: f64,
}

/// A static obstacle, treated as a permanently occupied disk.
#[derive(Clone, Copy, Debug)]
pub struct Obstacle {
    pub position: Point2d,
    pub radius: f64,
}

/// An error raised while validating graph input.
#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
    #[error("duplicate node id {0:?}")]
    DuplicateNode(NodeId),
    #[error("edge references unknown node id {0:?}")]
    UnknownEndpoint(NodeId),
}

/// The road network graph.
pub struct RoadGraph {
    /// Node positions, keyed by id.
    nodes: BTreeMap<NodeId, Point2d>,
    /// The edges as provided by the map input.
    edges: Vec<RoadEdge>,
    /// Neighbour lists, sorted by node id.
    adjacency: BTreeMap<NodeId, Vec<NodeId>>,
    /// Groups of node ids that together form an intersection.
    intersections: Vec<Vec<NodeId>>,
    /// Static obstacles.
    obstacles: Vec<Obstacle>,
}

impl RoadGraph {
    /// Builds a graph from parsed map input, checking that node ids are
    /// unique and that every edge references existing nodes.
    pub fn new(
        nodes: Vec<RoadNode>,
        edges: Vec<RoadEdge>,
        intersections: Vec<Vec<NodeId>>,
        obstacles: Vec<Obstacle>,
    ) -> Result<Self, GraphError> {
        let mut node_map = BTreeMap::new();
        for node in &nodes {
            if node_map.insert(node.id, node.position).is_some() {
                return Err(GraphError::DuplicateNode(node.id));
            }
        }

        let mut adjacency: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for edge in &edges {
            for id in [edge.from, edge.to] {
                if !node_map.contains_key(&id) {
                    return Err(GraphError::UnknownEndpoint(id));
                }
            }
            adjacency.entry(edge.from).or_default().push(edge.to);
            adjacency.entry(edge.to).or_default().push(edge.from);
        }
        for neighbours in adjacency.values_mut() {
            neighbours.sort_unstable();
            neighbours.dedup();
        }

        Ok(Self {
            nodes: node_map,
            edges,
            adjacency,
            intersections,
            obstacles,
        })
    }

    /// Gets the position of a node.
    pub fn node_position(&self, id: NodeId) -> Option<Point2d> {
        self.nodes.get(&id).copied()
    }

    /// Gets the neighbours of a node, in ascending id order.
    pub fn neighbours(&self, id: NodeId) -> &[NodeId] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The Euclidean distance between two nodes.
    pub fn node_distance(&self, a: NodeId, b: NodeId) -> f64 {
        match (self.nodes.get(&a), self.nodes.get(&b)) {
            (Some(pa), Some(pb)) => distance(*pa, *pb),
            _ => f64::INFINITY,
        }
    }

    /// Finds the node closest to the given position.
    /// Ties are broken by the lower node id.
    pub fn nearest_node(&self, position: Point2d) -> Option<NodeId> {
        let mut best: Option<(NodeId, f64)> = None;
        for (id, pos) in &self.nodes {
            let dist = distance(*pos, position);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((*id, dist));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Returns true if the position lies within `radius` of any node
    /// belonging to an intersection group.
    pub fn near_intersection(&self, position: Point2d, radius: f64) -> bool {
        self.intersections
            .iter()
            .flatten()
            .filter_map(|id| self.node_position(*id))
            .any(|pos| distance(pos, position) <= radius)
    }

    /// Returns an iterator over all the nodes in the graph.
    pub fn iter_nodes(&self) -> impl Iterator<Item = RoadNode> + '_ {
        self.nodes.iter().map(|(id, pos)| RoadNode {
            id: *id,
            position: *pos,
        })
    }

    /// The edges of the graph.
    pub fn edges(&self) -> &[RoadEdge] {
        &self.edges
    }

    /// The intersection node groups.
    pub fn intersections(&self) -> &[Vec<NodeId>] {
        &self.intersections
    }

    /// The static obstacles.
    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(id: u32, x: f64, y: f64) -> RoadNode {
        RoadNode {
            id: NodeId(id),
            position: Point2d::new(x, y),
        }
    }

    fn edge(from: u32, to: u32) -> RoadEdge {
        RoadEdge {
            from: NodeId(from),
            to: NodeId(to),
            width: 1.0,
        }
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let result = RoadGraph::new(
            vec![node(0, 0.0, 0.0), node(0, 1.0, 0.0)],
            vec![],
            vec![],
            vec![],
        );
        assert_eq!(result.err(), Some(GraphError::DuplicateNode(NodeId(0))));
    }

    #[test]
    fn rejects_dangling_edges() {
        let result = RoadGraph::new(vec![node(0, 0.0, 0.0)], vec![edge(0, 7)], vec![], vec![]);
        assert_eq!(result.err(), Some(GraphError::UnknownEndpoint(NodeId(7))));
    }

    #[test]
    fn edges_are_traversable_both_ways() {
        let graph = RoadGraph::new(
            vec![node(0, 0.0, 0.0), node(1, 10.0, 0.0)],
            vec![edge(0, 1)],
            vec![],
            vec![],
        )
        .unwrap();
        assert_eq!(graph.neighbours(NodeId(0)), &[NodeId(1)]);
        assert_eq!(graph.neighbours(NodeId(1)), &[NodeId(0)]);
    }

    #[test]
    fn nearest_node_breaks_ties_by_lower_id() {
        let graph = RoadGraph::new(
            vec![node(3, 0.0, 1.0), node(1, 0.0, -1.0)],
            vec![],
            vec![],
            vec![],
        )
        .unwrap();
        assert_eq!(graph.nearest_node(Point2d::new(0.0, 0.0)), Some(NodeId(1)));
    }
}
