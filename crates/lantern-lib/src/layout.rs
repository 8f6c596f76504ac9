//! Deterministic scene layout
//!
//! Nodes sit on a circle of radius [`NODE_ORBIT_RADIUS`] in the X-Z plane and
//! pods orbit their node at [`POD_ORBIT_RADIUS`]. Every position is a pure
//! function of (index, count) so that re-laying-out the same ordered listing
//! yields identical coordinates.

use crate::models::{Node, Pod, Position};
use std::collections::HashMap;
use std::f64::consts::TAU;

/// Radius of the node ring around the origin
pub const NODE_ORBIT_RADIUS: f64 = 10.0;

/// Radius of a pod's orbit around its node
pub const POD_ORBIT_RADIUS: f64 = 3.0;

/// Angle of slot `index` out of `count` evenly spaced slots
pub fn slot_angle(index: usize, count: usize) -> f64 {
    index as f64 * TAU / count.max(1) as f64
}

/// Position of node `index` out of `count` nodes
pub fn node_position(index: usize, count: usize) -> Position {
    orbit(Position::ORIGIN, NODE_ORBIT_RADIUS, slot_angle(index, count))
}

/// Position of pod `index` out of `count` pods orbiting `center`
pub fn pod_position(center: Position, index: usize, count: usize) -> Position {
    orbit(center, POD_ORBIT_RADIUS, slot_angle(index, count))
}

fn orbit(center: Position, radius: f64, angle: f64) -> Position {
    Position {
        x: center.x + radius * angle.cos(),
        y: center.y,
        z: center.z + radius * angle.sin(),
    }
}

/// Layout computed from one ordered listing of nodes and pods
///
/// Holds only what is needed to answer position queries for that listing and
/// is meant to be dropped as soon as the pending event has been positioned.
#[derive(Debug, Default, Clone)]
pub struct Layout {
    nodes: HashMap<String, Position>,
    pods: HashMap<String, Position>,
}

impl Layout {
    /// Compute positions for every node and pod in listing order
    pub fn compute(nodes: &[Node], pods: &[Pod]) -> Self {
        let node_positions: HashMap<String, Position> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name.clone(), node_position(i, nodes.len())))
            .collect();

        let mut per_node: HashMap<&str, usize> = HashMap::new();
        for pod in pods {
            *per_node.entry(pod.node_name.as_str()).or_default() += 1;
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut pod_positions = HashMap::with_capacity(pods.len());
        for pod in pods {
            let node_name = pod.node_name.as_str();
            let index = seen.entry(node_name).or_default();
            let center = node_positions
                .get(node_name)
                .copied()
                .unwrap_or(Position::ORIGIN);
            let count = per_node.get(node_name).copied().unwrap_or(1);

            pod_positions.insert(pod.id.clone(), pod_position(center, *index, count));
            *index += 1;
        }

        Self {
            nodes: node_positions,
            pods: pod_positions,
        }
    }

    /// Node position by name
    pub fn node(&self, name: &str) -> Option<Position> {
        self.nodes.get(name).copied()
    }

    /// Pod position by ID
    pub fn pod(&self, id: &str) -> Option<Position> {
        self.pods.get(id).copied()
    }

    /// Center a pod orbits: its node's position, or the origin if unresolved
    pub fn center_of(&self, node_name: &str) -> Position {
        self.node(node_name).unwrap_or(Position::ORIGIN)
    }
}

/// Assign positions to an ordered node listing in place
pub fn layout_nodes(nodes: &mut [Node]) {
    let count = nodes.len();
    for (i, node) in nodes.iter_mut().enumerate() {
        node.position = node_position(i, count);
    }
}

/// Assign positions to an ordered pod listing around already laid out nodes
pub fn layout_pods(nodes: &[Node], pods: &mut [Pod]) {
    let layout = Layout::compute(nodes, pods);
    for pod in pods.iter_mut() {
        pod.position = layout.pod(&pod.id).unwrap_or(Position::ORIGIN);
    }
}
