use crate::simulation::SimConfig;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Dense node index in creation order. The sink is always node 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Sink,
    Sensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    nodes: Vec<Node>,
}

impl Topology {
    // Uniform in [0, area]², X then Y per node, then the sink is pinned to the center
    pub fn build<R: Rng + ?Sized>(config: &SimConfig, rng: &mut R) -> Self {
        let area_size = config.area_size;
        let total = config.n_sensors as usize + 1;
        let mut nodes = Vec::with_capacity(total);

        for i in 0..total {
            let role = if i == 0 { NodeRole::Sink } else { NodeRole::Sensor };
            let position = sample_position(area_size, rng);
            nodes.push(Node {
                id: NodeId(i as u32),
                role,
                position,
            });
        }

        nodes[0].position = Position::new(area_size / 2.0, area_size / 2.0);

        for node in &nodes {
            debug!(
                "{} {:?} at ({:.2}, {:.2})",
                node.id, node.role, node.position.x, node.position.y
            );
        }

        Self { nodes }
    }

    pub fn sink(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn sensors(&self) -> &[Node] {
        &self.nodes[1..]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// A non-positive side collapses the range to the origin.
fn sample_position<R: Rng + ?Sized>(area_size: f64, rng: &mut R) -> Position {
    if !(area_size.is_finite() && area_size > 0.0) {
        return Position::default();
    }
    let axis = Uniform::new_inclusive(0.0, area_size);
    let x = axis.sample(rng);
    let y = axis.sample(rng);
    Position::new(x, y)
}
