pub mod engine;
pub mod fabric;
pub mod metrics;
pub mod simulation;
pub mod topology;
pub mod traffic;

pub use engine::NetworkEngine;
pub use metrics::AggregateMetrics;
pub use simulation::{Simulation, SimConfig};
pub use topology::Topology;

pub mod prelude {
    pub use crate::engine::{EngineError, FlowStats, NetworkEngine};
    pub use crate::engine::fake::FakeEngine;
    pub use crate::engine::wifi::WifiEngine;
    pub use crate::fabric::NetworkFabric;
    pub use crate::metrics::{AggregateMetrics, FlowSummary};
    pub use crate::simulation::{RawParams, Simulation, SimConfig, SimulationReport};
    pub use crate::topology::{NodeId, NodeRole, Position, Topology};
    pub use crate::traffic::{TrafficFlow, TrafficPlan};
}
