pub mod fake;
pub mod monitor;
pub mod wifi;

pub use monitor::{FlowId, FlowKey, FlowMonitor, FlowStats};

use crate::fabric::{ChannelConfig, InterfaceAddress, MacRole, PhyConfig};
use crate::topology::{NodeId, Position};
use crate::traffic::{SinkEndpoint, TrafficFlow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("{0} must be configured before the run")]
    NotConfigured(&'static str),

    #[error("{node} has no address")]
    MissingAddress { node: NodeId },

    #[error("{node} cannot host {what}: wrong MAC role")]
    RoleMismatch { node: NodeId, what: &'static str },

    #[error("invalid simulation time: {0}")]
    InvalidTime(f64),

    #[error("simulation time overflow")]
    TimeOverflow,

    #[error("{size} byte payload does not fit in one UDP datagram (max {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("the engine has already run")]
    AlreadyRan,

    #[error("engine failure: {0}")]
    Internal(String),
}

// IPv4 (20) + UDP (8), counted in flow byte totals
pub const IP_UDP_OVERHEAD: u64 = 28;

pub fn ip_packet_bytes(payload: u32) -> u64 {
    u64::from(payload) + IP_UDP_OVERHEAD
}

// nanoseconds since start
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(ns: u64) -> Self {
        SimTime(ns)
    }

    pub const fn from_micros(us: u64) -> Self {
        SimTime(us.saturating_mul(1_000))
    }

    // negative clamps to zero
    pub fn from_secs(s: f64) -> Result<Self, EngineError> {
        if !s.is_finite() {
            return Err(EngineError::InvalidTime(s));
        }
        let ns = (s.max(0.0) * 1e9).round();
        if ns >= u64::MAX as f64 {
            return Err(EngineError::TimeOverflow);
        }
        Ok(SimTime(ns as u64))
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

/// Anything that can host the scenario: a full simulator or a test fake.
///
/// Calls arrive in the order they are listed here. `run` blocks until every
/// event up to `stop_s` has been processed.
pub trait NetworkEngine {
    fn create_nodes(&mut self, count: usize) -> Result<Vec<NodeId>, EngineError>;

    fn place_node(&mut self, node: NodeId, position: Position) -> Result<(), EngineError>;

    fn configure_channel(
        &mut self,
        channel: &ChannelConfig,
        phy: &PhyConfig,
    ) -> Result<(), EngineError>;

    fn install_mac(&mut self, node: NodeId, role: &MacRole) -> Result<(), EngineError>;

    fn assign_addresses(&mut self, interfaces: &[InterfaceAddress]) -> Result<(), EngineError>;

    fn install_traffic_sink(&mut self, sink: &SinkEndpoint) -> Result<(), EngineError>;

    fn install_traffic_source(&mut self, flow: &TrafficFlow) -> Result<(), EngineError>;

    fn run(&mut self, stop_s: f64) -> Result<(), EngineError>;

    fn flow_stats(&self) -> Vec<FlowStats>;

    // Engines that count while they run hand out a live view for progress
    fn live_monitor(&self) -> Option<FlowMonitor> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_time_conversions() {
        assert_eq!(SimTime::from_secs(1.5).unwrap(), SimTime::from_nanos(1_500_000_000));
        assert_eq!(SimTime::from_secs(-3.0).unwrap(), SimTime::ZERO);
        assert_eq!(SimTime::from_micros(9).as_nanos(), 9_000);
        assert!(matches!(SimTime::from_secs(f64::NAN), Err(EngineError::InvalidTime(_))));
        assert_eq!(SimTime::from_secs(1e12), Err(EngineError::TimeOverflow));
        assert_eq!(SimTime::from_secs(0.25).unwrap().as_secs_f64(), 0.25);
    }

    #[test]
    fn sim_time_arithmetic_saturates() {
        let a = SimTime::from_micros(5);
        let b = SimTime::from_micros(7);
        assert_eq!(b - a, SimTime::from_micros(2));
        assert_eq!(a - b, SimTime::ZERO);
        assert_eq!(SimTime::from_nanos(u64::MAX) + a, SimTime::from_nanos(u64::MAX));
    }

    #[test]
    fn ip_packet_bytes_never_wraps() {
        assert_eq!(ip_packet_bytes(40), 68);
        assert_eq!(ip_packet_bytes(u32::MAX), u32::MAX as u64 + 28);
    }
}
