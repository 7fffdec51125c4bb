use super::{EngineError, FlowKey, FlowStats, NetworkEngine, ip_packet_bytes};
use crate::fabric::{ChannelConfig, InterfaceAddress, MacRole, PhyConfig};
use crate::topology::{NodeId, Position};
use crate::traffic::{SinkEndpoint, TrafficFlow};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Records every call. Without canned stats a run is ideal: every source
/// spends its whole budget and nothing is lost.
#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    nodes: Vec<Option<Position>>,
    channel: Option<(ChannelConfig, PhyConfig)>,
    macs: HashMap<NodeId, MacRole>,
    addresses: HashMap<NodeId, Ipv4Addr>,
    sink: Option<SinkEndpoint>,
    sources: Vec<TrafficFlow>,
    canned: Option<Vec<FlowStats>>,
    fail_run: bool,
    stopped_at: Option<f64>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stats(mut self, stats: Vec<FlowStats>) -> Self {
        self.canned = Some(stats);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_run = true;
        self
    }

    pub fn position_of(&self, node: NodeId) -> Option<Position> {
        self.nodes.get(node.index()).copied().flatten()
    }

    pub fn mac_of(&self, node: NodeId) -> Option<&MacRole> {
        self.macs.get(&node)
    }

    pub fn address_of(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.addresses.get(&node).copied()
    }

    pub fn phy(&self) -> Option<&PhyConfig> {
        self.channel.as_ref().map(|(_, phy)| phy)
    }

    pub fn sink(&self) -> Option<&SinkEndpoint> {
        self.sink.as_ref()
    }

    pub fn sources(&self) -> &[TrafficFlow] {
        &self.sources
    }

    pub fn stopped_at(&self) -> Option<f64> {
        self.stopped_at
    }

    fn check_node(&self, node: NodeId) -> Result<(), EngineError> {
        if node.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(EngineError::NodeNotFound(node))
        }
    }

    fn ideal_stats(&self) -> Vec<FlowStats> {
        self.sources
            .iter()
            .enumerate()
            .map(|(i, flow)| {
                let packets = flow.max_packets as u64;
                let bytes = packets.saturating_mul(ip_packet_bytes(flow.packet_size));
                FlowStats {
                    flow_id: i as u32 + 1,
                    key: self.addresses.get(&flow.source).map(|&src| {
                        FlowKey::udp(src, 49153, flow.destination, flow.port)
                    }),
                    tx_packets: packets,
                    rx_packets: packets,
                    tx_bytes: bytes,
                    rx_bytes: bytes,
                    delay_sum: 0.0,
                    lost_packets: 0,
                }
            })
            .collect()
    }
}

impl NetworkEngine for FakeEngine {
    fn create_nodes(&mut self, count: usize) -> Result<Vec<NodeId>, EngineError> {
        let first = self.nodes.len();
        self.nodes.resize(first + count, None);
        Ok((first..first + count).map(|i| NodeId(i as u32)).collect())
    }

    fn place_node(&mut self, node: NodeId, position: Position) -> Result<(), EngineError> {
        self.check_node(node)?;
        self.nodes[node.index()] = Some(position);
        Ok(())
    }

    fn configure_channel(
        &mut self,
        channel: &ChannelConfig,
        phy: &PhyConfig,
    ) -> Result<(), EngineError> {
        self.channel = Some((*channel, *phy));
        Ok(())
    }

    fn install_mac(&mut self, node: NodeId, role: &MacRole) -> Result<(), EngineError> {
        self.check_node(node)?;
        self.macs.insert(node, role.clone());
        Ok(())
    }

    fn assign_addresses(&mut self, interfaces: &[InterfaceAddress]) -> Result<(), EngineError> {
        for iface in interfaces {
            self.check_node(iface.node)?;
            self.addresses.insert(iface.node, iface.address);
        }
        Ok(())
    }

    fn install_traffic_sink(&mut self, sink: &SinkEndpoint) -> Result<(), EngineError> {
        self.check_node(sink.node)?;
        self.sink = Some(sink.clone());
        Ok(())
    }

    fn install_traffic_source(&mut self, flow: &TrafficFlow) -> Result<(), EngineError> {
        self.check_node(flow.source)?;
        self.sources.push(flow.clone());
        Ok(())
    }

    fn run(&mut self, stop_s: f64) -> Result<(), EngineError> {
        if self.fail_run {
            return Err(EngineError::Internal("simulated engine fault".to_string()));
        }
        if self.stopped_at.is_some() {
            return Err(EngineError::AlreadyRan);
        }
        self.stopped_at = Some(stop_s);
        Ok(())
    }

    fn flow_stats(&self) -> Vec<FlowStats> {
        match &self.canned {
            Some(stats) => stats.clone(),
            None if self.stopped_at.is_some() => self.ideal_stats(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_nodes_are_rejected() {
        let mut engine = FakeEngine::new();
        engine.create_nodes(2).unwrap();
        assert_eq!(
            engine.place_node(NodeId(2), Position::default()),
            Err(EngineError::NodeNotFound(NodeId(2)))
        );
    }

    #[test]
    fn runs_once() {
        let mut engine = FakeEngine::new();
        assert!(engine.flow_stats().is_empty());
        engine.run(30.0).unwrap();
        assert_eq!(engine.stopped_at(), Some(30.0));
        assert_eq!(engine.run(30.0), Err(EngineError::AlreadyRan));
    }

    #[test]
    fn ideal_bytes_do_not_wrap_on_huge_payloads() {
        let mut engine = FakeEngine::new();
        engine.create_nodes(2).unwrap();
        engine
            .install_traffic_source(&TrafficFlow {
                source: NodeId(1),
                destination: Ipv4Addr::new(10, 0, 0, 1),
                port: 5000,
                packet_size: u32::MAX,
                interval_s: 1.0,
                max_packets: 13,
                start_s: 1.0,
                stop_s: 3.0,
            })
            .unwrap();
        engine.run(3.0).unwrap();

        let stats = engine.flow_stats();
        assert_eq!(stats[0].tx_bytes, 13 * (u32::MAX as u64 + 28));
        assert_eq!(stats[0].rx_bytes, stats[0].tx_bytes);
    }

    #[test]
    fn canned_stats_win() {
        let canned = vec![FlowStats { flow_id: 7, tx_packets: 3, ..FlowStats::default() }];
        let engine = FakeEngine::new().with_stats(canned.clone());
        assert_eq!(engine.flow_stats(), canned);
    }
}
