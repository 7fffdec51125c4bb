use crate::engine::NetworkEngine;
use crate::fabric::NetworkFabric;
use crate::simulation::SimConfig;
use crate::topology::{NodeId, Topology};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::{debug, info};

pub const SINK_PORT: u16 = 5000;
pub const SINK_START_S: f64 = 0.5;
pub const FIRST_SOURCE_START_S: f64 = 1.0;
pub const SOURCE_START_STEP_S: f64 = 0.01;
pub const BUDGET_MARGIN: u32 = 10;
// 65535 minus the IPv4 and UDP headers
pub const MAX_PAYLOAD_BYTES: u32 = 65_507;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkEndpoint {
    pub node: NodeId,
    pub address: Ipv4Addr,
    pub port: u16,
    pub start_s: f64,
    pub stop_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlow {
    pub source: NodeId,
    pub destination: Ipv4Addr,
    pub port: u16,
    pub packet_size: u32,
    pub interval_s: f64,
    pub max_packets: u32,
    pub start_s: f64,
    pub stop_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficPlan {
    pub sink: SinkEndpoint,
    pub flows: Vec<TrafficFlow>,
}

/// `floor(duration / interval) + 10`. Negative, NaN or infinite quotients
/// saturate through the cast.
pub fn packet_budget(duration_s: f64, interval_s: f64) -> u32 {
    let periods = (duration_s / interval_s).floor() as u32;
    periods.saturating_add(BUDGET_MARGIN)
}

pub fn staggered_start(index: usize) -> f64 {
    FIRST_SOURCE_START_S + index as f64 * SOURCE_START_STEP_S
}

impl TrafficPlan {
    pub fn schedule(
        topology: &Topology,
        fabric: &NetworkFabric,
        port: u16,
        config: &SimConfig,
    ) -> Self {
        let sink = SinkEndpoint {
            node: topology.sink().id,
            address: fabric.sink_address,
            port,
            start_s: SINK_START_S,
            stop_s: config.sim_time,
        };

        let max_packets = packet_budget(config.sim_time, config.packet_interval);
        let flows: Vec<TrafficFlow> = topology
            .sensors()
            .iter()
            .enumerate()
            .map(|(i, sensor)| TrafficFlow {
                source: sensor.id,
                destination: fabric.sink_address,
                port,
                packet_size: config.packet_size,
                interval_s: config.packet_interval,
                max_packets,
                start_s: staggered_start(i),
                stop_s: config.sim_time,
            })
            .collect();

        info!(
            "Scheduled {} sources -> {}:{} ({} packets max each, {} B every {}s)",
            flows.len(),
            sink.address,
            port,
            max_packets,
            config.packet_size,
            config.packet_interval
        );

        Self { sink, flows }
    }

    pub fn install<E: NetworkEngine + ?Sized>(&self, engine: &mut E) -> Result<()> {
        engine
            .install_traffic_sink(&self.sink)
            .context("installing traffic sink")?;

        for flow in &self.flows {
            debug!("{} starts at {:.2}s", flow.source, flow.start_s);
            engine
                .install_traffic_source(flow)
                .with_context(|| format!("installing traffic source on {}", flow.source))?;
        }
        Ok(())
    }

    pub fn total_budget(&self) -> u64 {
        self.flows.iter().map(|f| f.max_packets as u64).sum()
    }
}
