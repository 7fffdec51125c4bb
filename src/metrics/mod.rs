pub mod report;

use crate::engine::{FlowId, FlowStats};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub flow_count: usize,
    pub total_tx_packets: u64,
    pub total_rx_packets: u64,
    // seconds
    pub delay_sum: f64,
    pub total_rx_bytes: u64,
    pub pdr_percent: f64,
    pub avg_delay_s: f64,
    pub throughput_kbps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub flow_id: FlowId,
    pub source: Option<Ipv4Addr>,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub pdr_percent: f64,
    pub avg_delay_s: f64,
    pub throughput_kbps: f64,
}

impl AggregateMetrics {
    // Sums every flow unfiltered. Degenerate inputs give zeros, not NaN
    pub fn from_flows(flows: &[FlowStats], duration_s: f64) -> Self {
        let mut metrics = Self {
            flow_count: flows.len(),
            ..Self::default()
        };

        for flow in flows {
            metrics.total_tx_packets += flow.tx_packets;
            metrics.total_rx_packets += flow.rx_packets;
            metrics.delay_sum += flow.delay_sum;
            metrics.total_rx_bytes = metrics.total_rx_bytes.saturating_add(flow.rx_bytes);
        }

        metrics.pdr_percent = pdr(metrics.total_tx_packets, metrics.total_rx_packets);
        metrics.avg_delay_s = avg_delay(metrics.delay_sum, metrics.total_rx_packets);
        metrics.throughput_kbps = throughput_kbps(metrics.total_rx_bytes, duration_s);
        metrics
    }

    pub fn lost_packets(&self) -> u64 {
        self.total_tx_packets.saturating_sub(self.total_rx_packets)
    }
}

pub fn summarize_flows(flows: &[FlowStats], duration_s: f64) -> Vec<FlowSummary> {
    flows
        .iter()
        .map(|flow| FlowSummary {
            flow_id: flow.flow_id,
            source: flow.key.map(|k| k.source),
            tx_packets: flow.tx_packets,
            rx_packets: flow.rx_packets,
            pdr_percent: pdr(flow.tx_packets, flow.rx_packets),
            avg_delay_s: avg_delay(flow.delay_sum, flow.rx_packets),
            throughput_kbps: throughput_kbps(flow.rx_bytes, duration_s),
        })
        .collect()
}

pub fn pdr(tx_packets: u64, rx_packets: u64) -> f64 {
    if tx_packets > 0 {
        rx_packets as f64 / tx_packets as f64 * 100.0
    } else {
        0.0
    }
}

pub fn avg_delay(delay_sum: f64, rx_packets: u64) -> f64 {
    if rx_packets > 0 {
        delay_sum / rx_packets as f64
    } else {
        0.0
    }
}

pub fn throughput_kbps(rx_bytes: u64, duration_s: f64) -> f64 {
    if duration_s > 0.0 {
        rx_bytes as f64 * 8.0 / (duration_s * 1000.0)
    } else {
        0.0
    }
}
