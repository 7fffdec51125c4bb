use super::SimTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::warn;

pub const PROTOCOL_UDP: u8 = 17;

/// Flow ids are handed out from 1 in order of first transmission.
pub type FlowId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
    pub protocol: u8,
}

impl FlowKey {
    pub fn udp(source: Ipv4Addr, source_port: u16, destination: Ipv4Addr, destination_port: u16) -> Self {
        Self {
            source,
            destination,
            source_port,
            destination_port,
            protocol: PROTOCOL_UDP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowStats {
    pub flow_id: FlowId,
    // None when the engine does not classify by 5-tuple
    pub key: Option<FlowKey>,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    // seconds
    pub delay_sum: f64,
    pub lost_packets: u64,
}

/// Shared per-flow bookkeeping. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct FlowMonitor {
    inner: Arc<RwLock<MonitorInner>>,
}

#[derive(Debug, Default)]
struct MonitorInner {
    flows: BTreeMap<FlowKey, FlowRecord>,
    next_id: FlowId,
}

#[derive(Debug, Default)]
struct FlowRecord {
    id: FlowId,
    tx_packets: u64,
    rx_packets: u64,
    tx_bytes: u64,
    rx_bytes: u64,
    delay_sum_ns: u128,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_sent(&self, key: FlowKey, bytes: u64) {
        let mut inner = self.inner.write();
        let record = inner.record(key);
        record.tx_packets += 1;
        record.tx_bytes = record.tx_bytes.saturating_add(bytes);
    }

    pub fn packet_received(&self, key: FlowKey, bytes: u64, sent_at: SimTime, received_at: SimTime) {
        let mut inner = self.inner.write();
        let Some(record) = inner.flows.get_mut(&key) else {
            warn!("Received packet on unknown flow {:?} - ignoring", key);
            return;
        };
        record.rx_packets += 1;
        record.rx_bytes = record.rx_bytes.saturating_add(bytes);
        record.delay_sum_ns += (received_at - sent_at).as_nanos() as u128;
    }

    pub fn totals(&self) -> (u64, u64) {
        let inner = self.inner.read();
        inner.flows.values().fold((0, 0), |(tx, rx), r| {
            (tx + r.tx_packets, rx + r.rx_packets)
        })
    }

    // Ordered by flow id. Sent but not yet received counts as lost.
    pub fn stats(&self) -> Vec<FlowStats> {
        let inner = self.inner.read();
        let mut stats: Vec<FlowStats> = inner
            .flows
            .iter()
            .map(|(key, r)| FlowStats {
                flow_id: r.id,
                key: Some(*key),
                tx_packets: r.tx_packets,
                rx_packets: r.rx_packets,
                tx_bytes: r.tx_bytes,
                rx_bytes: r.rx_bytes,
                delay_sum: r.delay_sum_ns as f64 / 1e9,
                lost_packets: r.tx_packets.saturating_sub(r.rx_packets),
            })
            .collect();
        stats.sort_by_key(|s| s.flow_id);
        stats
    }
}

impl MonitorInner {
    fn record(&mut self, key: FlowKey) -> &mut FlowRecord {
        let next_id = &mut self.next_id;
        self.flows.entry(key).or_insert_with(|| {
            *next_id += 1;
            FlowRecord { id: *next_id, ..FlowRecord::default() }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(last: u8) -> FlowKey {
        FlowKey::udp(Ipv4Addr::new(10, 0, 0, last), 49153, Ipv4Addr::new(10, 0, 0, 1), 5000)
    }

    #[test]
    fn ids_follow_first_transmission() {
        let monitor = FlowMonitor::new();
        monitor.packet_sent(key(5), 68);
        monitor.packet_sent(key(2), 68);
        monitor.packet_sent(key(5), 68);

        let stats = monitor.stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].flow_id, 1);
        assert_eq!(stats[0].key, Some(key(5)));
        assert_eq!(stats[0].tx_packets, 2);
        assert_eq!(stats[0].tx_bytes, 136);
        assert_eq!(stats[1].flow_id, 2);
        assert_eq!(stats[1].key, Some(key(2)));
    }

    #[test]
    fn delay_and_loss_accounting() {
        let monitor = FlowMonitor::new();
        let shared = monitor.clone();
        monitor.packet_sent(key(2), 68);
        monitor.packet_sent(key(2), 68);
        shared.packet_received(
            key(2),
            68,
            SimTime::from_micros(1_000_000),
            SimTime::from_micros(1_000_250),
        );

        let stats = monitor.stats();
        assert_eq!(stats[0].rx_packets, 1);
        assert_eq!(stats[0].rx_bytes, 68);
        assert_eq!(stats[0].lost_packets, 1);
        assert!((stats[0].delay_sum - 0.000_25).abs() < 1e-12);
        assert_eq!(shared.totals(), (2, 1));
    }

    #[test]
    fn unknown_flow_receptions_are_ignored() {
        let monitor = FlowMonitor::new();
        monitor.packet_received(key(9), 68, SimTime::ZERO, SimTime::from_micros(5));
        assert!(monitor.stats().is_empty());
    }
}
