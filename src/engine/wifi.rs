use super::{
    EngineError, FlowKey, FlowMonitor, FlowStats, NetworkEngine, SimTime, ip_packet_bytes,
};
use crate::fabric::{ChannelConfig, DataRate, InterfaceAddress, MacRole, PhyConfig};
use crate::topology::{NodeId, Position};
use crate::traffic::{MAX_PAYLOAD_BYTES, SinkEndpoint, TrafficFlow};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::net::Ipv4Addr;
use tracing::{debug, info, trace, warn};

const SLOT: SimTime = SimTime::from_micros(9);
const SIFS: SimTime = SimTime::from_micros(16);
const DIFS: SimTime = SimTime::from_micros(34);
const BEACON_INTERVAL: SimTime = SimTime::from_micros(102_400);
const PREAMBLE_US: u64 = 20;
const SYMBOL_US: u64 = 4;

const CW_MIN: u32 = 15;
const CW_MAX: u32 = 1023;
const RETRY_LIMIT: u32 = 7;
const QUEUE_LIMIT: usize = 500;

// MAC header + FCS + LLC/SNAP
const MAC_OVERHEAD_BYTES: u64 = 36;
const ACK_BYTES: u64 = 14;
const EPHEMERAL_PORT: u16 = 49153;

const NOISE_FLOOR_DBM: f64 = -94.0;
const RX_SENSITIVITY_DBM: f64 = -101.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Beacon,
    AppSend { station: usize },
    AccessAttempt { station: usize },
    TxStart { station: usize },
    TxEnd { station: usize },
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    time: SimTime,
    sequence: u64,
    event: Event,
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on (time, sequence).
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Default)]
struct EngineNode {
    position: Option<Position>,
    mac: Option<MacRole>,
    address: Option<Ipv4Addr>,
}

#[derive(Debug)]
struct Frame {
    sent_at: SimTime,
    ip_bytes: u64,
}

#[derive(Debug)]
struct Station {
    node: NodeId,
    flow: TrafficFlow,
    key: FlowKey,
    interval: SimTime,
    start: SimTime,
    stop: SimTime,
    sent: u32,
    associated: bool,
    link: Link,
    queue: VecDeque<Frame>,
    cw: u32,
    retries: u32,
    // access attempt or transmission pending
    contending: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    rx_power_dbm: f64,
    snr_db: f64,
    hears_beacons: bool,
    delivers: bool,
    propagation: SimTime,
}

#[derive(Debug)]
struct Transmission {
    station: usize,
    start: SimTime,
    data_end: SimTime,
    end: SimTime,
    collided: bool,
}

pub struct WifiEngine {
    rng: StdRng,
    nodes: Vec<EngineNode>,
    medium: Option<(ChannelConfig, PhyConfig)>,
    data_mode: DataRate,
    control_mode: DataRate,
    sink: Option<SinkEndpoint>,
    stations: Vec<Station>,
    monitor: FlowMonitor,
    queue: BinaryHeap<Scheduled>,
    sequence: u64,
    now: SimTime,
    busy_until: SimTime,
    on_air: Vec<Transmission>,
    sink_received: u64,
    collisions: u64,
    ran: bool,
}

impl WifiEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            nodes: Vec::new(),
            medium: None,
            data_mode: DataRate::Ofdm24Mbps,
            control_mode: DataRate::Ofdm24Mbps,
            sink: None,
            stations: Vec::new(),
            monitor: FlowMonitor::new(),
            queue: BinaryHeap::new(),
            sequence: 0,
            now: SimTime::ZERO,
            busy_until: SimTime::ZERO,
            on_air: Vec::new(),
            sink_received: 0,
            collisions: 0,
            ran: false,
        }
    }

    /// Datagrams delivered to the sink application while it was running.
    pub fn sink_received(&self) -> u64 {
        self.sink_received
    }

    fn node(&self, node: NodeId) -> Result<&EngineNode, EngineError> {
        self.nodes.get(node.index()).ok_or(EngineError::NodeNotFound(node))
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut EngineNode, EngineError> {
        self.nodes
            .get_mut(node.index())
            .ok_or(EngineError::NodeNotFound(node))
    }

    fn schedule(&mut self, time: SimTime, event: Event) {
        self.sequence += 1;
        self.queue.push(Scheduled {
            time,
            sequence: self.sequence,
            event,
        });
    }

    fn access_point(&self) -> Result<(NodeId, Position, &MacRole), EngineError> {
        self.nodes
            .iter()
            .enumerate()
            .find_map(|(i, n)| match &n.mac {
                Some(role @ MacRole::AccessPoint { .. }) => {
                    Some((NodeId(i as u32), n.position, role))
                }
                _ => None,
            })
            .ok_or(EngineError::NotConfigured("access point"))
            .and_then(|(id, pos, role)| {
                pos.map(|p| (id, p, role))
                    .ok_or(EngineError::NotConfigured("access point position"))
            })
    }

    fn evaluate_links(&mut self) -> Result<(), EngineError> {
        let (channel, phy) = self.medium.ok_or(EngineError::NotConfigured("channel"))?;
        let (_, ap_position, ap_role) = self.access_point()?;
        let ap_ssid = ap_role.ssid().clone();

        let mut links = Vec::with_capacity(self.stations.len());
        for station in &self.stations {
            let node = self.node(station.node)?;
            let position = node
                .position
                .ok_or(EngineError::NotConfigured("station position"))?;
            let same_network = node.mac.as_ref().map(|m| m.ssid()) == Some(&ap_ssid);

            let distance = position.distance_to(&ap_position);
            let rx_power_dbm = phy.tx_power_start_dbm - channel.loss.loss_db(distance);
            let snr_db = rx_power_dbm - NOISE_FLOOR_DBM;
            let audible = rx_power_dbm >= RX_SENSITIVITY_DBM;
            let needed = phy.data_mode.min_snr_db().max(phy.control_mode.min_snr_db());

            links.push(Link {
                rx_power_dbm,
                snr_db,
                // Beacons go out at the basic rate.
                hears_beacons: same_network && audible && snr_db >= DataRate::Ofdm6Mbps.min_snr_db(),
                delivers: audible && snr_db >= needed,
                propagation: SimTime::from_secs(distance / channel.propagation_speed)?,
            });
        }

        for (station, link) in self.stations.iter_mut().zip(links) {
            debug!(
                "{}: rx {:.1} dBm, snr {:.1} dB, beacons={}, delivers={}",
                station.node, link.rx_power_dbm, link.snr_db, link.hears_beacons, link.delivers
            );
            station.link = link;
        }
        Ok(())
    }

    // (data PPDU, SIFS + ACK)
    fn frame_airtime(&self, ip_bytes: u64) -> (SimTime, SimTime) {
        let data = ofdm_duration(ip_bytes.saturating_add(MAC_OVERHEAD_BYTES), self.data_mode);
        let ack = ofdm_duration(ACK_BYTES, self.control_mode);
        (data, SIFS + ack)
    }

    fn handle(&mut self, event: Event, stop: SimTime) {
        match event {
            Event::Beacon => self.on_beacon(stop),
            Event::AppSend { station } => self.on_app_send(station),
            Event::AccessAttempt { station } => self.on_access_attempt(station),
            Event::TxStart { station } => self.on_tx_start(station),
            Event::TxEnd { station } => self.on_tx_end(station),
        }
    }

    fn on_beacon(&mut self, stop: SimTime) {
        let now = self.now;
        for station in self.stations.iter_mut().filter(|s| !s.associated) {
            if station.link.hears_beacons {
                station.associated = true;
                debug!("{} associated at {:.4}s", station.node, now.as_secs_f64());
            }
        }

        let next = now + BEACON_INTERVAL;
        if next <= stop {
            self.schedule(next, Event::Beacon);
        }
    }

    fn on_app_send(&mut self, index: usize) {
        let now = self.now;
        let station = &mut self.stations[index];
        if now >= station.stop || station.sent >= station.flow.max_packets {
            return;
        }

        station.sent += 1;
        let ip_bytes = ip_packet_bytes(station.flow.packet_size);
        self.monitor.packet_sent(station.key, ip_bytes);

        let mut start_access = false;
        if !station.associated {
            trace!("{} not associated, dropping packet {}", station.node, station.sent);
        } else if station.queue.len() >= QUEUE_LIMIT {
            trace!("{} queue full, dropping packet {}", station.node, station.sent);
        } else {
            station.queue.push_back(Frame { sent_at: now, ip_bytes });
            if !station.contending {
                station.contending = true;
                start_access = true;
            }
        }

        let more = station.sent < station.flow.max_packets;
        let next = now + station.interval;
        if start_access {
            self.schedule(now, Event::AccessAttempt { station: index });
        }
        if more {
            self.schedule(next, Event::AppSend { station: index });
        }
    }

    fn on_access_attempt(&mut self, index: usize) {
        // DIFS + random backoff once the medium goes idle
        let cw = self.stations[index].cw;
        let slots = self.rng.gen_range(0..=cw) as u64;
        let idle_from = self.now.max(self.busy_until);
        let start = idle_from + DIFS + SimTime::from_nanos(SLOT.as_nanos() * slots);
        self.schedule(start, Event::TxStart { station: index });
    }

    fn on_tx_start(&mut self, index: usize) {
        let now = self.now;
        let Some(ip_bytes) = self.stations[index].queue.front().map(|f| f.ip_bytes) else {
            self.stations[index].contending = false;
            return;
        };

        let overlapping: Vec<usize> = self
            .on_air
            .iter()
            .enumerate()
            .filter(|(_, tx)| tx.end > now)
            .map(|(i, _)| i)
            .collect();

        let mut collided = false;
        if !overlapping.is_empty() {
            let sensed = overlapping
                .iter()
                .any(|&i| now - self.on_air[i].start >= SLOT);
            if sensed {
                // Carrier sensed: back off again behind the current frame.
                self.schedule(now, Event::AccessAttempt { station: index });
                return;
            }
            // started within the same slot, neither could hear the other
            for &i in &overlapping {
                self.on_air[i].collided = true;
            }
            collided = true;
            self.collisions += 1;
        }

        let (data, ack) = self.frame_airtime(ip_bytes);
        let data_end = now + data;
        let end = data_end + ack;
        self.on_air.push(Transmission {
            station: index,
            start: now,
            data_end,
            end,
            collided,
        });
        self.busy_until = self.busy_until.max(end);
        self.schedule(end, Event::TxEnd { station: index });
    }

    fn on_tx_end(&mut self, index: usize) {
        let now = self.now;
        let Some(pos) = self.on_air.iter().position(|tx| tx.station == index) else {
            warn!("Transmission end without a frame on air for station {}", index);
            return;
        };
        let tx = self.on_air.swap_remove(pos);

        let station = &mut self.stations[index];
        if tx.collided || !station.link.delivers {
            // no ACK: double the window, give up after RETRY_LIMIT
            station.retries += 1;
            station.cw = (station.cw * 2 + 1).min(CW_MAX);
            if station.retries > RETRY_LIMIT {
                station.queue.pop_front();
                station.retries = 0;
                station.cw = CW_MIN;
                trace!("{} gave up on a frame after {} retries", station.node, RETRY_LIMIT);
            }
        } else if let Some(frame) = station.queue.pop_front() {
            let received_at = tx.data_end + station.link.propagation;
            self.monitor
                .packet_received(station.key, frame.ip_bytes, frame.sent_at, received_at);

            if let Some(sink) = self.sink.as_ref() {
                let t = received_at.as_secs_f64();
                if sink.port == station.flow.port && t >= sink.start_s && t < sink.stop_s {
                    self.sink_received += 1;
                }
            }
            station.retries = 0;
            station.cw = CW_MIN;
        }

        if station.queue.is_empty() {
            station.contending = false;
        } else {
            self.schedule(now, Event::AccessAttempt { station: index });
        }
    }
}

impl NetworkEngine for WifiEngine {
    fn create_nodes(&mut self, count: usize) -> Result<Vec<NodeId>, EngineError> {
        let first = self.nodes.len();
        self.nodes.extend((0..count).map(|_| EngineNode::default()));
        Ok((first..first + count).map(|i| NodeId(i as u32)).collect())
    }

    fn place_node(&mut self, node: NodeId, position: Position) -> Result<(), EngineError> {
        self.node_mut(node)?.position = Some(position);
        Ok(())
    }

    fn configure_channel(
        &mut self,
        channel: &ChannelConfig,
        phy: &PhyConfig,
    ) -> Result<(), EngineError> {
        if phy.tx_power_start_dbm != phy.tx_power_end_dbm {
            debug!(
                "Power levels {}..{} dBm, transmitting at the start level",
                phy.tx_power_start_dbm, phy.tx_power_end_dbm
            );
        }
        self.medium = Some((*channel, *phy));
        self.data_mode = phy.data_mode;
        self.control_mode = phy.control_mode;
        Ok(())
    }

    fn install_mac(&mut self, node: NodeId, role: &MacRole) -> Result<(), EngineError> {
        if let MacRole::Station { active_probing: true, .. } = role {
            debug!("{} probes actively; association still waits for beacons", node);
        }
        self.node_mut(node)?.mac = Some(role.clone());
        Ok(())
    }

    fn assign_addresses(&mut self, interfaces: &[InterfaceAddress]) -> Result<(), EngineError> {
        for iface in interfaces {
            self.node_mut(iface.node)?.address = Some(iface.address);
        }
        Ok(())
    }

    fn install_traffic_sink(&mut self, sink: &SinkEndpoint) -> Result<(), EngineError> {
        let node = self.node(sink.node)?;
        if !matches!(node.mac, Some(MacRole::AccessPoint { .. })) {
            return Err(EngineError::RoleMismatch { node: sink.node, what: "a traffic sink" });
        }
        if node.address != Some(sink.address) {
            return Err(EngineError::MissingAddress { node: sink.node });
        }
        self.sink = Some(sink.clone());
        Ok(())
    }

    fn install_traffic_source(&mut self, flow: &TrafficFlow) -> Result<(), EngineError> {
        let node = self.node(flow.source)?;
        if !matches!(node.mac, Some(MacRole::Station { .. })) {
            return Err(EngineError::RoleMismatch { node: flow.source, what: "a traffic source" });
        }
        let address = node
            .address
            .ok_or(EngineError::MissingAddress { node: flow.source })?;

        if flow.packet_size > MAX_PAYLOAD_BYTES {
            return Err(EngineError::PayloadTooLarge {
                size: flow.packet_size,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        let interval = SimTime::from_secs(flow.interval_s)?;
        if interval == SimTime::ZERO {
            return Err(EngineError::InvalidTime(flow.interval_s));
        }

        self.stations.push(Station {
            node: flow.source,
            flow: flow.clone(),
            key: FlowKey::udp(address, EPHEMERAL_PORT, flow.destination, flow.port),
            interval,
            start: SimTime::from_secs(flow.start_s)?,
            stop: SimTime::from_secs(flow.stop_s)?,
            sent: 0,
            associated: false,
            link: Link::default(),
            queue: VecDeque::new(),
            cw: CW_MIN,
            retries: 0,
            contending: false,
        });
        Ok(())
    }

    fn run(&mut self, stop_s: f64) -> Result<(), EngineError> {
        if self.ran {
            return Err(EngineError::AlreadyRan);
        }
        self.ran = true;

        let stop = SimTime::from_secs(stop_s)?;
        self.evaluate_links()?;

        self.schedule(SimTime::ZERO, Event::Beacon);
        for i in 0..self.stations.len() {
            let start = self.stations[i].start;
            self.schedule(start, Event::AppSend { station: i });
        }

        // anything scheduled after stop never happens
        let mut processed = 0u64;
        while let Some(next) = self.queue.pop() {
            if next.time > stop {
                break;
            }
            self.now = next.time;
            self.handle(next.event, stop);
            processed += 1;
        }
        self.queue.clear();

        info!(
            "Engine stopped at {:.3}s after {} events ({} collisions, {} datagrams at the sink)",
            stop.as_secs_f64(),
            processed,
            self.collisions,
            self.sink_received
        );
        Ok(())
    }

    fn flow_stats(&self) -> Vec<FlowStats> {
        self.monitor.stats()
    }

    fn live_monitor(&self) -> Option<FlowMonitor> {
        Some(self.monitor.clone())
    }
}

/// OFDM PPDU duration: preamble plus whole symbols for the 16 service
/// bits, the payload and 6 tail bits.
fn ofdm_duration(bytes: u64, rate: DataRate) -> SimTime {
    let bits = bytes.saturating_mul(8).saturating_add(16 + 6);
    let symbols = bits.div_ceil(rate.bits_per_symbol());
    SimTime::from_micros(PREAMBLE_US.saturating_add(SYMBOL_US.saturating_mul(symbols)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::NetworkFabric;
    use crate::simulation::SimConfig;
    use crate::topology::Topology;
    use crate::traffic::{SINK_PORT, TrafficPlan};

    fn wired(config: &SimConfig) -> (WifiEngine, TrafficPlan) {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let topology = Topology::build(config, &mut rng);
        let mut engine = WifiEngine::new(config.engine_seed());
        let fabric = NetworkFabric::build(&topology, config, &mut engine).unwrap();
        let plan = TrafficPlan::schedule(&topology, &fabric, SINK_PORT, config);
        plan.install(&mut engine).unwrap();
        (engine, plan)
    }

    fn small_cell() -> SimConfig {
        SimConfig {
            area_size: 10.0,
            ..SimConfig::default()
        }
        .with_sensors(20)
        .with_timing(10.0, 1.0)
    }

    #[test]
    fn ofdm_durations() {
        // 14 byte ACK: 22 + 112 = 134 bits -> 2 symbols at 96 bits each.
        assert_eq!(ofdm_duration(14, DataRate::Ofdm24Mbps), SimTime::from_micros(28));
        // 104 bytes: 854 bits -> 9 symbols.
        assert_eq!(ofdm_duration(104, DataRate::Ofdm24Mbps), SimTime::from_micros(56));
        assert!(ofdm_duration(104, DataRate::Ofdm6Mbps) > ofdm_duration(104, DataRate::Ofdm24Mbps));
    }

    #[test]
    fn close_stations_deliver_everything_they_send() {
        let config = small_cell();
        let (mut engine, plan) = wired(&config);
        engine.run(config.sim_time).unwrap();

        let stats = engine.flow_stats();
        assert_eq!(stats.len(), plan.flows.len());
        for flow in &stats {
            // Sends at start, start + 1, ... strictly before 10 s.
            assert_eq!(flow.tx_packets, 9);
            assert_eq!(flow.rx_packets, flow.tx_packets);
            assert_eq!(flow.rx_bytes, 9 * ip_packet_bytes(40));
            assert_eq!(flow.lost_packets, 0);
            let avg = flow.delay_sum / flow.rx_packets as f64;
            assert!(avg > 0.0 && avg < 0.001, "average delay {avg}");
        }
        assert_eq!(engine.sink_received(), 9 * 20);
    }

    #[test]
    fn sources_respect_their_budget() {
        let config = small_cell();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let topology = Topology::build(&config, &mut rng);
        let mut engine = WifiEngine::new(config.engine_seed());
        let fabric = NetworkFabric::build(&topology, &config, &mut engine).unwrap();
        let mut plan = TrafficPlan::schedule(&topology, &fabric, SINK_PORT, &config);
        for flow in &mut plan.flows {
            flow.max_packets = 3;
        }
        plan.install(&mut engine).unwrap();
        engine.run(config.sim_time).unwrap();

        assert!(engine.flow_stats().iter().all(|f| f.tx_packets == 3));
    }

    #[test]
    fn out_of_range_stations_never_deliver() {
        let config = SimConfig {
            tx_power_dbm: -60.0,
            ..small_cell()
        };
        let (mut engine, _) = wired(&config);
        engine.run(config.sim_time).unwrap();

        let stats = engine.flow_stats();
        assert!(stats.iter().all(|f| f.tx_packets == 9 && f.rx_packets == 0));
        assert!(stats.iter().all(|f| f.lost_packets == 9));
        assert_eq!(engine.sink_received(), 0);
    }

    #[test]
    fn received_never_exceeds_sent() {
        let config = SimConfig::default().with_sensors(40).with_timing(20.0, 0.05);
        let (mut engine, _) = wired(&config);
        engine.run(config.sim_time).unwrap();

        for flow in engine.flow_stats() {
            assert!(flow.rx_packets <= flow.tx_packets);
            assert!(flow.tx_packets <= 20 * 20 + 10);
        }
    }

    #[test]
    fn same_seed_same_outcome() {
        let config = SimConfig::default().with_seed(9);
        let (mut a, _) = wired(&config);
        let (mut b, _) = wired(&config);
        a.run(config.sim_time).unwrap();
        b.run(config.sim_time).unwrap();
        assert_eq!(a.flow_stats(), b.flow_stats());
    }

    #[test]
    fn runs_only_once() {
        let config = small_cell();
        let (mut engine, _) = wired(&config);
        engine.run(1.0).unwrap();
        assert_eq!(engine.run(1.0), Err(EngineError::AlreadyRan));
    }

    #[test]
    fn run_requires_a_channel() {
        let mut engine = WifiEngine::new(0);
        engine.create_nodes(1).unwrap();
        assert_eq!(engine.run(1.0), Err(EngineError::NotConfigured("channel")));
    }

    #[test]
    fn sources_need_a_station_with_an_address() {
        let config = small_cell();
        let (mut engine, plan) = wired(&config);

        let mut on_sink = plan.flows[0].clone();
        on_sink.source = plan.sink.node;
        assert!(matches!(
            engine.install_traffic_source(&on_sink),
            Err(EngineError::RoleMismatch { .. })
        ));

        let mut zero_interval = plan.flows[0].clone();
        zero_interval.interval_s = 0.0;
        assert_eq!(
            engine.install_traffic_source(&zero_interval),
            Err(EngineError::InvalidTime(0.0))
        );
    }

    #[test]
    fn oversized_payloads_are_refused() {
        let config = small_cell();
        let (mut engine, plan) = wired(&config);

        let mut largest = plan.flows[0].clone();
        largest.packet_size = MAX_PAYLOAD_BYTES;
        assert_eq!(engine.install_traffic_source(&largest), Ok(()));

        let mut huge = plan.flows[0].clone();
        huge.packet_size = u32::MAX;
        assert_eq!(
            engine.install_traffic_source(&huge),
            Err(EngineError::PayloadTooLarge { size: u32::MAX, max: MAX_PAYLOAD_BYTES })
        );
    }

    #[test]
    fn airtime_saturates_instead_of_wrapping() {
        let engine = WifiEngine::new(0);
        let (data, _) = engine.frame_airtime(u64::MAX);
        assert!(data > ofdm_duration(1500, DataRate::Ofdm24Mbps));
    }
}
