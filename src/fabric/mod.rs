pub mod address;

pub use address::{AddressBlock, AddressError, InterfaceAddress};

use crate::engine::NetworkEngine;
use crate::simulation::SimConfig;
use crate::topology::Topology;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info};

pub const NETWORK_NAME: &str = "IOT-WIFI-NET";
pub const ADDRESS_BASE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);
pub const ADDRESS_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

// Loss at 1 m, 5.15 GHz free space
pub const REFERENCE_LOSS_DB: f64 = 46.6777;
pub const REFERENCE_DISTANCE_M: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ssid(String);

impl Ssid {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PropagationLoss {
    // PL(d) = L0 + 10 * n * log10(d / d0)
    LogDistance {
        exponent: f64,
        reference_distance_m: f64,
        reference_loss_db: f64,
    },
}

impl PropagationLoss {
    pub fn log_distance(exponent: f64) -> Self {
        Self::LogDistance {
            exponent,
            reference_distance_m: REFERENCE_DISTANCE_M,
            reference_loss_db: REFERENCE_LOSS_DB,
        }
    }

    pub fn loss_db(&self, distance_m: f64) -> f64 {
        match *self {
            Self::LogDistance { exponent, reference_distance_m, reference_loss_db } => {
                // Flat at L0 inside the reference distance
                if distance_m <= reference_distance_m {
                    return reference_loss_db;
                }
                reference_loss_db + 10.0 * exponent * (distance_m / reference_distance_m).log10()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub loss: PropagationLoss,
    // m/s
    pub propagation_speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhyConfig {
    pub tx_power_start_dbm: f64,
    pub tx_power_end_dbm: f64,
    pub data_mode: DataRate,
    pub control_mode: DataRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRate {
    Ofdm6Mbps,
    Ofdm24Mbps,
}

impl DataRate {
    pub fn bits_per_second(self) -> u64 {
        match self {
            Self::Ofdm6Mbps => 6_000_000,
            Self::Ofdm24Mbps => 24_000_000,
        }
    }

    // data bits per 4 us symbol
    pub fn bits_per_symbol(self) -> u64 {
        self.bits_per_second() * 4 / 1_000_000
    }

    pub fn min_snr_db(self) -> f64 {
        match self {
            Self::Ofdm6Mbps => 4.0,
            Self::Ofdm24Mbps => 11.0,
        }
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ofdm6Mbps => f.write_str("OfdmRate6Mbps"),
            Self::Ofdm24Mbps => f.write_str("OfdmRate24Mbps"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacRole {
    AccessPoint { ssid: Ssid },
    Station { ssid: Ssid, active_probing: bool },
}

impl MacRole {
    pub fn ssid(&self) -> &Ssid {
        match self {
            Self::AccessPoint { ssid } | Self::Station { ssid, .. } => ssid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFabric {
    pub channel: ChannelConfig,
    pub phy: PhyConfig,
    pub ssid: Ssid,
    pub sink_address: Ipv4Addr,
    pub interfaces: Vec<InterfaceAddress>,
}

impl NetworkFabric {
    pub fn build<E: NetworkEngine + ?Sized>(
        topology: &Topology,
        config: &SimConfig,
        engine: &mut E,
    ) -> Result<Self> {
        let created = engine
            .create_nodes(topology.len())
            .context("creating nodes")?;
        debug!("Engine created {} nodes", created.len());

        for node in topology.nodes() {
            engine.place_node(node.id, node.position)?;
        }

        let channel = ChannelConfig {
            loss: PropagationLoss::log_distance(config.path_loss_exp),
            propagation_speed: 299_792_458.0,
        };
        // one fixed power level, constant rate for data and control
        let phy = PhyConfig {
            tx_power_start_dbm: config.tx_power_dbm,
            tx_power_end_dbm: config.tx_power_dbm,
            data_mode: DataRate::Ofdm24Mbps,
            control_mode: DataRate::Ofdm24Mbps,
        };
        engine
            .configure_channel(&channel, &phy)
            .context("configuring wireless channel")?;

        // sink is the AP, sensors wait for its beacons instead of probing
        let ssid = Ssid::new(NETWORK_NAME);
        engine.install_mac(topology.sink().id, &MacRole::AccessPoint { ssid: ssid.clone() })?;
        let station = MacRole::Station {
            ssid: ssid.clone(),
            active_probing: false,
        };
        for sensor in topology.sensors() {
            engine.install_mac(sensor.id, &station)?;
        }

        // Sink first, then sensors in creation order.
        let mut block = AddressBlock::new(ADDRESS_BASE, ADDRESS_MASK)?;
        let interfaces = topology
            .nodes()
            .iter()
            .map(|node| {
                Ok(InterfaceAddress {
                    node: node.id,
                    address: block.allocate()?,
                    netmask: block.mask(),
                })
            })
            .collect::<Result<Vec<_>, AddressError>>()?;
        engine
            .assign_addresses(&interfaces)
            .context("assigning addresses")?;

        let sink_address = interfaces[0].address;
        info!(
            "Fabric ready: ssid={}, {} interfaces in {}/{}, sink at {}",
            ssid,
            interfaces.len(),
            ADDRESS_BASE,
            ADDRESS_MASK,
            sink_address
        );

        Ok(Self {
            channel,
            phy,
            ssid,
            sink_address,
            interfaces,
        })
    }
}
