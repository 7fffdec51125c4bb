use crate::traffic::MAX_PAYLOAD_BYTES;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_SENSORS: u32 = 30;
pub const MIN_SENSORS: u32 = 20;
pub const MAX_SENSORS: u32 = 40;

// straight from the command line, unclamped
#[derive(Debug, Clone, PartialEq)]
pub struct RawParams {
    pub n_sensors: u32,
    pub sim_time: f64,
    pub tx_power_dbm: f64,
    pub packet_interval: f64,
    pub packet_size: u32,
    pub area_size: f64,
    pub path_loss_exp: f64,
    pub seed: u64,
}

impl Default for RawParams {
    fn default() -> Self {
        let config = SimConfig::default();
        Self {
            n_sensors: config.n_sensors,
            sim_time: config.sim_time,
            tx_power_dbm: config.tx_power_dbm,
            packet_interval: config.packet_interval,
            packet_size: config.packet_size,
            area_size: config.area_size,
            path_loss_exp: config.path_loss_exp,
            seed: config.seed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub n_sensors: u32,
    // also the stop time of every application
    pub sim_time: f64,
    pub tx_power_dbm: f64,
    pub packet_interval: f64,
    pub packet_size: u32,
    pub area_size: f64,
    pub path_loss_exp: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be a finite positive number, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must be finite, got {value}")]
    NotFinite { name: &'static str, value: f64 },

    #[error("{name} must be at most {max}, got {value}")]
    TooLarge { name: &'static str, value: u64, max: u64 },
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            n_sensors: DEFAULT_SENSORS,
            sim_time: 30.0,
            tx_power_dbm: 16.0,
            packet_interval: 1.0,
            packet_size: 40,
            area_size: 100.0,
            path_loss_exp: 3.0,
            seed: 1,
        }
    }
}

impl SimConfig {
    /// Builds the canonical configuration. A sensor count outside
    /// [MIN_SENSORS, MAX_SENSORS] falls back to DEFAULT_SENSORS; everything
    /// else is taken as given.
    pub fn resolve(raw: RawParams) -> Self {
        let n_sensors = if (MIN_SENSORS..=MAX_SENSORS).contains(&raw.n_sensors) {
            raw.n_sensors
        } else {
            warn!(
                "nSensors must be between {} and {} (got {}). Using {}.",
                MIN_SENSORS, MAX_SENSORS, raw.n_sensors, DEFAULT_SENSORS
            );
            DEFAULT_SENSORS
        };

        Self {
            n_sensors,
            sim_time: raw.sim_time,
            tx_power_dbm: raw.tx_power_dbm,
            packet_interval: raw.packet_interval,
            packet_size: raw.packet_size,
            area_size: raw.area_size,
            path_loss_exp: raw.path_loss_exp,
            seed: raw.seed,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("simTime", self.sim_time)?;
        positive("packetInterval", self.packet_interval)?;
        positive("packetSize", self.packet_size as f64)?;
        if self.packet_size > MAX_PAYLOAD_BYTES {
            return Err(ConfigError::TooLarge {
                name: "packetSize",
                value: self.packet_size.into(),
                max: MAX_PAYLOAD_BYTES.into(),
            });
        }
        positive("areaSize", self.area_size)?;
        positive("pathLossExp", self.path_loss_exp)?;

        if !self.tx_power_dbm.is_finite() {
            return Err(ConfigError::NotFinite {
                name: "txPower",
                value: self.tx_power_dbm,
            });
        }

        Ok(())
    }

    pub fn with_sensors(mut self, n_sensors: u32) -> Self {
        self.n_sensors = n_sensors;
        self
    }

    pub fn with_timing(mut self, sim_time: f64, packet_interval: f64) -> Self {
        self.sim_time = sim_time;
        self.packet_interval = packet_interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // placement draws from `seed`, the engine from its own stream
    pub fn engine_seed(&self) -> u64 {
        self.seed.wrapping_add(1)
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw_with_sensors(n_sensors: u32) -> RawParams {
        RawParams {
            n_sensors,
            ..RawParams::default()
        }
    }

    proptest! {
        #[test]
        fn out_of_range_sensor_count_resets_to_default(
            n in prop_oneof![0u32..MIN_SENSORS, (MAX_SENSORS + 1)..=u32::MAX]
        ) {
            prop_assert_eq!(SimConfig::resolve(raw_with_sensors(n)).n_sensors, DEFAULT_SENSORS);
        }

        #[test]
        fn in_range_sensor_count_is_kept(n in MIN_SENSORS..=MAX_SENSORS) {
            prop_assert_eq!(SimConfig::resolve(raw_with_sensors(n)).n_sensors, n);
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(SimConfig::resolve(raw_with_sensors(20)).n_sensors, 20);
        assert_eq!(SimConfig::resolve(raw_with_sensors(40)).n_sensors, 40);
        assert_eq!(SimConfig::resolve(raw_with_sensors(19)).n_sensors, 30);
        assert_eq!(SimConfig::resolve(raw_with_sensors(41)).n_sensors, 30);
    }

    #[test]
    fn other_parameters_pass_through_unchecked() {
        let raw = RawParams {
            sim_time: -5.0,
            packet_interval: 0.0,
            area_size: 0.0,
            packet_size: 0,
            ..RawParams::default()
        };
        let config = SimConfig::resolve(raw.clone());
        assert_eq!(config.sim_time, raw.sim_time);
        assert_eq!(config.packet_interval, 0.0);
        assert_eq!(config.area_size, 0.0);
        assert_eq!(config.packet_size, 0);
    }

    #[test]
    fn defaults_validate() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
        assert_eq!(SimConfig::resolve(RawParams::default()), SimConfig::default());
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let config = SimConfig::default().with_timing(0.0, 1.0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::NotPositive { name: "simTime", value: 0.0 })
        );

        let config = SimConfig { area_size: -1.0, ..SimConfig::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { name: "areaSize", .. })
        ));

        let config = SimConfig { packet_size: 0, ..SimConfig::default() };
        assert!(config.validate().is_err());

        let config = SimConfig { tx_power_dbm: f64::NAN, ..SimConfig::default() };
        assert!(matches!(config.validate(), Err(ConfigError::NotFinite { .. })));
    }

    #[test]
    fn engine_draws_from_its_own_stream() {
        let config = SimConfig::default().with_seed(7);
        assert_ne!(config.engine_seed(), config.seed);
        assert_eq!(SimConfig::default().with_seed(u64::MAX).engine_seed(), 0);
    }

    #[test]
    fn packet_size_must_fit_a_datagram() {
        let config = SimConfig { packet_size: MAX_PAYLOAD_BYTES, ..SimConfig::default() };
        assert_eq!(config.validate(), Ok(()));

        let config = SimConfig { packet_size: u32::MAX, ..SimConfig::default() };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooLarge {
                name: "packetSize",
                value: u32::MAX as u64,
                max: 65_507,
            })
        );
    }
}
