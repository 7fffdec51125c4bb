use super::{AggregateMetrics, FlowSummary};
use crate::simulation::SimConfig;
use anyhow::Result;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub config: &'a SimConfig,
    pub metrics: &'a AggregateMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flows: Option<&'a [FlowSummary]>,
}

pub struct Summary<'a> {
    pub config: &'a SimConfig,
    pub metrics: &'a AggregateMetrics,
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (config, metrics) = (self.config, self.metrics);
        writeln!(f, "========== RESULTS ==========")?;
        writeln!(f, "Sensors:             {}", config.n_sensors)?;
        writeln!(f, "Simulation time:     {} s", config.sim_time)?;
        writeln!(f, "TxPower:             {} dBm", config.tx_power_dbm)?;
        writeln!(f, "Packet interval:     {} s", config.packet_interval)?;
        writeln!(f, "Packet size:         {} bytes", config.packet_size)?;
        writeln!(f, "Area size:           {} m", config.area_size)?;
        writeln!(f, "Path loss exponent:  {}", config.path_loss_exp)?;
        writeln!(f, "Packets sent:        {}", metrics.total_tx_packets)?;
        writeln!(f, "Packets received:    {}", metrics.total_rx_packets)?;
        writeln!(f, "Packets lost:        {}", metrics.lost_packets())?;
        writeln!(f, "PDR:                 {:.2} %", metrics.pdr_percent)?;
        writeln!(f, "Average delay:       {:.6} s", metrics.avg_delay_s)?;
        writeln!(f, "Average throughput:  {:.3} kbps", metrics.throughput_kbps)?;
        writeln!(f, "=============================")
    }
}

pub struct FlowTable<'a>(pub &'a [FlowSummary]);

impl fmt::Display for FlowTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════╦═════════════════╦═════════╦═════════╦═════════╦════════════╦════════════╗")?;
        writeln!(f, "║ Flow ║ Source          ║ Tx      ║ Rx      ║ PDR (%) ║ Delay (ms) ║ Thr (kbps) ║")?;
        writeln!(f, "╠══════╬═════════════════╬═════════╬═════════╬═════════╬════════════╬════════════╣")?;

        for flow in self.0 {
            // flows the engine could not classify have no source
            let source = flow
                .source
                .map(|addr| addr.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "║ {:>4} ║ {:<15} ║ {:>7} ║ {:>7} ║ {:>7.2} ║ {:>10.3} ║ {:>10.3} ║",
                flow.flow_id,
                source,
                flow.tx_packets,
                flow.rx_packets,
                flow.pdr_percent,
                flow.avg_delay_s * 1000.0,
                flow.throughput_kbps,
            )?;
        }

        writeln!(f, "╚══════╩═════════════════╩═════════╩═════════╩═════════╩════════════╩════════════╝")
    }
}

pub fn to_json(report: &RunReport<'_>) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn metrics() -> AggregateMetrics {
        AggregateMetrics {
            flow_count: 30,
            total_tx_packets: 870,
            total_rx_packets: 812,
            delay_sum: 0.4,
            total_rx_bytes: 55_216,
            pdr_percent: 93.333,
            avg_delay_s: 0.000_492,
            throughput_kbps: 14.724,
        }
    }

    #[test]
    fn summary_echoes_config_and_metrics() {
        let config = SimConfig::default();
        let m = metrics();
        let text = Summary { config: &config, metrics: &m }.to_string();
        assert!(text.contains("Sensors:             30"));
        assert!(text.contains("Simulation time:     30 s"));
        assert!(text.contains("Packet size:         40 bytes"));
        assert!(text.contains("Packets sent:        870"));
        assert!(text.contains("Packets received:    812"));
        assert!(text.contains("Packets lost:        58"));
        assert!(text.contains("PDR:                 93.33 %"));
        assert!(text.contains("Average throughput:  14.724 kbps"));
    }

    #[test]
    fn flow_table_has_one_row_per_flow() {
        let flows = vec![
            FlowSummary {
                flow_id: 1,
                source: Some(Ipv4Addr::new(10, 0, 0, 2)),
                tx_packets: 29,
                rx_packets: 29,
                pdr_percent: 100.0,
                avg_delay_s: 0.0002,
                throughput_kbps: 0.5,
            },
            FlowSummary {
                flow_id: 2,
                source: None,
                tx_packets: 29,
                rx_packets: 0,
                pdr_percent: 0.0,
                avg_delay_s: 0.0,
                throughput_kbps: 0.0,
            },
        ];
        let table = FlowTable(&flows).to_string();
        assert_eq!(table.lines().count(), 3 + flows.len() + 1);
        assert!(table.contains("10.0.0.2"));
        assert!(table.contains("║ -               ║"));
    }

    #[test]
    fn json_omits_flows_unless_requested() {
        let config = SimConfig::default();
        let m = metrics();
        let json = to_json(&RunReport { config: &config, metrics: &m, flows: None }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["config"]["n_sensors"], 30);
        assert_eq!(value["metrics"]["total_tx_packets"], 870);
        assert!(value.get("flows").is_none());
    }
}
