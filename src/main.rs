// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use sensornet::metrics::report::{self, FlowTable, RunReport, Summary};
use sensornet::prelude::*;

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;
use tracing::{info, Level};

/// One sink, N sensors, periodic UDP uplink over a shared Wi-Fi cell.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of IoT sensor nodes (20-40, otherwise 30)
    #[arg(short = 'n', long = "nSensors", visible_alias = "n-sensors", default_value_t = 30)]
    n_sensors: u32,

    /// Simulation time in seconds
    #[arg(long = "simTime", visible_alias = "sim-time", default_value_t = 30.0, allow_negative_numbers = true)]
    sim_time: f64,

    /// Transmit power in dBm
    #[arg(long = "txPower", visible_alias = "tx-power", default_value_t = 16.0, allow_negative_numbers = true)]
    tx_power: f64,

    /// Packet generation interval in seconds
    #[arg(long = "packetInterval", visible_alias = "packet-interval", default_value_t = 1.0, allow_negative_numbers = true)]
    packet_interval: f64,

    /// Packet size in bytes
    #[arg(long = "packetSize", visible_alias = "packet-size", default_value_t = 40)]
    packet_size: u32,

    /// Side of the square area in meters
    #[arg(long = "areaSize", visible_alias = "area-size", default_value_t = 100.0, allow_negative_numbers = true)]
    area_size: f64,

    /// Log-distance path loss exponent
    #[arg(long = "pathLossExp", visible_alias = "path-loss-exp", default_value_t = 3.0, allow_negative_numbers = true)]
    path_loss_exp: f64,

    /// Seed for node placement and medium access
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Accept non-positive durations, sizes and intervals
    #[arg(long)]
    lenient: bool,

    /// Also print per-flow results
    #[arg(long)]
    flows: bool,

    /// Print the results as JSON
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn raw_params(&self) -> RawParams {
        RawParams {
            n_sensors: self.n_sensors,
            sim_time: self.sim_time,
            tx_power_dbm: self.tx_power,
            packet_interval: self.packet_interval,
            packet_size: self.packet_size,
            area_size: self.area_size,
            path_loss_exp: self.path_loss_exp,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = SimConfig::resolve(cli.raw_params());
    if !cli.lenient {
        config.validate().context("invalid configuration (use --lenient to run anyway)")?;
    }

    info!("sensornet: single run");

    let engine = WifiEngine::new(config.engine_seed());
    let sim = Simulation::new(config);
    let result = sim.run(engine).await?;

    if cli.json {
        let flows = cli.flows.then_some(result.flows.as_slice());
        println!(
            "{}",
            report::to_json(&RunReport {
                config: &result.config,
                metrics: &result.metrics,
                flows,
            })?
        );
    } else {
        print!(
            "{}",
            Summary {
                config: &result.config,
                metrics: &result.metrics,
            }
        );
        if cli.flows {
            print!("{}", FlowTable(&result.flows));
        }
    }

    info!("Total runtime: {:.2}s", program_start.elapsed().as_secs_f64());

    Ok(())
}
