pub mod config;
pub use config::{ConfigError, RawParams, SimConfig};

use crate::engine::NetworkEngine;
use crate::fabric::NetworkFabric;
use crate::metrics::{AggregateMetrics, FlowSummary, summarize_flows};
use crate::topology::Topology;
use crate::traffic::{SINK_PORT, TrafficPlan};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Scenario {
    pub topology: Topology,
    pub fabric: NetworkFabric,
    pub plan: TrafficPlan,
}

#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub metrics: AggregateMetrics,
    pub flows: Vec<FlowSummary>,
}

pub struct Simulation {
    config: SimConfig,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    /// Places the nodes, wires the fabric and installs traffic. Nothing is
    /// simulated yet.
    pub fn prepare<E: NetworkEngine + ?Sized>(&self, engine: &mut E) -> Result<Scenario> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let topology = Topology::build(&self.config, &mut rng);
        info!(
            "Placed 1 sink and {} sensors in a {} m square (seed {})",
            topology.sensors().len(),
            self.config.area_size,
            self.config.seed
        );

        let fabric = NetworkFabric::build(&topology, &self.config, engine)?;
        let plan = TrafficPlan::schedule(&topology, &fabric, SINK_PORT, &self.config);
        plan.install(engine)?;

        Ok(Scenario {
            topology,
            fabric,
            plan,
        })
    }

    pub fn execute<E: NetworkEngine + ?Sized>(&self, engine: &mut E) -> Result<SimulationReport> {
        let scenario = self.prepare(engine)?;
        run_engine(engine, self.config.sim_time)?;
        Ok(self.collect(&scenario, engine))
    }

    /// Like `execute`, but the blocking engine run happens on tokio's
    /// blocking pool. The spinner shows live counters when the engine has them.
    pub async fn run<E>(&self, mut engine: E) -> Result<SimulationReport>
    where
        E: NetworkEngine + Send + 'static,
    {
        info!("Starting simulation");
        info!("Sensors: {}, duration: {}s", self.config.n_sensors, self.config.sim_time);

        let scenario = self.prepare(&mut engine)?;
        let stop_s = self.config.sim_time;

        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] {spinner:.yellow} {msg}")?
                .tick_chars("█▓░ "),
        );
        pb.set_message(format!("Simulating {}s of network time", stop_s));
        pb.enable_steady_tick(Duration::from_millis(100));

        let live = engine.live_monitor();
        let mut task = tokio::task::spawn_blocking(move || -> Result<E> {
            run_engine(&mut engine, stop_s)?;
            Ok(engine)
        });

        let mut tick = tokio::time::interval(Duration::from_millis(250));
        let outcome = loop {
            tokio::select! {
                joined = &mut task => break joined.context("simulation task panicked")?,
                _ = tick.tick() => {
                    if let Some(monitor) = &live {
                        let (sent, received) = monitor.totals();
                        pb.set_message(format!("Sent: {} | Received: {}", sent, received));
                    }
                }
            }
        };

        let engine = match outcome {
            Ok(engine) => {
                pb.finish_with_message("Simulation complete");
                engine
            }
            Err(e) => {
                pb.abandon_with_message("Simulation failed");
                return Err(e);
            }
        };

        Ok(self.collect(&scenario, &engine))
    }

    fn collect<E: NetworkEngine + ?Sized>(&self, scenario: &Scenario, engine: &E) -> SimulationReport {
        let stats = engine.flow_stats();
        let metrics = AggregateMetrics::from_flows(&stats, self.config.sim_time);
        let flows = summarize_flows(&stats, self.config.sim_time);

        info!(
            "{} flows, {} of {} budgeted packets sent, {} received",
            metrics.flow_count,
            metrics.total_tx_packets,
            scenario.plan.total_budget(),
            metrics.total_rx_packets
        );

        SimulationReport {
            config: self.config.clone(),
            metrics,
            flows,
        }
    }
}

/// Stops the engine at `stop_s` and runs it to completion. Any engine
/// error is fatal for the run.
pub fn run_engine<E: NetworkEngine + ?Sized>(engine: &mut E, stop_s: f64) -> Result<()> {
    engine
        .run(stop_s)
        .with_context(|| format!("simulation engine failed (stop at {}s)", stop_s))
}
