//! # UAV RFID Simulator - Main Entry Point
//!
//! Discrete-event simulator for the EPC Gen2 air interface between a moving
//! reader and a population of passive tags. A pass flies the reader along
//! its velocity vector while inventory rounds run underneath: Query, slotted
//! RN16 arbitration, ACK/EPC, then the ReqRN/Read access sequence, with the
//! channel deciding which replies survive.
//!
//! Two modes:
//! - `run`: simulate one or more passes over a scene described in TOML and
//!   print per-pass reports (optionally as JSON)
//! - `probe`: stress the event scheduler with a synthetic workload of
//!   randomized moves and cancellations

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;

mod des;
mod gen2;
mod geometry;
mod probe;
mod radio;
mod sim;

use sim::{PassReport, SimulationConfig};

#[derive(Parser)]
#[command(name = "uav-rfid-simulator", about = "Discrete-event simulator for Gen2 RFID inventory under a moving reader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate passes of the reader over a scene
    Run {
        /// Scene configuration file (TOML)
        scene: PathBuf,
        /// Number of independent passes
        #[arg(long, default_value_t = 1)]
        passes: usize,
        /// Print reports as JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },
    /// Stress the event scheduler with a synthetic workload
    Probe {
        /// Maximum simulated time
        #[arg(long, default_value_t = 1e3)]
        max_time: f64,
        /// Number of counter nodes
        #[arg(long, default_value_t = 5)]
        num_nodes: usize,
        /// Move events per simulated second and node
        #[arg(long, default_value_t = 100.0)]
        move_rate: f64,
        /// Cancellation events per simulated second
        #[arg(long, default_value_t = 1.0)]
        cancel_rate: f64,
        /// Total event budget, negative for unlimited
        #[arg(long, default_value_t = -1)]
        max_events: i64,
        /// RNG seed
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Log every dispatched move
        #[arg(long)]
        verbose: bool,
    },
}

/// Configure the global logger. `verbose` raises the simulation modules to
/// trace level while the rest of the crate stays at info.
fn init_logging(verbose: bool) {
    let level = if verbose { LevelFilter::Trace } else { LevelFilter::Info };
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("uav_rfid_simulator"), level)
        .init();
}

fn run_scene(scene: &PathBuf, passes: usize, json: bool) -> anyhow::Result<()> {
    let config = SimulationConfig::load(scene)
        .with_context(|| format!("loading scene {}", scene.display()))?;
    init_logging(config.scene.verbose);

    info!("starting {passes} pass(es) over {}", scene.display());
    let results = sim::simulate(&config, passes);

    for (pass, (time, scene)) in results.iter().enumerate() {
        let report = PassReport::new(*time, scene);
        if json {
            println!("{}", serde_json::to_string_pretty(&report).context("serializing report")?);
        } else {
            println!(
                "pass {}: t = {:.6} s, rounds = {}, collisions = {}, commands = {}+{}",
                pass + 1,
                report.sim_time,
                report.num_rounds,
                report.num_collisions,
                report.num_queries_sent,
                report.num_query_reps_sent,
            );
            for (i, tag) in report.tags.iter().enumerate() {
                println!(
                    "  tag {i} [{}]: epc {}/{} data {}/{}",
                    tag.epc,
                    tag.num_epcid_received,
                    tag.num_epcid_sent,
                    tag.num_data_received,
                    tag.num_data_sent,
                );
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { scene, passes, json } => run_scene(&scene, passes, json)?,
        Commands::Probe { max_time, num_nodes, move_rate, cancel_rate, max_events, seed, verbose } => {
            init_logging(verbose);
            let params = probe::ProbeParams {
                num_nodes,
                move_rate,
                cancel_rate,
                max_time,
                max_events,
                verbose,
            };
            let (time, state) = probe::run(params, seed);
            println!("time:       {time:.6}");
            println!("nodes:      {:?}", state.nodes);
            println!("num_incs:   {:?}", state.num_incs);
            println!("num_decs:   {:?}", state.num_decs);
            println!("num_events: {}", state.num_events);
        }
    }
    Ok(())
}
