// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Drive random read and write traffic through a crossbar.
//!
//! One manager is attached to every ingress port and one memory to every
//! egress port. The crossbar is configured from the defaults, an optional
//! TOML file and `XBAR_` environment variables. Optionally every manager
//! reaches the crossbar through a burst converter and issues a share of its
//! writes as descending bursts.

use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use itertools::{Itertools, MinMaxResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use xbar_components::burst_converter::BurstConverter;
use xbar_components::config::{ConverterConfig, CrossbarConfig, load_config};
use xbar_components::connect_bus;
use xbar_components::crossbar::Crossbar;
use xbar_components::test_helpers::{Manager, Memory, MemoryConfig, Transaction};
use xbar_components::types::{Burst, RespStatus};
use xbar_engine::engine::Engine;
use xbar_engine::types::SimError;
use xbar_track::builder::{TrackerConfig, setup_tracker};
use xbar_track::info;

/// Bytes per beat of the generated traffic.
const BEAT_SIZE: u8 = 3;

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Crossbar traffic application")]
struct Cli {
    /// TOML file to load the crossbar configuration from.
    #[arg(long)]
    config: Option<PathBuf>,

    /// TOML file to load the burst converter configuration from.
    #[arg(long)]
    converter_config: Option<PathBuf>,

    /// Place a burst converter in front of every ingress port.
    #[arg(long)]
    converter: bool,

    /// Level of log message to display.
    #[arg(long, default_value = "Info")]
    stdout_level: log::Level,

    /// Set a regular expression for which entites should have logging level set
    /// to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    stdout_filter_regex: String,

    /// Number of transactions issued by each manager.
    #[arg(long, default_value = "100")]
    requests: usize,

    /// Outstanding transactions per manager.
    #[arg(long, default_value = "4")]
    max_outstanding: usize,

    /// Longest burst generated, as a number of beats minus one.
    #[arg(long, default_value = "7")]
    max_len: u8,

    /// Percentage of transactions sent to unmapped addresses.
    #[arg(long, default_value = "5")]
    miss_percent: u32,

    /// Percentage of writes issued as descending bursts.
    #[arg(long, default_value = "0")]
    decr_percent: u32,

    /// Ticks between a memory completing a request and responding.
    #[arg(long, default_value = "4")]
    memory_latency: u64,

    /// Seed for the traffic generator.
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Abort the simulation if it has not finished by this tick.
    #[arg(long, default_value = "1000000")]
    max_ticks: u64,
}

/// First address above every routing rule.
fn unmapped_base(config: &CrossbarConfig) -> u64 {
    config.rules.iter().map(|r| r.end).max().unwrap_or(0)
}

fn random_transaction(rng: &mut StdRng, config: &CrossbarConfig, args: &Cli) -> Transaction {
    let is_write = rng.gen_bool(0.5);
    let id = rng.gen_range(0..1u32 << config.id_width.min(8));
    let len = rng.gen_range(0..=args.max_len);
    let beat_bytes = 1u64 << BEAT_SIZE;
    let span = beat_bytes * (u64::from(len) + 1);

    let miss = config.rules.is_empty() || rng.gen_range(0..100) < args.miss_percent;
    let start = if miss {
        unmapped_base(config) + rng.gen_range(0..0x1000u64)
    } else {
        let rule = &config.rules[rng.gen_range(0..config.rules.len())];
        let hi = rule.end.saturating_sub(span).max(rule.start);
        rng.gen_range(rule.start..=hi)
    };
    let start = start & !(beat_bytes - 1);

    if !is_write {
        return Transaction::read(id, start, len, BEAT_SIZE, Burst::Incr);
    }
    let data = (0..=len).map(|_| rng.r#gen()).collect();
    if rng.gen_range(0..100) < args.decr_percent {
        // A descending burst starts at its highest beat
        let top = start + span - beat_bytes;
        Transaction::write(id, top, BEAT_SIZE, Burst::Decr, data)
    } else {
        Transaction::write(id, start, BEAT_SIZE, Burst::Incr, data)
    }
}

fn build_managers(
    engine: &Engine,
    config: &CrossbarConfig,
    args: &Cli,
) -> Result<Vec<Rc<Manager>>, SimError> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let top = engine.top().clone();
    (0..config.num_ingress)
        .map(|i| {
            let script = (0..args.requests)
                .map(|_| random_transaction(&mut rng, config, args))
                .collect();
            Manager::new_and_register(
                engine,
                &top,
                format!("mgr{i}").as_str(),
                script,
                args.max_outstanding,
            )
        })
        .collect()
}

fn main() -> Result<(), SimError> {
    let args = Cli::parse();

    let tracker = setup_tracker(&TrackerConfig {
        enable: true,
        level: args.stdout_level,
        filter_regex: args.stdout_filter_regex.clone(),
        file: None,
    })
    .map_err(|e| SimError(e.to_string()))?;
    let engine = Engine::new(&tracker);
    let top = engine.top().clone();

    let config: CrossbarConfig = load_config(args.config.as_deref())?;
    let xbar = Crossbar::new_and_register(&engine, &top, "xbar", config.clone())?;
    let managers = build_managers(&engine, &config, &args)?;

    let mut converters = Vec::new();
    if args.converter {
        let converter_config: ConverterConfig = load_config(args.converter_config.as_deref())?;
        for (i, manager) in managers.iter().enumerate() {
            let converter = BurstConverter::new_and_register(
                &engine,
                &top,
                format!("conv{i}").as_str(),
                converter_config,
            )?;
            connect_bus!(manager, bus => converter, upstream)?;
            connect_bus!(converter, downstream => xbar, ingress, i)?;
            converters.push(converter);
        }
    } else {
        for (i, manager) in managers.iter().enumerate() {
            connect_bus!(manager, bus => xbar, ingress, i)?;
        }
    }

    for j in 0..config.num_egress {
        let memory = Memory::new_and_register(
            &engine,
            &top,
            format!("mem{j}").as_str(),
            MemoryConfig {
                latency: args.memory_latency,
                ..MemoryConfig::default()
            },
        )?;
        connect_bus!(xbar, egress, j => memory, bus)?;
    }

    info!(top ;
        "{} x {} crossbar, {} requests per manager, seed {}",
        config.num_ingress, config.num_egress, args.requests, args.seed
    );

    let finished = engine.run_until(args.max_ticks, || managers.iter().all(|m| m.is_done()))?;

    for manager in &managers {
        let completions = manager.completions();
        let errors = completions
            .iter()
            .filter(|c| c.status != RespStatus::Okay)
            .count();
        let total_latency: u64 = completions.iter().map(|c| c.latency()).sum();
        let mean_latency = total_latency as f64 / completions.len().max(1) as f64;
        let (min_latency, max_latency) = match completions.iter().map(|c| c.latency()).minmax() {
            MinMaxResult::NoElements => (0, 0),
            MinMaxResult::OneElement(l) => (l, l),
            MinMaxResult::MinMax(min, max) => (min, max),
        };
        info!(manager.entity ;
            "{} completed, {} errors, latency min {} mean {:.1} max {}",
            completions.len(), errors, min_latency, mean_latency, max_latency
        );
    }
    for j in 0..config.num_egress {
        let mux = xbar.mux(j);
        let grants = (0..config.num_ingress).map(|i| mux.grants(i)).join(", ");
        info!(mux.entity ; "grants per ingress [{grants}]");
    }
    for converter in &converters {
        let stats = converter.stats();
        info!(converter.entity ;
            "{} converted, {} bypassed, {} hazard stalls",
            stats.converted, stats.bypassed, stats.hazard_stalls
        );
    }
    info!(top ; "finished at tick {finished}, {} error responses", xbar.num_error_responses());
    Ok(())
}
