//! # engine_app: Tick Driver
//!
//! Runs a fixed-step simulation over an in-process ECS world: a schedule of
//! systems is executed once per tick against a [`World`].
//!
//! ## Startup Sequence
//!
//! 1. Parse command-line arguments and initialise logging.
//! 2. Build the world and populate it with demo entities.
//! 3. Enter the tick loop.
//! 4. Optionally write the final world snapshot as JSON.

mod scheduler;
mod systems;
mod tick;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use engine_ecs::{World, WorldConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use systems::DemoComponents;
use tick::{TickConfig, TickLoop};

#[derive(Debug, Parser)]
#[command(name = "engine_app", about = "Fixed-step ECS simulation driver")]
struct Args {
    /// Number of entities spawned before the first tick
    #[arg(short, long, default_value_t = 10_000)]
    entities: usize,

    /// Entities destroyed and respawned per tick
    #[arg(short, long, default_value_t = 100)]
    churn: usize,

    /// Ticks to run (0 = run until interrupted)
    #[arg(short, long, default_value_t = 600)]
    ticks: u64,

    /// Target ticks per second (0 = unthrottled)
    #[arg(short = 'r', long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Maximum distinct entity indices
    #[arg(long)]
    max_entities: Option<u32>,

    /// Pooled interested-query sets kept for reuse
    #[arg(long)]
    pool_capacity: Option<usize>,

    /// Seed for the demo's deterministic generator
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    /// Log filter directive, overriding RUST_LOG
    #[arg(long)]
    log: Option<String>,

    /// Write the final world snapshot as JSON to this path
    #[arg(long)]
    dump: Option<PathBuf>,
}

impl Args {
    fn world_config(&self) -> WorldConfig {
        let mut config = WorldConfig::default();
        if let Some(max_entities) = self.max_entities {
            config = config.with_max_entities(max_entities);
        }
        if let Some(capacity) = self.pool_capacity {
            config = config.with_set_pool_capacity(capacity);
        }
        config
    }

    fn tick_config(&self) -> TickConfig {
        TickConfig {
            tick_rate: self.tick_rate.max(0.0),
            max_ticks: self.ticks,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directive) => EnvFilter::try_new(directive)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("engine_app=info"))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        entities = args.entities,
        churn = args.churn,
        ticks = args.ticks,
        "engine starting"
    );

    let types = DemoComponents::new()?;
    let mut world = World::with_config(args.world_config());
    systems::populate(&mut world, &types, &mut systems::demo_rng(args.seed), args.entities)
        .context("populating world")?;
    let schedule = systems::demo_schedule(&world, &types, args.churn, args.seed)?;

    let mut tick_loop = TickLoop::new(args.tick_config(), world, schedule);
    tick_loop.run()?;
    let world = tick_loop.into_world();

    if let Some(path) = &args.dump {
        let snapshot = world.snapshot();
        let file = File::create(path)
            .with_context(|| format!("creating snapshot file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)
            .context("writing snapshot")?;
        info!(
            path = %path.display(),
            entities = snapshot.allocator.active.len(),
            values = snapshot.value_count(),
            "snapshot written"
        );
    }

    info!(entities = world.entity_count(), "engine shut down");
    Ok(())
}
