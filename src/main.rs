use std::path::PathBuf;

use clap::Parser;

mod app;

/// Spatial-core demo: streams a disc of chunks out of a generated 2-D
/// world, then ticks the store while applying random edits so the derived
/// column heights and background lighting have something to chase.
#[derive(Debug, Parser)]
#[command(name = "strata", version, about)]
struct Args {
    /// World config TOML: `chunk_edge` at the top level, terrain tunables
    /// under `[terrain]`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist chunks under this directory; omit for a memory-only world.
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Ticks to run before shutting down.
    #[arg(long, default_value_t = 200)]
    ticks: u64,

    /// Random block edits applied each tick.
    #[arg(long, default_value_t = 4)]
    edits_per_tick: u32,

    /// Terrain seed override.
    #[arg(long)]
    seed: Option<i32>,

    /// Chunk load radius around the spawn column, in chunks.
    #[arg(long, default_value_t = 3)]
    radius: i32,

    /// Log filter (RUST_LOG syntax), e.g. "info,strata_store=debug".
    #[arg(long)]
    log: Option<String>,
}

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::new();
    logger.target(env_logger::Target::Stdout);
    match &args.log {
        Some(filter) => logger.parse_filters(filter),
        None => logger.parse_env(env_logger::Env::default().default_filter_or("info")),
    };
    logger.init();

    if let Err(e) = app::run(&args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
