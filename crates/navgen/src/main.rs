// navgen - Navigation tile generator
//
// Reads a world description, builds every terrain tile (or the single
// global structure) and writes one compiled tile file per build.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{info, warn};

use navgen::builder::{BuildOptions, TileBuilder};
use navgen::config::BuildConfig;
use navgen::engine::VoxelEngine;
use navgen::geometry::TileCoord;
use navgen::output::TileWriter;
use navgen::world::WorldSource;
use navgen::world_json::JsonWorld;
use navgen_shared::ENV_PREFIX;
use navgen_shared::config::get_config;
use navgen_shared::log::{initialize_logging, map_log_level};

/// Default run settings file
const DEFAULT_CONFIG: &str = "navgen.conf";

/// Default console level (Detail)
const DEFAULT_LOG_LEVEL: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "navgen")]
#[command(about = "Navigation tile generator")]
#[command(version)]
struct Cli {
    /// Run settings file (INI)
    #[arg(short, long = "conf", default_value = DEFAULT_CONFIG)]
    conf: PathBuf,

    /// World description (JSON), overrides DataFile
    #[arg(short, long)]
    world: Option<PathBuf>,

    /// Output directory, overrides OutputDir
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Build parameters (JSON keyed by world name or "default")
    #[arg(long = "config")]
    build_config: Option<PathBuf>,

    /// Build only this tile (format: X,Y)
    #[arg(long, value_parser = parse_tile)]
    tile: Option<TileCoord>,

    /// Number of worker threads (0 = one per CPU), overrides Threads
    #[arg(long)]
    threads: Option<usize>,

    /// Rebuild tiles whose output is already up to date
    #[arg(long)]
    force: bool,

    /// Write the assembled geometry of each build as OBJ
    #[arg(long)]
    debug: bool,

    /// Console log level (0=Minimum, 1=Error, 2=Detail, 3=Full/Debug, 4=Trace)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<i32>,
}

fn parse_tile(input: &str) -> Result<TileCoord, String> {
    let mut parts = input.split(',');
    let x = parts
        .next()
        .ok_or_else(|| "Missing tile X".to_string())?
        .trim()
        .parse::<i32>()
        .map_err(|_| "Invalid tile X".to_string())?;
    let y = parts
        .next()
        .ok_or_else(|| "Missing tile Y".to_string())?
        .trim()
        .parse::<i32>()
        .map_err(|_| "Invalid tile Y".to_string())?;
    if parts.next().is_some() {
        return Err("Expected X,Y".to_string());
    }
    let coord = TileCoord::new(x, y);
    if !coord.in_grid() {
        return Err(format!("Tile {},{} is outside the 64x64 grid", x, y));
    }
    Ok(coord)
}

/// Settings after applying file, environment and command line
struct RunSettings {
    data_file: PathBuf,
    output_dir: PathBuf,
    logs_dir: Option<PathBuf>,
    log_level: i32,
    threads: usize,
}

impl RunSettings {
    fn resolve(cli: &Cli) -> anyhow::Result<RunSettings> {
        let config = get_config().lock();

        let data_file = cli
            .world
            .clone()
            .or_else(|| config.get_string("DataFile").map(PathBuf::from))
            .context("No world file given (--world or DataFile)")?;

        Ok(RunSettings {
            data_file,
            output_dir: cli
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(config.get_string_default("OutputDir", "navtiles"))),
            logs_dir: config.get_string("LogsDir").map(PathBuf::from),
            log_level: cli
                .log_level
                .unwrap_or_else(|| config.get_int_default("LogLevel", DEFAULT_LOG_LEVEL)),
            threads: cli
                .threads
                .unwrap_or_else(|| config.get_int_default("Threads", 0).max(0) as usize),
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    {
        let mut config = get_config().lock();
        if cli.conf.exists() {
            config.set_source(&cli.conf, ENV_PREFIX)?;
        } else if cli.conf == Path::new(DEFAULT_CONFIG) {
            config.set_env_only(ENV_PREFIX);
        } else {
            bail!("Could not find configuration file {}", cli.conf.display());
        }
    }

    let settings = RunSettings::resolve(&cli)?;
    initialize_logging(
        settings.logs_dir.as_deref(),
        map_log_level(settings.log_level),
        "navgen.log",
    );

    info!("navgen v{}", env!("CARGO_PKG_VERSION"));
    if cli.conf.exists() {
        info!("Using configuration file: {}", cli.conf.display());
    }
    info!("<Ctrl-C> to stop after the running tiles.");

    let world = Arc::new(JsonWorld::load(&settings.data_file)?);
    let build_config = match &cli.build_config {
        Some(path) => BuildConfig::load(path, world.world_name())?,
        None => BuildConfig::default(),
    };
    let voxel = build_config.to_voxel_config();
    info!(
        "[{}] Cell size {:.4}, cell height {:.2}, agent height {} climb {} radius {} (voxels)",
        world.world_name(),
        voxel.cs,
        voxel.ch,
        voxel.walkable_height,
        voxel.walkable_climb,
        voxel.walkable_radius
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Received stop signal, finishing running tiles");
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    let builder = TileBuilder::new(
        world.clone(),
        VoxelEngine::new(&voxel),
        voxel,
        TileWriter::new(&settings.output_dir, world.world_name()),
        BuildOptions {
            force: cli.force,
            debug_obj: cli.debug,
        },
    );

    let report = match cli.tile {
        Some(coord) => builder.run_tiles(&[coord], settings.threads, &cancel),
        None => builder.run(settings.threads, &cancel),
    };

    if report.cancelled > 0 {
        warn!("[{}] Stopped with {} builds not started", world.world_name(), report.cancelled);
    }
    if !report.is_success() {
        bail!(
            "{} of {} builds failed",
            report.failed(),
            report.failed() + report.succeeded + report.skipped
        );
    }
    Ok(())
}
