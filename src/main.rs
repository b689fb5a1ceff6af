//! # FluidML CLI
//!
//! Four subcommands covering the pipeline stages:
//!
//! ```bash
//! fluidml profile model.mlir --times 50 --jobs 8 --mode kernel --output kstat.json
//! fluidml reduce --iostat iostat.json --kstat kstat.json --output reduced.json
//! fluidml analyze model.mlir --kstat reduced.json --mode dp --output schedule.json
//! fluidml generate model.mlir --schedule schedule.json --output optimized.mlir
//! ```
//!
//! Exits 0 on success; any surfaced error prints a single line to stderr
//! and exits nonzero.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fluidml::config::{Config, LoggingConfig};
use fluidml::profiler::{
    self, CompileOptions, ProcessSpawner, ProfileMode, ProfileOptions, ProfileOutput, Runtime,
    StubRuntime, ToolCompiler, ToolRuntime,
};
use fluidml::{analyzer, generator, IOStat, KStat, Schedule};

#[derive(Parser)]
#[command(name = "fluidml", version, about = "Tensor-layout optimizer for flow-level modules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Benchmark kernels across every legal layout combination
    Profile {
        /// Path to the flow module file
        filename: PathBuf,
        /// Samples per measurement (default from config / FLUIDML_TIME)
        #[arg(long)]
        times: Option<usize>,
        /// Worker count (default from config / FLUIDML_WORKER_NUM)
        #[arg(long)]
        jobs: Option<usize>,
        /// Driver poll period in seconds
        #[arg(long)]
        check_period: Option<f64>,
        /// Runtime driver to benchmark against
        #[arg(long, default_value = "local-task")]
        driver: String,
        /// Directory for emitted benchmark modules and worker logs
        #[arg(long)]
        profile_cache: Option<PathBuf>,
        /// JSON object of options for the underlying compiler
        #[arg(long, default_value = "{}")]
        compile_options: String,
        /// What to measure: io, kernel, or pipeline
        #[arg(long, default_value = "kernel")]
        mode: String,
        /// Output path (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Subtract per-kernel io cost from a kernel stat store
    Reduce {
        #[arg(long)]
        iostat: PathBuf,
        #[arg(long)]
        kstat: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Choose a layout for every tensor value
    Analyze {
        /// Path to the flow module file
        filename: PathBuf,
        /// Selection strategy: dp or greedy
        #[arg(long, default_value = "dp")]
        mode: String,
        #[arg(long)]
        kstat: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rewrite a module per a chosen schedule
    Generate {
        /// Path to the flow module file
        filename: PathBuf,
        #[arg(long)]
        schedule: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Internal: serve profile jobs over stdio (spawned by the driver)
    #[command(hide = true, name = "profile-worker")]
    ProfileWorker,
}

fn main() {
    if let Err(error) = try_main() {
        eprintln!("fluidml: {error:#}");
        std::process::exit(1);
    }
}

fn try_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    init_tracing(&config.logging);

    match cli.command {
        Command::Profile {
            filename,
            times,
            jobs,
            check_period,
            driver,
            profile_cache,
            compile_options,
            mode,
            output,
        } => {
            let module = std::fs::read_to_string(&filename)
                .with_context(|| format!("reading {}", filename.display()))?;
            let mode: ProfileMode = mode.parse().map_err(anyhow::Error::msg)?;
            let compile_options = CompileOptions::from_json(&compile_options)
                .context("parsing --compile-options")?;
            let options = ProfileOptions {
                times: times.unwrap_or(config.time),
                worker_num: jobs.unwrap_or(config.worker_num),
                check_period: check_period.unwrap_or(config.check_period),
                driver,
                profile_cache: profile_cache.or(config.profile_cache),
                compile_options,
                debug: config.debug,
            };
            let runtime: Arc<dyn Runtime> = if options.debug {
                Arc::new(StubRuntime)
            } else {
                let runner = options
                    .compile_options
                    .runner
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("iree-run-module"));
                Arc::new(ToolRuntime { runner })
            };
            let result = profiler::profile(
                &module,
                mode,
                &options,
                Arc::new(ToolCompiler),
                runtime,
                Arc::new(ProcessSpawner),
            )?;
            let text = match result {
                ProfileOutput::Kernel(kstat) => kstat.dump()?,
                ProfileOutput::Io(iostat) => iostat.dump()?,
            };
            write_output(output.as_deref(), &text)?;
        }
        Command::Reduce {
            iostat,
            kstat,
            output,
        } => {
            let iostat = IOStat::load(
                &std::fs::read_to_string(&iostat)
                    .with_context(|| format!("reading {}", iostat.display()))?,
            )?;
            let kstat = KStat::load(
                &std::fs::read_to_string(&kstat)
                    .with_context(|| format!("reading {}", kstat.display()))?,
            )?;
            write_output(output.as_deref(), &kstat.reduce(&iostat).dump()?)?;
        }
        Command::Analyze {
            filename,
            mode,
            kstat,
            output,
        } => {
            let module = std::fs::read_to_string(&filename)
                .with_context(|| format!("reading {}", filename.display()))?;
            let mode: analyzer::Mode = mode.parse().map_err(anyhow::Error::msg)?;
            let kstat = KStat::load(
                &std::fs::read_to_string(&kstat)
                    .with_context(|| format!("reading {}", kstat.display()))?,
            )?;
            let schedule = analyzer::analyze(&module, &kstat, mode)?;
            write_output(output.as_deref(), &schedule.dump()?)?;
        }
        Command::Generate {
            filename,
            schedule,
            output,
        } => {
            let module = std::fs::read_to_string(&filename)
                .with_context(|| format!("reading {}", filename.display()))?;
            let schedule = Schedule::load(
                &std::fs::read_to_string(&schedule)
                    .with_context(|| format!("reading {}", schedule.display()))?,
            )?;
            let generated = generator::generate(&module, &schedule)?;
            write_output(output.as_deref(), &generated)?;
        }
        Command::ProfileWorker => {
            profiler::worker_main()?;
        }
    }
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn write_output(path: Option<&std::path::Path>, text: &str) -> anyhow::Result<()> {
    match path {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}
