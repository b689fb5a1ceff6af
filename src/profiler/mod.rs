//! Kernel-layout profiling.
//!
//! The kernel profiler slices the module into per-executable sub-modules,
//! fans the per-layout benchmark builds and measurements out over a fixed
//! pool of worker processes, and collects the minimum sample per
//! (kernel, layout tuple) into a [`KStat`]. The IO profiler measures each
//! kernel's plain buffer-movement cost sequentially into an [`IOStat`];
//! the pipeline profiler runs both and subtracts.
//!
//! Concurrency model: workers are OS processes (not threads — each owns
//! its own compiler and runtime instance, and the compiler is not
//! reentrancy-safe across contexts), spawned from this executable and fed
//! through per-worker relay pumps in the driver. Job, result, and
//! phase-arbitration payloads cross the process boundary as plain protocol
//! lines. Compilation runs under the blue phase of the [`ExclusiveLock`],
//! measurement under the red phase, so compiles never add noise to a
//! running benchmark.

pub mod bench;
pub mod exlock;
pub mod job;
pub mod process;
pub mod protocol;
pub mod runtime;
pub mod worker;

pub use exlock::ExclusiveLock;
pub use job::{Job, JobPool, ResultJob};
pub use process::{pump, ProcessSpawner, WorkerLink, WorkerSpawner};
pub use protocol::{Phase, WorkerConfig, WorkerReply, WorkerRequest};
pub use runtime::{
    CompileError, CompileOptions, Compiler, Invocation, Runtime, RuntimeError, StubRuntime,
    TensorData, ToolCompiler, ToolRuntime,
};
pub use worker::{serve, worker_main, WorkerIo, WorkerState};

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::ir::{Module, ParseError};
use crate::stats::{IOStat, KStat};

/// Profiling failures. Per-combination compiler rejections never appear
/// here; they are dropped inside the worker.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A non-tool compiler failure (launch, I/O)
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// A benchmark invocation failed
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A sub-module lost its expected structure
    #[error("malformed benchmark module: {message}")]
    Malformed { message: String },

    /// A worker process reported a fatal error
    #[error("worker failure: {message}")]
    Worker { message: String },

    /// The driver/worker channel carried something unexpected
    #[error("worker protocol violation: {message}")]
    Protocol { message: String },
}

/// What to measure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileMode {
    Io,
    Kernel,
    Pipeline,
}

impl std::str::FromStr for ProfileMode {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "io" => Ok(ProfileMode::Io),
            "kernel" => Ok(ProfileMode::Kernel),
            "pipeline" => Ok(ProfileMode::Pipeline),
            other => Err(format!("unknown profiler mode `{other}`")),
        }
    }
}

/// Knobs shared by every profiler.
#[derive(Clone, Debug)]
pub struct ProfileOptions {
    /// Samples per measurement; the reported value is their minimum.
    pub times: usize,
    pub worker_num: usize,
    /// Driver poll period in seconds.
    pub check_period: f64,
    pub driver: String,
    pub profile_cache: Option<std::path::PathBuf>,
    pub compile_options: CompileOptions,
    /// Skip compilation and execution, reporting zero time.
    pub debug: bool,
}

/// Either stat container, depending on the profiling mode.
pub enum ProfileOutput {
    Kernel(KStat),
    Io(IOStat),
}

/// Run the requested profiling mode over a module's text. The compiler and
/// runtime seams serve the sequential IO path in the driver; the kernel
/// path works through `spawner`'s worker processes.
pub fn profile(
    text: &str,
    mode: ProfileMode,
    options: &ProfileOptions,
    compiler: Arc<dyn Compiler>,
    runtime: Arc<dyn Runtime>,
    spawner: Arc<dyn WorkerSpawner>,
) -> Result<ProfileOutput, ProfileError> {
    match mode {
        ProfileMode::Io => IOProfiler::new(options.clone(), compiler, runtime)
            .run(text)
            .map(ProfileOutput::Io),
        ProfileMode::Kernel => KernelProfiler::new(options.clone(), spawner)
            .run(text)
            .map(ProfileOutput::Kernel),
        ProfileMode::Pipeline => PipelineProfiler::new(options.clone(), compiler, runtime, spawner)
            .run(text)
            .map(ProfileOutput::Kernel),
    }
}

/// Full per-layout kernel measurement over the worker-process pool.
pub struct KernelProfiler {
    options: ProfileOptions,
    spawner: Arc<dyn WorkerSpawner>,
}

impl KernelProfiler {
    pub fn new(options: ProfileOptions, spawner: Arc<dyn WorkerSpawner>) -> Self {
        KernelProfiler { options, spawner }
    }

    pub fn run(&self, text: &str) -> Result<KStat, ProfileError> {
        let module = Module::parse(text)?;
        if let Some(cache) = &self.options.profile_cache {
            std::fs::create_dir_all(cache)?;
        }
        let pool = Arc::new(JobPool::new());
        let exlock = Arc::new(ExclusiveLock::new());
        let sub_modules = bench::build_sub_modules(&module);
        info!(
            executables = sub_modules.len(),
            workers = self.options.worker_num,
            "starting kernel profile"
        );
        for sub_module in sub_modules {
            pool.put_create(sub_module);
        }

        let compile_options = self
            .options
            .compile_options
            .augmented(&self.options.driver);
        let mut pumps: Vec<std::thread::JoinHandle<()>> = Vec::with_capacity(self.options.worker_num);
        for index in 0..self.options.worker_num {
            let config = WorkerConfig {
                index,
                times: self.options.times,
                driver: self.options.driver.clone(),
                options: compile_options.clone(),
                profile_cache: self.options.profile_cache.clone(),
                debug: self.options.debug,
            };
            let link = match self.spawner.spawn(&config) {
                Ok(link) => link,
                Err(error) => {
                    pool.close();
                    for handle in pumps {
                        let _ = handle.join();
                    }
                    return Err(error);
                }
            };
            let pool = Arc::clone(&pool);
            let exlock = Arc::clone(&exlock);
            pumps.push(std::thread::spawn(move || {
                process::pump(&pool, &exlock, link);
            }));
        }

        let mut kstat = KStat::new();
        let waited = pool.wait(
            Duration::from_secs_f64(self.options.check_period),
            |result| {
                kstat.insert(&result.kernel, result.layouts, result.time_ns);
            },
        );
        pool.close();
        for handle in pumps {
            let _ = handle.join();
        }
        waited?;
        info!(cells = kstat.len(), "kernel profile complete");
        Ok(kstat)
    }
}

/// Sequential buffer-movement measurement, one hollow kernel at a time,
/// run in the driver process.
pub struct IOProfiler {
    options: ProfileOptions,
    compiler: Arc<dyn Compiler>,
    runtime: Arc<dyn Runtime>,
}

impl IOProfiler {
    pub fn new(
        options: ProfileOptions,
        compiler: Arc<dyn Compiler>,
        runtime: Arc<dyn Runtime>,
    ) -> Self {
        IOProfiler {
            options,
            compiler,
            runtime,
        }
    }

    pub fn run(&self, text: &str) -> Result<IOStat, ProfileError> {
        let module = Module::parse(text)?;
        let compile_options = self
            .options
            .compile_options
            .augmented(&self.options.driver);
        let mut iostat = IOStat::new();
        for executable in module.executables() {
            let kernel = &executable.kernel;
            if self.options.debug {
                iostat.insert(&kernel.name, 0.0);
                continue;
            }
            let io_text = bench::build_io_module(&module, executable);
            let binary = match self.compiler.compile(&io_text, &compile_options) {
                Ok(binary) => binary,
                Err(CompileError::Tool(message)) => {
                    warn!(kernel = %kernel.name, message, "dropping io benchmark");
                    continue;
                }
                Err(other) => return Err(ProfileError::Compile(other)),
            };
            let mut invocation = self.runtime.load(&self.options.driver, &binary)?;
            let (inputs, _) = kernel.signature();
            let data: Vec<TensorData> = inputs
                .iter()
                .map(|tensor| TensorData::random(&tensor.dims, tensor.elem))
                .collect();
            let entry = format!("invoke_{}$async", kernel.name);
            for _ in 0..self.options.times / 10 {
                invocation.invoke(&entry, &data)?;
            }
            let mut best = f64::INFINITY;
            for _ in 0..self.options.times {
                let elapsed = invocation.invoke(&entry, &data)? as f64;
                if elapsed < best {
                    best = elapsed;
                }
            }
            iostat.insert(&kernel.name, best);
        }
        Ok(iostat)
    }
}

/// IO then kernel measurement, reporting the reduced store.
pub struct PipelineProfiler {
    io: IOProfiler,
    kernel: KernelProfiler,
}

impl PipelineProfiler {
    pub fn new(
        options: ProfileOptions,
        compiler: Arc<dyn Compiler>,
        runtime: Arc<dyn Runtime>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        PipelineProfiler {
            io: IOProfiler::new(options.clone(), compiler, runtime),
            kernel: KernelProfiler::new(options, spawner),
        }
    }

    pub fn run(&self, text: &str) -> Result<KStat, ProfileError> {
        let iostat = self.io.run(text)?;
        let kstat = self.kernel.run(text)?;
        Ok(kstat.reduce(&iostat))
    }
}
