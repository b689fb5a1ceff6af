//! Worker-process side of the profiler.
//!
//! Each worker is its own OS process owning its own compiler and runtime
//! instances; nothing structural ever crosses the process boundary, only
//! the plain-value protocol messages. [`worker_main`] is the process entry
//! (reached through the hidden `profile-worker` subcommand): it reads its
//! config line, pins itself to a CPU, and serves jobs over stdio until the
//! driver shuts it down.
//!
//! Compilation is announced as the blue phase and measurement as the red
//! phase before starting; the worker blocks on the driver's grant, so the
//! two never overlap across the pool. A worker that fails sends `Failed`
//! and exits; a compiler-tool rejection of one layout combination is
//! logged and dropped instead.

use std::io::{BufRead as _, BufReader, Write as _};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::profiler::bench::{self, BenchModule};
use crate::profiler::protocol::{Phase, WorkerConfig, WorkerReply, WorkerRequest};
use crate::profiler::runtime::{
    CompileError, Compiler, Runtime, StubRuntime, TensorData, ToolCompiler, ToolRuntime,
};
use crate::profiler::ProfileError;

/// Everything a worker owns: its settings plus its private compiler and
/// runtime instances.
pub struct WorkerState {
    pub config: WorkerConfig,
    pub compiler: Arc<dyn Compiler>,
    pub runtime: Arc<dyn Runtime>,
}

/// The transport a worker talks through. The real worker speaks stdio;
/// tests drive [`serve`] over in-memory channels.
pub trait WorkerIo {
    fn send(&mut self, reply: WorkerReply) -> std::io::Result<()>;
    fn recv(&mut self) -> std::io::Result<WorkerRequest>;
}

/// Serve jobs until shutdown or the driver disappears. Fatal errors are
/// reported with a `Failed` reply before returning them.
pub fn serve(state: &WorkerState, io: &mut dyn WorkerIo) -> Result<(), ProfileError> {
    loop {
        let request = match io.recv() {
            Ok(request) => request,
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(error) => return Err(error.into()),
        };
        let outcome = match request {
            WorkerRequest::Create { module } => handle_create(state, io, &module),
            WorkerRequest::Bench { module } => handle_bench(state, io, &module),
            WorkerRequest::Shutdown => return Ok(()),
            WorkerRequest::Grant => Err(ProfileError::Protocol {
                message: "grant with no pending acquire".to_string(),
            }),
        };
        match outcome {
            Ok(()) => io.send(WorkerReply::Done)?,
            Err(error) => {
                let _ = io.send(WorkerReply::Failed {
                    message: error.to_string(),
                });
                return Err(error);
            }
        }
    }
}

fn handle_create(
    state: &WorkerState,
    io: &mut dyn WorkerIo,
    text: &str,
) -> Result<(), ProfileError> {
    for expanded in bench::expand_bench_modules(text)? {
        if let Some(cache) = &state.config.profile_cache {
            let path = cache.join(bench::cache_file_name(&expanded.kernel, &expanded.layouts));
            std::fs::write(path, &expanded.text)?;
        }
        io.send(WorkerReply::Expanded {
            kernel: expanded.kernel,
            layouts: expanded.layouts,
            module: expanded.text,
        })?;
    }
    Ok(())
}

fn handle_bench(
    state: &WorkerState,
    io: &mut dyn WorkerIo,
    text: &str,
) -> Result<(), ProfileError> {
    let module = bench::parse_bench_module(text)?;
    if state.config.debug {
        io.send(WorkerReply::Measured {
            kernel: module.kernel,
            layouts: module.layouts,
            time_ns: 0.0,
        })?;
        return Ok(());
    }

    io.send(WorkerReply::Acquire { phase: Phase::Blue })?;
    await_grant(io)?;
    let compiled = state.compiler.compile(text, &state.config.options);
    io.send(WorkerReply::Release { phase: Phase::Blue })?;
    let binary = match compiled {
        Ok(binary) => binary,
        Err(CompileError::Tool(message)) => {
            log_drop(state, &module, &message);
            return Ok(());
        }
        Err(other) => return Err(ProfileError::Compile(other)),
    };

    let mut invocation = state.runtime.load(&state.config.driver, &binary)?;
    let inputs: Vec<TensorData> = module
        .inputs
        .iter()
        .map(|tensor| TensorData::random(&tensor.dims, tensor.elem))
        .collect();
    for _ in 0..state.config.times / 10 {
        invocation.invoke(&module.entry, &inputs)?;
    }

    io.send(WorkerReply::Acquire { phase: Phase::Red })?;
    await_grant(io)?;
    let mut best = f64::INFINITY;
    let mut failure = None;
    for _ in 0..state.config.times {
        match invocation.invoke(&module.entry, &inputs) {
            Ok(elapsed) => {
                let elapsed = elapsed as f64;
                if elapsed < best {
                    best = elapsed;
                }
            }
            Err(error) => {
                failure = Some(error);
                break;
            }
        }
    }
    io.send(WorkerReply::Release { phase: Phase::Red })?;
    if let Some(error) = failure {
        return Err(error.into());
    }
    io.send(WorkerReply::Measured {
        kernel: module.kernel,
        layouts: module.layouts,
        time_ns: best,
    })?;
    Ok(())
}

fn await_grant(io: &mut dyn WorkerIo) -> Result<(), ProfileError> {
    match io.recv()? {
        WorkerRequest::Grant => Ok(()),
        other => Err(ProfileError::Protocol {
            message: format!("expected grant, got {other:?}"),
        }),
    }
}

fn log_drop(state: &WorkerState, module: &BenchModule, message: &str) {
    warn!(
        kernel = %module.kernel,
        layouts = %crate::layout::format_layouts(&module.layouts),
        message,
        "dropping layout combination rejected by the compiler"
    );
    if let Some(cache) = &state.config.profile_cache {
        append_drop_line(cache, state.config.index, module, message);
    }
}

fn append_drop_line(cache: &Path, index: usize, module: &BenchModule, message: &str) {
    let path = cache.join(format!("worker-{index}.log"));
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        let _ = writeln!(
            file,
            "drop {} {} : {message}",
            module.kernel,
            crate::layout::format_layouts(&module.layouts),
        );
    }
}

/// Process entry for a spawned worker: config line on stdin, then the
/// request/reply loop over stdio. Owns a fresh tool compiler and runtime,
/// private to this process.
pub fn worker_main() -> Result<(), ProfileError> {
    let mut input = BufReader::new(std::io::stdin());
    let mut line = String::new();
    input.read_line(&mut line)?;
    let config: WorkerConfig =
        serde_json::from_str(line.trim()).map_err(|error| ProfileError::Protocol {
            message: format!("bad worker config: {error}"),
        })?;
    pin_to_cpu(config.index);

    let compiler: Arc<dyn Compiler> = Arc::new(ToolCompiler);
    let runtime: Arc<dyn Runtime> = if config.debug {
        Arc::new(StubRuntime)
    } else {
        let runner = config
            .options
            .runner
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("iree-run-module"));
        Arc::new(ToolRuntime { runner })
    };
    let state = WorkerState {
        config,
        compiler,
        runtime,
    };
    let mut io = StdioWorkerIo {
        input,
        output: std::io::stdout(),
    };
    serve(&state, &mut io)
}

struct StdioWorkerIo {
    input: BufReader<std::io::Stdin>,
    output: std::io::Stdout,
}

impl WorkerIo for StdioWorkerIo {
    fn send(&mut self, reply: WorkerReply) -> std::io::Result<()> {
        let line = serde_json::to_string(&reply)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        writeln!(self.output, "{line}")?;
        self.output.flush()
    }

    fn recv(&mut self) -> std::io::Result<WorkerRequest> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "driver closed the channel",
            ));
        }
        serde_json::from_str(line.trim())
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
    }
}

/// Pin the worker to CPU `index mod cpu_count` to reduce measurement
/// variance. No-op on platforms without an affinity syscall.
#[cfg(target_os = "linux")]
fn pin_to_cpu(index: usize) {
    let cpu = index % num_cpus::get();
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_index: usize) {}
