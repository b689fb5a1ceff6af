//! Seams to the external compiler and bytecode runtime.
//!
//! Only the interfaces matter here: the profiler drives a [`Compiler`] and a
//! [`Runtime`] without knowing what sits behind them. The shipped
//! implementations shell out to external tools — which is also where the
//! non-reentrant compiler actually lives, one process per job — while tests
//! inject in-memory mocks.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::ir::ElemType;

/// Compilation failures. `Tool` marks a rejection of one particular
/// (kernel, layouts) module and is dropped by the worker; everything else
/// is surfaced to the driver.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The compiler tool rejected this module
    #[error("compiler tool failure: {0}")]
    Tool(String),

    /// The compiler could not be launched or spoken to
    #[error("compiler I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime failures; always surfaced.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to load module: {0}")]
    Load(String),

    #[error("invocation failed: {0}")]
    Invoke(String),

    #[error("runtime I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Options handed to the underlying compiler, deserializable from the CLI's
/// JSON object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Compiler executable; defaults to `iree-compile` on `PATH`.
    pub tool: Option<PathBuf>,
    /// Module-runner executable; defaults to `iree-run-module` on `PATH`.
    pub runner: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl CompileOptions {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The options actually used for benchmark compiles: `--compile-from=flow`
    /// plus the driver's device flag, each only if not already present.
    pub fn augmented(&self, driver: &str) -> CompileOptions {
        let mut options = self.clone();
        if !options
            .extra_args
            .iter()
            .any(|arg| arg.starts_with("--compile-from="))
        {
            options.extra_args.push("--compile-from=flow".to_string());
        }
        if !options
            .extra_args
            .iter()
            .any(|arg| arg.starts_with("--device="))
        {
            options.extra_args.push(format!("--device={driver}"));
        }
        options
    }
}

/// A tensor buffer handed to an invocation.
#[derive(Clone, Debug)]
pub struct TensorData {
    pub shape: Vec<u64>,
    pub elem: ElemType,
    pub bytes: Vec<u8>,
}

impl TensorData {
    /// Random contents of the declared shape and dtype.
    pub fn random(shape: &[u64], elem: ElemType) -> TensorData {
        let elems: u64 = shape.iter().product();
        let len = if elem.is_bit_packed() {
            (elems as usize + 7) / 8
        } else {
            elems as usize * elem.byte_width()
        };
        let mut bytes = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut bytes);
        TensorData {
            shape: shape.to_vec(),
            elem,
            bytes,
        }
    }

    /// `2x3xf32`-style descriptor used on runner command lines.
    pub fn descriptor(&self) -> String {
        let mut text = String::new();
        for dim in &self.shape {
            text.push_str(&dim.to_string());
            text.push('x');
        }
        text.push_str(&self.elem.to_string());
        text
    }
}

/// The underlying compiler.
pub trait Compiler: Send + Sync {
    fn compile(&self, module: &str, options: &CompileOptions) -> Result<Vec<u8>, CompileError>;
}

/// A loaded module ready to invoke. `invoke` returns the elapsed
/// nanoseconds of one entry invocation, timed with a device event on
/// GPU-like drivers and the monotonic clock otherwise.
pub trait Invocation: Send {
    fn invoke(&mut self, entry: &str, inputs: &[TensorData]) -> Result<u64, RuntimeError>;
}

/// The bytecode runtime behind a driver.
pub trait Runtime: Send + Sync {
    fn load(&self, driver: &str, binary: &[u8]) -> Result<Box<dyn Invocation>, RuntimeError>;
}

// ---------------------------------------------------------------------------
// Tool-backed implementations
// ---------------------------------------------------------------------------

/// Compiles by spawning the external compiler, module text on stdin,
/// flatbuffer on stdout. A nonzero exit is a `Tool` rejection.
pub struct ToolCompiler;

impl Compiler for ToolCompiler {
    fn compile(&self, module: &str, options: &CompileOptions) -> Result<Vec<u8>, CompileError> {
        let binary = options
            .tool
            .clone()
            .unwrap_or_else(|| PathBuf::from("iree-compile"));
        let mut child = Command::new(&binary)
            .args(&options.extra_args)
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(module.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CompileError::Tool(
                stderr.lines().next().unwrap_or("unknown failure").to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

static MODULE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Runs entries through an external module-runner executable. The runner is
/// expected to print the elapsed nanoseconds as the last line of stdout.
pub struct ToolRuntime {
    pub runner: PathBuf,
}

impl Runtime for ToolRuntime {
    fn load(&self, driver: &str, binary: &[u8]) -> Result<Box<dyn Invocation>, RuntimeError> {
        let path = std::env::temp_dir().join(format!(
            "fluidml-{}-{}.vmfb",
            std::process::id(),
            MODULE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, binary)?;
        Ok(Box::new(ToolInvocation {
            runner: self.runner.clone(),
            driver: driver.to_string(),
            module: path,
        }))
    }
}

struct ToolInvocation {
    runner: PathBuf,
    driver: String,
    module: PathBuf,
}

impl Invocation for ToolInvocation {
    fn invoke(&mut self, entry: &str, inputs: &[TensorData]) -> Result<u64, RuntimeError> {
        let mut command = Command::new(&self.runner);
        command
            .arg(format!("--device={}", self.driver))
            .arg(format!("--function={entry}"))
            .arg(format!("--module={}", self.module.display()));
        for input in inputs {
            command.arg(format!("--input={}", input.descriptor()));
        }
        let output = command.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::Invoke(
                stderr.lines().next().unwrap_or("unknown failure").to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let last = stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .next_back()
            .ok_or_else(|| RuntimeError::Invoke("runner reported no timing".to_string()))?;
        last.trim()
            .parse()
            .map_err(|_| RuntimeError::Invoke(format!("unparseable timing `{last}`")))
    }
}

impl Drop for ToolInvocation {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.module);
    }
}

/// A runtime that executes nothing and reports zero time.
pub struct StubRuntime;

impl Runtime for StubRuntime {
    fn load(&self, _driver: &str, _binary: &[u8]) -> Result<Box<dyn Invocation>, RuntimeError> {
        Ok(Box::new(StubInvocation))
    }
}

struct StubInvocation;

impl Invocation for StubInvocation {
    fn invoke(&mut self, _entry: &str, _inputs: &[TensorData]) -> Result<u64, RuntimeError> {
        Ok(0)
    }
}
