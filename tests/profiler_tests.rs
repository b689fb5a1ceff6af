//! Profiler end-to-end runs over the worker protocol (in-process links
//! around mock compiler/runtime seams): full layout-product coverage,
//! per-combination failure isolation, minimum-of-samples reporting, debug
//! short-circuiting, worker error surfacing, and profile-cache emission.

mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::MockSpawner;
use fluidml::ir::Module;
use fluidml::profiler::{
    CompileError, CompileOptions, Compiler, IOProfiler, Invocation, KernelProfiler,
    PipelineProfiler, ProfileError, ProfileOptions, Runtime, RuntimeError, StubRuntime,
    TensorData, WorkerSpawner,
};
use fluidml::Layout;

const INPUT: &str = r#"module {
  flow.executable private @ex {
    flow.executable.export public @relu
    builtin.module {
      func.func @relu(%arg0: !flow.dispatch.tensor<readonly:tensor<2x3xf32>>, %arg1: !flow.dispatch.tensor<writeonly:tensor<2x3xf32>>) {
        return
      }
    }
  }
  util.func public @main$async(%arg0: !hal.buffer_view) -> !hal.buffer_view {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<2x3xf32>
    %1 = flow.dispatch @ex::@relu(%0) : (tensor<2x3xf32>) -> tensor<2x3xf32>
    %2 = hal.tensor.export %1 : tensor<2x3xf32> -> !hal.buffer_view
    util.return %2 : !hal.buffer_view
  }
}
"#;

fn l(dims: &[usize]) -> Layout {
    Layout(dims.to_vec())
}

fn options(times: usize, workers: usize, debug: bool) -> ProfileOptions {
    ProfileOptions {
        times,
        worker_num: workers,
        check_period: 0.05,
        driver: "local-task".to_string(),
        profile_cache: None,
        compile_options: CompileOptions::default(),
        debug,
    }
}

fn spawner(compiler: Arc<dyn Compiler>, runtime: Arc<dyn Runtime>) -> Arc<dyn WorkerSpawner> {
    Arc::new(MockSpawner { compiler, runtime })
}

/// Counts compiles and optionally rejects one layout combination the way
/// the compiler tool would.
struct MockCompiler {
    calls: AtomicUsize,
    reject: Option<Vec<Layout>>,
}

impl MockCompiler {
    fn new(reject: Option<Vec<Layout>>) -> Self {
        MockCompiler {
            calls: AtomicUsize::new(0),
            reject,
        }
    }
}

impl Compiler for MockCompiler {
    fn compile(&self, module: &str, _options: &CompileOptions) -> Result<Vec<u8>, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reject) = &self.reject {
            let parsed = Module::parse(module).map_err(|e| CompileError::Tool(e.to_string()))?;
            let layouts = parsed
                .executables()
                .next()
                .map(|e| e.kernel.layouts())
                .unwrap_or_default();
            if layouts == *reject {
                return Err(CompileError::Tool("unsupported layout".to_string()));
            }
        }
        Ok(Vec::new())
    }
}

/// Reports a fixed cycle of sample times; the minimum must win.
struct CyclingRuntime {
    samples: Vec<u64>,
}

impl Runtime for CyclingRuntime {
    fn load(&self, _driver: &str, _binary: &[u8]) -> Result<Box<dyn Invocation>, RuntimeError> {
        Ok(Box::new(CyclingInvocation {
            samples: self.samples.clone(),
            at: 0,
        }))
    }
}

struct CyclingInvocation {
    samples: Vec<u64>,
    at: usize,
}

impl Invocation for CyclingInvocation {
    fn invoke(&mut self, _entry: &str, _inputs: &[TensorData]) -> Result<u64, RuntimeError> {
        let sample = self.samples[self.at % self.samples.len()];
        self.at += 1;
        Ok(sample)
    }
}

/// Fails every invocation; a worker hitting it must surface the error.
struct FailingRuntime;

impl Runtime for FailingRuntime {
    fn load(&self, _driver: &str, _binary: &[u8]) -> Result<Box<dyn Invocation>, RuntimeError> {
        Ok(Box::new(FailingInvocation))
    }
}

struct FailingInvocation;

impl Invocation for FailingInvocation {
    fn invoke(&mut self, _entry: &str, _inputs: &[TensorData]) -> Result<u64, RuntimeError> {
        Err(RuntimeError::Invoke("device lost".to_string()))
    }
}

#[test]
fn covers_the_full_layout_product() {
    let profiler = KernelProfiler::new(
        options(30, 2, false),
        spawner(
            Arc::new(MockCompiler::new(None)),
            Arc::new(CyclingRuntime {
                samples: vec![30, 10, 20],
            }),
        ),
    );
    let kstat = profiler.run(INPUT).unwrap();
    let table = kstat.kernel("relu").unwrap();
    assert_eq!(table.len(), 4);
    for layouts in [
        vec![l(&[0, 1]), l(&[0, 1])],
        vec![l(&[0, 1]), l(&[1, 0])],
        vec![l(&[1, 0]), l(&[0, 1])],
        vec![l(&[1, 0]), l(&[1, 0])],
    ] {
        // minimum of the cycling samples
        assert_eq!(table.get(&layouts), Some(&10.0));
    }
}

#[test]
fn compile_rejections_are_isolated() {
    // One of four combinations fails compilation: exactly three cells
    // remain and the run still succeeds.
    let rejected = vec![l(&[1, 0]), l(&[0, 1])];
    let profiler = KernelProfiler::new(
        options(10, 3, false),
        spawner(
            Arc::new(MockCompiler::new(Some(rejected.clone()))),
            Arc::new(CyclingRuntime { samples: vec![5] }),
        ),
    );
    let kstat = profiler.run(INPUT).unwrap();
    let table = kstat.kernel("relu").unwrap();
    assert_eq!(table.len(), 3);
    assert!(!table.contains_key(&rejected));
}

#[test]
fn debug_mode_skips_compilation_and_measurement() {
    let compiler = Arc::new(MockCompiler::new(None));
    let profiler = KernelProfiler::new(
        options(50, 2, true),
        spawner(Arc::clone(&compiler) as Arc<dyn Compiler>, Arc::new(FailingRuntime)),
    );
    let kstat = profiler.run(INPUT).unwrap();
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    let table = kstat.kernel("relu").unwrap();
    assert_eq!(table.len(), 4);
    assert!(table.values().all(|&time| time == 0.0));
}

#[test]
fn runtime_failures_surface_to_the_driver() {
    let profiler = KernelProfiler::new(
        options(10, 2, false),
        spawner(Arc::new(MockCompiler::new(None)), Arc::new(FailingRuntime)),
    );
    match profiler.run(INPUT) {
        Err(ProfileError::Worker { message }) => {
            assert!(message.contains("device lost"), "message was {message}");
        }
        other => panic!("expected a worker failure, got {other:?}"),
    }
}

#[test]
fn profile_cache_receives_benchmark_modules() {
    let cache = tempfile::tempdir().unwrap();
    let mut opts = options(10, 2, false);
    opts.profile_cache = Some(cache.path().to_path_buf());
    let profiler = KernelProfiler::new(
        opts,
        spawner(
            Arc::new(MockCompiler::new(None)),
            Arc::new(CyclingRuntime { samples: vec![5] }),
        ),
    );
    profiler.run(INPUT).unwrap();
    let mut emitted: Vec<PathBuf> = std::fs::read_dir(cache.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "mlir"))
        .collect();
    emitted.sort();
    assert_eq!(emitted.len(), 4);
    assert!(emitted
        .iter()
        .any(|path| path.file_name().is_some_and(|n| n == "relu_0x1_1x0.mlir")));
}

#[test]
fn io_profiler_measures_each_kernel_once() {
    let compiler = Arc::new(MockCompiler::new(None));
    let profiler = IOProfiler::new(
        options(10, 1, false),
        Arc::clone(&compiler) as Arc<dyn Compiler>,
        Arc::new(CyclingRuntime {
            samples: vec![9, 7, 8],
        }),
    );
    let iostat = profiler.run(INPUT).unwrap();
    assert_eq!(iostat.get("relu"), Some(7.0));
    assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn pipeline_subtracts_io_cost() {
    let compiler: Arc<dyn Compiler> = Arc::new(MockCompiler::new(None));
    let runtime: Arc<dyn Runtime> = Arc::new(CyclingRuntime { samples: vec![10] });
    let profiler = PipelineProfiler::new(
        options(10, 2, false),
        Arc::clone(&compiler),
        Arc::clone(&runtime),
        spawner(Arc::clone(&compiler), Arc::clone(&runtime)),
    );
    let kstat = profiler.run(INPUT).unwrap();
    // kernel samples and io samples are both 10, so every cell reduces to 0
    let table = kstat.kernel("relu").unwrap();
    assert_eq!(table.len(), 4);
    assert!(table.values().all(|&time| time == 0.0));
}

#[test]
fn stub_runtime_reports_zero() {
    let profiler = KernelProfiler::new(
        options(10, 1, false),
        spawner(Arc::new(MockCompiler::new(None)), Arc::new(StubRuntime)),
    );
    let kstat = profiler.run(INPUT).unwrap();
    assert!(kstat
        .kernel("relu")
        .unwrap()
        .values()
        .all(|&time| time == 0.0));
}
