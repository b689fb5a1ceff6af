//! Benchmark module synthesis.
//!
//! The driver slices the input module into one sub-module per executable
//! (module attributes, the referenced global if any, the executable).
//! Workers expand a sub-module into one benchmark text per legal layout
//! combination, each carrying a synthesized public entry
//! `invoke_<kernel>$async` that imports the inputs, dispatches the kernel,
//! and exports the results as buffer views.

use crate::ir::{
    DispatchOp, EntryPoint, Executable, Func, FuncArg, Global, Item, Module, Op, OpKind,
    TensorType, TypeExpr,
};
use crate::layout::{layouts_signature, permute_shape, Layout};
use crate::profiler::ProfileError;

/// One expanded benchmark candidate.
pub struct ExpandedBench {
    pub kernel: String,
    pub layouts: Vec<Layout>,
    pub text: String,
}

/// Signature of a parsed benchmark module, as needed by the bench path.
pub struct BenchModule {
    pub kernel: String,
    pub layouts: Vec<Layout>,
    pub inputs: Vec<TensorType>,
    pub entry: String,
}

/// Slice the input module into per-executable sub-modules.
pub fn build_sub_modules(module: &Module) -> Vec<String> {
    module
        .executables()
        .map(|executable| {
            let mut items = Vec::new();
            if let Some(global) = referenced_global(module, executable) {
                items.push(Item::Global(global.clone()));
            }
            items.push(Item::Executable(executable.clone()));
            Module {
                name: module.name.clone(),
                attrs: module.attrs.clone(),
                items,
            }
            .to_string()
        })
        .collect()
}

/// The single global the kernel body references, if any.
fn referenced_global<'a>(module: &'a Module, executable: &Executable) -> Option<&'a Global> {
    module.globals().find(|global| {
        let symbol = format!("@{}", global.name);
        executable
            .kernel
            .body
            .iter()
            .any(|line| line.contains(&symbol))
    })
}

/// Expand a create-job sub-module into one benchmark text per layout
/// combination of the kernel's inputs and results.
pub fn expand_bench_modules(text: &str) -> Result<Vec<ExpandedBench>, ProfileError> {
    let module = Module::parse(text)?;
    let executable = module
        .executables()
        .next()
        .ok_or_else(|| ProfileError::Malformed {
            message: "sub-module has no executable".to_string(),
        })?
        .clone();
    let kernel_name = executable.kernel.name.clone();
    let invoke = build_invoke_func(&executable);

    let (inputs, results) = executable.kernel.signature();
    let per_arg: Vec<Vec<Layout>> = inputs
        .iter()
        .chain(results.iter())
        .map(|tensor| permute_shape(&tensor.dims).collect())
        .collect();

    let mut expanded = Vec::new();
    for combination in cartesian(&per_arg) {
        let mut bench = Module {
            name: module.name.clone(),
            attrs: module.attrs.clone(),
            items: module.items.clone(),
        };
        for item in &mut bench.items {
            if let Item::Executable(executable) = item {
                executable.kernel.layout_attrs = combination
                    .iter()
                    .cloned()
                    .enumerate()
                    .collect();
            }
        }
        bench.items.push(Item::Func(invoke.clone()));
        expanded.push(ExpandedBench {
            kernel: kernel_name.clone(),
            layouts: combination,
            text: bench.to_string(),
        });
    }
    Ok(expanded)
}

/// Extract what the bench path needs from a benchmark module's text.
pub fn parse_bench_module(text: &str) -> Result<BenchModule, ProfileError> {
    let module = Module::parse(text)?;
    let executable = module
        .executables()
        .next()
        .ok_or_else(|| ProfileError::Malformed {
            message: "benchmark module has no executable".to_string(),
        })?;
    let entry = module
        .funcs()
        .find(|func| func.name.ends_with("$async"))
        .ok_or_else(|| ProfileError::Malformed {
            message: "benchmark module has no `$async` entry".to_string(),
        })?;
    let (inputs, _) = executable.kernel.signature();
    Ok(BenchModule {
        kernel: executable.kernel.name.clone(),
        layouts: executable.kernel.layouts(),
        inputs: inputs.into_iter().cloned().collect(),
        entry: entry.name.clone(),
    })
}

/// Build the buffer-movement benchmark for one executable: the same
/// synthesized entry, with the kernel body emptied to a bare `return` so
/// only import/dispatch/export plumbing remains.
pub fn build_io_module(module: &Module, executable: &Executable) -> String {
    let mut hollow = executable.clone();
    hollow.kernel.body = vec!["return".to_string()];
    hollow.kernel.layout_attrs.clear();
    let invoke = build_invoke_func(&hollow);
    let mut items = Vec::new();
    if let Some(global) = referenced_global(module, executable) {
        items.push(Item::Global(global.clone()));
    }
    items.push(Item::Executable(hollow));
    items.push(Item::Func(invoke));
    Module {
        name: module.name.clone(),
        attrs: module.attrs.clone(),
        items,
    }
    .to_string()
}

/// The standalone entry: import every input, dispatch, export every result.
fn build_invoke_func(executable: &Executable) -> Func {
    let (inputs, results) = executable.kernel.signature();
    let mut ops = Vec::new();
    let mut value = 0usize;

    let mut imported = Vec::new();
    for (index, tensor) in inputs.iter().enumerate() {
        let result = format!("%{value}");
        value += 1;
        ops.push(Op {
            results: vec![result.clone()],
            kind: OpKind::Import {
                source: format!("%arg{index}"),
                source_ty: TypeExpr::BufferView,
                result_ty: (*tensor).clone(),
            },
        });
        imported.push(result);
    }

    let dispatched: Vec<String> = results
        .iter()
        .map(|_| {
            let result = format!("%{value}");
            value += 1;
            result
        })
        .collect();
    ops.push(Op {
        results: dispatched.clone(),
        kind: OpKind::Dispatch(DispatchOp {
            entry: EntryPoint {
                module: executable.name.clone(),
                func: executable.kernel.name.clone(),
            },
            args: imported,
            arg_types: inputs
                .iter()
                .map(|t| TypeExpr::Tensor((*t).clone()))
                .collect(),
            result_types: results
                .iter()
                .map(|t| TypeExpr::Tensor((*t).clone()))
                .collect(),
            attrs: None,
            tied: vec![None; results.len()],
        }),
    });

    let mut returned = Vec::new();
    for (result, tensor) in dispatched.iter().zip(&results) {
        let exported = format!("%{value}");
        value += 1;
        ops.push(Op {
            results: vec![exported.clone()],
            kind: OpKind::Export {
                source: result.clone(),
                source_ty: (*tensor).clone(),
                result_ty: TypeExpr::BufferView,
            },
        });
        returned.push(exported);
    }
    let return_types = vec![TypeExpr::BufferView; returned.len()];
    ops.push(Op {
        results: Vec::new(),
        kind: OpKind::Return {
            values: returned,
            types: return_types.clone(),
        },
    });

    Func {
        name: format!("invoke_{}$async", executable.kernel.name),
        visibility: "public".to_string(),
        args: (0..inputs.len())
            .map(|index| FuncArg {
                name: format!("%arg{index}"),
                ty: TypeExpr::BufferView,
            })
            .collect(),
        results: return_types,
        ops,
    }
}

/// Cartesian product across per-arg layout choices.
fn cartesian(per_arg: &[Vec<Layout>]) -> Vec<Vec<Layout>> {
    let mut combinations: Vec<Vec<Layout>> = vec![Vec::new()];
    for choices in per_arg {
        let mut grown = Vec::with_capacity(combinations.len() * choices.len());
        for combination in &combinations {
            for choice in choices {
                let mut next = combination.clone();
                next.push(choice.clone());
                grown.push(next);
            }
        }
        combinations = grown;
    }
    combinations
}

/// Cache file name for one expanded benchmark.
pub fn cache_file_name(kernel: &str, layouts: &[Layout]) -> String {
    format!("{kernel}_{}.mlir", layouts_signature(layouts))
}
