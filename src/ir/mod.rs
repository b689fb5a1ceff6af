//! Flow-level IR model.
//!
//! Parses the enumerated-op subset of the flow dialect into a plain data
//! model, and prints it back to text. Kernel bodies are opaque: the crate
//! clones and renames their containers but never interprets their contents.
//!
//! The model is deliberately value-based (no interning, no context): a
//! [`Module`] owns its items, ops own their operand/result value names, and
//! analyses index into it rather than holding pointers.

pub mod parser;
pub mod printer;
pub mod types;

pub use parser::parse_module;
pub use types::{Access, DispatchTensorType, ElemType, TensorType, TypeExpr};

use std::collections::BTreeMap;

use crate::layout::Layout;

/// IR parse failures. `UnsupportedOp` is the fatal "op outside the
/// enumerated set" case and carries the offending signature.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Op not in the supported set
    #[error("unsupported op: `{line}`")]
    UnsupportedOp { line: String },

    /// Structural syntax error
    #[error("syntax error at line {line_no}: {message}")]
    Syntax { line_no: usize, message: String },

    /// Malformed type expression
    #[error("malformed type `{text}`")]
    Type { text: String },
}

/// Entry-function selection failures (shared by analyzer and generator).
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("expected 1 or 2 candidate entry functions, found {0}")]
    Ambiguous(usize),

    #[error("two candidate entry functions and neither ends in `$async`")]
    NoAsyncCandidate,
}

/// A parsed module: globals, executables, entry functions.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub name: Option<String>,
    /// Raw module attribute dict contents, preserved verbatim.
    pub attrs: Option<String>,
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Global(Global),
    Executable(Executable),
    Func(Func),
}

/// `util.global`, optionally with a byte initial value.
#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    pub name: String,
    pub visibility: String,
    pub mutable: bool,
    pub ty: TensorType,
    pub init: Option<GlobalInit>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GlobalInit {
    /// `dense<"0x...">` byte form; rewritable by the generator.
    Bytes(Vec<u8>),
    /// Any other initializer (splat forms), layout-invariant, kept verbatim.
    Raw(String),
}

/// `flow.executable` wrapping a single kernel function plus its export.
#[derive(Clone, Debug, PartialEq)]
pub struct Executable {
    pub name: String,
    pub visibility: String,
    /// Export symbol; renamed in lockstep with the kernel.
    pub export_name: String,
    pub kernel: Kernel,
}

/// The inner `func.func` kernel. The body is opaque text.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    pub name: String,
    pub args: Vec<KernelArg>,
    /// `fluidml.<i> = array<i64: ...>` layout annotations, by arg index.
    pub layout_attrs: BTreeMap<usize, Layout>,
    /// Any other kernel attributes, preserved verbatim.
    pub other_attrs: Vec<String>,
    pub body: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KernelArg {
    pub name: String,
    pub ty: DispatchTensorType,
}

impl Kernel {
    /// `(inputs, results)` from the argument access modes:
    /// readonly/readwrite args are inputs, writeonly args are results.
    pub fn signature(&self) -> (Vec<&TensorType>, Vec<&TensorType>) {
        let mut inputs = Vec::new();
        let mut results = Vec::new();
        for arg in &self.args {
            match arg.ty.access {
                Access::ReadOnly | Access::ReadWrite => inputs.push(&arg.ty.tensor),
                Access::WriteOnly => results.push(&arg.ty.tensor),
            }
        }
        (inputs, results)
    }

    /// The annotated per-arg layout tuple, in arg-index order.
    pub fn layouts(&self) -> Vec<Layout> {
        self.layout_attrs.values().cloned().collect()
    }
}

/// `util.func` entry function.
#[derive(Clone, Debug, PartialEq)]
pub struct Func {
    pub name: String,
    pub visibility: String,
    pub args: Vec<FuncArg>,
    pub results: Vec<TypeExpr>,
    pub ops: Vec<Op>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncArg {
    pub name: String,
    pub ty: TypeExpr,
}

/// One op in an entry function: result names plus kind-specific payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    pub results: Vec<String>,
    pub kind: OpKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    Dispatch(DispatchOp),
    Reshape {
        source: String,
        source_ty: TensorType,
        result_ty: TensorType,
    },
    Update {
        update: String,
        update_ty: TensorType,
        target: String,
        target_ty: TensorType,
    },
    Barrier {
        source: String,
        ty: TensorType,
    },
    Import {
        source: String,
        source_ty: TypeExpr,
        result_ty: TensorType,
    },
    Export {
        source: String,
        source_ty: TensorType,
        result_ty: TypeExpr,
    },
    Splat {
        value: String,
        result_ty: TensorType,
    },
    Empty {
        result_ty: TensorType,
    },
    GlobalLoad {
        global: String,
        result_ty: TensorType,
    },
    Constant {
        value: String,
        result_ty: TypeExpr,
    },
    Return {
        values: Vec<String>,
        types: Vec<TypeExpr>,
    },
}

/// `flow.dispatch` payload.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOp {
    pub entry: EntryPoint,
    pub args: Vec<String>,
    pub arg_types: Vec<TypeExpr>,
    pub result_types: Vec<TypeExpr>,
    /// Raw attribute dict contents, preserved verbatim.
    pub attrs: Option<String>,
    /// Per-result operand alias, parsed from a `tied_operands` attribute.
    pub tied: Vec<Option<usize>>,
}

/// `@module::@func` symbol pair referenced by a dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntryPoint {
    pub module: String,
    pub func: String,
}

impl Op {
    /// Operand value names with their types where the syntax declares one.
    pub fn operand_info(&self) -> Vec<(&str, Option<TypeExpr>)> {
        match &self.kind {
            OpKind::Dispatch(d) => d
                .args
                .iter()
                .zip(&d.arg_types)
                .map(|(v, t)| (v.as_str(), Some(t.clone())))
                .collect(),
            OpKind::Reshape {
                source, source_ty, ..
            } => vec![(source.as_str(), Some(TypeExpr::Tensor(source_ty.clone())))],
            OpKind::Update {
                update,
                update_ty,
                target,
                target_ty,
            } => vec![
                (update.as_str(), Some(TypeExpr::Tensor(update_ty.clone()))),
                (target.as_str(), Some(TypeExpr::Tensor(target_ty.clone()))),
            ],
            OpKind::Barrier { source, ty } => {
                vec![(source.as_str(), Some(TypeExpr::Tensor(ty.clone())))]
            }
            OpKind::Import {
                source, source_ty, ..
            } => vec![(source.as_str(), Some(source_ty.clone()))],
            OpKind::Export {
                source, source_ty, ..
            } => vec![(source.as_str(), Some(TypeExpr::Tensor(source_ty.clone())))],
            OpKind::Splat { value, .. } => vec![(value.as_str(), None)],
            OpKind::Empty { .. } | OpKind::GlobalLoad { .. } | OpKind::Constant { .. } => vec![],
            OpKind::Return { values, types } => values
                .iter()
                .zip(types)
                .map(|(v, t)| (v.as_str(), Some(t.clone())))
                .collect(),
        }
    }

    /// Result value names paired with their declared types.
    pub fn result_info(&self) -> Vec<(&str, TypeExpr)> {
        let types: Vec<TypeExpr> = match &self.kind {
            OpKind::Dispatch(d) => d.result_types.clone(),
            OpKind::Reshape { result_ty, .. }
            | OpKind::Import { result_ty, .. }
            | OpKind::Splat { result_ty, .. }
            | OpKind::Empty { result_ty }
            | OpKind::GlobalLoad { result_ty, .. } => {
                vec![TypeExpr::Tensor(result_ty.clone())]
            }
            OpKind::Update { target_ty, .. } => vec![TypeExpr::Tensor(target_ty.clone())],
            OpKind::Barrier { ty, .. } => vec![TypeExpr::Tensor(ty.clone())],
            OpKind::Export { result_ty, .. } => vec![result_ty.clone()],
            OpKind::Constant { result_ty, .. } => vec![result_ty.clone()],
            OpKind::Return { .. } => vec![],
        };
        self.results
            .iter()
            .map(String::as_str)
            .zip(types)
            .collect()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, OpKind::Constant { .. })
    }
}

impl Module {
    pub fn parse(text: &str) -> Result<Module, ParseError> {
        parser::parse_module(text)
    }

    pub fn globals(&self) -> impl Iterator<Item = &Global> {
        self.items.iter().filter_map(|item| match item {
            Item::Global(g) => Some(g),
            _ => None,
        })
    }

    pub fn executables(&self) -> impl Iterator<Item = &Executable> {
        self.items.iter().filter_map(|item| match item {
            Item::Executable(e) => Some(e),
            _ => None,
        })
    }

    pub fn funcs(&self) -> impl Iterator<Item = &Func> {
        self.items.iter().filter_map(|item| match item {
            Item::Func(f) => Some(f),
            _ => None,
        })
    }

    pub fn find_global(&self, name: &str) -> Option<&Global> {
        self.globals().find(|g| g.name == name)
    }

    pub fn find_global_mut(&mut self, name: &str) -> Option<&mut Global> {
        self.items.iter_mut().find_map(|item| match item {
            Item::Global(g) if g.name == name => Some(g),
            _ => None,
        })
    }

    pub fn find_func_mut(&mut self, name: &str) -> Option<&mut Func> {
        self.items.iter_mut().find_map(|item| match item {
            Item::Func(f) if f.name == name => Some(f),
            _ => None,
        })
    }

    /// The executable whose inner kernel has the given name.
    pub fn find_executable_by_kernel(&self, kernel: &str) -> Option<&Executable> {
        self.executables().find(|e| e.kernel.name == kernel)
    }

    /// Select the function to analyse: the sole function, or of two
    /// candidates the one whose symbol ends in `$async`.
    pub fn entry_func(&self) -> Result<&Func, EntryError> {
        let funcs: Vec<&Func> = self.funcs().collect();
        match funcs.len() {
            1 => Ok(funcs[0]),
            2 => funcs
                .into_iter()
                .find(|f| f.name.ends_with("$async"))
                .ok_or(EntryError::NoAsyncCandidate),
            n => Err(EntryError::Ambiguous(n)),
        }
    }
}
