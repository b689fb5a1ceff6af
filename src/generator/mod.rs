//! IR rewriting from a chosen schedule.
//!
//! Clones each kernel-bearing executable once per layout tuple it is used
//! at, rewrites every dispatch in the entry function to reference its
//! clone, and permutes the stored bytes of layout-sensitive globals so each
//! kernel sees its data in the expected order. Original executables stay in
//! place next to their clones.

pub mod ktable;

pub use ktable::KTable;

use std::collections::BTreeMap;

use tracing::debug;

use crate::ir::{EntryError, GlobalInit, Module, OpKind, ParseError};
use crate::layout::Layout;
use crate::stats::Schedule;
use crate::tensor::{transpose_bytes, TensorError};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Entry(#[from] EntryError),

    /// The schedule lacks a required value
    #[error("schedule has no layout for value `{value}`")]
    MissingKey { value: String },

    /// A dispatch references a kernel with no executable
    #[error("no executable found for kernel `{kernel}`")]
    UnknownKernel { kernel: String },

    /// A global load references a missing global
    #[error("global `{global}` referenced by a load does not exist")]
    UnknownGlobal { global: String },

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("internal generator invariant violated: {0}")]
    Internal(String),
}

/// Rewrite a module's text per the schedule and return the new text.
pub fn generate(text: &str, schedule: &Schedule) -> Result<String, GenerateError> {
    let mut module = Module::parse(text)?;
    let entry_name = module.entry_func()?.name.clone();

    struct DispatchFix {
        op_index: usize,
        kernel: String,
        layouts: Vec<Layout>,
    }

    let mut dispatch_fixes = Vec::new();
    // First load of a global wins if it is loaded more than once.
    let mut global_fixes: BTreeMap<String, Layout> = BTreeMap::new();
    {
        let func = module.entry_func()?;
        for (op_index, op) in func.ops.iter().enumerate() {
            match &op.kind {
                OpKind::Dispatch(dispatch) => {
                    let mut layouts = Vec::new();
                    for value in &dispatch.args {
                        layouts.push(lookup(schedule, value)?);
                    }
                    for (slot, value) in op.results.iter().enumerate() {
                        if dispatch.tied.get(slot).copied().flatten().is_some() {
                            continue;
                        }
                        layouts.push(lookup(schedule, value)?);
                    }
                    dispatch_fixes.push(DispatchFix {
                        op_index,
                        kernel: dispatch.entry.func.clone(),
                        layouts,
                    });
                }
                OpKind::GlobalLoad { global, .. } => {
                    let value = op.results.first().ok_or_else(|| {
                        GenerateError::Internal("global load without a result".to_string())
                    })?;
                    global_fixes
                        .entry(global.clone())
                        .or_insert(lookup(schedule, value)?);
                }
                _ => {}
            }
        }
    }

    // Clones land at the top of the module body before any dispatch is
    // touched, keeping the symbol table consistent for the rewrite below.
    let mut ktable = KTable::new();
    let mut entries = Vec::with_capacity(dispatch_fixes.len());
    for fix in &dispatch_fixes {
        entries.push(ktable.lookup(&mut module, &fix.kernel, &fix.layouts)?);
    }

    let func = module
        .find_func_mut(&entry_name)
        .ok_or_else(|| GenerateError::Internal("entry function vanished".to_string()))?;
    for (fix, entry) in dispatch_fixes.iter().zip(entries) {
        if let OpKind::Dispatch(dispatch) = &mut func.ops[fix.op_index].kind {
            debug!(kernel = %fix.kernel, clone = %entry.func, "rewriting dispatch");
            dispatch.entry = entry;
        }
    }

    for (name, layout) in global_fixes {
        let global = module
            .find_global_mut(&name)
            .ok_or(GenerateError::UnknownGlobal { global: name })?;
        if let Some(GlobalInit::Bytes(bytes)) = &mut global.init {
            *bytes = transpose_bytes(bytes, &global.ty.dims, global.ty.elem, &layout)?;
        }
    }

    Ok(module.to_string())
}

fn lookup(schedule: &Schedule, value: &str) -> Result<Layout, GenerateError> {
    schedule
        .get(value)
        .cloned()
        .ok_or_else(|| GenerateError::MissingKey {
            value: value.to_string(),
        })
}
