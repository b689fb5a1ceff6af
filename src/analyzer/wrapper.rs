//! Op wrappers and the flat arena they live in.
//!
//! Every op of the entry function is lifted into an [`OpWrapper`] carrying
//! its category, its tensor inputs (operands with a non-constant producer)
//! and tensor outputs, plus the kernel symbol for dispatches. Wrappers are
//! plain arena entries addressed by index; predecessor/successor relations
//! are precomputed once at build time and scopes filter them by membership,
//! so no wrapper ever holds a back-reference into a graph.

use crate::analyzer::AnalyzeError;
use crate::ir::{Func, OpKind, TypeExpr};
use crate::layout::Layout;

/// Index of a wrapper in its [`Arena`]; equal to the op's position in the
/// entry block.
pub type WrapperId = usize;

/// The layout policy class of an op category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Per-arg layout chosen from the benchmarked table.
    Schedule,
    /// Every arg must carry the default layout.
    Force,
    /// Any legal permutation, zero cost.
    Any,
}

/// Category tag of a wrapped op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCategory {
    Dispatch,
    Reshape,
    Update,
    Barrier,
    Export,
    Import,
    Return,
    Constant,
    Empty,
    Splat,
    GlobalLoad,
}

impl OpCategory {
    pub fn of(kind: &OpKind) -> OpCategory {
        match kind {
            OpKind::Dispatch(_) => OpCategory::Dispatch,
            OpKind::Reshape { .. } => OpCategory::Reshape,
            OpKind::Update { .. } => OpCategory::Update,
            OpKind::Barrier { .. } => OpCategory::Barrier,
            OpKind::Export { .. } => OpCategory::Export,
            OpKind::Import { .. } => OpCategory::Import,
            OpKind::Return { .. } => OpCategory::Return,
            OpKind::Constant { .. } => OpCategory::Constant,
            OpKind::Empty { .. } => OpCategory::Empty,
            OpKind::Splat { .. } => OpCategory::Splat,
            OpKind::GlobalLoad { .. } => OpCategory::GlobalLoad,
        }
    }

    pub fn policy(self) -> LayoutPolicy {
        match self {
            OpCategory::Dispatch => LayoutPolicy::Schedule,
            OpCategory::Reshape
            | OpCategory::Update
            | OpCategory::Barrier
            | OpCategory::Export
            | OpCategory::Import
            | OpCategory::Return => LayoutPolicy::Force,
            OpCategory::Constant
            | OpCategory::Empty
            | OpCategory::Splat
            | OpCategory::GlobalLoad => LayoutPolicy::Any,
        }
    }
}

/// A ranked-tensor SSA value as seen from a wrapper.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueRef {
    pub name: String,
    pub shape: Vec<u64>,
    /// Producing wrapper (the op itself for outputs).
    pub producer: WrapperId,
    /// For a tied dispatch result, the operand value it aliases in storage.
    pub alias: Option<String>,
}

/// One lifted op.
#[derive(Clone, Debug)]
pub struct OpWrapper {
    pub id: WrapperId,
    pub category: OpCategory,
    /// Kernel symbol for dispatches.
    pub entry: Option<String>,
    /// Tensor operands whose producer is a non-constant op.
    pub inputs: Vec<ValueRef>,
    /// Tensor results (none for constants).
    pub outputs: Vec<ValueRef>,
}

impl OpWrapper {
    pub fn policy(&self) -> LayoutPolicy {
        self.category.policy()
    }

    pub fn schedule_layout(&self) -> bool {
        self.policy() == LayoutPolicy::Schedule
    }

    pub fn force_layout(&self) -> bool {
        self.policy() == LayoutPolicy::Force
    }

    pub fn any_layout(&self) -> bool {
        self.policy() == LayoutPolicy::Any
    }

    /// The wrapper's args in kernel-arg order: inputs, then non-tied
    /// outputs. This is the indexing used by per-arg layout tuples.
    pub fn args(&self) -> Vec<&ValueRef> {
        self.inputs
            .iter()
            .chain(self.outputs.iter().filter(|v| v.alias.is_none()))
            .collect()
    }

    /// Position of a value among [`OpWrapper::args`]. A tied output resolves
    /// to the index of the operand it aliases.
    pub fn arg_index(&self, name: &str) -> Option<usize> {
        if let Some(index) = self.args().iter().position(|v| v.name == name) {
            return Some(index);
        }
        let alias = self
            .outputs
            .iter()
            .find(|v| v.name == name)?
            .alias
            .as_deref()?;
        self.args().iter().position(|v| v.name == alias)
    }

    /// The identity layout tuple for this wrapper's args.
    pub fn default_layouts(&self) -> Vec<Layout> {
        self.args()
            .iter()
            .map(|v| Layout::identity(v.shape.len()))
            .collect()
    }
}

/// Flat arena of wrappers plus precomputed data-edge relations.
#[derive(Debug)]
pub struct Arena {
    pub wrappers: Vec<OpWrapper>,
    /// Producing wrappers of each wrapper's inputs, deduplicated, in order.
    pub preds: Vec<Vec<WrapperId>>,
    /// Consuming wrappers of each wrapper's outputs, deduplicated, in order.
    pub succs: Vec<Vec<WrapperId>>,
}

impl Arena {
    /// Lift every op of the entry block. Relations are precomputed here
    /// rather than lazily so later iteration is read-only.
    pub fn build(func: &Func) -> Result<Arena, AnalyzeError> {
        let mut producer_of = std::collections::HashMap::new();
        for (index, op) in func.ops.iter().enumerate() {
            for result in &op.results {
                producer_of.insert(result.clone(), index);
            }
        }

        let mut wrappers = Vec::with_capacity(func.ops.len());
        for (index, op) in func.ops.iter().enumerate() {
            let category = OpCategory::of(&op.kind);
            let mut inputs = Vec::new();
            for (value, ty) in op.operand_info() {
                let Some(TypeExpr::Tensor(tensor)) = ty else {
                    continue;
                };
                let Some(&producer) = producer_of.get(value) else {
                    continue;
                };
                if func.ops[producer].is_constant() {
                    continue;
                }
                inputs.push(ValueRef {
                    name: value.to_string(),
                    shape: tensor.dims.clone(),
                    producer,
                    alias: None,
                });
            }
            let mut outputs = Vec::new();
            if category != OpCategory::Constant {
                let dispatch = match &op.kind {
                    OpKind::Dispatch(d) => Some(d),
                    _ => None,
                };
                for (slot, (value, ty)) in op.result_info().into_iter().enumerate() {
                    let TypeExpr::Tensor(tensor) = ty else {
                        continue;
                    };
                    let alias = dispatch.and_then(|d| {
                        let operand = d.tied.get(slot).copied().flatten()?;
                        d.args.get(operand).cloned()
                    });
                    outputs.push(ValueRef {
                        name: value.to_string(),
                        shape: tensor.dims.clone(),
                        producer: index,
                        alias,
                    });
                }
            }
            let entry = match &op.kind {
                OpKind::Dispatch(d) => Some(d.entry.func.clone()),
                _ => None,
            };
            wrappers.push(OpWrapper {
                id: index,
                category,
                entry,
                inputs,
                outputs,
            });
        }

        let mut preds: Vec<Vec<WrapperId>> = vec![Vec::new(); wrappers.len()];
        let mut succs: Vec<Vec<WrapperId>> = vec![Vec::new(); wrappers.len()];
        for wrapper in &wrappers {
            for input in &wrapper.inputs {
                push_unique(&mut preds[wrapper.id], input.producer);
                push_unique(&mut succs[input.producer], wrapper.id);
            }
        }
        Ok(Arena {
            wrappers,
            preds,
            succs,
        })
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}

fn push_unique(list: &mut Vec<WrapperId>, id: WrapperId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_module;

    const CHAIN: &str = r#"module {
  util.func public @main$async(%arg0: !hal.buffer_view) -> !hal.buffer_view {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<4x3x2xf32>
    %1 = flow.tensor.reshape %0 : tensor<4x3x2xf32> -> tensor<2x3x4xf32>
    %2 = hal.tensor.export %1 : tensor<2x3x4xf32> -> !hal.buffer_view
    util.return %2 : !hal.buffer_view
  }
}
"#;

    #[test]
    fn chain_relations() {
        let module = parse_module(CHAIN).unwrap();
        let arena = Arena::build(module.entry_func().unwrap()).unwrap();
        assert_eq!(arena.len(), 4);
        // import: source with one tensor output
        assert!(arena.wrappers[0].inputs.is_empty());
        assert_eq!(arena.wrappers[0].outputs.len(), 1);
        assert_eq!(arena.preds[1], vec![0]);
        assert_eq!(arena.succs[1], vec![2]);
        // export produces no tensor, so return has no tensor inputs
        assert!(arena.wrappers[3].inputs.is_empty());
    }

    #[test]
    fn categories_and_policies() {
        let module = parse_module(CHAIN).unwrap();
        let arena = Arena::build(module.entry_func().unwrap()).unwrap();
        assert_eq!(arena.wrappers[0].category, OpCategory::Import);
        assert!(arena.wrappers[0].force_layout());
        assert_eq!(arena.wrappers[1].category, OpCategory::Reshape);
        assert_eq!(arena.wrappers[2].category, OpCategory::Export);
        assert_eq!(arena.wrappers[3].category, OpCategory::Return);
    }

    #[test]
    fn constants_are_isolated() {
        let text = r#"module {
  util.func public @main$async() -> !hal.buffer_view {
    %cst = arith.constant 1.000000e+00 : f32
    %0 = flow.tensor.splat %cst : tensor<2x3xf32>
    %1 = hal.tensor.export %0 : tensor<2x3xf32> -> !hal.buffer_view
    util.return %1 : !hal.buffer_view
  }
}
"#;
        let module = parse_module(text).unwrap();
        let arena = Arena::build(module.entry_func().unwrap()).unwrap();
        assert!(arena.wrappers[0].outputs.is_empty());
        assert!(arena.preds[1].is_empty());
        assert_eq!(arena.succs[1], vec![2]);
    }
}
