//! Layout analysis: graph construction, pathification, and selection.
//!
//! The analyzer wraps every op of the entry function, partitions the data
//! flow into connected subgraphs, decomposes each into linear sequences by
//! repeated longest-path extraction, and selects layouts per sequence — by
//! dynamic programming against the measured kernel times, or greedily by
//! per-kernel saving. Candidate schedules merge by majority into the final
//! [`Schedule`].

pub mod graph;
pub mod greedy;
pub mod sequence;
pub mod wrapper;

pub use graph::Graph;
pub use sequence::Sequence;
pub use wrapper::{Arena, LayoutPolicy, OpCategory, OpWrapper, ValueRef, WrapperId};

use tracing::debug;

use crate::ir::{EntryError, Module, ParseError};
use crate::stats::{KStat, Schedule, ScheduleGroup};

/// Analysis failures. Everything here is fatal; per-combination profiler
/// drops never reach the analyzer.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Entry(#[from] EntryError),

    /// The stat store has never seen this kernel
    #[error("kstat has no entry for kernel `{kernel}`")]
    KernelMiss { kernel: String },

    /// The stat store lacks a required layout tuple
    #[error("kstat has no measurement for kernel `{kernel}` at layouts {layouts}")]
    KStatMiss { kernel: String, layouts: String },

    /// The DP found no input layout shared with the previous wind entry
    #[error("no feasible input layout for `{symbol}` during sequence scheduling")]
    Infeasible { symbol: String },

    /// A partitioned subgraph failed its connectivity post-condition
    #[error("partitioned subgraph is not connected")]
    Connectivity,

    #[error("internal analyzer invariant violated: {0}")]
    Internal(String),
}

/// Selection strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Sequence DP over measured times (default).
    Dp,
    /// Commit kernels in descending default-vs-best saving order.
    Greedy,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "dp" => Ok(Mode::Dp),
            "greedy" => Ok(Mode::Greedy),
            other => Err(format!("unknown analyzer mode `{other}`")),
        }
    }
}

/// Analyse a module's text and produce the merged layout schedule.
pub fn analyze(text: &str, kstat: &KStat, mode: Mode) -> Result<Schedule, AnalyzeError> {
    let module = Module::parse(text)?;
    analyze_module(&module, kstat, mode)
}

pub fn analyze_module(
    module: &Module,
    kstat: &KStat,
    mode: Mode,
) -> Result<Schedule, AnalyzeError> {
    match mode {
        Mode::Dp => dp(module, kstat),
        Mode::Greedy => greedy::run(module, kstat),
    }
}

fn dp(module: &Module, kstat: &KStat) -> Result<Schedule, AnalyzeError> {
    let func = module.entry_func()?;
    let arena = Arena::build(func)?;
    let graph = Graph::full(&arena);
    let mut group = ScheduleGroup::new();
    for subgraph in graph.partitioned()? {
        for seq in subgraph.pathify(Some(kstat))? {
            debug!(len = seq.len(), "scheduling sequence");
            group.union(seq.schedule(kstat)?);
        }
    }
    let schedule = group.merge();
    debug!(values = schedule.len(), "merged schedule");
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    const IDENTITY_CHAIN: &str = r#"module {
  util.func public @main$async(%arg0: !hal.buffer_view) -> !hal.buffer_view {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<4x3x2xf32>
    %1 = flow.tensor.reshape %0 : tensor<4x3x2xf32> -> tensor<4x3x2xf32>
    %2 = hal.tensor.export %1 : tensor<4x3x2xf32> -> !hal.buffer_view
    util.return %2 : !hal.buffer_view
  }
}
"#;

    #[test]
    fn identity_chain_forces_defaults() {
        let schedule = analyze(IDENTITY_CHAIN, &KStat::new(), Mode::Dp).unwrap();
        assert_eq!(schedule.get("%0"), Some(&Layout(vec![0, 1, 2])));
        assert_eq!(schedule.get("%1"), Some(&Layout(vec![0, 1, 2])));
    }

    #[test]
    fn ambiguous_entry_is_fatal() {
        let text = r#"module {
  util.func public @a() {
    util.return
  }
  util.func public @b() {
    util.return
  }
  util.func public @c() {
    util.return
  }
}
"#;
        match analyze(text, &KStat::new(), Mode::Dp) {
            Err(AnalyzeError::Entry(EntryError::Ambiguous(3))) => {}
            other => panic!("expected ambiguous entry error, got {other:?}"),
        }
    }
}
