//! One-shot driver: profile, analyze, generate.
//!
//! Also carries the compilation-stage gate: the layout optimization applies
//! only when the surrounding compile crosses the `flow` stage, mirroring
//! the `--compile-from`/`--compile-to` splitting of the host pipeline.

use std::sync::Arc;

use tracing::info;

use crate::analyzer::{self, AnalyzeError};
use crate::generator::{self, GenerateError};
use crate::profiler::{KernelProfiler, ProfileError, ProfileOptions, WorkerSpawner};

/// Stage names of the host compiler pipeline, in order.
pub const COMPILATION_STAGES: [&str; 14] = [
    "start",
    "input",
    "abi",
    "preprocessing",
    "global-optimization",
    "dispatch-creation",
    "flow",
    "stream",
    "executable-sources",
    "executable-configurations",
    "executable-targets",
    "hal",
    "vm",
    "end",
];

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error("unknown compilation stage `{0}`")]
    UnknownStage(String),
}

/// Whether a compile spanning `[from, to]` passes through the flow stage,
/// i.e. whether the layout optimization applies at all.
pub fn crosses_flow(from: &str, to: &str) -> Result<bool, RunError> {
    let index = |stage: &str| {
        COMPILATION_STAGES
            .iter()
            .position(|s| *s == stage)
            .ok_or_else(|| RunError::UnknownStage(stage.to_string()))
    };
    let from = index(from)?;
    let to = index(to)?;
    let flow = index("flow")?;
    Ok(from <= flow && flow <= to)
}

/// The `--compile-from`/`--compile-to` stages named in a flag list,
/// defaulting to the pipeline's ends.
pub fn stage_bounds(extra_args: &[String]) -> (String, String) {
    let find = |prefix: &str, fallback: &str| {
        extra_args
            .iter()
            .find_map(|arg| arg.strip_prefix(prefix))
            .unwrap_or(fallback)
            .to_string()
    };
    (
        find("--compile-from=", COMPILATION_STAGES[0]),
        find("--compile-to=", COMPILATION_STAGES[COMPILATION_STAGES.len() - 1]),
    )
}

/// Knobs for the one-shot driver.
pub struct RunOptions {
    pub profile: ProfileOptions,
    pub mode: analyzer::Mode,
}

/// Profile the flow module, analyse the measurements, and rewrite the
/// module per the resulting schedule.
pub fn run(
    flow: &str,
    options: &RunOptions,
    spawner: Arc<dyn WorkerSpawner>,
) -> Result<String, RunError> {
    let kstat = KernelProfiler::new(options.profile.clone(), spawner).run(flow)?;
    info!(kernels = kstat.kernels().count(), "profiled");
    let schedule = analyzer::analyze(flow, &kstat, options.mode)?;
    info!(values = schedule.len(), "analysed");
    Ok(generator::generate(flow, &schedule)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_span_crosses_flow() {
        assert!(crosses_flow("start", "end").unwrap());
        assert!(crosses_flow("flow", "flow").unwrap());
    }

    #[test]
    fn late_span_does_not() {
        assert!(!crosses_flow("stream", "end").unwrap());
        assert!(!crosses_flow("start", "dispatch-creation").unwrap());
    }

    #[test]
    fn unknown_stage_is_an_error() {
        assert!(matches!(
            crosses_flow("start", "warp"),
            Err(RunError::UnknownStage(stage)) if stage == "warp"
        ));
    }

    #[test]
    fn stage_bounds_default_to_ends() {
        let (from, to) = stage_bounds(&[]);
        assert_eq!((from.as_str(), to.as_str()), ("start", "end"));
        let (from, to) = stage_bounds(&[
            "--compile-from=flow".to_string(),
            "--compile-to=vm".to_string(),
        ]);
        assert_eq!((from.as_str(), to.as_str()), ("flow", "vm"));
    }
}
