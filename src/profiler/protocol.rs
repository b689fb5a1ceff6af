//! Wire protocol between the driver and its worker processes.
//!
//! Everything crossing the process boundary is a plain value: module text,
//! kernel names, layout tuples, times. One JSON object per line, driver →
//! worker as [`WorkerRequest`], worker → driver as [`WorkerReply`]. The
//! first line a worker reads is its [`WorkerConfig`].
//!
//! Phase arbitration also rides this channel: the worker announces
//! `Acquire` before compiling (blue) or measuring (red), blocks until the
//! driver answers `Grant`, and announces `Release` when the phase ends. The
//! red/blue lock itself lives only in the driver process.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::profiler::runtime::CompileOptions;

/// Colour of an exclusive-lock phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Compilation phase.
    Blue,
    /// Measurement phase.
    Red,
}

/// Per-worker settings, sent once at spawn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub index: usize,
    pub times: usize,
    pub driver: String,
    /// Already augmented for the driver.
    pub options: CompileOptions,
    pub profile_cache: Option<PathBuf>,
    pub debug: bool,
}

/// Driver → worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Expand a sub-module into its benchmark candidates.
    Create { module: String },
    /// Compile and measure one benchmark module.
    Bench { module: String },
    /// The requested phase is held on the worker's behalf.
    Grant,
    /// Exit cleanly.
    Shutdown,
}

/// Worker → driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Block me until the phase is granted.
    Acquire { phase: Phase },
    /// The held phase ended.
    Release { phase: Phase },
    /// One benchmark candidate produced by a create job.
    Expanded {
        kernel: String,
        layouts: Vec<Layout>,
        module: String,
    },
    /// One finished measurement.
    Measured {
        kernel: String,
        layouts: Vec<Layout>,
        time_ns: f64,
    },
    /// The current job is finished (measured, expanded, or dropped).
    Done,
    /// Fatal worker error; the worker exits after sending this.
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_as_json() {
        for request in [
            WorkerRequest::Create {
                module: "module {\n}\n".to_string(),
            },
            WorkerRequest::Bench {
                module: "module {\n}\n".to_string(),
            },
            WorkerRequest::Grant,
            WorkerRequest::Shutdown,
        ] {
            let line = serde_json::to_string(&request).unwrap();
            assert!(!line.contains('\n'));
            let back: WorkerRequest = serde_json::from_str(&line).unwrap();
            assert_eq!(format!("{back:?}"), format!("{request:?}"));
        }
    }

    #[test]
    fn replies_round_trip_as_json() {
        let reply = WorkerReply::Measured {
            kernel: "matmul".to_string(),
            layouts: vec![Layout(vec![1, 0]), Layout(vec![0, 1])],
            time_ns: 12.5,
        };
        let line = serde_json::to_string(&reply).unwrap();
        let back: WorkerReply = serde_json::from_str(&line).unwrap();
        match back {
            WorkerReply::Measured {
                kernel,
                layouts,
                time_ns,
            } => {
                assert_eq!(kernel, "matmul");
                assert_eq!(layouts, vec![Layout(vec![1, 0]), Layout(vec![0, 1])]);
                assert_eq!(time_ns, 12.5);
            }
            other => panic!("expected Measured, got {other:?}"),
        }
    }

    #[test]
    fn module_text_survives_the_line_framing() {
        let module = "module {\n  util.func public @f() {\n    util.return\n  }\n}\n";
        let line = serde_json::to_string(&WorkerRequest::Create {
            module: module.to_string(),
        })
        .unwrap();
        assert!(!line.contains('\n'));
        let WorkerRequest::Create { module: back } = serde_json::from_str(&line).unwrap() else {
            panic!("expected Create");
        };
        assert_eq!(back, module);
    }
}
