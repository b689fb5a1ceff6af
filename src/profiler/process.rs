//! Driver-side half of the worker-process pool.
//!
//! [`ProcessSpawner`] launches each worker as a child process of the same
//! executable (the hidden `profile-worker` subcommand) with piped stdio.
//! The driver process alone owns the job pool, its counters, and the
//! red/blue lock; one thin [`pump`] per worker relays between the shared
//! queues and the worker's channel, holding the announced phase on the
//! worker's behalf. Only protocol lines cross the process boundary.

use std::io::{BufRead as _, BufReader, Write as _};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::profiler::exlock::{BlueGuard, ExclusiveLock, RedGuard};
use crate::profiler::job::{Job, JobPool, ResultJob};
use crate::profiler::protocol::{Phase, WorkerConfig, WorkerReply, WorkerRequest};
use crate::profiler::ProfileError;

/// Driver-side handle to one worker.
pub trait WorkerLink: Send {
    fn send(&mut self, request: &WorkerRequest) -> std::io::Result<()>;
    fn recv(&mut self) -> std::io::Result<WorkerReply>;
    /// Tear the worker down, best effort.
    fn shutdown(&mut self);
}

/// How workers come into existence. Production spawns OS processes; tests
/// substitute in-process links speaking the same protocol.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, config: &WorkerConfig) -> Result<Box<dyn WorkerLink>, ProfileError>;
}

/// Spawns `current_exe profile-worker` with piped stdio and hands it its
/// config line.
pub struct ProcessSpawner;

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, config: &WorkerConfig) -> Result<Box<dyn WorkerLink>, ProfileError> {
        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .arg("profile-worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| ProfileError::Protocol {
            message: "worker stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ProfileError::Protocol {
            message: "worker stdout unavailable".to_string(),
        })?;
        let config_line =
            serde_json::to_string(config).map_err(|error| ProfileError::Protocol {
                message: format!("unencodable worker config: {error}"),
            })?;
        writeln!(stdin, "{config_line}")?;
        Ok(Box::new(ProcessLink {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        }))
    }
}

struct ProcessLink {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerLink for ProcessLink {
    fn send(&mut self, request: &WorkerRequest) -> std::io::Result<()> {
        let line = serde_json::to_string(request)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()
    }

    fn recv(&mut self) -> std::io::Result<WorkerReply> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "worker closed the channel",
            ));
        }
        serde_json::from_str(line.trim())
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
    }

    fn shutdown(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ProcessLink {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// The phase held on a worker's behalf between its `Acquire` and `Release`.
enum PhaseGuard<'a> {
    Blue(BlueGuard<'a>),
    Red(RedGuard<'a>),
}

/// Relay loop for one worker: pull jobs from the pool (bench first), ship
/// them over the link, and fold the replies back into the shared queues.
/// A failed worker enqueues its error and ends the relay; the remaining
/// workers keep draining the pool.
pub fn pump(pool: &JobPool, exlock: &ExclusiveLock, mut link: Box<dyn WorkerLink>) {
    while let Some(job) = pool.get() {
        let request = match job {
            Job::CreateSubMod(module) => WorkerRequest::Create { module },
            Job::BenchSubMod(module) => WorkerRequest::Bench { module },
        };
        if let Err(error) = link.send(&request) {
            abort(pool, link.as_mut(), error.into());
            return;
        }
        let mut _held: Option<PhaseGuard<'_>> = None;
        loop {
            match link.recv() {
                Ok(WorkerReply::Acquire { phase }) => {
                    _held = Some(match phase {
                        Phase::Blue => PhaseGuard::Blue(exlock.blue()),
                        Phase::Red => PhaseGuard::Red(exlock.red()),
                    });
                    if let Err(error) = link.send(&WorkerRequest::Grant) {
                        abort(pool, link.as_mut(), error.into());
                        return;
                    }
                }
                Ok(WorkerReply::Release { .. }) => {
                    _held = None;
                }
                Ok(WorkerReply::Expanded { module, .. }) => {
                    pool.put_bench(module);
                }
                Ok(WorkerReply::Measured {
                    kernel,
                    layouts,
                    time_ns,
                }) => {
                    pool.put_result(ResultJob {
                        kernel,
                        layouts,
                        time_ns,
                    });
                }
                Ok(WorkerReply::Done) => {
                    pool.free();
                    break;
                }
                Ok(WorkerReply::Failed { message }) => {
                    abort(pool, link.as_mut(), ProfileError::Worker { message });
                    return;
                }
                Err(error) => {
                    abort(pool, link.as_mut(), error.into());
                    return;
                }
            }
        }
    }
    let _ = link.send(&WorkerRequest::Shutdown);
    link.shutdown();
}

fn abort(pool: &JobPool, link: &mut dyn WorkerLink, error: ProfileError) {
    pool.free();
    pool.throw(error);
    link.shutdown();
}
