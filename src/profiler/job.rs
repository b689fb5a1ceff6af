//! The shared job pool.
//!
//! Two FIFO queues (`create`, `bench`) plus a result channel and an
//! exception channel. Workers prefer bench jobs so queued benchmark inputs
//! stay bounded; counters track queued and in-flight work under one mutex,
//! and the pool is done when all of them are zero. The driver waits on a
//! condition variable with the configured check period, draining results as
//! they arrive and surfacing the first worker exception.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::layout::Layout;
use crate::profiler::ProfileError;

/// Work handed to a worker.
pub enum Job {
    CreateSubMod(String),
    BenchSubMod(String),
}

/// One finished measurement.
#[derive(Clone, Debug)]
pub struct ResultJob {
    pub kernel: String,
    pub layouts: Vec<Layout>,
    pub time_ns: f64,
}

#[derive(Default)]
struct PoolState {
    create: VecDeque<String>,
    bench: VecDeque<String>,
    working: usize,
    closed: bool,
}

impl PoolState {
    fn done(&self) -> bool {
        self.create.is_empty() && self.bench.is_empty() && self.working == 0
    }
}

pub struct JobPool {
    state: Mutex<PoolState>,
    available: Condvar,
    progress: Condvar,
    results_tx: Sender<ResultJob>,
    results_rx: Receiver<ResultJob>,
    errors_tx: Sender<ProfileError>,
    errors_rx: Receiver<ProfileError>,
}

impl Default for JobPool {
    fn default() -> Self {
        let (results_tx, results_rx) = unbounded();
        let (errors_tx, errors_rx) = unbounded();
        JobPool {
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            progress: Condvar::new(),
            results_tx,
            results_rx,
            errors_tx,
            errors_rx,
        }
    }
}

impl JobPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_create(&self, module: String) {
        let mut state = self.state.lock();
        state.create.push_back(module);
        self.available.notify_one();
    }

    pub fn put_bench(&self, module: String) {
        let mut state = self.state.lock();
        state.bench.push_back(module);
        self.available.notify_one();
    }

    pub fn put_result(&self, result: ResultJob) {
        let _ = self.results_tx.send(result);
    }

    /// Record a worker exception and wake the driver.
    pub fn throw(&self, error: ProfileError) {
        let _ = self.errors_tx.send(error);
        self.progress.notify_all();
    }

    /// Blocks for the next job, preferring bench work. Returns `None` once
    /// the pool is closed.
    pub fn get(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(module) = state.bench.pop_front() {
                state.working += 1;
                return Some(Job::BenchSubMod(module));
            }
            if let Some(module) = state.create.pop_front() {
                state.working += 1;
                return Some(Job::CreateSubMod(module));
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Mark one unit of in-flight work complete.
    pub fn free(&self) {
        let mut state = self.state.lock();
        state.working -= 1;
        if state.done() {
            self.progress.notify_all();
        }
    }

    /// Release every waiting worker; `get` returns `None` from now on.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done()
    }

    /// Drive the pool to completion: drain results into `on_result` as they
    /// arrive, wake every `check_period` to poll, and surface the first
    /// worker exception.
    pub fn wait(
        &self,
        check_period: Duration,
        mut on_result: impl FnMut(ResultJob),
    ) -> Result<(), ProfileError> {
        loop {
            for result in self.results_rx.try_iter() {
                on_result(result);
            }
            if let Ok(error) = self.errors_rx.try_recv() {
                return Err(error);
            }
            let mut state = self.state.lock();
            if state.done() {
                break;
            }
            self.progress.wait_for(&mut state, check_period);
        }
        for result in self.results_rx.try_iter() {
            on_result(result);
        }
        if let Ok(error) = self.errors_rx.try_recv() {
            return Err(error);
        }
        Ok(())
    }
}
