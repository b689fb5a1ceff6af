//! Two-phase exclusive lock separating compilation from measurement.
//!
//! Any number of workers may hold the same colour at once; the two colours
//! are mutually exclusive. Blue wraps compilation, red wraps measurement,
//! so background compiles never run while a benchmark sample is being
//! taken.

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Phases {
    red: usize,
    blue: usize,
}

/// The red/blue phase lock. Guards release their colour on drop.
#[derive(Default)]
pub struct ExclusiveLock {
    state: Mutex<Phases>,
    cond: Condvar,
}

impl ExclusiveLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the blue (compilation) phase, blocking while any red holder
    /// remains.
    pub fn blue(&self) -> BlueGuard<'_> {
        let mut state = self.state.lock();
        while state.red > 0 {
            self.cond.wait(&mut state);
        }
        state.blue += 1;
        BlueGuard { lock: self }
    }

    /// Join the red (measurement) phase, blocking while any blue holder
    /// remains.
    pub fn red(&self) -> RedGuard<'_> {
        let mut state = self.state.lock();
        while state.blue > 0 {
            self.cond.wait(&mut state);
        }
        state.red += 1;
        RedGuard { lock: self }
    }
}

pub struct BlueGuard<'a> {
    lock: &'a ExclusiveLock,
}

impl Drop for BlueGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.blue -= 1;
        if state.blue == 0 {
            self.lock.cond.notify_all();
        }
    }
}

pub struct RedGuard<'a> {
    lock: &'a ExclusiveLock,
}

impl Drop for RedGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.red -= 1;
        if state.red == 0 {
            self.lock.cond.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_colour_is_shared() {
        let lock = ExclusiveLock::new();
        let a = lock.blue();
        let b = lock.blue();
        drop(a);
        drop(b);
        let c = lock.red();
        let d = lock.red();
        drop(c);
        drop(d);
    }

    #[test]
    fn colours_exclude_each_other() {
        let lock = Arc::new(ExclusiveLock::new());
        let in_red = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let lock = Arc::clone(&lock);
            let in_red = Arc::clone(&in_red);
            let overlap = Arc::clone(&overlap);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    if worker % 2 == 0 {
                        let _guard = lock.blue();
                        if in_red.load(Ordering::SeqCst) > 0 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_micros(10));
                    } else {
                        let _guard = lock.red();
                        in_red.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(10));
                        in_red.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }
}
