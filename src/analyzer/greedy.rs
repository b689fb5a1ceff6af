//! Greedy layout selection.
//!
//! For every dispatched kernel, the saving of switching from the default
//! layout tuple to its best measured tuple is computed; kernels commit in
//! descending-saving order, each assigning its best layout to every one of
//! its args not already claimed by an earlier kernel.

use std::cmp::Ordering;

use crate::analyzer::wrapper::Arena;
use crate::analyzer::AnalyzeError;
use crate::ir::Module;
use crate::layout::{format_layouts, Layout};
use crate::stats::{KStat, Schedule};

pub fn run(module: &Module, kstat: &KStat) -> Result<Schedule, AnalyzeError> {
    let func = module.entry_func()?;
    let arena = Arena::build(func)?;

    struct Saving {
        id: usize,
        best: Vec<Layout>,
        saving: f64,
    }

    let mut savings = Vec::new();
    for wrapper in &arena.wrappers {
        if !wrapper.schedule_layout() {
            continue;
        }
        let kernel = wrapper.entry.as_deref().unwrap_or_default();
        let table = kstat
            .kernel(kernel)
            .ok_or_else(|| AnalyzeError::KernelMiss {
                kernel: kernel.to_string(),
            })?;
        let default = wrapper.default_layouts();
        let default_time = table
            .get(&default)
            .copied()
            .ok_or_else(|| AnalyzeError::KStatMiss {
                kernel: kernel.to_string(),
                layouts: format_layouts(&default),
            })?;
        let mut best: Option<(&Vec<Layout>, f64)> = None;
        for (tuple, &time) in table {
            match best {
                Some((_, best_time)) if best_time <= time => {}
                _ => best = Some((tuple, time)),
            }
        }
        let (best_tuple, best_time) = best.ok_or_else(|| AnalyzeError::KernelMiss {
            kernel: kernel.to_string(),
        })?;
        if best_tuple.len() != wrapper.args().len() {
            return Err(AnalyzeError::Internal(format!(
                "kernel `{kernel}` layout tuple arity {} does not match its {} args",
                best_tuple.len(),
                wrapper.args().len()
            )));
        }
        savings.push(Saving {
            id: wrapper.id,
            best: best_tuple.clone(),
            saving: default_time - best_time,
        });
    }

    // Stable sort keeps arena order among equal savings.
    savings.sort_by(|a, b| b.saving.partial_cmp(&a.saving).unwrap_or(Ordering::Equal));

    let mut schedule = Schedule::new();
    for entry in savings {
        let wrapper = &arena.wrappers[entry.id];
        for (index, arg) in wrapper.args().iter().enumerate() {
            if !schedule.contains(&arg.name) {
                schedule.insert(&arg.name, entry.best[index].clone());
            }
        }
    }
    Ok(schedule)
}
