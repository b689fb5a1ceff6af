//! Linear sequences and the layout-selection DP.
//!
//! A [`Sequence`] is a maximal linear chain of wrappers peeled off a graph
//! by pathification. `schedule` runs a shortest-path DP over the chain: at
//! each wrapper the permitted (input layout, output layout) pairs and their
//! costs come from the wrapper's layout policy, and the "wind" tracks the
//! cheapest cumulative time per output layout. Rewinding from every optimal
//! terminal layout yields one candidate [`Schedule`] each.
//!
//! Args that sit on no chain edge are resolved by majority over a tie table
//! accumulated across the whole sequence; when several sequences disagree
//! on a shared value, the outer [`Schedule::merge`] majority decides. Both
//! majorities break ties on the first layout to reach the top count.

use std::collections::BTreeMap;

use crate::analyzer::wrapper::{Arena, LayoutPolicy, OpWrapper, WrapperId};
use crate::analyzer::AnalyzeError;
use crate::layout::{permute_shape, Layout};
use crate::stats::schedule::most_common;
use crate::stats::{KStat, Schedule, ScheduleGroup};

/// An ordered scope of wrappers forming one dataflow chain.
pub struct Sequence<'a> {
    arena: &'a Arena,
    members: Vec<WrapperId>,
}

/// Key of one chain edge in the DP wind: a tensor value name, or a
/// placeholder for a missing outer edge.
#[derive(Clone, Debug, PartialEq, Eq)]
enum EdgeKey {
    Value(String),
    Dummy(usize),
}

/// One resolved chain edge: key, value shape, and the arg index it occupies
/// on the wrapper under consideration (none for placeholders).
struct Edge {
    key: EdgeKey,
    shape: Vec<u64>,
    arg_index: Option<usize>,
}

type Wind = Vec<(EdgeKey, BTreeMap<Layout, (f64, Option<Layout>)>)>;

impl<'a> Sequence<'a> {
    pub fn new(arena: &'a Arena, members: Vec<WrapperId>) -> Self {
        Sequence { arena, members }
    }

    pub fn members(&self) -> &[WrapperId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn wrappers(&self) -> impl Iterator<Item = &OpWrapper> {
        self.members.iter().map(|&id| &self.arena.wrappers[id])
    }

    /// Run the layout-selection DP against the measured kernel times.
    pub fn schedule(&self, kstat: &KStat) -> Result<ScheduleGroup, AnalyzeError> {
        let mut wind: Wind = Vec::new();
        let mut tie_table: BTreeMap<String, Vec<Layout>> = BTreeMap::new();
        let mut dummy_counter = 0usize;

        for (pos, &id) in self.members.iter().enumerate() {
            let wrapper = &self.arena.wrappers[id];
            let input = self.scope_input(pos, &mut dummy_counter)?;
            let output = self.scope_output(pos, &mut dummy_counter)?;
            let choices = self.choices(wrapper, &input, &output, kstat, &mut tie_table)?;

            if pos == 0 {
                let seed: BTreeMap<Layout, (f64, Option<Layout>)> = choices
                    .keys()
                    .map(|(input_layout, _)| (input_layout.clone(), (0.0, None)))
                    .collect();
                wind.push((input.key.clone(), seed));
            }
            let (prev_key, prev_table) = wind.last().ok_or_else(|| {
                AnalyzeError::Internal("empty wind during sequence scheduling".to_string())
            })?;
            if *prev_key != input.key {
                return Err(AnalyzeError::Internal(
                    "edge key mismatch along sequence".to_string(),
                ));
            }

            let mut next_table: BTreeMap<Layout, (f64, Option<Layout>)> = BTreeMap::new();
            let mut feasible = false;
            for ((input_layout, output_layout), cost) in &choices {
                let Some(&(prev_time, _)) = prev_table.get(input_layout) else {
                    continue;
                };
                feasible = true;
                let total = prev_time + cost;
                let better = match next_table.get(output_layout) {
                    Some(&(current, _)) => total < current,
                    None => true,
                };
                if better {
                    next_table.insert(output_layout.clone(), (total, Some(input_layout.clone())));
                }
            }
            if !feasible {
                return Err(AnalyzeError::Infeasible {
                    symbol: wrapper
                        .entry
                        .clone()
                        .unwrap_or_else(|| format!("{:?}", wrapper.category)),
                });
            }
            wind.push((output.key, next_table));
        }

        let mut group = ScheduleGroup::new();
        let Some((last_key, last_table)) = wind.last() else {
            return Ok(group);
        };
        let min_time = last_table
            .values()
            .map(|&(time, _)| time)
            .fold(f64::INFINITY, f64::min);
        for (terminal, &(time, ref prev)) in last_table {
            if time > min_time {
                continue;
            }
            let mut schedule = Schedule::new();
            if let EdgeKey::Value(name) = last_key {
                schedule.insert(name, terminal.clone());
            }
            let mut carried = prev.clone();
            for (key, table) in wind[..wind.len() - 1].iter().rev() {
                let Some(current) = carried else {
                    return Err(AnalyzeError::Internal(
                        "rewind ran out of chosen layouts".to_string(),
                    ));
                };
                let &(_, ref previous) = table.get(&current).ok_or_else(|| {
                    AnalyzeError::Internal("rewind hit an unknown layout".to_string())
                })?;
                if let EdgeKey::Value(name) = key {
                    schedule.insert(name, current.clone());
                }
                carried = previous.clone();
            }
            for (name, layouts) in &tie_table {
                if !schedule.contains(name) {
                    schedule.insert(name, most_common(layouts));
                }
            }
            group.push(schedule);
        }
        Ok(group)
    }

    /// Permitted (input, output) layout pairs and their cost for one
    /// wrapper, per its policy. Ties among minimal schedule-layout entries
    /// and the defaults of force-layout non-edge args feed the tie table.
    fn choices(
        &self,
        wrapper: &OpWrapper,
        input: &Edge,
        output: &Edge,
        kstat: &KStat,
        tie_table: &mut BTreeMap<String, Vec<Layout>>,
    ) -> Result<BTreeMap<(Layout, Layout), f64>, AnalyzeError> {
        match wrapper.policy() {
            LayoutPolicy::Schedule => {
                let kernel = wrapper.entry.as_deref().unwrap_or_default();
                let table = kstat
                    .kernel(kernel)
                    .ok_or_else(|| AnalyzeError::KernelMiss {
                        kernel: kernel.to_string(),
                    })?;
                let input_index = input.arg_index.ok_or_else(|| {
                    AnalyzeError::Internal(format!("kernel `{kernel}` has no chain input edge"))
                })?;
                let output_index = output.arg_index.ok_or_else(|| {
                    AnalyzeError::Internal(format!("kernel `{kernel}` has no chain output edge"))
                })?;
                let args = wrapper.args();
                let mut groups: BTreeMap<(Layout, Layout), f64> = BTreeMap::new();
                for (tuple, &time) in table {
                    if tuple.len() != args.len() {
                        return Err(AnalyzeError::Internal(format!(
                            "kernel `{kernel}` layout tuple arity {} does not match its {} args",
                            tuple.len(),
                            args.len()
                        )));
                    }
                    let key = (tuple[input_index].clone(), tuple[output_index].clone());
                    match groups.get(&key) {
                        Some(&current) if current <= time => {}
                        _ => {
                            groups.insert(key, time);
                        }
                    }
                }
                for (tuple, &time) in table {
                    let key = (tuple[input_index].clone(), tuple[output_index].clone());
                    if groups.get(&key) != Some(&time) {
                        continue;
                    }
                    for (index, arg) in args.iter().enumerate() {
                        if index == input_index || index == output_index {
                            continue;
                        }
                        tie_table
                            .entry(arg.name.clone())
                            .or_default()
                            .push(tuple[index].clone());
                    }
                }
                Ok(groups)
            }
            LayoutPolicy::Force => {
                for (index, arg) in wrapper.args().iter().enumerate() {
                    if Some(index) != input.arg_index && Some(index) != output.arg_index {
                        tie_table
                            .entry(arg.name.clone())
                            .or_default()
                            .push(Layout::identity(arg.shape.len()));
                    }
                }
                let mut choices = BTreeMap::new();
                choices.insert(
                    (
                        Layout::identity(input.shape.len()),
                        Layout::identity(output.shape.len()),
                    ),
                    0.0,
                );
                Ok(choices)
            }
            LayoutPolicy::Any => {
                let mut choices = BTreeMap::new();
                for input_layout in permute_shape(&input.shape) {
                    for output_layout in permute_shape(&output.shape) {
                        choices.insert((input_layout.clone(), output_layout), 0.0);
                    }
                }
                Ok(choices)
            }
        }
    }

    /// The unique in-sequence predecessor's shared tensor, or the wrapper's
    /// sole external input, or a placeholder.
    fn scope_input(&self, pos: usize, dummy_counter: &mut usize) -> Result<Edge, AnalyzeError> {
        let wrapper = &self.arena.wrappers[self.members[pos]];
        if pos > 0 {
            let prev = self.members[pos - 1];
            let value = wrapper
                .inputs
                .iter()
                .find(|v| v.producer == prev)
                .ok_or_else(|| {
                    AnalyzeError::Internal("consecutive wrappers share no tensor".to_string())
                })?;
            Ok(Edge {
                key: EdgeKey::Value(value.name.clone()),
                shape: value.shape.clone(),
                arg_index: wrapper.arg_index(&value.name),
            })
        } else if wrapper.inputs.len() == 1 {
            let value = &wrapper.inputs[0];
            Ok(Edge {
                key: EdgeKey::Value(value.name.clone()),
                shape: value.shape.clone(),
                arg_index: wrapper.arg_index(&value.name),
            })
        } else {
            Ok(self.dummy_edge(dummy_counter))
        }
    }

    /// Mirror of [`Sequence::scope_input`] over successors and outputs.
    fn scope_output(&self, pos: usize, dummy_counter: &mut usize) -> Result<Edge, AnalyzeError> {
        let wrapper = &self.arena.wrappers[self.members[pos]];
        if pos + 1 < self.members.len() {
            let next = &self.arena.wrappers[self.members[pos + 1]];
            let value = wrapper
                .outputs
                .iter()
                .find(|v| next.inputs.iter().any(|i| i.name == v.name))
                .ok_or_else(|| {
                    AnalyzeError::Internal("consecutive wrappers share no tensor".to_string())
                })?;
            Ok(Edge {
                key: EdgeKey::Value(value.name.clone()),
                shape: value.shape.clone(),
                arg_index: wrapper.arg_index(&value.name),
            })
        } else if wrapper.outputs.len() == 1 {
            let value = &wrapper.outputs[0];
            Ok(Edge {
                key: EdgeKey::Value(value.name.clone()),
                shape: value.shape.clone(),
                arg_index: wrapper.arg_index(&value.name),
            })
        } else {
            Ok(self.dummy_edge(dummy_counter))
        }
    }

    fn dummy_edge(&self, dummy_counter: &mut usize) -> Edge {
        let key = EdgeKey::Dummy(*dummy_counter);
        *dummy_counter += 1;
        Edge {
            key,
            shape: Vec::new(),
            arg_index: None,
        }
    }
}
