//! Layout assignments for tensor values.
//!
//! A [`Schedule`] maps each SSA value name to its chosen layout. Sequences
//! each produce one or more candidate schedules, collected in a
//! [`ScheduleGroup`]; merging resolves per-key conflicts by majority with a
//! first-most-common tie-break.

use std::collections::BTreeMap;

use crate::layout::Layout;
use crate::stats::StatError;

/// `tensor value name → layout`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    table: BTreeMap<String, Layout>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: &str, layout: Layout) {
        self.table.insert(value.to_string(), layout);
    }

    pub fn get(&self, value: &str) -> Option<&Layout> {
        self.table.get(value)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.table.contains_key(value)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Layout)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Majority-merge: each key takes its most frequent layout across the
    /// given schedules; ties keep the first layout to reach the top count.
    pub fn merge<'a>(schedules: impl IntoIterator<Item = &'a Schedule>) -> Schedule {
        let mut votes: BTreeMap<&str, Vec<Layout>> = BTreeMap::new();
        for schedule in schedules {
            for (key, layout) in schedule.iter() {
                votes.entry(key).or_default().push(layout.clone());
            }
        }
        let mut merged = Schedule::new();
        for (key, layouts) in votes {
            merged.insert(key, most_common(&layouts));
        }
        merged
    }

    pub fn dump(&self) -> Result<String, StatError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn load(text: &str) -> Result<Schedule, StatError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// First-most-common element of a non-empty slice, counting in encounter
/// order so ties resolve deterministically.
pub(crate) fn most_common(layouts: &[Layout]) -> Layout {
    let mut counts: Vec<(&Layout, usize)> = Vec::new();
    for layout in layouts {
        match counts.iter_mut().find(|(seen, _)| *seen == layout) {
            Some((_, n)) => *n += 1,
            None => counts.push((layout, 1)),
        }
    }
    let mut best = &counts[0];
    for entry in &counts[1..] {
        if entry.1 > best.1 {
            best = entry;
        }
    }
    best.0.clone()
}

/// The candidate schedules produced by analysing one or more sequences.
#[derive(Clone, Debug, Default)]
pub struct ScheduleGroup {
    schedules: Vec<Schedule>,
}

impl ScheduleGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, schedule: Schedule) {
        self.schedules.push(schedule);
    }

    /// Append every schedule of `other`, preserving order.
    pub fn union(&mut self, other: ScheduleGroup) {
        self.schedules.extend(other.schedules);
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schedule> {
        self.schedules.iter()
    }

    /// Collapse the group into one schedule by majority.
    pub fn merge(&self) -> Schedule {
        Schedule::merge(self.schedules.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l(dims: &[usize]) -> Layout {
        Layout(dims.to_vec())
    }

    fn schedule(entries: &[(&str, &[usize])]) -> Schedule {
        let mut s = Schedule::new();
        for (name, dims) in entries {
            s.insert(name, l(dims));
        }
        s
    }

    #[test]
    fn merge_majority_wins() {
        let a = schedule(&[("%0", &[0, 1])]);
        let b = schedule(&[("%0", &[1, 0])]);
        let c = schedule(&[("%0", &[1, 0])]);
        let merged = Schedule::merge([&a, &b, &c]);
        assert_eq!(merged.get("%0"), Some(&l(&[1, 0])));
    }

    #[test]
    fn merge_tie_keeps_first_seen() {
        let a = schedule(&[("%0", &[0, 1])]);
        let b = schedule(&[("%0", &[1, 0])]);
        let merged = Schedule::merge([&a, &b]);
        assert_eq!(merged.get("%0"), Some(&l(&[0, 1])));
    }

    #[test]
    fn merge_covers_all_keys_once() {
        let a = schedule(&[("%0", &[0, 1]), ("%1", &[1, 0])]);
        let b = schedule(&[("%1", &[1, 0]), ("%2", &[0])]);
        let merged = Schedule::merge([&a, &b]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("%2"), Some(&l(&[0])));
    }

    #[test]
    fn json_round_trip() {
        let s = schedule(&[("%0", &[2, 0, 1]), ("%arg0", &[])]);
        let text = s.dump().unwrap();
        let back = Schedule::load(&text).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.dump().unwrap(), text);
    }

    #[test]
    fn group_union_and_merge() {
        let mut g = ScheduleGroup::new();
        g.push(schedule(&[("%0", &[0, 1])]));
        let mut h = ScheduleGroup::new();
        h.push(schedule(&[("%0", &[1, 0])]));
        h.push(schedule(&[("%0", &[1, 0])]));
        g.union(h);
        assert_eq!(g.len(), 3);
        assert_eq!(g.merge().get("%0"), Some(&l(&[1, 0])));
    }
}
