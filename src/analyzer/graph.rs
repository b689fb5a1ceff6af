//! Connectivity graphs over the wrapper arena.
//!
//! A [`Graph`] is an unordered scope of wrappers. Partitioning splits it
//! into weakly connected components; pathification peels off the longest
//! dataflow path repeatedly until every wrapper lives in exactly one
//! [`Sequence`]. Both walk the precomputed arena relations filtered to
//! scope membership.

use crate::analyzer::sequence::Sequence;
use crate::analyzer::wrapper::{Arena, WrapperId};
use crate::analyzer::AnalyzeError;
use crate::layout::format_layouts;
use crate::stats::KStat;

/// An unordered scope of wrappers within one arena.
pub struct Graph<'a> {
    arena: &'a Arena,
    members: Vec<WrapperId>,
    in_scope: Vec<bool>,
}

impl<'a> Graph<'a> {
    /// The scope containing every wrapper of the arena.
    pub fn full(arena: &'a Arena) -> Self {
        Self::with_members(arena, (0..arena.len()).collect())
    }

    pub fn with_members(arena: &'a Arena, members: Vec<WrapperId>) -> Self {
        let mut in_scope = vec![false; arena.len()];
        for &id in &members {
            in_scope[id] = true;
        }
        Graph {
            arena,
            members,
            in_scope,
        }
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
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

    /// In-scope predecessors of a wrapper.
    pub fn scope_prevs(&self, id: WrapperId) -> Vec<WrapperId> {
        self.arena.preds[id]
            .iter()
            .copied()
            .filter(|&p| self.in_scope[p])
            .collect()
    }

    /// In-scope successors of a wrapper.
    pub fn scope_nexts(&self, id: WrapperId) -> Vec<WrapperId> {
        self.arena.succs[id]
            .iter()
            .copied()
            .filter(|&s| self.in_scope[s])
            .collect()
    }

    /// A wrapper is a source in this scope iff it has no in-scope
    /// predecessor.
    pub fn is_source(&self, id: WrapperId) -> bool {
        self.scope_prevs(id).is_empty()
    }

    pub fn is_connected(&self) -> bool {
        self.components().len() <= 1
    }

    /// Weakly connected components, as member lists in discovery order.
    fn components(&self) -> Vec<Vec<WrapperId>> {
        components_of(self.arena, &self.members, &self.in_scope)
    }

    /// Split into connected subgraphs. Every returned graph is connected
    /// and the union is exactly this scope.
    pub fn partitioned(&self) -> Result<Vec<Graph<'a>>, AnalyzeError> {
        let parts = self.components();
        let graphs: Vec<Graph<'a>> = parts
            .into_iter()
            .map(|members| Graph::with_members(self.arena, members))
            .collect();
        for graph in &graphs {
            if !graph.is_connected() {
                return Err(AnalyzeError::Connectivity);
            }
        }
        Ok(graphs)
    }

    /// Decompose a connected scope into linear sequences by repeatedly
    /// extracting the longest dataflow path. With a `kstat`, the hop weight
    /// entering a schedule-layout wrapper is its default-layout time;
    /// otherwise every hop weighs 1.0.
    ///
    /// Iterative work-list over residual subgraphs rather than recursion,
    /// so deep models cannot exhaust the call stack.
    pub fn pathify(&self, kstat: Option<&KStat>) -> Result<Vec<Sequence<'a>>, AnalyzeError> {
        let mut sequences = Vec::new();
        let mut stack = vec![self.members.clone()];
        while let Some(members) = stack.pop() {
            if members.is_empty() {
                continue;
            }
            let graph = Graph::with_members(self.arena, members);
            if !graph.is_connected() {
                return Err(AnalyzeError::Connectivity);
            }
            let path = graph.longest_path(kstat)?;
            let mut residual_scope = graph.in_scope.clone();
            for &id in &path {
                residual_scope[id] = false;
            }
            let residual: Vec<WrapperId> = graph
                .members
                .iter()
                .copied()
                .filter(|&id| residual_scope[id])
                .collect();
            sequences.push(Sequence::new(self.arena, path));
            let parts = components_of(self.arena, &residual, &residual_scope);
            for part in parts.into_iter().rev() {
                stack.push(part);
            }
        }
        Ok(sequences)
    }

    /// Longest path by weighted longest-distance propagation from the
    /// sources. Ties keep the first observed maximum.
    fn longest_path(&self, kstat: Option<&KStat>) -> Result<Vec<WrapperId>, AnalyzeError> {
        let mut table: Vec<Option<(Option<WrapperId>, f64)>> = vec![None; self.arena.len()];
        let mut queue: Vec<WrapperId> = self
            .members
            .iter()
            .copied()
            .filter(|&id| self.is_source(id))
            .collect();
        while let Some(id) = queue.pop() {
            if table[id].is_some() {
                continue;
            }
            if self.is_source(id) {
                table[id] = Some((None, 0.0));
            } else {
                let deps = self.scope_prevs(id);
                if deps.iter().any(|&dep| table[dep].is_none()) {
                    continue;
                }
                let mut best = deps[0];
                let mut best_dist = table[deps[0]].as_ref().map(|(_, d)| *d).unwrap_or(0.0);
                for &dep in &deps[1..] {
                    let dist = table[dep].as_ref().map(|(_, d)| *d).unwrap_or(0.0);
                    if dist > best_dist {
                        best = dep;
                        best_dist = dist;
                    }
                }
                table[id] = Some((Some(best), best_dist + self.hop_weight(id, kstat)?));
            }
            for next in self.scope_nexts(id) {
                if table[next].is_none() {
                    queue.push(next);
                }
            }
        }
        let mut destination = None;
        let mut best_dist = f64::NEG_INFINITY;
        for &id in &self.members {
            if let Some((_, dist)) = table[id] {
                if dist > best_dist {
                    destination = Some(id);
                    best_dist = dist;
                }
            }
        }
        let destination = destination.ok_or(AnalyzeError::Connectivity)?;
        let mut path = vec![destination];
        let mut cursor = destination;
        while let Some(Some((Some(prev), _))) = table.get(cursor).map(Option::as_ref) {
            path.push(*prev);
            cursor = *prev;
        }
        path.reverse();
        Ok(path)
    }

    fn hop_weight(&self, id: WrapperId, kstat: Option<&KStat>) -> Result<f64, AnalyzeError> {
        let wrapper = &self.arena.wrappers[id];
        match (kstat, wrapper.schedule_layout()) {
            (Some(kstat), true) => {
                let kernel = wrapper.entry.as_deref().unwrap_or_default();
                let layouts = wrapper.default_layouts();
                kstat
                    .cell(kernel, &layouts)
                    .ok_or_else(|| AnalyzeError::KStatMiss {
                        kernel: kernel.to_string(),
                        layouts: format_layouts(&layouts),
                    })
            }
            _ => Ok(1.0),
        }
    }
}

fn components_of(arena: &Arena, members: &[WrapperId], in_scope: &[bool]) -> Vec<Vec<WrapperId>> {
    let mut visited = vec![false; arena.len()];
    let mut parts = Vec::new();
    for &start in members {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = vec![start];
        while let Some(id) = queue.pop() {
            if visited[id] {
                continue;
            }
            visited[id] = true;
            component.push(id);
            for &neighbor in arena.preds[id].iter().chain(&arena.succs[id]) {
                if in_scope[neighbor] && !visited[neighbor] {
                    queue.push(neighbor);
                }
            }
        }
        component.sort_unstable();
        parts.push(component);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::wrapper::Arena;
    use crate::ir::parse_module;

    const TWO_CHAINS: &str = r#"module {
  util.func public @main$async(%arg0: !hal.buffer_view, %arg1: !hal.buffer_view) -> (!hal.buffer_view, !hal.buffer_view) {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<2x3xf32>
    %1 = flow.tensor.reshape %0 : tensor<2x3xf32> -> tensor<3x2xf32>
    %2 = hal.tensor.export %1 : tensor<3x2xf32> -> !hal.buffer_view
    %3 = hal.tensor.import %arg1 : !hal.buffer_view -> tensor<4xf32>
    %4 = hal.tensor.export %3 : tensor<4xf32> -> !hal.buffer_view
    util.return %2, %4 : !hal.buffer_view, !hal.buffer_view
  }
}
"#;

    #[test]
    fn partitions_independent_chains() {
        let module = parse_module(TWO_CHAINS).unwrap();
        let arena = Arena::build(module.entry_func().unwrap()).unwrap();
        let graph = Graph::full(&arena);
        let parts = graph.partitioned().unwrap();
        // return has no tensor inputs, so it forms its own component
        assert_eq!(parts.len(), 3);
        let mut all: Vec<_> = parts.iter().flat_map(|g| g.members().to_vec()).collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn pathify_covers_exactly_once() {
        let module = parse_module(TWO_CHAINS).unwrap();
        let arena = Arena::build(module.entry_func().unwrap()).unwrap();
        for part in Graph::full(&arena).partitioned().unwrap() {
            let part_len = part.len();
            let seqs = part.pathify(None).unwrap();
            let mut covered: Vec<_> = seqs.iter().flat_map(|s| s.members().to_vec()).collect();
            covered.sort_unstable();
            covered.dedup();
            assert_eq!(covered.len(), part_len);
            // first sequence is at least as long as any other
            for seq in &seqs[1..] {
                assert!(seqs[0].len() >= seq.len());
            }
        }
    }

    #[test]
    fn longest_path_follows_spine() {
        let text = r#"module {
  util.func public @main$async(%arg0: !hal.buffer_view) -> !hal.buffer_view {
    %0 = hal.tensor.import %arg0 : !hal.buffer_view -> tensor<2x2xf32>
    %1 = flow.tensor.reshape %0 : tensor<2x2xf32> -> tensor<4xf32>
    %2 = flow.tensor.reshape %1 : tensor<4xf32> -> tensor<2x2xf32>
    %3 = hal.tensor.export %2 : tensor<2x2xf32> -> !hal.buffer_view
    %4 = hal.tensor.export %0 : tensor<2x2xf32> -> !hal.buffer_view
    util.return %3, %4 : !hal.buffer_view, !hal.buffer_view
  }
}
"#;
        let module = parse_module(text).unwrap();
        let arena = Arena::build(module.entry_func().unwrap()).unwrap();
        let graph = Graph::full(&arena);
        let parts = graph.partitioned().unwrap();
        let chain = parts.iter().find(|g| g.len() == 5).unwrap();
        let seqs = chain.pathify(None).unwrap();
        assert_eq!(seqs[0].members(), &[0, 1, 2, 3]);
        assert_eq!(seqs[1].members(), &[4]);
    }
}
