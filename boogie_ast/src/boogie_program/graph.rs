// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A small directed graph over names, used both for call graphs (nodes are
//! procedure names) and for control-flow graphs (nodes are block labels).

use super::Implementation;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Graph {
    successors: BTreeMap<String, BTreeSet<String>>,
    predecessors: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// The control-flow graph of an implementation, over block labels.
    pub fn block_graph(imp: &Implementation) -> Self {
        let mut graph = Graph::new();
        for block in &imp.blocks {
            graph.add_node(&block.label);
            for succ in block.successors() {
                graph.add_edge(&block.label, succ);
            }
        }
        graph
    }

    pub fn add_node(&mut self, node: &str) {
        self.successors.entry(node.to_string()).or_default();
        self.predecessors.entry(node.to_string()).or_default();
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_node(from);
        self.add_node(to);
        self.successors.entry(from.to_string()).or_default().insert(to.to_string());
        self.predecessors.entry(to.to_string()).or_default().insert(from.to_string());
    }

    pub fn contains(&self, node: &str) -> bool {
        self.successors.contains_key(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.successors.keys().map(String::as_str)
    }

    pub fn successors(&self, node: &str) -> impl Iterator<Item = &str> {
        self.successors.get(node).into_iter().flatten().map(String::as_str)
    }

    pub fn predecessors(&self, node: &str) -> impl Iterator<Item = &str> {
        self.predecessors.get(node).into_iter().flatten().map(String::as_str)
    }

    /// Every node reachable from `node` through at least one edge. `node`
    /// itself is included only if it lies on a cycle.
    pub fn nested_successors(&self, node: &str) -> BTreeSet<String> {
        Self::closure(&self.successors, node)
    }

    /// Every node that reaches `node` through at least one edge.
    pub fn nested_predecessors(&self, node: &str) -> BTreeSet<String> {
        Self::closure(&self.predecessors, node)
    }

    fn closure(edges: &BTreeMap<String, BTreeSet<String>>, node: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<&str> = edges.get(node).into_iter().flatten().map(String::as_str).collect();
        while let Some(next) = queue.pop_front() {
            if visited.insert(next.to_string()) {
                queue.extend(edges.get(next).into_iter().flatten().map(String::as_str));
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boogie_program::{Block, TransferCmd};

    fn goto(labels: &[&str]) -> TransferCmd {
        TransferCmd::Goto { labels: labels.iter().map(|l| l.to_string()).collect() }
    }

    #[test]
    fn nested_closure_on_cfg() {
        let imp = Implementation::new(
            "f",
            vec![],
            vec![
                Block::new("a", vec![], goto(&["b"])),
                Block::new("b", vec![], goto(&["c", "b"])),
                Block::new("c", vec![], TransferCmd::Return),
            ],
        );
        let cfg = Graph::block_graph(&imp);
        assert_eq!(cfg.nested_predecessors("c"), BTreeSet::from(["a".to_string(), "b".to_string()]));
        assert!(cfg.nested_successors("b").contains("b"));
        assert!(!cfg.nested_successors("a").contains("a"));
        assert!(cfg.nested_successors("c").is_empty());
    }

    #[test]
    fn unknown_node_has_no_neighbours() {
        let graph = Graph::new();
        assert_eq!(graph.successors("x").count(), 0);
        assert!(graph.nested_predecessors("x").is_empty());
    }
}
