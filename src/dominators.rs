use std::{borrow::Cow, fmt::Debug, hash::Hash};

use crate::utils::index_set::{IndexSet, KeyIndex};

pub trait Graph {
    type Node: Copy + Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug + From<usize> + Into<usize> + KeyIndex;

    fn num_nodes(&self) -> usize;
    fn node(&self, index: usize) -> Option<Self::Node>;
    fn node_index(&self, node: Self::Node) -> usize;
    fn root(&self) -> Self::Node;
    fn successors(&self, block: Self::Node) -> Cow<[Self::Node]>;
    fn predecessors(&self, block: Self::Node) -> Cow<[Self::Node]>;

    fn display(&self, block: Option<Self::Node>) -> String {
        if let Some(block) = block {
            format!("{:?}", block)
        } else {
            "null".to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphVisitOrder {
    Pre,
    Post,
}

pub struct PostOrderGraphNodeWorklist<Node: KeyIndex> {
    seen: IndexSet<Node>,
    stack: Vec<(Node, GraphVisitOrder)>,
}

impl<Node: Copy + KeyIndex> PostOrderGraphNodeWorklist<Node> {
    pub fn new() -> Self {
        Self {
            seen: IndexSet::new(0),
            stack: Vec::new(),
        }
    }

    pub fn push_post(&mut self, node: Node) {
        self.stack.push((node, GraphVisitOrder::Post));
    }

    /// Pre visits are pushed once per node, post visits unconditionally.
    pub fn push(&mut self, node: Node, order: GraphVisitOrder) -> bool {
        if order == GraphVisitOrder::Pre && !self.seen.insert(node) {
            return false;
        }

        self.stack.push((node, order));
        true
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn pop(&mut self) -> Option<(Node, GraphVisitOrder)> {
        self.stack.pop()
    }
}

impl<Node: Copy + KeyIndex> Default for PostOrderGraphNodeWorklist<Node> {
    fn default() -> Self {
        Self::new()
    }
}

/// Post order of a depth first walk from `root`. Successors are explored in list order.
pub fn depth_first_post_order<G: Graph>(graph: &G, root: G::Node) -> Vec<G::Node> {
    let mut result = Vec::new();
    let mut seen = IndexSet::new(graph.num_nodes());
    let mut stack: Vec<(G::Node, usize)> = vec![(root, 0)];
    seen.insert(root);

    while let Some((node, successor_index)) = stack.pop() {
        let successors = graph.successors(node);

        if successor_index < successors.len() {
            stack.push((node, successor_index + 1));

            let successor = successors[successor_index];
            if seen.insert(successor) {
                stack.push((successor, 0));
            }
        } else {
            result.push(node);
        }
    }

    result
}

#[derive(Debug, Clone)]
struct DomBlockData<N> {
    idom_kids: Vec<N>,
    pre_number: usize,
    post_number: usize,
}

/// Dominator tree computed with the iterative algorithm of Cooper, Harvey and Kennedy
/// ("A Simple, Fast Dominance Algorithm"). Dominance queries use pre and post numbers
/// of the dominator tree, so `dominates` is a range inclusion check.
///
/// Blocks unreachable from the root have no immediate dominator and dominate nothing.
#[derive(Debug, Clone)]
pub struct Dominators<G: Graph> {
    data: Vec<DomBlockData<G::Node>>,
    reachable: IndexSet<G::Node>,
}

impl<G: Graph> Dominators<G> {
    pub fn new(graph: &G) -> Self {
        let n = graph.num_nodes();
        let root = graph.root();

        let post_order = depth_first_post_order(graph, root);

        let mut rpo_number = vec![usize::MAX; n];
        for (i, node) in post_order.iter().rev().enumerate() {
            rpo_number[graph.node_index(*node)] = i;
        }

        let mut idom: Vec<Option<G::Node>> = vec![None; n];
        idom[graph.node_index(root)] = Some(root);

        let mut changed = true;
        while changed {
            changed = false;

            for node in post_order.iter().rev().copied() {
                if node == root {
                    continue;
                }

                let mut new_idom: Option<G::Node> = None;

                for pred in graph.predecessors(node).iter().copied() {
                    if idom[graph.node_index(pred)].is_none() {
                        continue;
                    }

                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(graph, &idom, &rpo_number, pred, current),
                    });
                }

                if new_idom.is_some() && idom[graph.node_index(node)] != new_idom {
                    idom[graph.node_index(node)] = new_idom;
                    changed = true;
                }
            }
        }

        let mut data: Vec<DomBlockData<G::Node>> = (0..n)
            .map(|_| DomBlockData {
                idom_kids: Vec::new(),
                pre_number: usize::MAX,
                post_number: usize::MAX,
            })
            .collect();

        let mut reachable = IndexSet::new(n);

        for node in post_order.iter().rev().copied() {
            reachable.insert(node);

            if node == root {
                continue;
            }

            if let Some(parent) = idom[graph.node_index(node)] {
                data[graph.node_index(parent)].idom_kids.push(node);
            }
        }

        let mut next_pre = 0;
        let mut next_post = 0;
        let mut worklist = PostOrderGraphNodeWorklist::new();
        worklist.push(root, GraphVisitOrder::Pre);

        while let Some((node, order)) = worklist.pop() {
            match order {
                GraphVisitOrder::Pre => {
                    data[graph.node_index(node)].pre_number = next_pre;
                    next_pre += 1;

                    worklist.push_post(node);
                    for kid in data[graph.node_index(node)].idom_kids.clone().into_iter().rev() {
                        worklist.push(kid, GraphVisitOrder::Pre);
                    }
                }
                GraphVisitOrder::Post => {
                    data[graph.node_index(node)].post_number = next_post;
                    next_post += 1;
                }
            }
        }

        Self { data, reachable }
    }

    fn data(&self, node: G::Node) -> &DomBlockData<G::Node> {
        &self.data[node.index()]
    }

    pub fn is_reachable(&self, node: G::Node) -> bool {
        self.reachable.contains(node)
    }

    pub fn dominates(&self, from: G::Node, to: G::Node) -> bool {
        if !self.is_reachable(from) || !self.is_reachable(to) {
            return false;
        }

        let from = self.data(from);
        let to = self.data(to);
        to.pre_number >= from.pre_number && to.post_number <= from.post_number
    }
}

fn intersect<G: Graph>(
    graph: &G,
    idom: &[Option<G::Node>],
    rpo_number: &[usize],
    mut a: G::Node,
    mut b: G::Node,
) -> G::Node {
    while a != b {
        while rpo_number[graph.node_index(a)] > rpo_number[graph.node_index(b)] {
            match idom[graph.node_index(a)] {
                Some(next) => a = next,
                None => return b,
            }
        }
        while rpo_number[graph.node_index(b)] > rpo_number[graph.node_index(a)] {
            match idom[graph.node_index(b)] {
                Some(next) => b = next,
                None => return a,
            }
        }
    }

    a
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestGraph {
        succs: Vec<Vec<usize>>,
        preds: Vec<Vec<usize>>,
    }

    impl TestGraph {
        fn new(n: usize, edges: &[(usize, usize)]) -> Self {
            let mut succs = vec![vec![]; n];
            let mut preds = vec![vec![]; n];
            for &(a, b) in edges {
                succs[a].push(b);
                preds[b].push(a);
            }
            Self { succs, preds }
        }
    }

    impl Graph for TestGraph {
        type Node = usize;

        fn num_nodes(&self) -> usize {
            self.succs.len()
        }

        fn node(&self, index: usize) -> Option<usize> {
            Some(index)
        }

        fn node_index(&self, node: usize) -> usize {
            node
        }

        fn root(&self) -> usize {
            0
        }

        fn successors(&self, block: usize) -> Cow<[usize]> {
            Cow::Borrowed(&self.succs[block])
        }

        fn predecessors(&self, block: usize) -> Cow<[usize]> {
            Cow::Borrowed(&self.preds[block])
        }
    }

    #[test]
    fn diamond_with_loop() {
        // 0 -> 1 -> {2, 3} -> 4 -> 1, 4 -> 5; 6 unreachable
        let graph = TestGraph::new(7, &[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4), (4, 1), (4, 5), (6, 5)]);
        let dominators = Dominators::new(&graph);

        assert!(dominators.dominates(0, 5));
        assert!(dominators.dominates(1, 4));
        assert!(dominators.dominates(4, 5));
        assert!(dominators.dominates(4, 4));
        assert!(!dominators.dominates(2, 4));
        assert!(!dominators.dominates(4, 1));
        assert!(!dominators.is_reachable(6));
        assert!(!dominators.dominates(6, 5));
    }

    #[test]
    fn post_order_is_depth_first() {
        let graph = TestGraph::new(3, &[(0, 1), (0, 2), (1, 2)]);
        assert_eq!(depth_first_post_order(&graph, 0), vec![2, 1, 0]);
    }
}
