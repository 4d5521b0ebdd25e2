//! Generation-stamped visit marks for walking DAG-shaped trees.
//!
//! A node is "visited" when its mark equals the active generation. Starting a
//! nested walk hands out a generation strictly above every one issued so far.
//! Finishing it restores the enclosing generation together with every mark the
//! nested walk overwrote.

use crate::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u32);

#[derive(Debug, Default)]
pub struct Traversal {
    marks: Vec<u32>,
    current: u32,
    issued: u32,
    /// Marks overwritten by the active scopes, as `(node, previous mark)`.
    overwritten: Vec<(usize, u32)>,
}

impl Traversal {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            marks: vec![0; num_nodes],
            current: 0,
            issued: 0,
            overwritten: Vec::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        Generation(self.current)
    }

    /// Runs `f` under a fresh generation and restores the previous one afterwards.
    pub fn scope<R>(&mut self, f: impl FnOnce(&mut Traversal) -> R) -> R {
        let saved = self.current;
        let undo_from = self.overwritten.len();
        self.issued += 1;
        self.current = self.issued;

        let r = f(self);

        for (node, mark) in self.overwritten.drain(undo_from..).rev() {
            self.marks[node] = mark;
        }
        self.current = saved;
        r
    }

    /// Marks `node` and returns true the first time it is seen in the active generation.
    pub fn visit(&mut self, node: NodeId) -> bool {
        debug_assert!(self.current != 0, "visit outside of a traversal scope");

        if node.0 >= self.marks.len() {
            self.marks.resize(node.0 + 1, 0);
        }

        if self.marks[node.0] == self.current {
            return false;
        }

        self.overwritten.push((node.0, self.marks[node.0]));
        self.marks[node.0] = self.current;
        true
    }

    pub fn is_visited(&self, node: NodeId) -> bool {
        self.marks.get(node.0).copied() == Some(self.current) && self.current != 0
    }
}
