use crate::{block::BlockId, node::NodeId, procedure::Procedure};

/// Reference counts of nodes: how many parent slots and statement slots name each node.
/// A node with more than one reference is commoned and evaluated at its first one.
pub struct UseCounts {
    pub counts: Vec<Counts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Counts {
    pub num_uses: usize,
    pub num_using_statements: usize,
}

impl UseCounts {
    pub fn new(proc: &Procedure) -> UseCounts {
        let mut counts = vec![Counts::default(); proc.num_nodes()];

        for block in proc.blocks() {
            Self::count_block(proc, block, &mut counts);
        }

        Self { counts }
    }

    fn count_block(proc: &Procedure, block: BlockId, counts: &mut [Counts]) {
        let mut seen = indexmap::IndexSet::new();

        for statement in proc.block(block).iter().copied() {
            let mut using = indexmap::IndexSet::new();
            counts[statement.0].num_uses += 1;
            Self::count_tree(proc, statement, &mut seen, &mut using, counts);

            for node in using {
                counts[node.0].num_using_statements += 1;
            }
        }
    }

    fn count_tree(
        proc: &Procedure,
        node: NodeId,
        seen: &mut indexmap::IndexSet<NodeId>,
        using: &mut indexmap::IndexSet<NodeId>,
        counts: &mut [Counts],
    ) {
        using.insert(node);

        // Children of an already counted node were counted with it.
        if !seen.insert(node) {
            return;
        }

        for child in proc.node(node).children().iter().copied() {
            counts[child.0].num_uses += 1;
            Self::count_tree(proc, child, seen, using, counts);
        }
    }

    pub fn num_uses(&self, node: NodeId) -> usize {
        self.counts.get(node.0).map_or(0, |c| c.num_uses)
    }

    pub fn num_using_statements(&self, node: NodeId) -> usize {
        self.counts.get(node.0).map_or(0, |c| c.num_using_statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BasicBlockBuilder,
        opcode::Opcode,
        symbol::{Symbol, SymbolKind},
        typ::Type,
        Options,
    };

    #[test]
    fn commoned_node_counts_every_reference() {
        let mut proc = Procedure::new(Options::default());
        let a = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "a"));
        let entry = proc.add_block(1.0);

        let mut b = BasicBlockBuilder::new(&mut proc, entry);
        let load = b.load(a);
        let sum = b.binary(Opcode::Add, load, load);
        b.tree_top(sum);
        b.tree_top(load);
        b.ret(None);

        let counts = UseCounts::new(&proc);
        assert_eq!(counts.num_uses(load), 3);
        assert_eq!(counts.num_using_statements(load), 2);
        assert_eq!(counts.num_uses(sum), 1);
    }
}
