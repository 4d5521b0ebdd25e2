use crate::{block::BlockId, opcode::Opcode, procedure::Procedure};

/// Breaks the given critical edges.
///
/// A critical edge leaves a block with several successors and enters a block with
/// several predecessors, so code meant to run "on the edge" fits neither end. Each
/// edge `from -> to` gets a new block holding only a `Goto to`. The new block shares
/// the exception handlers of `to`, so anything later placed in it raises where the
/// code it was moved from would have.
///
/// Returns the new blocks in the order of `edges`. Edges that no longer exist are
/// skipped.
pub fn break_critical_edges(proc: &mut Procedure, edges: &[(BlockId, BlockId)]) -> Vec<BlockId> {
    let mut created = Vec::with_capacity(edges.len());

    for (from, to) in edges.iter().copied() {
        let Some(edge_frequency) = proc
            .block(from)
            .successor_list()
            .iter()
            .find(|(succ, _)| *succ == to)
            .map(|(_, f)| *f)
        else {
            continue;
        };

        let frequency = proc.block(from).frequency().min(proc.block(to).frequency());
        let split = proc.add_block(frequency);

        let jump = proc.add_terminator(Opcode::Goto, &[]);
        proc.add_to_block(split, jump);

        proc.block_mut(from).replace_successor(to, split);
        proc.block_mut(split).predecessor_list.push(from);
        proc.block_mut(split).successor_list.push((to, edge_frequency));
        proc.block_mut(to).replace_predecessor(from, split);

        let handlers = proc.block(to).exception_successors().clone();
        for handler in handlers {
            proc.add_exception_successor(split, handler);
        }

        log::trace!("split {} -> {} with {}", from, to, split);
        created.push(split);
    }

    proc.invalidate_cfg();
    created
}

/// Normal edges from a block with several successors into a block with several
/// predecessors.
pub fn critical_edges(proc: &Procedure) -> Vec<(BlockId, BlockId)> {
    let mut result = Vec::new();

    for block in proc.blocks() {
        let successors = proc.normal_successors(block);
        if successors.len() < 2 {
            continue;
        }

        for succ in successors {
            if proc.block(succ).predecessor_list().len() > 1 {
                result.push((block, succ));
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{BasicBlockBuilder, Frequency},
        Options,
    };

    #[test]
    fn split_block_sits_on_the_edge() {
        let mut proc = Procedure::new(Options::default());
        let entry = proc.add_block(1.0);
        let side = proc.add_block(1.0);
        let join = proc.add_block(1.0);
        let handler = proc.add_block(1.0);

        {
            let mut bb = BasicBlockBuilder::new(&mut proc, entry);
            let c = bb.int32(1);
            bb.branch(c, (side, Frequency::Normal), (join, Frequency::Rare));
        }
        BasicBlockBuilder::new(&mut proc, side).goto(join);
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, join);
            bb.handler(handler);
            bb.ret(None);
        }
        BasicBlockBuilder::new(&mut proc, handler).ret(None);

        assert_eq!(critical_edges(&proc), vec![(entry, join)]);

        let created = break_critical_edges(&mut proc, &[(entry, join)]);
        assert_eq!(created.len(), 1);
        let split = created[0];

        assert_eq!(proc.normal_successors(entry), vec![side, split]);
        assert_eq!(proc.block(split).successor_list(), &vec![(join, Frequency::Rare)]);
        assert!(proc.block(join).predecessor_list().contains(&split));
        assert!(!proc.block(join).predecessor_list().contains(&entry));
        assert_eq!(proc.block(split).exception_successors(), &vec![handler]);
        assert!(critical_edges(&proc).is_empty());
    }
}
