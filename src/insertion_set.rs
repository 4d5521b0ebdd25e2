use crate::{block::BlockId, node::NodeId, procedure::Procedure, symbol::SymbolId};

/// `statement` goes in front of the statement now at `index`. An index equal to
/// the block length appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    pub index: usize,
    pub statement: NodeId,
}

/// Splices `insertions`, sorted by index, into `target` with one backward sweep.
/// Returns how many statements were inserted.
pub fn execute_insertions(target: &mut Vec<NodeId>, insertions: &mut Vec<Insertion>) -> usize {
    let count = insertions.len();
    if count == 0 {
        return 0;
    }

    target.resize(target.len() + count, NodeId::default());
    let mut end = target.len();

    for k in (0..count).rev() {
        let slot = insertions[k].index + k;
        let shift = k + 1;

        for i in (slot + 1..end).rev() {
            target[i] = target[i - shift];
        }

        target[slot] = insertions[k].statement;
        end = slot;
    }

    insertions.clear();
    count
}

/// Statements to add to one block, keyed by positions in the block as it is now.
/// Statements queued at the same index keep the order they were queued in.
#[derive(Debug, Default)]
pub struct InsertionSet {
    insertions: Vec<Insertion>,
}

impl InsertionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.insertions.len()
    }

    pub fn insert(&mut self, index: usize, statement: NodeId) -> NodeId {
        self.insertions.push(Insertion { index, statement });
        statement
    }

    pub fn insert_tree_top(&mut self, index: usize, child: NodeId, proc: &mut Procedure) -> NodeId {
        let anchor = proc.add_tree_top(&[child]);
        self.insert(index, anchor)
    }

    pub fn insert_store(&mut self, index: usize, symbol: SymbolId, value: NodeId, proc: &mut Procedure) -> NodeId {
        let store = proc.add_store(symbol, value);
        self.insert(index, store)
    }

    pub fn execute(&mut self, proc: &mut Procedure, block: BlockId) -> usize {
        // Stable, so equal indices keep queue order.
        self.insertions.sort_by_key(|insertion| insertion.index);
        execute_insertions(&mut proc.block_mut(block).statements, &mut self.insertions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertions_land_before_their_index_in_queue_order() {
        let mut target = vec![NodeId(10), NodeId(11), NodeId(12)];
        let mut insertions = vec![
            Insertion {
                index: 1,
                statement: NodeId(1),
            },
            Insertion {
                index: 1,
                statement: NodeId(2),
            },
            Insertion {
                index: 3,
                statement: NodeId(3),
            },
        ];

        assert_eq!(execute_insertions(&mut target, &mut insertions), 3);
        assert_eq!(
            target,
            vec![NodeId(10), NodeId(1), NodeId(2), NodeId(11), NodeId(12), NodeId(3)]
        );
        assert!(insertions.is_empty());
    }
}
