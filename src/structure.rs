//! Hierarchical decomposition of the CFG into nested natural-loop regions.
//!
//! The root is an acyclic region; every natural loop becomes a region nested
//! inside the region of its outer loop, and every reachable block is a leaf of
//! the innermost region containing it. Children are kept in reverse post order,
//! so a loop region sits where its header does.

use crate::{
    analysis::AnalysisKind,
    block::{blocks_in_reverse_post_order, BlockId},
    error::{PreError, Result},
    natural_loops::NaturalLoops,
    procedure::Procedure,
    utils::index_set::{IndexSet, KeyIndex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructureId(pub usize);

impl KeyIndex for StructureId {
    fn index(&self) -> usize {
        self.0
    }

    fn from_index(index: usize) -> Self {
        StructureId(index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructureKind {
    Block(BlockId),
    Region {
        /// Header of the natural loop, or `None` for the acyclic root.
        header: Option<BlockId>,
        children: Vec<StructureId>,
    },
}

#[derive(Debug, Clone)]
pub struct StructureNode {
    pub kind: StructureKind,
    pub parent: Option<StructureId>,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct StructureTree {
    nodes: Vec<StructureNode>,
    root: StructureId,
    leaf_of: Vec<Option<StructureId>>,
    reverse_post_order: Vec<BlockId>,
}

impl StructureTree {
    pub fn build(proc: &mut Procedure) -> Self {
        let loops = proc.natural_loops_or_compute();
        let rpo = blocks_in_reverse_post_order(proc.cfg_root(), proc);

        let mut tree = Self {
            nodes: vec![],
            root: StructureId(0),
            leaf_of: vec![None; proc.num_blocks()],
            reverse_post_order: rpo.clone(),
        };

        tree.root = tree.build_region(None, None, &rpo, 0, &loops);
        tree
    }

    fn build_region(
        &mut self,
        loop_index: Option<usize>,
        parent: Option<StructureId>,
        blocks: &[BlockId],
        depth: usize,
        loops: &NaturalLoops<Procedure>,
    ) -> StructureId {
        let id = StructureId(self.nodes.len());
        self.nodes.push(StructureNode {
            kind: StructureKind::Region {
                header: loop_index.map(|l| loops.loop_(l).header()),
                children: vec![],
            },
            parent,
            depth,
        });

        let mut children = vec![];
        let mut emitted_loops = IndexSet::<usize>::new(loops.num_loops());

        for block in blocks.iter().copied() {
            // The loop directly nested in this region that contains `block`, if any.
            let child_loop = loops
                .loops_of(block)
                .into_iter()
                .find(|l| l.outer_loop_index() == loop_index && Some(l.index()) != loop_index)
                .map(|l| l.index());

            match child_loop {
                Some(child_loop) => {
                    if emitted_loops.insert(child_loop) {
                        let inner: Vec<BlockId> = blocks
                            .iter()
                            .copied()
                            .filter(|b| loops.loop_(child_loop).contains(*b))
                            .collect();
                        let region = self.build_region(Some(child_loop), Some(id), &inner, depth + 1, loops);
                        children.push(region);
                    }
                }
                None => {
                    let leaf = StructureId(self.nodes.len());
                    self.nodes.push(StructureNode {
                        kind: StructureKind::Block(block),
                        parent: Some(id),
                        depth: depth + 1,
                    });
                    self.leaf_of[block.0] = Some(leaf);
                    children.push(leaf);
                }
            }
        }

        if let StructureKind::Region { children: slot, .. } = &mut self.nodes[id.0].kind {
            *slot = children;
        }

        id
    }

    pub fn root(&self) -> StructureId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: StructureId) -> &StructureNode {
        &self.nodes[id.0]
    }

    pub fn leaf_of(&self, block: BlockId) -> Option<StructureId> {
        self.leaf_of.get(block.0).copied().flatten()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.leaf_of(block).is_some()
    }

    /// Reachable blocks in reverse post order.
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.reverse_post_order
    }

    pub fn num_regions(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, StructureKind::Region { .. }))
            .count()
    }
}

/// Per structure node "analyzed before" flags and result slot. The cache is tagged
/// with the analysis it was reset for; touching it under another analysis is an
/// invariant violation, since slots from one analysis mean nothing to another.
#[derive(Debug, Clone)]
pub struct StructureCache<T> {
    kind: Option<AnalysisKind>,
    analyzed: Vec<bool>,
    slots: Vec<Option<T>>,
}

impl<T> Default for StructureCache<T> {
    fn default() -> Self {
        Self {
            kind: None,
            analyzed: vec![],
            slots: vec![],
        }
    }
}

impl<T> StructureCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, kind: AnalysisKind, len: usize) {
        self.kind = Some(kind);
        self.analyzed.clear();
        self.analyzed.resize(len, false);
        self.slots.clear();
        self.slots.resize_with(len, || None);
    }

    pub fn kind(&self) -> Option<AnalysisKind> {
        self.kind
    }

    fn check(&self, kind: AnalysisKind) -> Result<()> {
        match self.kind {
            Some(current) if current == kind => Ok(()),
            Some(current) => Err(PreError::invariant(format!(
                "structure cache reset for {:?} used by {:?}",
                current, kind
            ))),
            None => Err(PreError::invariant(format!("structure cache used by {:?} before reset", kind))),
        }
    }

    pub fn analyzed_before(&self, kind: AnalysisKind, id: StructureId) -> Result<bool> {
        self.check(kind)?;
        Ok(self.analyzed[id.0])
    }

    pub fn slot(&self, kind: AnalysisKind, id: StructureId) -> Result<Option<&T>> {
        self.check(kind)?;
        Ok(self.slots[id.0].as_ref())
    }

    pub fn set_slot(&mut self, kind: AnalysisKind, id: StructureId, value: T) -> Result<()> {
        self.check(kind)?;
        self.analyzed[id.0] = true;
        self.slots[id.0] = Some(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BasicBlockBuilder, Options};

    #[test]
    fn loop_becomes_nested_region() {
        let mut proc = Procedure::new(Options::default());
        let entry = proc.add_block(1.0);
        let header = proc.add_block(1.0);
        let body = proc.add_block(1.0);
        let exit = proc.add_block(1.0);
        let dead = proc.add_block(1.0);

        BasicBlockBuilder::new(&mut proc, entry).goto(header);
        {
            let mut b = BasicBlockBuilder::new(&mut proc, header);
            let c = b.int32(1);
            b.branch(c, (body, Default::default()), (exit, Default::default()));
        }
        BasicBlockBuilder::new(&mut proc, body).goto(header);
        BasicBlockBuilder::new(&mut proc, exit).ret(None);
        BasicBlockBuilder::new(&mut proc, dead).goto(exit);

        let tree = StructureTree::build(&mut proc);
        assert_eq!(tree.num_regions(), 2);
        assert!(!tree.is_reachable(dead));

        let StructureKind::Region { children, header: None } = &tree.node(tree.root()).kind else {
            panic!("root must be the acyclic region");
        };
        assert_eq!(children.len(), 3);
        assert!(matches!(
            tree.node(children[1]).kind,
            StructureKind::Region { header: Some(h), .. } if h == header
        ));

        let leaf = tree.leaf_of(body).unwrap();
        assert_eq!(tree.node(leaf).depth, 2);
    }

    #[test]
    fn cache_refuses_other_analysis() {
        let mut cache: StructureCache<u32> = StructureCache::new();
        cache.reset(AnalysisKind::GlobalAnticipatability, 2);
        cache.set_slot(AnalysisKind::GlobalAnticipatability, StructureId(1), 7).unwrap();

        assert_eq!(cache.slot(AnalysisKind::GlobalAnticipatability, StructureId(1)), Ok(Some(&7)));
        assert!(cache.slot(AnalysisKind::Earliestness, StructureId(1)).is_err());
        assert!(cache.analyzed_before(AnalysisKind::GlobalAnticipatability, StructureId(1)).unwrap());
    }
}
