use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateId, CandidateSet},
};

use super::{
    intersect_all, local_anticipatability::LocalAnticipatability, local_transparency::LocalTransparency,
    AnalysisKind, DataflowAnalysis, Direction, Edge,
};

/// `ANTIN[B] = ANTLOC[B] ∪ (TRANSP[B] ∩ ANTOUT[B])`, `ANTOUT[B] = ⋂ ANTIN[S]` over normal
/// successors. A candidate anticipatable at a point is computed on every path from it
/// before anything changes its value, so computing it there is safe.
pub struct GlobalAnticipatability<'a> {
    catalog: &'a CandidateCatalog,
    transparency: &'a LocalTransparency,
    local: &'a LocalAnticipatability,
    cold: &'a [bool],
    /// Candidates that may be computed on a path that did not compute them.
    speculatable: CandidateSet,
    with_siblings: Vec<CandidateId>,
}

impl<'a> GlobalAnticipatability<'a> {
    pub fn new(
        catalog: &'a CandidateCatalog,
        transparency: &'a LocalTransparency,
        local: &'a LocalAnticipatability,
        cold: &'a [bool],
        ignore_cold_successors: bool,
    ) -> Self {
        let speculatable = if ignore_cold_successors {
            catalog.filtered(|c| !c.order_sensitive)
        } else {
            catalog.empty_set()
        };

        let with_siblings = catalog
            .candidates()
            .iter()
            .filter(|c| !c.shadow_siblings.is_empty())
            .map(|c| c.id)
            .collect();

        Self {
            catalog,
            transparency,
            local,
            cold,
            speculatable,
            with_siblings,
        }
    }

    fn is_cold(&self, block: BlockId) -> bool {
        self.cold.get(block.0).copied().unwrap_or(false)
    }

    /// Adds indirect loads whose shadowing sibling is anticipated: both read the same storage.
    fn with_shadow_siblings(&self, set: &CandidateSet) -> CandidateSet {
        let mut result = set.clone();
        for id in self.with_siblings.iter().copied() {
            if !set.contains(id) && self.catalog.get(id).shadow_siblings.iter().any(|s| set.contains(*s)) {
                result.insert(id);
            }
        }
        result
    }
}

impl DataflowAnalysis for GlobalAnticipatability<'_> {
    type Value = CandidateSet;

    const KIND: AnalysisKind = AnalysisKind::GlobalAnticipatability;
    const DIRECTION: Direction = Direction::Backward;

    fn initial(&self, _block: BlockId) -> CandidateSet {
        self.catalog.full_set()
    }

    fn boundary(&self, _block: BlockId) -> CandidateSet {
        self.catalog.empty_set()
    }

    fn meet(&self, _block: BlockId, inputs: &[(Edge, CandidateSet)]) -> CandidateSet {
        let hot_successor = inputs.iter().any(|(edge, _)| !self.is_cold(edge.to));

        let values: Vec<CandidateSet> = inputs
            .iter()
            .map(|(edge, value)| {
                let mut value = self.with_shadow_siblings(value);
                if hot_successor && self.is_cold(edge.to) {
                    value.union_with(&self.speculatable);
                }
                value
            })
            .collect();

        intersect_all(self.catalog.full_set(), values.iter())
    }

    fn transfer(&self, block: BlockId, out: &CandidateSet) -> CandidateSet {
        let mut result = out.intersection(self.transparency.transparent(block));
        result.union_with(self.local.upward(block));
        result
    }

    fn is_monotone(&self, old: &CandidateSet, new: &CandidateSet) -> bool {
        new.is_subset_of(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::Solver,
        block::BasicBlockBuilder,
        interrupt::Never,
        opcode::Opcode,
        procedure::Procedure,
        structure::{StructureCache, StructureTree},
        symbol::{Symbol, SymbolKind},
        typ::Type,
        Options,
    };

    #[test]
    fn anticipated_only_when_every_path_computes() {
        let mut proc = Procedure::new(Options::default());
        let a = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "a"));
        let b = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "b"));
        let entry = proc.add_block(1.0);
        let left = proc.add_block(1.0);
        let right = proc.add_block(1.0);
        let join = proc.add_block(1.0);

        let sum;
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, entry);
            let la = bb.load(a);
            bb.branch(la, (left, Default::default()), (right, Default::default()));
        }
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, left);
            let la = bb.load(a);
            let lb = bb.load(b);
            sum = bb.binary(Opcode::Add, la, lb);
            bb.tree_top(sum);
            bb.goto(join);
        }
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, right);
            let one = bb.int32(1);
            bb.store(b, one);
            bb.goto(join);
        }
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, join);
            let la = bb.load(a);
            let lb = bb.load(b);
            let again = bb.binary(Opcode::Add, la, lb);
            bb.tree_top(again);
            bb.ret(None);
        }

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let transparency = LocalTransparency::compute(&proc, &catalog);
        let local = LocalAnticipatability::compute(&proc, &catalog);
        let structure = StructureTree::build(&mut proc);
        let cold = vec![false; proc.num_blocks()];

        let analysis = GlobalAnticipatability::new(&catalog, &transparency, &local, &cold, true);
        let mut interrupt = Never;
        let tables = Solver::new(&proc, &structure, &mut interrupt)
            .solve(&analysis, &mut StructureCache::new())
            .unwrap();

        let sum = catalog.local_index(sum).candidate().unwrap();
        assert!(tables.entry(join).contains(sum));
        assert!(tables.entry(left).contains(sum));
        assert!(!tables.entry(right).contains(sum));
        assert!(!tables.exit(entry).contains(sum));
        assert!(tables.exit(join).is_empty());
    }
}
