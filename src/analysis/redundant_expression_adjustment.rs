use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateSet},
    procedure::Procedure,
};

use super::{
    intersect_all, local_anticipatability::LocalAnticipatability, local_transparency::LocalTransparency,
    AnalysisKind, DataflowAnalysis, DataflowTables, Direction, Edge, EdgeKind, Placements,
};

/// Availability of promoted values under the placements actually chosen.
///
/// `AVOUT[B] = ((AVIN[B] ∪ entry[B]) − kill[B]) ∪ gen[B]`, intersected over normal
/// predecessors. A value is generated by an exit placement, by an in-place definition,
/// by a check occurrence or by a store of a promoted field. Candidates that lost
/// their placements are killed everywhere: nothing keeps their temporary up to date.
pub struct RedundantExpressionAdjustment<'a> {
    catalog: &'a CandidateCatalog,
    entry: &'a [CandidateSet],
    exit: Vec<CandidateSet>,
    /// Everything generated inside the block itself, exit placements aside.
    gen: Vec<CandidateSet>,
    kill: Vec<CandidateSet>,
}

impl<'a> RedundantExpressionAdjustment<'a> {
    /// `promoted` holds every candidate that still owns placements. `extra` adds
    /// second-best in-place definitions on the last iteration.
    pub fn new(
        proc: &Procedure,
        catalog: &'a CandidateCatalog,
        transparency: &LocalTransparency,
        local: &LocalAnticipatability,
        placements: &'a Placements,
        promoted: &CandidateSet,
        extra: Option<&[CandidateSet]>,
    ) -> Self {
        let checks = catalog.checks();
        let dropped = promoted.union(&checks).complemented();

        let mut exit = Vec::with_capacity(proc.num_blocks());
        let mut gen = Vec::with_capacity(proc.num_blocks());
        let mut kill = Vec::with_capacity(proc.num_blocks());

        for block in proc.blocks() {
            let b = block.0;
            let downward = local.downward(block);

            let mut defines = placements.in_place[b].clone();
            if let Some(extra) = extra {
                defines.union_with(&extra[b]);
            }
            defines.intersect_with(downward);
            defines.union_with(&local.stored(block).intersection(promoted));

            defines.subtract(&dropped);
            defines.union_with(&checks.intersection(downward));

            let mut k = transparency.preserved(block).complemented();
            k.union_with(&dropped);

            exit.push(placements.exit[b].difference(&dropped));
            gen.push(defines);
            kill.push(k);
        }

        Self {
            catalog,
            entry: &placements.entry,
            exit,
            gen,
            kill,
        }
    }

    /// Availability right before the exit placements of `block` run.
    pub fn before_exit(&self, block: BlockId, avin: &CandidateSet) -> CandidateSet {
        let b = block.0;
        let mut result = avin.union(&self.entry[b]);
        result.subtract(&self.kill[b]);
        result.union_with(&self.gen[b]);
        result
    }

    /// `actualRedn[B] = (redundant[B] ∪ (checks ∩ ANTLOC[B])) ∩ (AVIN[B] ∪ entry[B])`.
    pub fn actual_redundant(
        &self,
        local: &LocalAnticipatability,
        tables: &DataflowTables<CandidateSet>,
        redundant: &[CandidateSet],
        block: BlockId,
    ) -> CandidateSet {
        let mut result = local.upward(block).intersection(&self.catalog.checks());
        result.union_with(&redundant[block.0]);
        result.intersect_with(&self.available_at_entry(tables, block));
        result
    }

    /// What a use at the top of `block` can read from a temporary.
    pub fn available_at_entry(&self, tables: &DataflowTables<CandidateSet>, block: BlockId) -> CandidateSet {
        tables.entry(block).union(&self.entry[block.0])
    }
}

impl DataflowAnalysis for RedundantExpressionAdjustment<'_> {
    type Value = CandidateSet;

    const KIND: AnalysisKind = AnalysisKind::RedundantExpressionAdjustment;
    const DIRECTION: Direction = Direction::Forward;
    const EXCEPTIONAL_EDGES: bool = true;

    fn initial(&self, _block: BlockId) -> CandidateSet {
        self.catalog.full_set()
    }

    fn boundary(&self, _block: BlockId) -> CandidateSet {
        self.catalog.empty_set()
    }

    fn meet(&self, _block: BlockId, inputs: &[(Edge, CandidateSet)]) -> CandidateSet {
        let values: Vec<CandidateSet> = inputs
            .iter()
            .map(|(edge, value)| match edge.kind {
                EdgeKind::Boundary | EdgeKind::Exceptional => self.catalog.empty_set(),
                EdgeKind::Normal => {
                    let mut value = value.clone();
                    if let Some(constraint) = self.catalog.null_constraint(edge.from) {
                        if constraint.successor == edge.to {
                            value.insert(constraint.check);
                        }
                    }
                    value
                }
            })
            .collect();

        intersect_all(self.catalog.full_set(), values.iter())
    }

    fn transfer(&self, block: BlockId, avin: &CandidateSet) -> CandidateSet {
        self.before_exit(block, avin).union(&self.exit[block.0])
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
        structure::{StructureCache, StructureTree},
        symbol::{Symbol, SymbolKind},
        typ::Type,
        Options,
    };

    #[test]
    fn null_check_is_available_on_the_non_null_edge_only() {
        let mut proc = Procedure::new(Options::default());
        let p = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, "p"));
        let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "f"));
        let entry = proc.add_block(1.0);
        let null = proc.add_block(1.0);
        let non_null = proc.add_block(1.0);

        {
            let mut bb = BasicBlockBuilder::new(&mut proc, entry);
            let base = bb.load(p);
            bb.if_null(base, null, non_null);
        }
        BasicBlockBuilder::new(&mut proc, null).ret(None);
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, non_null);
            let base = bb.load(p);
            let field = bb.load_indirect(f, base);
            bb.null_check(field);
            bb.ret(None);
        }

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let transparency = LocalTransparency::compute(&proc, &catalog);
        let local = LocalAnticipatability::compute(&proc, &catalog);
        let structure = StructureTree::build(&mut proc);
        let placements = Placements::empty(&catalog, proc.num_blocks());
        let promoted = catalog.empty_set();

        let adjustment =
            RedundantExpressionAdjustment::new(&proc, &catalog, &transparency, &local, &placements, &promoted, None);
        let mut interrupt = Never;
        let tables = Solver::new(&proc, &structure, &mut interrupt)
            .solve(&adjustment, &mut StructureCache::new())
            .unwrap();

        let check = catalog.checks().iter().next().unwrap();
        assert!(tables.entry(non_null).contains(check));
        assert!(!tables.entry(null).contains(check));
        assert!(tables.exit(non_null).contains(check));

        let redundant = vec![catalog.empty_set(); proc.num_blocks()];
        assert!(adjustment
            .actual_redundant(&local, &tables, &redundant, non_null)
            .contains(check));
    }
}
