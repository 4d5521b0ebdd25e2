use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateSet},
};

use super::{
    local_anticipatability::LocalAnticipatability, local_transparency::LocalTransparency, union_all,
    AnalysisKind, DataflowAnalysis, DataflowTables, Direction, Edge, EdgeKind,
};

/// Not-availability: `NAVOUT[P] = ¬COMP[P] ∩ (NAVIN[P] ∪ ¬TRANSP[P])`, united over
/// predecessors. The procedure entry and exceptional edges make everything unavailable.
pub struct NotAvailable<'a> {
    catalog: &'a CandidateCatalog,
    transparency: &'a LocalTransparency,
    local: &'a LocalAnticipatability,
}

impl<'a> NotAvailable<'a> {
    pub fn new(
        catalog: &'a CandidateCatalog,
        transparency: &'a LocalTransparency,
        local: &'a LocalAnticipatability,
    ) -> Self {
        Self {
            catalog,
            transparency,
            local,
        }
    }
}

impl DataflowAnalysis for NotAvailable<'_> {
    type Value = CandidateSet;

    const KIND: AnalysisKind = AnalysisKind::Earliestness;
    const DIRECTION: Direction = Direction::Forward;
    const EXCEPTIONAL_EDGES: bool = true;

    fn initial(&self, _block: BlockId) -> CandidateSet {
        self.catalog.empty_set()
    }

    fn boundary(&self, _block: BlockId) -> CandidateSet {
        self.catalog.full_set()
    }

    fn meet(&self, _block: BlockId, inputs: &[(Edge, CandidateSet)]) -> CandidateSet {
        if inputs.iter().any(|(edge, _)| edge.kind == EdgeKind::Exceptional) {
            return self.catalog.full_set();
        }

        union_all(self.catalog.empty_set(), inputs.iter().map(|(_, v)| v))
    }

    fn transfer(&self, block: BlockId, input: &CandidateSet) -> CandidateSet {
        let mut result = input.union(&self.transparency.preserved(block).complemented());
        result.subtract(self.local.downward(block));
        result
    }

    fn is_monotone(&self, old: &CandidateSet, new: &CandidateSet) -> bool {
        old.is_subset_of(new)
    }
}

/// `EARLIEST(P,S) = ANTIN[S] ∩ NAVOUT[P] ∩ (¬TRANSP[P] ∪ ¬ANTOUT[P])`: the first edges
/// on which a computation is both safe and not already available.
pub struct Earliestness<'a> {
    catalog: &'a CandidateCatalog,
    transparency: &'a LocalTransparency,
    anticipatability: &'a DataflowTables<CandidateSet>,
    not_available: &'a DataflowTables<CandidateSet>,
}

impl<'a> Earliestness<'a> {
    pub fn new(
        catalog: &'a CandidateCatalog,
        transparency: &'a LocalTransparency,
        anticipatability: &'a DataflowTables<CandidateSet>,
        not_available: &'a DataflowTables<CandidateSet>,
    ) -> Self {
        Self {
            catalog,
            transparency,
            anticipatability,
            not_available,
        }
    }

    pub fn earliest(&self, edge: Edge) -> CandidateSet {
        let antin = self.anticipatability.entry(edge.to);

        match edge.kind {
            EdgeKind::Boundary => antin.clone(),
            EdgeKind::Exceptional => antin.clone(),
            EdgeKind::Normal => {
                let p = edge.from;
                let mut blocked = self.transparency.transparent(p).complemented();
                blocked.union_with(&self.anticipatability.exit(p).complemented());

                let mut result = antin.intersection(self.not_available.exit(p));
                result.intersect_with(&blocked);
                result
            }
        }
    }

    pub fn catalog(&self) -> &CandidateCatalog {
        self.catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{global_anticipatability::GlobalAnticipatability, Solver},
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
    fn earliest_is_the_loop_entry_edge() {
        let mut proc = Procedure::new(Options::default());
        let a = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "a"));
        let b = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "b"));
        let entry = proc.add_block(1.0);
        let body = proc.add_block(1.0);
        let exit = proc.add_block(1.0);

        let sum;
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, entry);
            let one = bb.int32(1);
            bb.store(a, one);
            bb.goto(body);
        }
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, body);
            let la = bb.load(a);
            let lb = bb.load(b);
            sum = bb.binary(Opcode::Add, la, lb);
            bb.tree_top(sum);
            bb.branch(la, (body, Default::default()), (exit, Default::default()));
        }
        BasicBlockBuilder::new(&mut proc, exit).ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let transparency = LocalTransparency::compute(&proc, &catalog);
        let local = LocalAnticipatability::compute(&proc, &catalog);
        let structure = StructureTree::build(&mut proc);
        let cold = vec![false; proc.num_blocks()];
        let mut interrupt = Never;
        let mut solver = Solver::new(&proc, &structure, &mut interrupt);

        let ant = solver
            .solve(
                &GlobalAnticipatability::new(&catalog, &transparency, &local, &cold, true),
                &mut StructureCache::new(),
            )
            .unwrap();
        let nav = solver
            .solve(&NotAvailable::new(&catalog, &transparency, &local), &mut StructureCache::new())
            .unwrap();
        let earliestness = Earliestness::new(&catalog, &transparency, &ant, &nav);

        let sum = catalog.local_index(sum).candidate().unwrap();
        assert!(earliestness.earliest(Edge::normal(entry, body)).contains(sum));
        assert!(!earliestness.earliest(Edge::normal(body, body)).contains(sum));
    }
}
