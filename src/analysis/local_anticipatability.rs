use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateSet, Event},
    procedure::Procedure,
};

use super::{trace_sets, AnalysisKind};

/// Per block occurrence summaries.
///
/// - `upward` (`ANTLOC`): computed before anything in the block kills it. Checks
///   must also come before the first barrier.
/// - `downward` (`COMP`): computed, or stored by its own store, after the last kill.
/// - `stored`: made available by a store of the candidate after the last kill.
/// - `locally_redundant`: computed again while an earlier value is still intact.
pub struct LocalAnticipatability {
    upward: Vec<CandidateSet>,
    downward: Vec<CandidateSet>,
    stored: Vec<CandidateSet>,
    locally_redundant: Vec<CandidateSet>,
}

impl LocalAnticipatability {
    pub fn compute(proc: &Procedure, catalog: &CandidateCatalog) -> Self {
        let n = proc.num_blocks();
        let mut this = Self {
            upward: Vec::with_capacity(n),
            downward: Vec::with_capacity(n),
            stored: Vec::with_capacity(n),
            locally_redundant: Vec::with_capacity(n),
        };

        for block in proc.blocks() {
            let mut upward = catalog.empty_set();
            let mut downward = catalog.empty_set();
            let mut stored = catalog.empty_set();
            let mut redundant = catalog.empty_set();
            let mut killed = catalog.empty_set();
            let mut barrier = false;

            for event in catalog.events(block) {
                match event {
                    Event::Compute { candidate, .. } => {
                        let c = *candidate;
                        let is_check = catalog.get(c).is_check();

                        if !killed.contains(c) && !(is_check && barrier) {
                            upward.insert(c);
                        }

                        if downward.contains(c) {
                            redundant.insert(c);
                        }

                        downward.insert(c);
                    }

                    Event::Write { writes, store, .. } => {
                        let kills = catalog.killed_by(writes);
                        killed.union_with(&kills);
                        downward.subtract(&kills);
                        stored.subtract(&kills);

                        if let Some(s) = store {
                            downward.insert(*s);
                            stored.insert(*s);
                        }
                    }

                    Event::Barrier { .. } => barrier = true,
                }
            }

            this.upward.push(upward);
            this.downward.push(downward);
            this.stored.push(stored);
            this.locally_redundant.push(redundant);
        }

        trace_sets(catalog, AnalysisKind::LocalAnticipatability, "upward", &this.upward);
        trace_sets(catalog, AnalysisKind::LocalAnticipatability, "downward", &this.downward);

        this
    }

    pub fn upward(&self, block: BlockId) -> &CandidateSet {
        &self.upward[block.0]
    }

    pub fn downward(&self, block: BlockId) -> &CandidateSet {
        &self.downward[block.0]
    }

    pub fn stored(&self, block: BlockId) -> &CandidateSet {
        &self.stored[block.0]
    }

    pub fn locally_redundant(&self, block: BlockId) -> &CandidateSet {
        &self.locally_redundant[block.0]
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
    fn kill_splits_upward_and_downward_occurrences() {
        let mut proc = Procedure::new(Options::default());
        let a = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "a"));
        let b = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "b"));
        let entry = proc.add_block(1.0);

        let mut bb = BasicBlockBuilder::new(&mut proc, entry);
        let la = bb.load(a);
        let lb = bb.load(b);
        let sum = bb.binary(Opcode::Add, la, lb);
        bb.tree_top(sum);
        let lb2 = bb.load(b);
        let product = bb.binary(Opcode::Mul, lb2, lb2);
        bb.store(a, product);
        let lb3 = bb.load(b);
        let product2 = bb.binary(Opcode::Mul, lb3, lb3);
        bb.tree_top(product2);
        bb.ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let local = LocalAnticipatability::compute(&proc, &catalog);

        let sum = catalog.local_index(sum).candidate().unwrap();
        let product = catalog.local_index(product).candidate().unwrap();

        assert!(local.upward(entry).contains(sum));
        assert!(!local.downward(entry).contains(sum));
        assert!(local.upward(entry).contains(product));
        assert!(local.downward(entry).contains(product));
        assert!(local.locally_redundant(entry).contains(product));
        assert!(!local.locally_redundant(entry).contains(sum));
    }

    #[test]
    fn own_store_makes_field_available() {
        let mut proc = Procedure::new(Options::default());
        let p = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, "p"));
        let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "f"));
        let entry = proc.add_block(1.0);

        let mut bb = BasicBlockBuilder::new(&mut proc, entry);
        let base = bb.load(p);
        let one = bb.int32(1);
        bb.store_indirect(f, base, one);
        let field = bb.load_indirect(f, base);
        bb.tree_top(field);
        bb.ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let local = LocalAnticipatability::compute(&proc, &catalog);
        let load = catalog.local_index(field).candidate().unwrap();

        assert!(local.stored(entry).contains(load));
        assert!(!local.upward(entry).contains(load));
        assert!(local.locally_redundant(entry).contains(load));
    }
}
