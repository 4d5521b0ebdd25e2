use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateSet, Event},
    procedure::Procedure,
};

use super::{trace_sets, AnalysisKind};

/// `TRANSP[B]`: candidates that may move across all of `B`.
///
/// A candidate is opaque in a block that writes any symbol it reads. Checks are also
/// opaque in a block with a barrier: moving a check across one would change which
/// exception, or which side effect, the program observes first. Availability only
/// cares about the writes, so [`LocalTransparency::preserved`] leaves barriers out.
pub struct LocalTransparency {
    transparent: Vec<CandidateSet>,
    preserved: Vec<CandidateSet>,
    has_barrier: Vec<bool>,
}

impl LocalTransparency {
    pub fn compute(proc: &Procedure, catalog: &CandidateCatalog) -> Self {
        let checks = catalog.checks();
        let mut transparent = Vec::with_capacity(proc.num_blocks());
        let mut preserved = Vec::with_capacity(proc.num_blocks());
        let mut has_barrier = Vec::with_capacity(proc.num_blocks());

        for block in proc.blocks() {
            let mut killed = catalog.empty_set();
            let mut barrier = false;

            for event in catalog.events(block) {
                match event {
                    Event::Write { writes, .. } => killed.union_with(&catalog.killed_by(writes)),
                    Event::Barrier { .. } => barrier = true,
                    Event::Compute { .. } => {}
                }
            }

            preserved.push(killed.complemented());

            if barrier {
                killed.union_with(&checks);
            }

            transparent.push(killed.complemented());
            has_barrier.push(barrier);
        }

        trace_sets(catalog, AnalysisKind::LocalTransparency, "transparent", &transparent);

        Self {
            transparent,
            preserved,
            has_barrier,
        }
    }

    pub fn transparent(&self, block: BlockId) -> &CandidateSet {
        &self.transparent[block.0]
    }

    pub fn opaque(&self, block: BlockId) -> CandidateSet {
        self.transparent[block.0].complemented()
    }

    /// Candidates no write in `B` may change.
    pub fn preserved(&self, block: BlockId) -> &CandidateSet {
        &self.preserved[block.0]
    }

    pub fn has_barrier(&self, block: BlockId) -> bool {
        self.has_barrier[block.0]
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
    fn store_kills_readers_and_call_kills_checks() {
        let mut proc = Procedure::new(Options::default());
        let a = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "a"));
        let b = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "b"));
        let m = proc.add_symbol(Symbol::new(SymbolKind::Method { pure: false }, Type::Void, "m"));
        let first = proc.add_block(1.0);
        let second = proc.add_block(1.0);

        let sum;
        let product;
        let check;
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, first);
            let la = bb.load(a);
            let lb = bb.load(b);
            sum = bb.binary(Opcode::Add, la, lb);
            product = bb.binary(Opcode::Mul, lb, lb);
            let div = bb.binary(Opcode::Div, lb, lb);
            check = bb.div_check(div);
            bb.tree_top(sum);
            bb.tree_top(product);
            bb.goto(second);
        }
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, second);
            let one = bb.int32(1);
            bb.store(a, one);
            let call = bb.call(m, Type::Void, &[]);
            bb.tree_top(call);
            bb.ret(None);
        }

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let transparency = LocalTransparency::compute(&proc, &catalog);

        let sum = catalog.local_index(sum).candidate().unwrap();
        let product = catalog.local_index(product).candidate().unwrap();
        let check = catalog.local_index(check).candidate().unwrap();

        assert_eq!(transparency.transparent(first).len(), catalog.len());
        assert!(!transparency.transparent(second).contains(sum));
        assert!(transparency.transparent(second).contains(product));
        assert!(!transparency.transparent(second).contains(check));
        assert!(transparency.preserved(second).contains(check));
        assert!(transparency.has_barrier(second));
    }
}
