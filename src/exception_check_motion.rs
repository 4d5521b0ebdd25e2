//! Exception check motion.
//!
//! Lazy code motion treats every candidate as an independent bit. That is wrong for
//! checks and for the accesses they guard: hoisting `NullCheck(q)` above
//! `NullCheck(p)` changes which exception the program raises first, and hoisting
//! `p.f` above the null check of `p` can fault. This pass keeps, per block, an
//! ordered list of the order sensitive candidates that could still be evaluated at
//! that point. An entry or exit placement stands only when everything ahead of it
//! in the list is placed at the same point, already available, or a survivor whose
//! guards are known to hold.
//!
//! Survivors depend on availability, and availability depends on the placements
//! that stand, so the pass alternates list selection with
//! [`RedundantExpressionAdjustment`] for a bounded number of rounds.

use crate::{
    analysis::{
        local_anticipatability::LocalAnticipatability,
        local_transparency::LocalTransparency,
        redundant_expression_adjustment::RedundantExpressionAdjustment,
        AnalysisKind, DataflowAnalysis, DataflowTables, Direction, Edge, Placements, Solver,
    },
    block::BlockId,
    candidates::{BarrierKind, Candidate, CandidateCatalog, CandidateId, CandidateSet, Event},
    error::Result,
    interrupt::InterruptCheck,
    opcode::{CheckKind, Opcode},
    procedure::Procedure,
    structure::{StructureCache, StructureTree},
};

/// Rounds of selection and adjustment before the solution is accepted. The last
/// one turns optimistic redundancies that lost their availability into in-place
/// definitions.
pub const NUM_ITERATIONS: usize = 2;

/// Check kinds and guarded access kinds present in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KillFlags(u16);

impl KillFlags {
    pub const INDIRECT_ACCESS: Self = Self(1 << 7);
    pub const ARRAY_ACCESS: Self = Self(1 << 8);
    pub const DIVIDE: Self = Self(1 << 9);
    pub const UNRESOLVED_ACCESS: Self = Self(1 << 10);

    pub const fn check(kind: CheckKind) -> Self {
        Self(1 << kind as u16)
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn of_candidate(candidate: &Candidate) -> Self {
        let mut flags = Self::default();

        if let Some(kind) = candidate.check {
            flags.insert(Self::check(kind));
        }

        if candidate.guarded_access {
            flags.insert(match candidate.key.opcode {
                Opcode::LoadIndirect => Self::INDIRECT_ACCESS,
                Opcode::ArrayLoad | Opcode::ArrayLength => Self::ARRAY_ACCESS,
                _ => Self::DIVIDE,
            });
        }

        flags
    }
}

/// How the exception handlers of two blocks relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionRelation {
    BothSame,
    FirstLarger,
    SecondLarger,
    BothUnrelated,
}

pub fn compare_handlers(first: &[BlockId], second: &[BlockId]) -> ExceptionRelation {
    let first_in_second = first.iter().all(|h| second.contains(h));
    let second_in_first = second.iter().all(|h| first.contains(h));

    match (first_in_second, second_in_first) {
        (true, true) => ExceptionRelation::BothSame,
        (false, true) => ExceptionRelation::FirstLarger,
        (true, false) => ExceptionRelation::SecondLarger,
        (false, false) => ExceptionRelation::BothUnrelated,
    }
}

/// Candidates in the order they must be evaluated.
///
/// An open list stands for its items followed by anything at all; the solver
/// starts every block there.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderedList {
    items: Vec<CandidateId>,
    open: bool,
}

impl OrderedList {
    pub fn open() -> Self {
        Self {
            items: Vec::new(),
            open: true,
        }
    }

    pub fn closed(items: Vec<CandidateId>) -> Self {
        Self { items, open: false }
    }

    pub fn items(&self) -> &[CandidateId] {
        &self.items
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn contains(&self, candidate: CandidateId) -> bool {
        self.items.contains(&candidate)
    }

    fn push_unique(&mut self, candidate: CandidateId) {
        if !self.items.contains(&candidate) {
            self.items.push(candidate);
        }
    }

    fn without(&self, mut f: impl FnMut(CandidateId) -> bool) -> Self {
        Self {
            items: self.items.iter().copied().filter(|c| !f(*c)).collect(),
            open: self.open,
        }
    }

    /// Longest order both lists agree on.
    pub fn meet(&self, other: &Self) -> Self {
        let common = self
            .items
            .iter()
            .zip(other.items.iter())
            .take_while(|(a, b)| a == b)
            .count();

        match (common == self.items.len(), common == other.items.len()) {
            (true, true) => Self {
                items: self.items.clone(),
                open: self.open && other.open,
            },
            (true, false) if self.open => other.clone(),
            (false, true) if other.open => self.clone(),
            _ => Self::closed(self.items[..common].to_vec()),
        }
    }
}

/// Order sensitive occurrences of one block, up to the first barrier.
#[derive(Debug, Clone, Default)]
pub struct BlockOrder {
    pub gen: Vec<CandidateId>,
    /// A barrier, or an occurrence after a kill of itself, cut the list short.
    /// Nothing from below the block moves across it.
    pub truncated: bool,
    pub kills: KillFlags,
}

pub struct BlockOrders(Vec<BlockOrder>);

impl BlockOrders {
    pub fn compute(proc: &Procedure, catalog: &CandidateCatalog) -> Self {
        let mut orders = Vec::with_capacity(proc.num_blocks());

        for block in proc.blocks() {
            let mut order = BlockOrder::default();
            let mut killed = catalog.empty_set();

            for event in catalog.events(block) {
                match event {
                    Event::Compute { candidate, .. } => {
                        let c = catalog.get(*candidate);
                        order.kills.insert(KillFlags::of_candidate(c));

                        if !c.order_sensitive || order.truncated {
                            continue;
                        }

                        if killed.contains(c.id) {
                            order.truncated = true;
                        } else if !order.gen.contains(&c.id) {
                            order.gen.push(c.id);
                        }
                    }

                    Event::Write { writes, .. } => killed.union_with(&catalog.killed_by(writes)),

                    Event::Barrier { node, kind, .. } => {
                        match kind {
                            BarrierKind::Check => {
                                if let Some(check) = proc.node(*node).opcode().check_kind() {
                                    order.kills.insert(KillFlags::check(check));
                                }
                            }
                            BarrierKind::Unresolved => order.kills.insert(KillFlags::UNRESOLVED_ACCESS),
                            _ => {}
                        }
                        order.truncated = true;
                    }
                }
            }

            if !order.gen.is_empty() || !order.kills.is_empty() {
                log::trace!(
                    "{} order {:?}{} kills {:?}",
                    block,
                    order.gen,
                    if order.truncated { " (truncated)" } else { "" },
                    order.kills
                );
            }

            orders.push(order);
        }

        Self(orders)
    }

    pub fn get(&self, block: BlockId) -> &BlockOrder {
        &self.0[block.0]
    }
}

/// Backward ordered list analysis. `entry` of the solved tables holds `L_in`,
/// `exit` holds `L_out`.
struct OrderAnalysis<'m, 'a> {
    motion: &'m ExceptionCheckMotion<'a>,
    /// Availability before the exit placements of each block.
    available: &'m [CandidateSet],
}

impl DataflowAnalysis for OrderAnalysis<'_, '_> {
    type Value = OrderedList;

    const KIND: AnalysisKind = AnalysisKind::ExceptionCheckMotion;
    const DIRECTION: Direction = Direction::Backward;

    fn initial(&self, _block: BlockId) -> OrderedList {
        OrderedList::open()
    }

    fn boundary(&self, _block: BlockId) -> OrderedList {
        OrderedList::default()
    }

    fn meet(&self, block: BlockId, inputs: &[(Edge, OrderedList)]) -> OrderedList {
        let catalog = self.motion.catalog;
        let available = &self.available[block.0];
        let mut result: Option<OrderedList> = None;

        for (edge, list) in inputs {
            let list = if self.motion.is_fenced(edge.from, edge.to) {
                OrderedList::default()
            } else {
                // An available check still orders the placements made above the point
                // that made it available, so only guarded accesses leave the list.
                list.without(|c| !catalog.get(c).is_check() && catalog.is_survivor(c, available))
            };

            result = Some(match result {
                Some(result) => result.meet(&list),
                None => list,
            });
        }

        result.unwrap_or_default()
    }

    fn transfer(&self, block: BlockId, out: &OrderedList) -> OrderedList {
        let order = self.motion.orders.get(block);
        let mut list = OrderedList::closed(order.gen.clone());

        if order.truncated {
            return list;
        }

        let catalog = self.motion.catalog;
        let transparent = self.motion.transparency.transparent(block);
        for candidate in out.items().iter().copied() {
            if !transparent.contains(candidate) {
                return list;
            }

            // Another check of the same kind in this block stays ahead of it.
            let same_kind = catalog
                .get(candidate)
                .check
                .map_or(false, |kind| order.kills.contains(KillFlags::check(kind)));
            if same_kind && !list.contains(candidate) {
                return list;
            }

            list.push_unique(candidate);
        }

        list.open = out.open;
        list
    }
}

/// Entry and exit placements that respect the exception order, with the order
/// they must be emitted in.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub placements: Placements,
    pub entry_order: Vec<Vec<CandidateId>>,
    pub exit_order: Vec<Vec<CandidateId>>,
    /// Optimistic placements that did not survive.
    pub rejected: usize,
}

/// Availability under one set of placements.
#[derive(Debug, Clone)]
pub struct Adjustment {
    pub tables: DataflowTables<CandidateSet>,
    /// `AVIN[B] ∪ entry[B]`: what a use at the top of `B` may read.
    pub at_entry: Vec<CandidateSet>,
    pub before_exit: Vec<CandidateSet>,
    /// `actualRedn`.
    pub redundant: Vec<CandidateSet>,
    /// Second-best in-place definitions.
    pub extras: Vec<CandidateSet>,
}

#[derive(Debug, Clone)]
pub struct MotionOutcome {
    pub selection: Selection,
    pub adjustment: Adjustment,
    pub rounds: usize,
    /// Selection had not converged after the last iteration; the second-best
    /// solution was kept.
    pub fell_back: bool,
}

pub struct ExceptionCheckMotion<'a> {
    proc: &'a Procedure,
    structure: &'a StructureTree,
    catalog: &'a CandidateCatalog,
    transparency: &'a LocalTransparency,
    local: &'a LocalAnticipatability,
    optimistic: &'a Placements,
    /// Optimistic redundancy: `ANTLOC ∩ ¬LATERIN`.
    redundant: &'a [CandidateSet],
    orders: BlockOrders,
}

impl<'a> ExceptionCheckMotion<'a> {
    pub fn new(
        proc: &'a Procedure,
        structure: &'a StructureTree,
        catalog: &'a CandidateCatalog,
        transparency: &'a LocalTransparency,
        local: &'a LocalAnticipatability,
        optimistic: &'a Placements,
        redundant: &'a [CandidateSet],
    ) -> Self {
        Self {
            proc,
            structure,
            catalog,
            transparency,
            local,
            optimistic,
            redundant,
            orders: BlockOrders::compute(proc, catalog),
        }
    }

    pub fn orders(&self) -> &BlockOrders {
        &self.orders
    }

    fn is_fenced(&self, from: BlockId, to: BlockId) -> bool {
        let relation = compare_handlers(
            self.proc.block(from).exception_successors(),
            self.proc.block(to).exception_successors(),
        );
        relation != ExceptionRelation::BothSame
    }

    pub fn perform(&self, interrupt: &mut dyn InterruptCheck) -> Result<MotionOutcome> {
        let mut solver = Solver::new(self.proc, self.structure, interrupt);
        let nothing = vec![self.catalog.empty_set(); self.proc.num_blocks()];

        let mut selection = self.select(&mut solver, &nothing, &nothing)?;
        let mut adjustment = self.adjust(&mut solver, &selection.placements, NUM_ITERATIONS == 1)?;

        for iteration in 1..NUM_ITERATIONS {
            selection = self.select(&mut solver, &adjustment.tables.entry, &adjustment.before_exit)?;
            adjustment = self.adjust(&mut solver, &selection.placements, iteration + 1 == NUM_ITERATIONS)?;
        }

        // Selection only grows with availability, so a not yet converged solution is
        // still sound; it is kept as the second best.
        let next = self.select(&mut solver, &adjustment.tables.entry, &adjustment.before_exit)?;
        let fell_back = next.placements != selection.placements;
        if fell_back {
            log::debug!(
                "exception check motion not converged after {} iterations, keeping second best",
                NUM_ITERATIONS
            );
        }

        for (in_place, extras) in selection
            .placements
            .in_place
            .iter_mut()
            .zip(adjustment.extras.iter())
        {
            in_place.union_with(extras);
        }

        log::debug!(
            "exception check motion: {} rounds, {} placements rejected",
            NUM_ITERATIONS,
            selection.rejected
        );

        Ok(MotionOutcome {
            selection,
            adjustment,
            rounds: NUM_ITERATIONS,
            fell_back,
        })
    }

    fn select(
        &self,
        solver: &mut Solver<'_>,
        avin: &[CandidateSet],
        before_exit: &[CandidateSet],
    ) -> Result<Selection> {
        let analysis = OrderAnalysis {
            motion: self,
            available: before_exit,
        };
        let lists = solver.solve(&analysis, &mut StructureCache::new())?;

        let n = self.proc.num_blocks();
        let mut selection = Selection {
            placements: Placements {
                entry: Vec::with_capacity(n),
                exit: Vec::with_capacity(n),
                in_place: self.optimistic.in_place.clone(),
            },
            entry_order: Vec::with_capacity(n),
            exit_order: Vec::with_capacity(n),
            rejected: 0,
        };

        for block in self.proc.blocks() {
            let b = block.0;

            let (entry, entry_order) = self.select_at(&self.optimistic.entry[b], lists.entry(block), &avin[b]);
            let (exit, exit_order) = self.select_at(&self.optimistic.exit[b], lists.exit(block), &before_exit[b]);

            selection.rejected += self.optimistic.entry[b].len() - entry.len();
            selection.rejected += self.optimistic.exit[b].len() - exit.len();

            selection.placements.entry.push(entry);
            selection.placements.exit.push(exit);
            selection.entry_order.push(entry_order);
            selection.exit_order.push(exit_order);
        }

        Ok(selection)
    }

    /// Placements at one point that keep the order of `list`, and the order to emit them in.
    fn select_at(
        &self,
        placed: &CandidateSet,
        list: &OrderedList,
        available: &CandidateSet,
    ) -> (CandidateSet, Vec<CandidateId>) {
        let catalog = self.catalog;
        let mut accepted = catalog.empty_set();
        let mut order = Vec::new();

        for candidate in placed.iter() {
            if !catalog.get(candidate).order_sensitive || catalog.is_survivor(candidate, available) {
                accepted.insert(candidate);
            }
        }

        for candidate in list.items().iter().copied() {
            if placed.contains(candidate) {
                accepted.insert(candidate);
                order.push(candidate);
                continue;
            }

            if catalog.is_survivor(candidate, available) {
                continue;
            }

            break;
        }

        for candidate in accepted.iter() {
            if !order.contains(&candidate) {
                order.push(candidate);
            }
        }

        (accepted, order)
    }

    /// Availability of `placements`. With `second_best`, optimistic redundancies that
    /// are not available become in-place definitions.
    pub fn adjust(&self, solver: &mut Solver<'_>, placements: &Placements, second_best: bool) -> Result<Adjustment> {
        let promoted = placements.candidates(self.catalog);
        let first = RedundantExpressionAdjustment::new(
            self.proc,
            self.catalog,
            self.transparency,
            self.local,
            placements,
            &promoted,
            None,
        );
        let tables = solver.solve(&first, &mut StructureCache::new())?;

        let mut extras = vec![self.catalog.empty_set(); self.proc.num_blocks()];
        if second_best {
            let temps = promoted.difference(&self.catalog.checks());
            for block in self.proc.blocks() {
                let mut extra = self.redundant[block.0].intersection(&temps);
                extra.subtract(&first.available_at_entry(&tables, block));
                extras[block.0] = extra;
            }
        }

        if extras.iter().all(|e| e.is_empty()) {
            return Ok(self.summarize(&first, tables, extras));
        }

        let second = RedundantExpressionAdjustment::new(
            self.proc,
            self.catalog,
            self.transparency,
            self.local,
            placements,
            &promoted,
            Some(&extras),
        );
        let tables = solver.solve(&second, &mut StructureCache::new())?;
        Ok(self.summarize(&second, tables, extras))
    }

    fn summarize(
        &self,
        adjustment: &RedundantExpressionAdjustment<'_>,
        tables: DataflowTables<CandidateSet>,
        extras: Vec<CandidateSet>,
    ) -> Adjustment {
        let blocks: Vec<BlockId> = self.proc.blocks().collect();
        let nothing = self.catalog.empty_set();

        // Unreachable blocks keep the optimistic initial value; nothing there is available.
        let at_entry = blocks
            .iter()
            .map(|b| match self.structure.is_reachable(*b) {
                true => adjustment.available_at_entry(&tables, *b),
                false => nothing.clone(),
            })
            .collect();
        let before_exit = blocks
            .iter()
            .map(|b| adjustment.before_exit(*b, tables.entry(*b)))
            .collect();
        let redundant = blocks
            .iter()
            .map(|b| match self.structure.is_reachable(*b) {
                true => adjustment.actual_redundant(self.local, &tables, self.redundant, *b),
                false => nothing.clone(),
            })
            .collect();

        Adjustment {
            tables,
            at_entry,
            before_exit,
            redundant,
            extras,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{BasicBlockBuilder, Frequency},
        interrupt::Never,
        node::NodeId,
        symbol::{Symbol, SymbolKind},
        typ::Type,
        Options,
    };

    fn c(n: u32) -> CandidateId {
        CandidateId::new(n)
    }

    #[test]
    fn open_lists_yield_to_closed_ones() {
        let open = OrderedList {
            items: vec![c(1)],
            open: true,
        };
        let closed = OrderedList::closed(vec![c(1), c(2)]);
        let other = OrderedList::closed(vec![c(1), c(3)]);

        assert_eq!(open.meet(&closed), closed);
        assert_eq!(closed.meet(&open), closed);
        assert_eq!(closed.meet(&other), OrderedList::closed(vec![c(1)]));
        assert_eq!(OrderedList::closed(vec![c(1)]).meet(&closed), OrderedList::closed(vec![c(1)]));
        assert!(OrderedList::open().meet(&OrderedList::open()).is_open());
    }

    #[test]
    fn handler_sets_are_compared_both_ways() {
        let (a, b) = (BlockId(4), BlockId(5));
        assert_eq!(compare_handlers(&[a], &[a]), ExceptionRelation::BothSame);
        assert_eq!(compare_handlers(&[a, b], &[a]), ExceptionRelation::FirstLarger);
        assert_eq!(compare_handlers(&[], &[b]), ExceptionRelation::SecondLarger);
        assert_eq!(compare_handlers(&[a], &[b]), ExceptionRelation::BothUnrelated);
    }

    struct Checks {
        proc: Procedure,
        above: BlockId,
        below: BlockId,
    }

    /// `above -> below`, where `below` runs a bound check and then a divide.
    fn bound_then_divide() -> Checks {
        let mut proc = Procedure::new(Options::default());
        let i = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "i"));
        let n = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "n"));
        let x = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "x"));
        let y = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "y"));
        let above = proc.add_block(1.0);
        let below = proc.add_block(1.0);

        BasicBlockBuilder::new(&mut proc, above).goto(below);
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, below);
            let li = bb.load(i);
            let ln = bb.load(n);
            bb.bound_check(li, ln);
            let lx = bb.load(x);
            let ly = bb.load(y);
            let div = bb.binary(Opcode::Div, lx, ly);
            bb.div_check(div);
            bb.tree_top(div);
            bb.ret(None);
        }

        Checks { proc, above, below }
    }

    fn check_of(catalog: &CandidateCatalog, kind: CheckKind) -> CandidateId {
        catalog.candidates().iter().find(|c| c.check == Some(kind)).unwrap().id
    }

    fn run_motion(checks: &mut Checks, placed_above: &[CheckKind]) -> (CandidateCatalog, MotionOutcome) {
        let catalog = CandidateCatalog::build(&checks.proc).unwrap();
        let structure = StructureTree::build(&mut checks.proc);
        let proc = &checks.proc;
        let transparency = LocalTransparency::compute(proc, &catalog);
        let local = LocalAnticipatability::compute(proc, &catalog);

        let mut optimistic = Placements::empty(&catalog, proc.num_blocks());
        for kind in placed_above {
            optimistic.exit[checks.above.0].insert(check_of(&catalog, *kind));
        }
        let redundant = vec![catalog.empty_set(); proc.num_blocks()];

        let outcome = {
            let motion =
                ExceptionCheckMotion::new(proc, &structure, &catalog, &transparency, &local, &optimistic, &redundant);
            motion.perform(&mut Never).unwrap()
        };
        (catalog, outcome)
    }

    #[test]
    fn gen_list_keeps_evaluation_order() {
        let checks = bound_then_divide();
        let catalog = CandidateCatalog::build(&checks.proc).unwrap();
        let orders = BlockOrders::compute(&checks.proc, &catalog);
        let order = orders.get(checks.below);

        let kinds: Vec<Option<CheckKind>> = order.gen.iter().map(|c| catalog.get(*c).check).collect();
        assert_eq!(kinds, vec![Some(CheckKind::Bound), Some(CheckKind::Div), None]);
        assert!(!order.truncated);
        assert!(order.kills.contains(KillFlags::check(CheckKind::Bound)));
        assert!(order.kills.contains(KillFlags::DIVIDE));
        assert!(!order.kills.contains(KillFlags::INDIRECT_ACCESS));
    }

    #[test]
    fn check_cannot_pass_an_earlier_check() {
        let mut checks = bound_then_divide();
        let (catalog, outcome) = run_motion(&mut checks, &[CheckKind::Div]);

        let div = check_of(&catalog, CheckKind::Div);
        assert!(!outcome.selection.placements.exit[checks.above.0].contains(div));
        assert_eq!(outcome.selection.rejected, 1);
        assert!(!outcome.fell_back);
    }

    #[test]
    fn checks_move_together_in_order() {
        let mut checks = bound_then_divide();
        let (catalog, outcome) = run_motion(&mut checks, &[CheckKind::Div, CheckKind::Bound]);

        let div = check_of(&catalog, CheckKind::Div);
        let bound = check_of(&catalog, CheckKind::Bound);
        assert_eq!(outcome.selection.exit_order[checks.above.0], vec![bound, div]);
        assert!(outcome.adjustment.redundant[checks.below.0].contains(div));
        assert!(outcome.adjustment.redundant[checks.below.0].contains(bound));
    }

    /// `start -> middle -> checks`. `start` null checks `p.f`; `checks` null checks
    /// `p.f`, `q.f` and `r.f` in that order.
    fn three_null_checks() -> (Procedure, [BlockId; 3], [NodeId; 3]) {
        let mut proc = Procedure::new(Options::default());
        let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "f"));
        let refs: Vec<_> = ["p", "q", "r"]
            .iter()
            .map(|name| proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, *name)))
            .collect();
        let start = proc.add_block(1.0);
        let middle = proc.add_block(1.0);
        let checks = proc.add_block(1.0);

        {
            let mut bb = BasicBlockBuilder::new(&mut proc, start);
            let base = bb.load(refs[0]);
            let value = bb.load_indirect(f, base);
            bb.null_check(value);
            bb.goto(middle);
        }
        BasicBlockBuilder::new(&mut proc, middle).goto(checks);

        let mut nodes = [NodeId(0); 3];
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, checks);
            for (node, r) in nodes.iter_mut().zip(refs.iter()) {
                let base = bb.load(*r);
                let value = bb.load_indirect(f, base);
                *node = bb.null_check(value);
            }
            bb.ret(None);
        }

        (proc, [start, middle, checks], nodes)
    }

    #[test]
    fn unconverged_selection_is_kept_as_second_best() {
        let (mut proc, [_, middle, _], nodes) = three_null_checks();
        let catalog = CandidateCatalog::build(&proc).unwrap();
        let structure = StructureTree::build(&mut proc);
        let transparency = LocalTransparency::compute(&proc, &catalog);
        let local = LocalAnticipatability::compute(&proc, &catalog);

        let [_, q, r] = nodes.map(|n| catalog.local_index(n).candidate().unwrap());

        // Each check only becomes movable once the one before it is available at
        // `middle`, which takes one more round than there are iterations.
        let mut optimistic = Placements::empty(&catalog, proc.num_blocks());
        optimistic.entry[middle.0].insert(q);
        optimistic.exit[middle.0].insert(q);
        optimistic.exit[middle.0].insert(r);
        let redundant = vec![catalog.empty_set(); proc.num_blocks()];

        let motion = ExceptionCheckMotion::new(&proc, &structure, &catalog, &transparency, &local, &optimistic, &redundant);
        let outcome = motion.perform(&mut Never).unwrap();

        assert!(outcome.fell_back);
        assert_eq!(outcome.rounds, NUM_ITERATIONS);
        assert!(outcome.selection.placements.entry[middle.0].contains(q));
        assert!(outcome.selection.placements.exit[middle.0].contains(q));
        assert!(!outcome.selection.placements.exit[middle.0].contains(r));
    }

    #[test]
    fn unavailable_redundancy_becomes_in_place_on_the_last_iteration() {
        let mut proc = Procedure::new(Options::default());
        let p = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, "p"));
        let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "f"));
        let entry = proc.add_block(1.0);
        let left = proc.add_block(1.0);
        let right = proc.add_block(1.0);
        let join = proc.add_block(1.0);
        let handler = proc.add_block(1.0);

        {
            let mut bb = BasicBlockBuilder::new(&mut proc, entry);
            let c = bb.int32(1);
            bb.branch(c, (left, Frequency::Normal), (right, Frequency::Normal));
        }
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, left);
            let base = bb.load(p);
            let value = bb.load_indirect(f, base);
            bb.null_check(value);
            bb.goto(join);
        }
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, right);
            bb.handler(handler);
            bb.goto(join);
        }
        let field = {
            let mut bb = BasicBlockBuilder::new(&mut proc, join);
            let base = bb.load(p);
            let value = bb.load_indirect(f, base);
            bb.tree_top(value);
            bb.ret(None);
            value
        };
        BasicBlockBuilder::new(&mut proc, handler).ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let structure = StructureTree::build(&mut proc);
        let transparency = LocalTransparency::compute(&proc, &catalog);
        let local = LocalAnticipatability::compute(&proc, &catalog);
        let field = catalog.local_index(field).candidate().unwrap();

        let mut optimistic = Placements::empty(&catalog, proc.num_blocks());
        optimistic.exit[left.0].insert(field);
        optimistic.exit[right.0].insert(field);
        let mut redundant = vec![catalog.empty_set(); proc.num_blocks()];
        redundant[join.0].insert(field);

        let motion = ExceptionCheckMotion::new(&proc, &structure, &catalog, &transparency, &local, &optimistic, &redundant);
        let outcome = motion.perform(&mut Never).unwrap();

        // The handler fences `right` off from `join`, so the load cannot be placed
        // there ahead of its null check.
        assert!(outcome.selection.placements.exit[left.0].contains(field));
        assert!(!outcome.selection.placements.exit[right.0].contains(field));
        assert!(outcome.adjustment.extras[join.0].contains(field));
        assert!(outcome.selection.placements.in_place[join.0].contains(field));
        assert!(!outcome.adjustment.redundant[join.0].contains(field));
        assert!(!outcome.fell_back);
    }
}
