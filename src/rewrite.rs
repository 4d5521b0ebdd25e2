//! Applies placements and eliminations to the procedure.
//!
//! Each block's events are replayed in order while tracking which candidates
//! are valid: promoted values that sit in their temporary, and checks that
//! already passed. A valid occurrence is redundant. Expressions become loads
//! of the temporary and checks degrade to a `TreeTop` that keeps their children.
//! Placements are built from the candidate key, reading operands from
//! temporaries where possible. Every new statement goes through an
//! [`InsertionSet`] keyed by the original statement positions.

use indexmap::IndexMap;

use crate::{
    analysis::Placements,
    block::BlockId,
    candidates::{CandidateCatalog, CandidateId, CandidateSet, Event, Operand},
    gate::TransformationGate,
    insertion_set::InsertionSet,
    node::{Node, NodeData, NodeId},
    opcode::Opcode,
    procedure::Procedure,
    symbol::SymbolId,
    typ::Type,
    use_counts::UseCounts,
};

/// A candidate that got a temporary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotedTemp {
    pub candidate: CandidateId,
    pub symbol: SymbolId,
    pub typ: Type,
}

/// What the rewrite needs from the analyses.
pub struct RewritePlan<'a> {
    pub catalog: &'a CandidateCatalog,
    pub placements: &'a Placements,
    pub entry_order: &'a [Vec<CandidateId>],
    pub exit_order: &'a [Vec<CandidateId>],
    /// `AVIN` of the final adjustment.
    pub available: &'a [CandidateSet],
    pub reachable: &'a [bool],
}

#[derive(Debug, Clone, Default)]
pub struct RewriteResult {
    pub temporaries: Vec<PromotedTemp>,
    pub profiling_candidates: Vec<NodeId>,
    pub placed: usize,
    /// In-place definitions of temporaries.
    pub defined: usize,
    pub eliminated: usize,
    pub checks_removed: usize,
    pub privatized_stores: usize,
    /// Eliminations refused by the gate or by an unsafe evaluation order.
    pub rejected: usize,
}

impl RewriteResult {
    pub fn altered(&self) -> bool {
        self.placed + self.defined + self.eliminated + self.checks_removed + self.privatized_stores > 0
    }
}

pub fn rewrite(proc: &mut Procedure, plan: &RewritePlan<'_>, gate: &mut dyn TransformationGate) -> RewriteResult {
    let catalog = plan.catalog;
    let mut result = RewriteResult::default();

    let mut temps: IndexMap<CandidateId, SymbolId> = IndexMap::new();
    for candidate in plan.placements.candidates(catalog).iter() {
        let c = catalog.get(candidate);
        if c.is_check() || c.is_auto_load {
            continue;
        }

        let symbol = proc.symbols_mut().add_temp(c.typ);
        temps.insert(candidate, symbol);
        result.temporaries.push(PromotedTemp {
            candidate,
            symbol,
            typ: c.typ,
        });
    }

    let mut tracked = catalog.checks();
    for candidate in temps.keys() {
        tracked.insert(*candidate);
    }

    let use_counts = UseCounts::new(proc);
    let blocks: Vec<BlockId> = proc.blocks().collect();

    for block in blocks {
        if !plan.reachable.get(block.0).copied().unwrap_or(false) {
            continue;
        }

        let mut rewriter = BlockRewriter {
            plan,
            temps: &temps,
            use_counts: &use_counts,
            block,
            valid: plan.available[block.0].intersection(&tracked),
            pending: Vec::new(),
            current_statement: 0,
            wrote_in_statement: false,
            insertions: InsertionSet::new(),
            anchored: Vec::new(),
            result: &mut result,
        };
        rewriter.run(proc, gate);

        let mut insertions = rewriter.insertions;
        insertions.execute(proc, block);
    }

    log::debug!(
        "rewrite: {} temporaries, {} placements, {} eliminated, {} checks removed, {} rejected",
        result.temporaries.len(),
        result.placed,
        result.eliminated,
        result.checks_removed,
        result.rejected
    );

    result
}

struct BlockRewriter<'r, 'a> {
    plan: &'r RewritePlan<'a>,
    temps: &'r IndexMap<CandidateId, SymbolId>,
    use_counts: &'r UseCounts,
    block: BlockId,
    valid: CandidateSet,
    /// Temporaries written after the current statement finishes.
    pending: Vec<CandidateId>,
    current_statement: usize,
    /// A write or barrier already ran in the current statement.
    wrote_in_statement: bool,
    insertions: InsertionSet,
    anchored: Vec<NodeId>,
    result: &'r mut RewriteResult,
}

impl BlockRewriter<'_, '_> {
    fn run(&mut self, proc: &mut Procedure, gate: &mut dyn TransformationGate) {
        let catalog = self.plan.catalog;
        let block = self.block;
        let terminator = proc.block(block).terminator_index(proc);
        let exit_index = terminator.unwrap_or_else(|| proc.block(block).len());

        let entry = ordered(&self.plan.entry_order[block.0], &self.plan.placements.entry[block.0]);
        self.place_all(proc, &entry, 0);

        let mut exits_placed = false;
        for event in catalog.events(block) {
            if event.statement() != self.current_statement {
                self.finish_statement(event.statement());
            }

            if !exits_placed && event.statement() >= exit_index {
                self.place_exits(proc, exit_index);
                exits_placed = true;
            }

            match event {
                Event::Compute { candidate, node, statement } => {
                    self.compute(proc, gate, *candidate, *node, *statement, terminator)
                }
                Event::Write { writes, store, node, .. } => {
                    self.wrote_in_statement = true;

                    let killed = catalog.killed_by(writes);
                    self.valid.subtract(&killed);
                    self.pending.retain(|c| !killed.contains(*c));

                    if let Some(stored) = store {
                        self.privatize(proc, *stored, *node);
                    }
                }
                Event::Barrier { .. } => self.wrote_in_statement = true,
            }
        }

        self.finish_statement(usize::MAX);
        if !exits_placed {
            self.place_exits(proc, exit_index);
        }
    }

    fn finish_statement(&mut self, next: usize) {
        for candidate in self.pending.drain(..) {
            self.valid.insert(candidate);
        }
        self.current_statement = next;
        self.wrote_in_statement = false;
    }

    fn place_exits(&mut self, proc: &mut Procedure, index: usize) {
        let block = self.block.0;
        let exit = ordered(&self.plan.exit_order[block], &self.plan.placements.exit[block]);
        self.place_all(proc, &exit, index);
    }

    fn place_all(&mut self, proc: &mut Procedure, candidates: &[CandidateId], index: usize) {
        let mut memo = IndexMap::new();

        for candidate in candidates.iter().copied() {
            if self.valid.contains(candidate) {
                continue;
            }

            let statement = if self.plan.catalog.get(candidate).is_check() {
                self.materialize_check(proc, candidate, &mut memo)
            } else {
                let Some(temp) = self.temps.get(&candidate).copied() else {
                    continue;
                };
                let value = self.materialize(proc, candidate, &mut memo);
                proc.add_store(temp, value)
            };

            self.insertions.insert(index, statement);
            self.valid.insert(candidate);
            self.result.placed += 1;
        }
    }

    fn compute(
        &mut self,
        proc: &mut Procedure,
        gate: &mut dyn TransformationGate,
        candidate: CandidateId,
        node: NodeId,
        statement: usize,
        terminator: Option<usize>,
    ) {
        let c = self.plan.catalog.get(candidate);
        if c.is_auto_load {
            return;
        }

        if self.valid.contains(candidate) {
            if self.eliminate(proc, gate, candidate, node, statement) {
                return;
            }
        } else if c.is_check() {
            self.valid.insert(candidate);
            return;
        }

        if self.plan.placements.in_place[self.block.0].contains(candidate) && !self.valid.contains(candidate) {
            if let Some(temp) = self.temps.get(&candidate).copied() {
                self.define_in_place(proc, temp, node, statement, terminator);
                self.pending.push(candidate);
                self.result.defined += 1;
            }
        }
    }

    /// Returns whether the occurrence was removed.
    fn eliminate(
        &mut self,
        proc: &mut Procedure,
        gate: &mut dyn TransformationGate,
        candidate: CandidateId,
        node: NodeId,
        statement: usize,
    ) -> bool {
        let is_check = self.plan.catalog.get(candidate).is_check();
        let temp = self.temps.get(&candidate).copied();

        if !is_check && temp.is_none() {
            return false;
        }

        let shared: Vec<NodeId> = proc
            .node(node)
            .children()
            .iter()
            .copied()
            .filter(|child| self.use_counts.num_uses(*child) > 1 && proc.node(*child).opcode() != Opcode::Const)
            .collect();

        // Anchoring would move the children above an earlier write in the same statement.
        if !is_check && !shared.is_empty() && self.wrote_in_statement {
            self.result.rejected += 1;
            return false;
        }

        if !gate.allow_elimination(candidate, self.block) {
            self.result.rejected += 1;
            return false;
        }

        if is_check {
            proc.node_mut(node).degrade_to_tree_top();
            self.result.checks_removed += 1;
            return true;
        }

        for child in shared {
            if !self.anchored.contains(&child) {
                self.insertions.insert_tree_top(statement, child, proc);
                self.anchored.push(child);
            }
        }

        let Some(temp) = temp else {
            return false;
        };

        let options = proc.options();
        if options.value_profiling
            && proc.node(node).typ().is_int()
            && self.result.profiling_candidates.len() < options.max_value_profiled_expressions
        {
            self.result.profiling_candidates.push(node);
        }

        proc.node_mut(node).replace_with_load(temp);
        self.result.eliminated += 1;
        true
    }

    fn define_in_place(
        &mut self,
        proc: &mut Procedure,
        temp: SymbolId,
        node: NodeId,
        statement: usize,
        terminator: Option<usize>,
    ) {
        if terminator != Some(statement) {
            self.insertions.insert_store(statement + 1, temp, node, proc);
            return;
        }

        // Nothing follows a terminator: evaluate its operands in order right before it.
        let terminator_node = proc.block(self.block)[statement];
        let children: Vec<NodeId> = proc.node(terminator_node).children().to_vec();
        for child in children {
            if !self.anchored.contains(&child) {
                self.insertions.insert_tree_top(statement, child, proc);
                self.anchored.push(child);
            }
        }
        self.insertions.insert_store(statement, temp, node, proc);
    }

    /// `t = value` after a store of a promoted location keeps `t` current.
    fn privatize(&mut self, proc: &mut Procedure, stored: CandidateId, store: NodeId) {
        let Some(temp) = self.temps.get(&stored).copied() else {
            return;
        };

        let n = proc.node(store);
        let Some(value) = n.opcode().stored_value_index().and_then(|i| n.children().get(i).copied()) else {
            return;
        };

        self.insertions.insert_store(self.current_statement + 1, temp, value, proc);
        self.pending.push(stored);
        self.result.privatized_stores += 1;
    }

    fn materialize(&mut self, proc: &mut Procedure, candidate: CandidateId, memo: &mut IndexMap<CandidateId, NodeId>) -> NodeId {
        if let Some(node) = memo.get(&candidate) {
            return *node;
        }

        let node = match self.temps.get(&candidate).copied() {
            Some(temp) if self.valid.contains(candidate) => proc.add_load(temp),
            _ => {
                let key = self.plan.catalog.get(candidate).key.clone();
                let children: Vec<NodeId> = key
                    .operands
                    .iter()
                    .map(|operand| self.operand(proc, *operand, memo))
                    .collect();
                let data = key.symbol.map_or(NodeData::None, NodeData::Symbol);
                proc.add(Node::new(key.opcode, key.typ, &children, data))
            }
        };

        memo.insert(candidate, node);
        node
    }

    fn operand(&mut self, proc: &mut Procedure, operand: Operand, memo: &mut IndexMap<CandidateId, NodeId>) -> NodeId {
        match operand {
            Operand::Candidate(id) => self.materialize(proc, id, memo),
            Operand::Const(value, typ) => proc.add_int_constant(typ, value),
            Operand::Address(symbol) => proc.add_load_addr(symbol),
        }
    }

    fn materialize_check(
        &mut self,
        proc: &mut Procedure,
        candidate: CandidateId,
        memo: &mut IndexMap<CandidateId, NodeId>,
    ) -> NodeId {
        let key = self.plan.catalog.get(candidate).key.clone();
        let operands: Vec<NodeId> = key
            .operands
            .iter()
            .map(|operand| self.operand(proc, *operand, memo))
            .collect();
        let data = key.symbol.map_or(NodeData::None, NodeData::Symbol);

        match key.opcode {
            Opcode::NullCheck => {
                let reference = proc.add_pass_through(operands[0]);
                proc.add_check(Opcode::NullCheck, &[reference], data)
            }
            Opcode::DivCheck => {
                let divisor = operands[0];
                let one = proc.add_int_constant(proc.node(divisor).typ(), 1);
                let division = proc.add_binary(Opcode::Div, one, divisor);
                proc.add_check(Opcode::DivCheck, &[division], data)
            }
            opcode => proc.add_check(opcode, &operands, data),
        }
    }
}

/// `placed` in `order`, then anything `order` missed by id.
fn ordered(order: &[CandidateId], placed: &CandidateSet) -> Vec<CandidateId> {
    let mut result: Vec<CandidateId> = order.iter().copied().filter(|c| placed.contains(*c)).collect();
    for candidate in placed.iter() {
        if !result.contains(&candidate) {
            result.push(candidate);
        }
    }
    result
}
