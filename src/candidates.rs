//! Candidate catalog: every movable expression and check, keyed structurally.
//!
//! One walk over the procedure gives each eligible subtree a candidate id, where
//! two subtrees share an id when they apply the same operator with the same symbol
//! to the same operands. Stores of non-auto symbols are keyed as the load that
//! would read the stored value back, so a store to `o.f` and a later load of `o.f`
//! are the same candidate.
//!
//! The walk also records, per block, the ordered [`Event`]s the local analyses
//! and the rewrite replay consume.

use std::fmt;

use indexmap::IndexMap;
use tinyvec::TinyVec;

use crate::{
    block::BlockId,
    error::{PreError, Result},
    node::NodeId,
    opcode::{CheckKind, Opcode},
    procedure::Procedure,
    symbol::{SymbolId, SymbolSet},
    typ::Type,
    utils::{
        index_set::{IndexSet, KeyIndex},
        visit::Traversal,
    },
};

/// Candidate number. Numbering starts at one; bit `n - 1` of a [`CandidateSet`]
/// stands for candidate `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CandidateId(u32);

impl CandidateId {
    pub fn new(n: u32) -> Self {
        debug_assert!(n != 0, "candidate numbers start at one");
        Self(n)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl KeyIndex for CandidateId {
    fn index(&self) -> usize {
        self.0 as usize - 1
    }

    fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

pub type CandidateSet = IndexSet<CandidateId>;

/// Per node classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LocalIndex {
    /// Not reached by the walk.
    #[default]
    Unassigned,
    /// Never moved, commoned or eliminated.
    Excluded,
    Candidate(CandidateId),
}

impl LocalIndex {
    pub fn candidate(self) -> Option<CandidateId> {
        match self {
            LocalIndex::Candidate(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Candidate(CandidateId),
    Const(i64, Type),
    /// Address of a symbol, when `LoadAddr` is not itself a candidate.
    Address(SymbolId),
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Const(0, Type::Void)
    }
}

impl Operand {
    pub fn candidate(self) -> Option<CandidateId> {
        match self {
            Operand::Candidate(id) => Some(id),
            _ => None,
        }
    }

    fn sort_key(&self) -> (u8, i64, usize) {
        match *self {
            Operand::Candidate(id) => (0, 0, id.index()),
            Operand::Const(value, _) => (1, value, 0),
            Operand::Address(symbol) => (2, 0, symbol.0),
        }
    }
}

/// Structural description of a candidate, also the recipe to rebuild it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateKey {
    pub opcode: Opcode,
    pub typ: Type,
    pub symbol: Option<SymbolId>,
    pub operands: TinyVec<[Operand; 3]>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: CandidateId,
    pub key: CandidateKey,
    /// First node found with this key.
    pub representative: NodeId,
    pub typ: Type,
    /// Every symbol the value depends on, operands included.
    pub reads: SymbolSet,
    pub check: Option<CheckKind>,
    /// Indirect load, array access, array length or integer divide.
    pub guarded_access: bool,
    /// A check, or an expression containing a guarded access. Their relative order
    /// is preserved by exception check motion.
    pub order_sensitive: bool,
    /// Checks guarding every guarded access inside the candidate, when each of them
    /// has one in the catalog. Once all of them are available the candidate can
    /// be evaluated anywhere.
    pub guards: Option<TinyVec<[CandidateId; 2]>>,
    /// Indirect loads of a shadowing field through the same base.
    pub shadow_siblings: TinyVec<[CandidateId; 2]>,
    /// Direct load of a local or parameter. Usable as an operand, never promoted.
    pub is_auto_load: bool,
    pub occurrences: Vec<(BlockId, NodeId)>,
}

impl Candidate {
    pub fn is_check(&self) -> bool {
        self.check.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarrierKind {
    /// A check that is not a candidate.
    Check,
    Call,
    Allocation,
    HeapStore,
    /// Store to an auto in a block whose handlers could observe it.
    AutoStore,
    Volatile,
    Unresolved,
}

/// What happens in a block, in evaluation order.
#[derive(Debug, Clone)]
pub enum Event {
    /// `node` evaluates `candidate`.
    Compute {
        candidate: CandidateId,
        node: NodeId,
        statement: usize,
    },
    /// `node` may modify `writes`. `store` is the candidate a store of a non-auto
    /// symbol makes available with the stored value.
    Write {
        node: NodeId,
        statement: usize,
        writes: SymbolSet,
        store: Option<CandidateId>,
        heap: bool,
    },
    /// Nothing order sensitive may move across `node`.
    Barrier {
        node: NodeId,
        statement: usize,
        kind: BarrierKind,
    },
}

impl Event {
    pub fn statement(&self) -> usize {
        match self {
            Event::Compute { statement, .. } | Event::Write { statement, .. } | Event::Barrier { statement, .. } => {
                *statement
            }
        }
    }
}

/// The candidate made available on the non-null successor of an `IfNull`/`IfNonNull`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullConstraint {
    pub successor: BlockId,
    pub check: CandidateId,
}

pub struct CandidateCatalog {
    candidates: Vec<Candidate>,
    keys: IndexMap<CandidateKey, CandidateId>,
    local_index: Vec<LocalIndex>,
    events: Vec<Vec<Event>>,
    killed_by: Vec<Vec<CandidateId>>,
    null_constraints: Vec<Option<NullConstraint>>,
}

impl CandidateCatalog {
    pub fn build(proc: &Procedure) -> Result<Self> {
        let mut builder = CatalogBuilder {
            proc,
            catalog: Self {
                candidates: Vec::new(),
                keys: IndexMap::new(),
                local_index: vec![LocalIndex::Unassigned; proc.num_nodes()],
                events: vec![Vec::new(); proc.num_blocks()],
                killed_by: vec![Vec::new(); proc.symbols().len()],
                null_constraints: vec![None; proc.num_blocks()],
            },
            traversal: Traversal::new(proc.num_nodes()),
            capacity: proc.options().max_candidates,
        };

        for block in proc.blocks() {
            builder.walk_block(block)?;
        }

        let mut catalog = builder.catalog;
        catalog.finish(proc);

        log::debug!(
            "catalog: {} candidates ({} checks) over {} nodes",
            catalog.len(),
            catalog.candidates.iter().filter(|c| c.is_check()).count(),
            proc.num_nodes()
        );

        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = CandidateId> {
        (0..self.candidates.len()).map(CandidateId::from_index)
    }

    pub fn get(&self, id: CandidateId) -> &Candidate {
        &self.candidates[id.index()]
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn lookup(&self, key: &CandidateKey) -> Option<CandidateId> {
        self.keys.get(key).copied()
    }

    pub fn local_index(&self, node: NodeId) -> LocalIndex {
        self.local_index.get(node.0).copied().unwrap_or_default()
    }

    pub fn events(&self, block: BlockId) -> &[Event] {
        &self.events[block.0]
    }

    pub fn null_constraint(&self, block: BlockId) -> Option<NullConstraint> {
        self.null_constraints.get(block.0).copied().flatten()
    }

    pub fn empty_set(&self) -> CandidateSet {
        CandidateSet::new(self.len())
    }

    pub fn full_set(&self) -> CandidateSet {
        CandidateSet::full(self.len())
    }

    /// Every check candidate.
    pub fn checks(&self) -> CandidateSet {
        self.filtered(|c| c.is_check())
    }

    pub fn filtered(&self, mut f: impl FnMut(&Candidate) -> bool) -> CandidateSet {
        let mut set = self.empty_set();
        for candidate in &self.candidates {
            if f(candidate) {
                set.insert(candidate.id);
            }
        }
        set
    }

    /// Candidates whose value a write of `writes` may change.
    pub fn killed_by(&self, writes: &SymbolSet) -> CandidateSet {
        let mut set = self.empty_set();
        for symbol in writes.iter() {
            if let Some(killed) = self.killed_by.get(symbol.0) {
                for id in killed {
                    set.insert(*id);
                }
            }
        }
        set
    }

    /// A check survives where it is available, an expression where all of its
    /// guards are.
    pub fn is_survivor(&self, id: CandidateId, available: &CandidateSet) -> bool {
        let candidate = self.get(id);

        if candidate.is_check() {
            return available.contains(id);
        }

        match &candidate.guards {
            Some(guards) => guards.iter().all(|g| available.contains(*g)),
            None => false,
        }
    }

    fn finish(&mut self, proc: &Procedure) {
        for candidate in &self.candidates {
            for symbol in candidate.reads.iter() {
                if symbol.0 >= self.killed_by.len() {
                    self.killed_by.resize(symbol.0 + 1, Vec::new());
                }
                self.killed_by[symbol.0].push(candidate.id);
            }
        }

        // Operands are numbered before their users, so one pass in id order suffices.
        for index in 0..self.candidates.len() {
            let guards = self.compute_guards(index);
            self.candidates[index].guards = guards;
        }

        for index in 0..self.candidates.len() {
            let siblings = self.compute_shadow_siblings(proc, index);
            self.candidates[index].shadow_siblings = siblings;
        }

        for block in proc.blocks() {
            self.null_constraints[block.0] = self.compute_null_constraint(proc, block);
        }
    }

    fn direct_guard(&self, candidate: &Candidate) -> Option<CandidateId> {
        let (opcode, operand) = match candidate.key.opcode {
            Opcode::LoadIndirect | Opcode::ArrayLength => (Opcode::NullCheck, *candidate.key.operands.first()?),
            Opcode::Div | Opcode::Rem => (Opcode::DivCheck, *candidate.key.operands.get(1)?),
            _ => return None,
        };

        self.lookup(&CandidateKey {
            opcode,
            typ: Type::Void,
            symbol: None,
            operands: std::iter::once(operand).collect(),
        })
    }

    fn compute_guards(&self, index: usize) -> Option<TinyVec<[CandidateId; 2]>> {
        let candidate = &self.candidates[index];

        if candidate.is_check() {
            return None;
        }

        let mut guards: TinyVec<[CandidateId; 2]> = TinyVec::new();

        if candidate.guarded_access {
            // Element loads also need their bound check; those never survive.
            if candidate.key.opcode == Opcode::ArrayLoad {
                return None;
            }
            guards.push(self.direct_guard(candidate)?);
        }

        for operand in candidate.key.operands.iter().filter_map(|o| o.candidate()) {
            for guard in self.candidates[operand.index()].guards.as_ref()?.iter() {
                if !guards.contains(guard) {
                    guards.push(*guard);
                }
            }
        }

        Some(guards)
    }

    fn compute_shadow_siblings(&self, proc: &Procedure, index: usize) -> TinyVec<[CandidateId; 2]> {
        let candidate = &self.candidates[index];
        let mut siblings = TinyVec::new();

        let (Opcode::LoadIndirect, Some(field)) = (candidate.key.opcode, candidate.key.symbol) else {
            return siblings;
        };

        for other in &self.candidates {
            if other.key.opcode == Opcode::LoadIndirect
                && other.key.operands == candidate.key.operands
                && other.key.symbol.map_or(false, |s| proc.symbols().shadows(field, s))
            {
                siblings.push(other.id);
            }
        }

        siblings
    }

    fn compute_null_constraint(&self, proc: &Procedure, block: BlockId) -> Option<NullConstraint> {
        let bb = proc.block(block);
        let terminator = *bb.last()?;
        let node = proc.node(terminator);

        let successor = match node.opcode() {
            Opcode::IfNull => bb.successor_list().get(1)?.0,
            Opcode::IfNonNull => bb.successor_list().first()?.0,
            _ => return None,
        };

        let reference = self.local_index(*node.children().first()?).candidate()?;
        let check = self.lookup(&CandidateKey {
            opcode: Opcode::NullCheck,
            typ: Type::Void,
            symbol: None,
            operands: std::iter::once(Operand::Candidate(reference)).collect(),
        })?;

        Some(NullConstraint { successor, check })
    }
}

/// The node a `NullCheck` of `value` tests.
pub fn null_check_reference(proc: &Procedure, value: NodeId) -> NodeId {
    let node = proc.node(value);

    if node.opcode() == Opcode::PassThrough || node.children().is_empty() {
        value
    } else {
        node.children()[0]
    }
}

fn first_child(proc: &Procedure, node: NodeId) -> Result<NodeId> {
    proc.node(node)
        .children()
        .first()
        .copied()
        .ok_or_else(|| PreError::invariant(format!("{:?} without operand", proc.node(node).opcode())))
}

struct CatalogBuilder<'a> {
    proc: &'a Procedure,
    catalog: CandidateCatalog,
    traversal: Traversal,
    capacity: usize,
}

impl<'a> CatalogBuilder<'a> {
    fn walk_block(&mut self, block: BlockId) -> Result<()> {
        let proc = self.proc;
        let mut traversal = std::mem::take(&mut self.traversal);

        let result = traversal.scope(|traversal| {
            for (statement, node) in proc.block(block).iter().copied().enumerate() {
                self.walk(traversal, block, statement, node)?;
            }
            Ok(())
        });

        self.traversal = traversal;
        result
    }

    fn operand_of(&self, node: NodeId) -> Option<Operand> {
        let proc = self.proc;

        if let LocalIndex::Candidate(id) = self.catalog.local_index(node) {
            return Some(Operand::Candidate(id));
        }

        let n = proc.node(node);
        match n.opcode() {
            Opcode::Const => Some(Operand::Const(n.constant()?, n.typ())),
            Opcode::LoadAddr if !proc.options().loadaddr_as_load => Some(Operand::Address(n.symbol()?)),
            Opcode::PassThrough => self.operand_of(*n.children().first()?),
            _ => None,
        }
    }

    fn set_index(&mut self, node: NodeId, index: LocalIndex) {
        if node.0 >= self.catalog.local_index.len() {
            self.catalog.local_index.resize(node.0 + 1, LocalIndex::Unassigned);
        }
        self.catalog.local_index[node.0] = index;
    }

    fn push(&mut self, block: BlockId, event: Event) {
        self.catalog.events[block.0].push(event);
    }

    fn walk_children(&mut self, traversal: &mut Traversal, block: BlockId, statement: usize, node: NodeId) -> Result<()> {
        for child in self.proc.node(node).children().iter().copied() {
            self.walk(traversal, block, statement, child)?;
        }
        Ok(())
    }

    fn walk(&mut self, traversal: &mut Traversal, block: BlockId, statement: usize, node: NodeId) -> Result<()> {
        if !traversal.visit(node) {
            return Ok(());
        }

        let proc = self.proc;
        let opcode = proc.node(node).opcode();

        match opcode {
            Opcode::NullCheck => {
                let value = first_child(proc, node)?;
                let reference = null_check_reference(proc, value);

                self.walk(traversal, block, statement, reference)?;
                let operand = self.operand_of(reference);
                self.check(block, statement, node, CheckKind::Null, operand.into_iter().collect(), operand.is_some())?;
                self.walk(traversal, block, statement, value)?;
            }

            Opcode::DivCheck => {
                let division = first_child(proc, node)?;
                self.walk_children(traversal, block, statement, division)?;

                let divisor = proc.node(division).children().get(1).copied();
                let operand = divisor.and_then(|d| self.operand_of(d));
                self.check(block, statement, node, CheckKind::Div, operand.into_iter().collect(), operand.is_some())?;
                self.walk(traversal, block, statement, division)?;
            }

            _ if opcode.is_check() => {
                self.walk_children(traversal, block, statement, node)?;

                let operands: Option<TinyVec<[Operand; 3]>> = proc
                    .node(node)
                    .children()
                    .iter()
                    .map(|child| self.operand_of(*child))
                    .collect();
                let complete = operands.is_some();
                let kind = opcode.check_kind().ok_or_else(|| PreError::invariant("check without kind"))?;
                self.check(block, statement, node, kind, operands.unwrap_or_default(), complete)?;
            }

            Opcode::Store | Opcode::StoreIndirect | Opcode::ArrayStore => {
                self.walk_children(traversal, block, statement, node)?;
                self.store(block, statement, node)?;
            }

            Opcode::Call | Opcode::New => {
                self.walk_children(traversal, block, statement, node)?;
                self.set_index(node, LocalIndex::Excluded);

                let effects = proc.effects(node);
                if opcode == Opcode::New || effects.exit_sideways {
                    let kind = if opcode == Opcode::New { BarrierKind::Allocation } else { BarrierKind::Call };
                    self.push(block, Event::Barrier { node, statement, kind });
                }
                if !effects.writes.is_empty() {
                    self.push(
                        block,
                        Event::Write {
                            node,
                            statement,
                            writes: effects.writes,
                            store: None,
                            heap: effects.writes_heap,
                        },
                    );
                }
            }

            Opcode::Const => self.set_index(node, LocalIndex::Excluded),

            Opcode::LoadAddr if !proc.options().loadaddr_as_load => self.set_index(node, LocalIndex::Excluded),

            Opcode::PassThrough => {
                self.walk_children(traversal, block, statement, node)?;
                let index = match self.operand_of(node) {
                    Some(Operand::Candidate(id)) => LocalIndex::Candidate(id),
                    _ => LocalIndex::Excluded,
                };
                self.set_index(node, index);
            }

            _ if opcode.is_statement() => {
                self.walk_children(traversal, block, statement, node)?;
                self.set_index(node, LocalIndex::Excluded);
            }

            _ => {
                self.walk_children(traversal, block, statement, node)?;
                self.expression(block, statement, node)?;
            }
        }

        Ok(())
    }

    fn check(
        &mut self,
        block: BlockId,
        statement: usize,
        node: NodeId,
        kind: CheckKind,
        operands: TinyVec<[Operand; 3]>,
        complete: bool,
    ) -> Result<()> {
        if !kind.is_movable() || !complete {
            self.set_index(node, LocalIndex::Excluded);
            self.push(block, Event::Barrier { node, statement, kind: BarrierKind::Check });
            return Ok(());
        }

        let key = CandidateKey {
            opcode: kind.opcode(),
            typ: Type::Void,
            symbol: self.proc.node(node).symbol(),
            operands,
        };

        let id = self.intern(key, node, Some(kind))?;
        self.catalog.candidates[id.index()].occurrences.push((block, node));
        self.set_index(node, LocalIndex::Candidate(id));
        self.push(block, Event::Compute { candidate: id, node, statement });
        Ok(())
    }

    fn expression(&mut self, block: BlockId, statement: usize, node: NodeId) -> Result<()> {
        let proc = self.proc;
        let n = proc.node(node);

        if let Some(symbol) = n.symbol() {
            let symbol = proc.symbols().get(symbol);

            if symbol.unresolved {
                self.set_index(node, LocalIndex::Excluded);
                self.push(block, Event::Barrier { node, statement, kind: BarrierKind::Unresolved });
                let effects = proc.effects(node);
                self.push(
                    block,
                    Event::Write {
                        node,
                        statement,
                        writes: effects.writes,
                        store: None,
                        heap: true,
                    },
                );
                return Ok(());
            }

            if symbol.volatile {
                self.set_index(node, LocalIndex::Excluded);
                self.push(block, Event::Barrier { node, statement, kind: BarrierKind::Volatile });
                return Ok(());
            }
        }

        let operands: Option<TinyVec<[Operand; 3]>> = n.children().iter().map(|c| self.operand_of(*c)).collect();
        let Some(mut operands) = operands else {
            self.set_index(node, LocalIndex::Excluded);
            return Ok(());
        };

        if n.opcode().is_commutative() {
            operands.sort_by_key(|o| o.sort_key());
        }

        let key = CandidateKey {
            opcode: n.opcode(),
            typ: n.typ(),
            symbol: n.symbol(),
            operands,
        };

        let id = self.intern(key, node, None)?;
        self.catalog.candidates[id.index()].occurrences.push((block, node));
        self.set_index(node, LocalIndex::Candidate(id));
        self.push(block, Event::Compute { candidate: id, node, statement });
        Ok(())
    }

    fn store(&mut self, block: BlockId, statement: usize, node: NodeId) -> Result<()> {
        let proc = self.proc;
        let n = proc.node(node);
        let effects = proc.effects(node);
        self.set_index(node, LocalIndex::Excluded);

        let Some(symbol_id) = n.symbol() else {
            return Err(PreError::invariant(format!("store {} without a symbol", node)));
        };
        let symbol = proc.symbols().get(symbol_id);

        if symbol.volatile {
            self.push(block, Event::Barrier { node, statement, kind: BarrierKind::Volatile });
        } else if effects.writes_heap {
            self.push(block, Event::Barrier { node, statement, kind: BarrierKind::HeapStore });
        } else if symbol.is_auto() && proc.block(block).has_exception_successors() {
            self.push(block, Event::Barrier { node, statement, kind: BarrierKind::AutoStore });
        }

        let mut store = None;
        if !symbol.is_auto() && !symbol.volatile && !symbol.unresolved {
            let value_index = n.opcode().stored_value_index().unwrap_or(0);
            let location: Option<TinyVec<[Operand; 3]>> = n
                .children()
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != value_index)
                .map(|(_, c)| self.operand_of(*c))
                .collect();

            if let (Some(operands), Some(opcode)) = (location, n.opcode().load_for_store()) {
                let key = CandidateKey {
                    opcode,
                    typ: symbol.typ,
                    symbol: Some(symbol_id),
                    operands,
                };
                store = Some(self.intern(key, node, None)?);
            }
        }

        self.push(
            block,
            Event::Write {
                node,
                statement,
                writes: effects.writes,
                store,
                heap: effects.writes_heap,
            },
        );

        Ok(())
    }

    fn intern(&mut self, key: CandidateKey, node: NodeId, check: Option<CheckKind>) -> Result<CandidateId> {
        if let Some(id) = self.catalog.keys.get(&key) {
            return Ok(*id);
        }

        if self.catalog.candidates.len() >= self.capacity {
            return Err(PreError::CapacityExceeded {
                candidates: self.catalog.candidates.len() + 1,
                capacity: self.capacity,
            });
        }

        let proc = self.proc;
        let id = CandidateId::from_index(self.catalog.candidates.len());

        let mut reads = SymbolSet::new(proc.symbols().len());
        let is_load = key.opcode.is_load() || key.opcode == Opcode::LoadAddr;
        if let (true, Some(symbol)) = (is_load, key.symbol) {
            reads.insert(symbol);
        }

        let mut order_sensitive = check.is_some();
        for operand in key.operands.iter().filter_map(|o| o.candidate()) {
            let operand = &self.catalog.candidates[operand.index()];
            reads.union_with(&operand.reads);
            order_sensitive |= operand.order_sensitive;
        }

        let guarded_access = check.is_none()
            && (matches!(key.opcode, Opcode::LoadIndirect | Opcode::ArrayLoad | Opcode::ArrayLength)
                || (key.opcode.is_division() && key.typ.is_int()));
        order_sensitive |= guarded_access;

        let is_auto_load =
            key.opcode == Opcode::Load && key.symbol.map_or(false, |s| proc.symbols().get(s).is_auto());

        self.catalog.candidates.push(Candidate {
            id,
            typ: key.typ,
            key: key.clone(),
            representative: node,
            reads,
            check,
            guarded_access,
            order_sensitive,
            guards: None,
            shadow_siblings: TinyVec::new(),
            is_auto_load,
            occurrences: Vec::new(),
        });
        self.catalog.keys.insert(key, id);

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BasicBlockBuilder,
        node::{Node, NodeData},
        symbol::{Symbol, SymbolKind},
        Options,
    };

    fn field_proc() -> (Procedure, SymbolId, SymbolId, SymbolId) {
        let mut proc = Procedure::new(Options::default());
        let p = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, "p"));
        let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "f"));
        let x = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "x"));
        (proc, p, f, x)
    }

    #[test]
    fn commutative_operands_share_a_candidate() {
        let mut proc = Procedure::new(Options::default());
        let a = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "a"));
        let b = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "b"));
        let entry = proc.add_block(1.0);

        let mut bb = BasicBlockBuilder::new(&mut proc, entry);
        let la = bb.load(a);
        let lb = bb.load(b);
        let ab = bb.binary(Opcode::Add, la, lb);
        bb.tree_top(ab);
        let la2 = bb.load(a);
        let lb2 = bb.load(b);
        let ba = bb.binary(Opcode::Add, lb2, la2);
        bb.tree_top(ba);
        let sub = bb.binary(Opcode::Sub, lb2, la2);
        bb.tree_top(sub);
        bb.ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        assert_eq!(catalog.local_index(ab), catalog.local_index(ba));
        assert_ne!(catalog.local_index(ab), catalog.local_index(sub));
        assert!(catalog.get(catalog.local_index(la).candidate().unwrap()).is_auto_load);
        assert_eq!(catalog.local_index(la2), catalog.local_index(la));
    }

    #[test]
    fn null_check_orders_reference_check_then_load() {
        let (mut proc, p, f, x) = field_proc();
        let entry = proc.add_block(1.0);

        let mut bb = BasicBlockBuilder::new(&mut proc, entry);
        let base = bb.load(p);
        let field = bb.load_indirect(f, base);
        bb.null_check(field);
        bb.store(x, field);
        bb.ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let order: Vec<Opcode> = catalog
            .events(entry)
            .iter()
            .filter_map(|e| match e {
                Event::Compute { candidate, .. } => Some(catalog.get(*candidate).key.opcode),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![Opcode::Load, Opcode::NullCheck, Opcode::LoadIndirect]);

        let load = catalog.local_index(field).candidate().unwrap();
        let check = catalog.get(load).guards.clone().unwrap();
        assert_eq!(check.len(), 1);
        assert_eq!(catalog.get(check[0]).check, Some(CheckKind::Null));
        assert!(catalog.get(load).order_sensitive);
    }

    #[test]
    fn field_store_is_keyed_as_its_load() {
        let (mut proc, p, f, _) = field_proc();
        let entry = proc.add_block(1.0);

        let mut bb = BasicBlockBuilder::new(&mut proc, entry);
        let base = bb.load(p);
        let one = bb.int32(1);
        bb.store_indirect(f, base, one);
        let base2 = bb.load(p);
        let field = bb.load_indirect(f, base2);
        bb.tree_top(field);
        bb.ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let load = catalog.local_index(field).candidate().unwrap();
        let store = catalog.events(entry).iter().find_map(|e| match e {
            Event::Write { store, .. } => *store,
            _ => None,
        });
        assert_eq!(store, Some(load));
        assert!(catalog.killed_by(&proc.effects(proc.block(entry)[0]).writes).contains(load));
    }

    #[test]
    fn calls_are_barriers_and_never_candidates() {
        let (mut proc, _, _, x) = field_proc();
        let m = proc.add_symbol(Symbol::new(SymbolKind::Method { pure: false }, Type::Int32, "m"));
        let entry = proc.add_block(1.0);

        let mut bb = BasicBlockBuilder::new(&mut proc, entry);
        let call = bb.call(m, Type::Int32, &[]);
        let one = bb.int32(1);
        let sum = bb.binary(Opcode::Add, call, one);
        bb.store(x, sum);
        bb.ret(None);

        let catalog = CandidateCatalog::build(&proc).unwrap();
        assert_eq!(catalog.local_index(call), LocalIndex::Excluded);
        assert_eq!(catalog.local_index(sum), LocalIndex::Excluded);
        assert!(catalog
            .events(entry)
            .iter()
            .any(|e| matches!(e, Event::Barrier { kind: BarrierKind::Call, .. })));
    }

    #[test]
    fn check_without_operand_is_an_invariant_violation() {
        let mut proc = Procedure::new(Options::default());
        let entry = proc.add_block(1.0);
        let check = proc.add(Node::new(Opcode::NullCheck, Type::Void, &[], NodeData::None));
        proc.add_to_block(entry, check);
        BasicBlockBuilder::new(&mut proc, entry).ret(None);

        assert!(matches!(
            CandidateCatalog::build(&proc),
            Err(PreError::InvariantViolation(_))
        ));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut proc = Procedure::new(Options {
            max_candidates: 1,
            ..Options::default()
        });
        let a = proc.add_symbol(Symbol::new(SymbolKind::Local, Type::Int32, "a"));
        let entry = proc.add_block(1.0);

        let mut bb = BasicBlockBuilder::new(&mut proc, entry);
        let la = bb.load(a);
        let one = bb.int32(1);
        let sum = bb.binary(Opcode::Add, la, one);
        bb.tree_top(sum);
        bb.ret(None);

        assert_eq!(
            CandidateCatalog::build(&proc).err(),
            Some(PreError::CapacityExceeded { candidates: 2, capacity: 1 })
        );
    }

    #[test]
    fn if_null_makes_check_available_on_non_null_edge() {
        let (mut proc, p, f, x) = field_proc();
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
            bb.store(x, field);
            bb.ret(None);
        }

        let catalog = CandidateCatalog::build(&proc).unwrap();
        let constraint = catalog.null_constraint(entry).unwrap();
        assert_eq!(constraint.successor, non_null);
        assert_eq!(catalog.get(constraint.check).check, Some(CheckKind::Null));
    }
}
