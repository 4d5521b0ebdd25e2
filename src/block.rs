use std::ops::{Deref, DerefMut};

use crate::{
    dominators::depth_first_post_order,
    node::{NodeData, NodeId},
    opcode::Opcode,
    procedure::Procedure,
    symbol::SymbolId,
    typ::Type,
    utils::index_set::KeyIndex,
};

pub struct BasicBlock {
    pub(crate) index: usize,
    pub(crate) statements: Vec<NodeId>,
    pub(crate) predecessor_list: Vec<BlockId>,
    pub(crate) successor_list: Vec<FrequentBlock>,
    pub(crate) exception_successors: Vec<BlockId>,
    pub(crate) exception_predecessors: Vec<BlockId>,
    pub(crate) frequency: f64,
}

impl BasicBlock {
    pub fn new(index: usize, frequency: f64) -> Self {
        Self {
            index,
            statements: Vec::new(),
            predecessor_list: Vec::new(),
            successor_list: Vec::new(),
            exception_successors: Vec::new(),
            exception_predecessors: Vec::new(),
            frequency,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> BlockId {
        BlockId(self.index)
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn taken(&self) -> FrequentBlock {
        self.successor_list[0]
    }

    pub fn not_taken(&self) -> FrequentBlock {
        self.successor_list[1]
    }

    pub fn append(&mut self, statement: NodeId) {
        self.statements.push(statement);
    }

    pub fn predecessor_list(&self) -> &Vec<BlockId> {
        &self.predecessor_list
    }

    pub fn successor_list(&self) -> &Vec<FrequentBlock> {
        &self.successor_list
    }

    pub fn successor_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.successor_list.iter().map(|x| x.0)
    }

    pub fn exception_successors(&self) -> &Vec<BlockId> {
        &self.exception_successors
    }

    pub fn exception_predecessors(&self) -> &Vec<BlockId> {
        &self.exception_predecessors
    }

    pub fn has_exception_successors(&self) -> bool {
        !self.exception_successors.is_empty()
    }

    pub fn add_predecessor(&mut self, predecessor: BlockId) -> bool {
        if self.predecessor_list.contains(&predecessor) {
            false
        } else {
            self.predecessor_list.push(predecessor);
            true
        }
    }

    pub fn remove_predecessor(&mut self, predecessor: BlockId) -> bool {
        let ix = self.predecessor_list.iter().position(|x| *x == predecessor);
        if let Some(ix) = ix {
            self.predecessor_list.remove(ix);
            true
        } else {
            false
        }
    }

    pub fn replace_successor(&mut self, from: BlockId, to: BlockId) -> bool {
        let mut result = false;

        for successor in &mut self.successor_list {
            if successor.0 == from {
                successor.0 = to;
                result = true;
            }
        }

        result
    }

    pub fn replace_predecessor(&mut self, from: BlockId, to: BlockId) -> bool {
        let mut changed = false;

        changed |= self.remove_predecessor(from);
        changed |= self.add_predecessor(to);

        changed
    }

    /// Index of the terminator, if the block ends in one.
    pub fn terminator_index(&self, proc: &Procedure) -> Option<usize> {
        let last = *self.statements.last()?;

        if proc.node(last).opcode().is_terminator() {
            Some(self.statements.len() - 1)
        } else {
            None
        }
    }

    pub(crate) fn fmt<W: std::fmt::Write>(&self, f: &mut W, proc: &Procedure) -> std::fmt::Result {
        writeln!(f, "BB{}: ; frequency = {}", self.index, self.frequency)?;
        if !self.predecessor_list.is_empty() {
            write!(f, "  Predecessors: ")?;
            for (i, pred) in self.predecessor_list.iter().enumerate() {
                write!(f, "BB{}", pred.0)?;

                if i < self.predecessor_list.len() - 1 {
                    write!(f, ", ")?;
                }
            }

            writeln!(f)?;
        }

        for statement in &self.statements {
            write!(f, "    ")?;
            proc.fmt_tree(f, *statement)?;
            writeln!(f)?;
        }

        if !self.successor_list.is_empty() {
            write!(f, "  Successors: ")?;
            for (i, (succ, frequency)) in self.successor_list.iter().enumerate() {
                write!(f, "BB{}", succ.0)?;
                if *frequency == Frequency::Rare {
                    write!(f, " (rare)")?;
                }

                if i < self.successor_list.len() - 1 {
                    write!(f, ", ")?;
                }
            }

            writeln!(f)?;
        }

        if !self.exception_successors.is_empty() {
            write!(f, "  Handlers: ")?;
            for (i, handler) in self.exception_successors.iter().enumerate() {
                write!(f, "BB{}", handler.0)?;

                if i < self.exception_successors.len() - 1 {
                    write!(f, ", ")?;
                }
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

/// Post order over normal and exceptional edges.
pub fn blocks_in_post_order(block: BlockId, proc: &Procedure) -> Vec<BlockId> {
    depth_first_post_order(proc, block)
}

pub fn blocks_in_reverse_post_order(block: BlockId, proc: &Procedure) -> Vec<BlockId> {
    let mut result = blocks_in_post_order(block, proc);
    result.reverse();
    result
}

impl Deref for BasicBlock {
    type Target = Vec<NodeId>;

    fn deref(&self) -> &Self::Target {
        &self.statements
    }
}

impl DerefMut for BasicBlock {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.statements
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl BlockId {
    pub fn statement(self, proc: &Procedure, index: usize) -> NodeId {
        proc.block(self)[index]
    }

    pub fn size(self, proc: &Procedure) -> usize {
        proc.block(self).len()
    }

    pub fn is_empty(self, proc: &Procedure) -> bool {
        proc.block(self).is_empty()
    }

    pub fn predecessor_list(self, proc: &Procedure) -> &[BlockId] {
        proc.block(self).predecessor_list()
    }

    pub fn successor_list(self, proc: &Procedure) -> &[FrequentBlock] {
        proc.block(self).successor_list()
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BB{}", self.0)
    }
}

impl KeyIndex for BlockId {
    fn index(&self) -> usize {
        self.0
    }

    fn from_index(index: usize) -> Self {
        BlockId(index)
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self(usize::MAX)
    }
}

impl From<BlockId> for usize {
    fn from(block: BlockId) -> usize {
        block.0
    }
}

impl From<usize> for BlockId {
    fn from(x: usize) -> Self {
        BlockId(x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Frequency {
    /// We don't have any hypothesis about the frequency of this control flow construct. This is
    /// the common case. We can still use basic block frequency in this case.
    #[default]
    Normal,
    /// We expect that this control flow construct will be reached super rarely. Blocks reached
    /// only through rare edges are cold.
    Rare,
}

pub type FrequentBlock = (BlockId, Frequency);

/// Appends trees to one block. Expression helpers only create nodes; statement
/// helpers also append them. Terminators record the block's successors.
pub struct BasicBlockBuilder<'a> {
    pub func: &'a mut Procedure,
    pub block: BlockId,
}

impl<'a> BasicBlockBuilder<'a> {
    pub fn new(func: &'a mut Procedure, block: BlockId) -> Self {
        BasicBlockBuilder { func, block }
    }

    pub fn append(&mut self, statement: NodeId) -> NodeId {
        self.func.add_to_block(self.block, statement);
        statement
    }

    pub fn int32(&mut self, value: i32) -> NodeId {
        self.func.add_int_constant(Type::Int32, value)
    }

    pub fn load(&mut self, symbol: SymbolId) -> NodeId {
        self.func.add_load(symbol)
    }

    pub fn load_addr(&mut self, symbol: SymbolId) -> NodeId {
        self.func.add_load_addr(symbol)
    }

    pub fn load_indirect(&mut self, field: SymbolId, base: NodeId) -> NodeId {
        self.func.add_load_indirect(field, base)
    }

    pub fn array_length(&mut self, array: NodeId) -> NodeId {
        self.func.add_array_length(array)
    }

    pub fn array_load(&mut self, typ: Type, array: NodeId, index: NodeId) -> NodeId {
        self.func.add_array_load(typ, array, index)
    }

    pub fn binary(&mut self, opcode: Opcode, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.func.add_binary(opcode, lhs, rhs)
    }

    pub fn call(&mut self, method: SymbolId, typ: Type, args: &[NodeId]) -> NodeId {
        self.func.add_call(method, typ, args)
    }

    pub fn new_object(&mut self, class: SymbolId) -> NodeId {
        self.func.add_new(class)
    }

    pub fn store(&mut self, symbol: SymbolId, value: NodeId) -> NodeId {
        let store = self.func.add_store(symbol, value);
        self.append(store)
    }

    pub fn store_indirect(&mut self, field: SymbolId, base: NodeId, value: NodeId) -> NodeId {
        let store = self.func.add_store_indirect(field, base, value);
        self.append(store)
    }

    pub fn array_store(&mut self, typ: Type, array: NodeId, index: NodeId, value: NodeId) -> NodeId {
        let store = self.func.add_array_store(typ, array, index, value);
        self.append(store)
    }

    pub fn tree_top(&mut self, value: NodeId) -> NodeId {
        let anchor = self.func.add_tree_top(&[value]);
        self.append(anchor)
    }

    /// `NullCheck(value)`: tests the first child of `value` (or `value` itself when it
    /// has no children) before evaluating `value`.
    pub fn null_check(&mut self, value: NodeId) -> NodeId {
        let check = self.func.add_check(Opcode::NullCheck, &[value], NodeData::None);
        self.append(check)
    }

    pub fn bound_check(&mut self, index: NodeId, length: NodeId) -> NodeId {
        let check = self.func.add_check(Opcode::BoundCheck, &[index, length], NodeData::None);
        self.append(check)
    }

    pub fn div_check(&mut self, division: NodeId) -> NodeId {
        let check = self.func.add_check(Opcode::DivCheck, &[division], NodeData::None);
        self.append(check)
    }

    pub fn check_cast(&mut self, object: NodeId, class: SymbolId) -> NodeId {
        let check = self.func.add_check(Opcode::CheckCast, &[object], NodeData::Symbol(class));
        self.append(check)
    }

    pub fn array_check(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let check = self.func.add_check(Opcode::ArrayCheck, &[a, b], NodeData::None);
        self.append(check)
    }

    pub fn resolve_check(&mut self, value: NodeId) -> NodeId {
        let check = self.func.add_check(Opcode::ResolveCheck, &[value], NodeData::None);
        self.append(check)
    }

    pub fn goto(&mut self, target: BlockId) -> NodeId {
        let jump = self.func.add_terminator(Opcode::Goto, &[]);
        self.func.add_successor(self.block, target, Frequency::Normal);
        self.append(jump)
    }

    /// Branch on `condition`: `taken` when non-zero, `not_taken` otherwise.
    pub fn branch(&mut self, condition: NodeId, taken: FrequentBlock, not_taken: FrequentBlock) -> NodeId {
        let branch = self.func.add_terminator(Opcode::Branch, &[condition]);
        self.func.add_successor(self.block, taken.0, taken.1);
        self.func.add_successor(self.block, not_taken.0, not_taken.1);
        self.append(branch)
    }

    /// `IfNull(reference)`: first successor when the reference is null.
    pub fn if_null(&mut self, reference: NodeId, null: BlockId, non_null: BlockId) -> NodeId {
        let branch = self.func.add_terminator(Opcode::IfNull, &[reference]);
        self.func.add_successor(self.block, null, Frequency::Normal);
        self.func.add_successor(self.block, non_null, Frequency::Normal);
        self.append(branch)
    }

    /// `IfNonNull(reference)`: first successor when the reference is not null.
    pub fn if_non_null(&mut self, reference: NodeId, non_null: BlockId, null: BlockId) -> NodeId {
        let branch = self.func.add_terminator(Opcode::IfNonNull, &[reference]);
        self.func.add_successor(self.block, non_null, Frequency::Normal);
        self.func.add_successor(self.block, null, Frequency::Normal);
        self.append(branch)
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        let children: Vec<NodeId> = value.into_iter().collect();
        let ret = self.func.add_terminator(Opcode::Return, &children);
        self.append(ret)
    }

    /// Exceptions raised in this block transfer control to `handler`.
    pub fn handler(&mut self, handler: BlockId) {
        self.func.add_exception_successor(self.block, handler);
    }
}
