use std::{borrow::Cow, fmt, rc::Rc};

use crate::{
    block::{BasicBlock, BlockId, Frequency},
    dominators::{Dominators, Graph},
    natural_loops::NaturalLoops,
    node::{Node, NodeData, NodeId},
    opcode::Opcode,
    symbol::{Symbol, SymbolId, SymbolTable},
    typ::Type,
    Options,
};

/// A procedure: node arena, blocks with their statement lists, and the symbol table.
pub struct Procedure {
    pub(crate) options: Options,
    pub(crate) nodes: Vec<Node>,
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) symbols: SymbolTable,
    pub(crate) dominators: Option<Rc<Dominators<Self>>>,
    pub(crate) natural_loops: Option<Rc<NaturalLoops<Self>>>,
}

impl Graph for Procedure {
    type Node = BlockId;

    fn node_index(&self, node: Self::Node) -> usize {
        node.0
    }

    fn node(&self, index: usize) -> Option<Self::Node> {
        Some(BlockId(index))
    }

    fn num_nodes(&self) -> usize {
        self.blocks.len()
    }

    fn root(&self) -> Self::Node {
        BlockId(0)
    }

    fn predecessors(&self, block: Self::Node) -> Cow<[Self::Node]> {
        let block = &self.blocks[block.0];

        if block.exception_predecessors.is_empty() {
            Cow::Borrowed(block.predecessor_list())
        } else {
            Cow::Owned(
                block
                    .predecessor_list()
                    .iter()
                    .chain(block.exception_predecessors.iter())
                    .copied()
                    .collect(),
            )
        }
    }

    fn successors(&self, block: Self::Node) -> Cow<[Self::Node]> {
        Cow::Owned(self.all_successors(block))
    }
}

impl Procedure {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            nodes: Vec::new(),
            blocks: Vec::new(),
            symbols: SymbolTable::new(),
            dominators: None,
            natural_loops: None,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> SymbolId {
        self.symbols.add(symbol)
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    pub fn cfg_root(&self) -> BlockId {
        BlockId(0)
    }

    pub fn add_block(&mut self, frequency: f64) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id.0, frequency));
        self.invalidate_cfg();
        id
    }

    pub fn add_to_block(&mut self, block: BlockId, statement: NodeId) {
        self.blocks[block.0].append(statement);
    }

    /// Add a new normal successor to a block.
    pub fn add_successor(&mut self, block: BlockId, successor: BlockId, frequency: Frequency) {
        self.blocks[block.0].successor_list.push((successor, frequency));
        self.blocks[successor.0].add_predecessor(block);
        self.invalidate_cfg();
    }

    pub fn add_exception_successor(&mut self, block: BlockId, handler: BlockId) {
        if !self.blocks[block.0].exception_successors.contains(&handler) {
            self.blocks[block.0].exception_successors.push(handler);
            self.blocks[handler.0].exception_predecessors.push(block);
            self.invalidate_cfg();
        }
    }

    /// Normal successors in order followed by exception handlers.
    pub fn all_successors(&self, block: BlockId) -> Vec<BlockId> {
        let block = &self.blocks[block.0];
        let mut result: Vec<BlockId> = Vec::with_capacity(block.successor_list.len() + block.exception_successors.len());

        for successor in block.successor_blocks().chain(block.exception_successors.iter().copied()) {
            if !result.contains(&successor) {
                result.push(successor);
            }
        }

        result
    }

    /// Distinct normal successors in order.
    pub fn normal_successors(&self, block: BlockId) -> Vec<BlockId> {
        let mut result: Vec<BlockId> = Vec::new();
        for successor in self.blocks[block.0].successor_blocks() {
            if !result.contains(&successor) {
                result.push(successor);
            }
        }
        result
    }

    pub fn normal_predecessors(&self, block: BlockId) -> &[BlockId] {
        &self.blocks[block.0].predecessor_list
    }

    pub fn invalidate_cfg(&mut self) {
        self.dominators = None;
        self.natural_loops = None;
    }

    pub fn dominators_or_compute(&mut self) -> Rc<Dominators<Self>> {
        if let Some(dominators) = &self.dominators {
            return dominators.clone();
        }

        let dominators = Rc::new(Dominators::new(self));
        self.dominators = Some(dominators.clone());
        dominators
    }

    pub fn natural_loops_or_compute(&mut self) -> Rc<NaturalLoops<Self>> {
        if let Some(loops) = &self.natural_loops {
            return loops.clone();
        }

        let dominators = self.dominators_or_compute();
        let loops = Rc::new(NaturalLoops::new(self, &dominators));
        self.natural_loops = Some(loops.clone());
        loops
    }

    pub fn add_int_constant(&mut self, typ: Type, value: impl Into<i64>) -> NodeId {
        self.add(Node::new(Opcode::Const, typ, &[], NodeData::Const(value.into())))
    }

    pub fn add_load(&mut self, symbol: SymbolId) -> NodeId {
        let typ = self.symbols.get(symbol).typ;
        self.add(Node::new(Opcode::Load, typ, &[], NodeData::Symbol(symbol)))
    }

    pub fn add_load_addr(&mut self, symbol: SymbolId) -> NodeId {
        self.add(Node::new(Opcode::LoadAddr, Type::Address, &[], NodeData::Symbol(symbol)))
    }

    pub fn add_load_indirect(&mut self, field: SymbolId, base: NodeId) -> NodeId {
        let typ = self.symbols.get(field).typ;
        self.add(Node::new(Opcode::LoadIndirect, typ, &[base], NodeData::Symbol(field)))
    }

    pub fn add_array_length(&mut self, array: NodeId) -> NodeId {
        self.add(Node::new(Opcode::ArrayLength, Type::Int32, &[array], NodeData::None))
    }

    pub fn add_array_load(&mut self, typ: Type, array: NodeId, index: NodeId) -> NodeId {
        let elements = self.symbols.array_element(typ);
        self.add(Node::new(Opcode::ArrayLoad, typ, &[array, index], NodeData::Symbol(elements)))
    }

    pub fn add_binary(&mut self, opcode: Opcode, lhs: NodeId, rhs: NodeId) -> NodeId {
        let typ = match opcode {
            Opcode::Equal | Opcode::NotEqual | Opcode::LessThan => Type::Int32,
            _ => self.node(lhs).typ(),
        };

        self.add(Node::new(opcode, typ, &[lhs, rhs], NodeData::None))
    }

    pub fn add_unary(&mut self, opcode: Opcode, child: NodeId) -> NodeId {
        let typ = self.node(child).typ();
        self.add(Node::new(opcode, typ, &[child], NodeData::None))
    }

    pub fn add_call(&mut self, method: SymbolId, typ: Type, args: &[NodeId]) -> NodeId {
        self.add(Node::new(Opcode::Call, typ, args, NodeData::Symbol(method)))
    }

    pub fn add_new(&mut self, class: SymbolId) -> NodeId {
        self.add(Node::new(Opcode::New, Type::Address, &[], NodeData::Symbol(class)))
    }

    pub fn add_store(&mut self, symbol: SymbolId, value: NodeId) -> NodeId {
        self.add(Node::new(Opcode::Store, Type::Void, &[value], NodeData::Symbol(symbol)))
    }

    pub fn add_store_indirect(&mut self, field: SymbolId, base: NodeId, value: NodeId) -> NodeId {
        self.add(Node::new(Opcode::StoreIndirect, Type::Void, &[base, value], NodeData::Symbol(field)))
    }

    pub fn add_array_store(&mut self, typ: Type, array: NodeId, index: NodeId, value: NodeId) -> NodeId {
        let elements = self.symbols.array_element(typ);
        self.add(Node::new(
            Opcode::ArrayStore,
            Type::Void,
            &[array, index, value],
            NodeData::Symbol(elements),
        ))
    }

    pub fn add_tree_top(&mut self, children: &[NodeId]) -> NodeId {
        self.add(Node::new(Opcode::TreeTop, Type::Void, children, NodeData::None))
    }

    pub fn add_pass_through(&mut self, child: NodeId) -> NodeId {
        let typ = self.node(child).typ();
        self.add(Node::new(Opcode::PassThrough, typ, &[child], NodeData::None))
    }

    pub fn add_check(&mut self, opcode: Opcode, children: &[NodeId], data: NodeData) -> NodeId {
        debug_assert!(opcode.is_check());
        self.add(Node::new(opcode, Type::Void, children, data))
    }

    pub fn add_terminator(&mut self, opcode: Opcode, children: &[NodeId]) -> NodeId {
        debug_assert!(opcode.is_terminator());
        self.add(Node::new(opcode, Type::Void, children, NodeData::None))
    }

    /// Copies the tree rooted at `id`. Shared subtrees stay shared in the copy.
    pub fn clone_tree(&mut self, id: NodeId) -> NodeId {
        let mut copies = indexmap::IndexMap::new();
        self.clone_tree_with(id, &mut copies)
    }

    fn clone_tree_with(&mut self, id: NodeId, copies: &mut indexmap::IndexMap<NodeId, NodeId>) -> NodeId {
        if let Some(copy) = copies.get(&id) {
            return *copy;
        }

        let mut node = self.node(id).clone();
        let children: Vec<NodeId> = node.children.iter().copied().collect();
        for (i, child) in children.into_iter().enumerate() {
            node.children[i] = self.clone_tree_with(child, copies);
        }

        let copy = self.add(node);
        copies.insert(id, copy);
        copy
    }

    pub fn fmt_tree<W: fmt::Write>(&self, f: &mut W, id: NodeId) -> fmt::Result {
        write!(f, "{} = ", id)?;
        self.node(id).fmt(f, self)?;

        for child in self.node(id).children() {
            if !self.node(*child).children().is_empty() {
                write!(f, " [")?;
                self.fmt_tree(f, *child)?;
                write!(f, "]")?;
            } else {
                write!(f, " [{} = ", child)?;
                self.node(*child).fmt(f, self)?;
                write!(f, "]")?;
            }
        }

        Ok(())
    }

    pub fn display(&self) -> ProcedureDisplay<'_> {
        ProcedureDisplay { proc: self }
    }
}

pub struct ProcedureDisplay<'a> {
    proc: &'a Procedure,
}

impl fmt::Display for ProcedureDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.proc.blocks {
            block.fmt(f, self.proc)?;
        }

        Ok(())
    }
}
