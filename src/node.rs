use std::fmt;

use tinyvec::TinyVec;

use crate::{opcode::Opcode, procedure::Procedure, symbol::SymbolId, typ::Type, utils::index_set::KeyIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Ord, PartialOrd)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn opcode(self, proc: &Procedure) -> Opcode {
        proc.node(self).opcode
    }

    pub fn child(self, proc: &Procedure, index: usize) -> NodeId {
        proc.node(self).children[index]
    }

    pub fn child_mut(self, proc: &mut Procedure, index: usize) -> &mut NodeId {
        &mut proc.node_mut(self).children[index]
    }

    pub fn symbol(self, proc: &Procedure) -> Option<SymbolId> {
        proc.node(self).symbol()
    }
}

impl KeyIndex for NodeId {
    fn index(&self) -> usize {
        self.0
    }

    fn from_index(index: usize) -> Self {
        NodeId(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeData {
    #[default]
    None,
    /// Raw bits of a constant.
    Const(i64),
    /// Symbol referenced by loads, stores, calls and class checks.
    Symbol(SymbolId),
}

/// An IR tree node. Nodes form a DAG: within one block a node may be referenced
/// by several parents, and it is evaluated at its first reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub(crate) opcode: Opcode,
    pub(crate) typ: Type,
    pub(crate) children: TinyVec<[NodeId; 3]>,
    pub(crate) data: NodeData,
}

impl Node {
    pub fn new(opcode: Opcode, typ: Type, children: &[NodeId], data: NodeData) -> Self {
        Self {
            opcode,
            typ,
            children: children.iter().copied().collect(),
            data,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn typ(&self) -> Type {
        self.typ
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn data(&self) -> NodeData {
        self.data
    }

    pub fn symbol(&self) -> Option<SymbolId> {
        match self.data {
            NodeData::Symbol(symbol) => Some(symbol),
            _ => None,
        }
    }

    pub fn constant(&self) -> Option<i64> {
        match self.data {
            NodeData::Const(value) => Some(value),
            _ => None,
        }
    }

    /// Replaces this node with a direct load of `symbol`, dropping its children.
    pub fn replace_with_load(&mut self, symbol: SymbolId) {
        self.opcode = Opcode::Load;
        self.children.clear();
        self.data = NodeData::Symbol(symbol);
    }

    /// Turns a check into a plain anchor of its children.
    pub fn degrade_to_tree_top(&mut self) {
        debug_assert!(self.opcode.is_check());
        self.opcode = Opcode::TreeTop;
        self.typ = Type::Void;
        self.data = NodeData::None;
    }

    pub(crate) fn fmt<W: fmt::Write>(&self, f: &mut W, proc: &Procedure) -> fmt::Result {
        write!(f, "{:?}", self.opcode)?;

        if self.typ != Type::Void {
            write!(f, "<{}>", self.typ)?;
        }

        match self.data {
            NodeData::None => {}
            NodeData::Const(value) => write!(f, " {}", value)?,
            NodeData::Symbol(symbol) => write!(f, " {}", proc.symbols().get(symbol).name)?,
        }

        if !self.children.is_empty() {
            write!(f, "(")?;
            for (i, child) in self.children.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", child)?;
            }
            write!(f, ")")?;
        }

        Ok(())
    }
}
