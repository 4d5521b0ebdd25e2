use crate::{
    node::NodeId,
    opcode::Opcode,
    procedure::Procedure,
    symbol::{SymbolId, SymbolKind, SymbolSet},
};

/// What evaluating a single node (not its children) does to the world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    /// True if this cannot continue execution in the current block.
    pub terminal: bool,

    /// True if this can transfer control to an exception handler.
    pub exit_sideways: bool,

    /// True if the node may only execute after the check guarding it. Indirect loads,
    /// array accesses and divides are control dependent: hoisting them above their
    /// guard can fault where the original program raised a clean exception.
    pub control_dependant: bool,

    /// True for calls. A call may read or write any memory.
    pub call: bool,

    /// True if the written storage is visible to other code (statics, fields, array
    /// elements). Auto stores only matter to handlers of the current frame.
    pub writes_heap: bool,

    /// Nodes of this kind are never moved or commoned.
    pub volatile: bool,

    pub writes: SymbolSet,
    pub reads: SymbolSet,
}

impl Effects {
    pub fn none() -> Self {
        Self::default()
    }

    /// `mayKill`: a write of this node may change the value of `symbol`.
    pub fn may_kill(&self, symbol: SymbolId) -> bool {
        self.writes.contains(symbol)
    }

    /// `mayUse`: this node may observe the value of `symbol`.
    pub fn may_use(&self, symbol: SymbolId) -> bool {
        self.reads.contains(symbol)
    }

    pub fn must_execute(&self) -> bool {
        self.terminal || self.exit_sideways || self.call || !self.writes.is_empty()
    }

    pub fn interferes(&self, other: &Effects) -> bool {
        interferes_with_terminal(self, other)
            || interferes_with_terminal(other, self)
            || interferes_with_exit_sideways(self, other)
            || interferes_with_exit_sideways(other, self)
            || self.writes.intersects(&other.writes)
            || self.writes.intersects(&other.reads)
            || self.reads.intersects(&other.writes)
            || (self.volatile && other.volatile)
    }
}

fn interferes_with_terminal(terminal: &Effects, other: &Effects) -> bool {
    if !terminal.terminal {
        return false;
    }

    other.terminal || other.control_dependant || !other.writes.is_empty()
}

fn interferes_with_exit_sideways(exit_sideways: &Effects, other: &Effects) -> bool {
    if !exit_sideways.exit_sideways {
        return false;
    }

    other.exit_sideways || other.control_dependant || !other.writes.is_empty()
}

impl Procedure {
    /// Alias query for one node. Writes are expanded to every symbol they may modify,
    /// reads name exactly the symbol the node loads.
    pub fn effects(&self, id: NodeId) -> Effects {
        let node = self.node(id);
        let symbols = self.symbols();
        let mut effects = Effects {
            reads: SymbolSet::new(symbols.len()),
            writes: SymbolSet::new(symbols.len()),
            ..Effects::none()
        };

        let symbol = node.symbol();
        let unresolved = symbol.map_or(false, |s| symbols.get(s).unresolved);
        effects.volatile = symbol.map_or(false, |s| symbols.get(s).volatile);

        match node.opcode() {
            Opcode::Load | Opcode::LoadIndirect | Opcode::ArrayLoad => {
                if let Some(symbol) = symbol {
                    effects.reads.insert(symbol);
                }
                effects.control_dependant = node.opcode() != Opcode::Load;
            }

            Opcode::LoadAddr => {}

            Opcode::ArrayLength => effects.control_dependant = true,

            Opcode::Div | Opcode::Rem => effects.control_dependant = node.typ().is_int(),

            Opcode::Store | Opcode::StoreIndirect | Opcode::ArrayStore => {
                if let Some(symbol) = symbol {
                    effects.writes = symbols.aliases_of(symbol);
                    effects.writes_heap = symbols.get(symbol).is_memory() || unresolved;
                }
                effects.control_dependant = node.opcode() != Opcode::Store;
            }

            Opcode::Call => {
                let pure = symbol.map_or(false, |s| {
                    matches!(symbols.get(s).kind, SymbolKind::Method { pure: true }) && !symbols.get(s).unresolved
                });

                effects.call = true;
                if !pure {
                    effects.exit_sideways = true;
                    effects.writes_heap = true;
                    effects.writes = symbols.memory_symbols();
                    effects.reads = symbols.memory_symbols();
                }
            }

            Opcode::New => effects.exit_sideways = true,

            Opcode::NullCheck
            | Opcode::ResolveCheck
            | Opcode::BoundCheck
            | Opcode::DivCheck
            | Opcode::ArrayStoreCheck
            | Opcode::ArrayCheck
            | Opcode::CheckCast => effects.exit_sideways = true,

            Opcode::Goto | Opcode::Branch | Opcode::IfNull | Opcode::IfNonNull | Opcode::Return => {
                effects.terminal = true
            }

            _ => {}
        }

        if unresolved && node.opcode().is_load() {
            // Resolution may run arbitrary class initialization.
            effects.exit_sideways = true;
            effects.writes = symbols.memory_symbols();
            effects.writes_heap = true;
        }

        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        symbol::{Symbol, SymbolKind},
        typ::Type,
        Options,
    };

    #[test]
    fn field_store_kills_shadowed_field_only() {
        let mut proc = Procedure::new(Options::default());
        let p = proc.add_symbol(Symbol::new(SymbolKind::Parameter, Type::Address, "p"));
        let f = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 0, offset: 8 }, Type::Int32, "f"));
        let g = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 0, offset: 8 }, Type::Int32, "g"));
        let h = proc.add_symbol(Symbol::new(SymbolKind::Field { owner: 0, offset: 12 }, Type::Int32, "h"));

        let base = proc.add_load(p);
        let value = proc.add_int_constant(Type::Int32, 1);
        let store = proc.add_store_indirect(f, base, value);

        let effects = proc.effects(store);
        assert!(effects.may_kill(f));
        assert!(effects.may_kill(g));
        assert!(!effects.may_kill(h));
        assert!(effects.writes_heap);
        assert!(!effects.may_kill(p));
    }

    #[test]
    fn impure_call_writes_memory() {
        let mut proc = Procedure::new(Options::default());
        let s = proc.add_symbol(Symbol::new(SymbolKind::Static, Type::Int64, "S"));
        let m = proc.add_symbol(Symbol::new(SymbolKind::Method { pure: false }, Type::Void, "m"));
        let call = proc.add_call(m, Type::Void, &[]);

        let load = proc.add_load(s);

        let effects = proc.effects(call);
        assert!(effects.call);
        assert!(effects.exit_sideways);
        assert!(effects.may_kill(s));
        assert!(effects.interferes(&proc.effects(load)));
    }
}
