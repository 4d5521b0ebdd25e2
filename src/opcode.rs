#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    /// Integer, floating point or null constant. The value lives in the node data.
    Const,

    /// Direct load of a symbol (local, parameter or static).
    Load,
    /// Address of a symbol. Only treated as a load for commoning when
    /// `Options::loadaddr_as_load` is set.
    LoadAddr,
    /// Field load through a base reference: `base.field`.
    LoadIndirect,
    /// Length of an array reference. Array lengths never change.
    ArrayLength,
    /// Element load: `array[index]`.
    ArrayLoad,

    /// Arithmetic. `Div` and `Rem` are guarded by a `DivCheck` and never raise on their own.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,

    /// Integer bit operations.
    And,
    Or,
    Xor,
    Shl,
    Shr,

    /// Comparisons producing an Int32 zero or one.
    Equal,
    NotEqual,
    LessThan,

    /// Call of a method symbol. Calls are never candidates.
    Call,
    /// Object allocation.
    New,

    /// Identity. Used to hand a value to a check without evaluating anything else.
    PassThrough,

    /// Statements ("tree tops"). Only these appear directly in a block's statement list.
    Store,
    StoreIndirect,
    ArrayStore,
    /// Anchors its children so they are evaluated at this point.
    TreeTop,

    /// Checks. Each one may raise a runtime exception.
    NullCheck,
    ResolveCheck,
    BoundCheck,
    DivCheck,
    ArrayStoreCheck,
    ArrayCheck,
    CheckCast,

    /// Terminators.
    Goto,
    Branch,
    IfNull,
    IfNonNull,
    Return,
}

/// Exception raising check kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CheckKind {
    Null,
    Resolve,
    Bound,
    Div,
    ArrayStore,
    Array,
    CheckCast,
}

impl CheckKind {
    pub const ALL: [CheckKind; 7] = [
        CheckKind::Null,
        CheckKind::Resolve,
        CheckKind::Bound,
        CheckKind::Div,
        CheckKind::ArrayStore,
        CheckKind::Array,
        CheckKind::CheckCast,
    ];

    pub const fn opcode(self) -> Opcode {
        match self {
            CheckKind::Null => Opcode::NullCheck,
            CheckKind::Resolve => Opcode::ResolveCheck,
            CheckKind::Bound => Opcode::BoundCheck,
            CheckKind::Div => Opcode::DivCheck,
            CheckKind::ArrayStore => Opcode::ArrayStoreCheck,
            CheckKind::Array => Opcode::ArrayCheck,
            CheckKind::CheckCast => Opcode::CheckCast,
        }
    }

    /// Resolve and array store checks depend on runtime state the catalog cannot model.
    pub const fn is_movable(self) -> bool {
        !matches!(self, CheckKind::Resolve | CheckKind::ArrayStore)
    }
}

impl Opcode {
    pub const fn check_kind(&self) -> Option<CheckKind> {
        match self {
            Opcode::NullCheck => Some(CheckKind::Null),
            Opcode::ResolveCheck => Some(CheckKind::Resolve),
            Opcode::BoundCheck => Some(CheckKind::Bound),
            Opcode::DivCheck => Some(CheckKind::Div),
            Opcode::ArrayStoreCheck => Some(CheckKind::ArrayStore),
            Opcode::ArrayCheck => Some(CheckKind::Array),
            Opcode::CheckCast => Some(CheckKind::CheckCast),
            _ => None,
        }
    }

    pub const fn is_check(&self) -> bool {
        self.check_kind().is_some()
    }

    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Goto | Opcode::Branch | Opcode::IfNull | Opcode::IfNonNull | Opcode::Return
        )
    }

    pub const fn is_store(&self) -> bool {
        matches!(self, Opcode::Store | Opcode::StoreIndirect | Opcode::ArrayStore)
    }

    pub const fn is_statement(&self) -> bool {
        self.is_store() || self.is_check() || self.is_terminator() || matches!(self, Opcode::TreeTop)
    }

    pub const fn is_load(&self) -> bool {
        matches!(
            self,
            Opcode::Load | Opcode::LoadIndirect | Opcode::ArrayLength | Opcode::ArrayLoad
        )
    }

    pub const fn is_commutative(&self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Equal | Opcode::NotEqual
        )
    }

    pub const fn is_division(&self) -> bool {
        matches!(self, Opcode::Div | Opcode::Rem)
    }

    /// Operations that can transfer control to an exception handler.
    pub const fn can_raise(&self) -> bool {
        self.is_check() || matches!(self, Opcode::Call | Opcode::New)
    }

    /// The load a store would produce if its stored value were read back.
    pub const fn load_for_store(&self) -> Option<Opcode> {
        match self {
            Opcode::Store => Some(Opcode::Load),
            Opcode::StoreIndirect => Some(Opcode::LoadIndirect),
            Opcode::ArrayStore => Some(Opcode::ArrayLoad),
            _ => None,
        }
    }

    /// Index of the stored value among a store's children.
    pub const fn stored_value_index(&self) -> Option<usize> {
        match self {
            Opcode::Store => Some(0),
            Opcode::StoreIndirect => Some(1),
            Opcode::ArrayStore => Some(2),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_roundtrip_through_kind() {
        for kind in CheckKind::ALL {
            assert_eq!(kind.opcode().check_kind(), Some(kind));
            assert!(kind.opcode().is_statement());
        }
    }

    #[test]
    fn stores_map_to_loads() {
        assert_eq!(Opcode::StoreIndirect.load_for_store(), Some(Opcode::LoadIndirect));
        assert_eq!(Opcode::ArrayStore.stored_value_index(), Some(2));
        assert_eq!(Opcode::Add.load_for_store(), None);
    }
}
