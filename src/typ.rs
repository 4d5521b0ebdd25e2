use std::fmt;

/// Natural data type of a node or symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Type {
    #[default]
    Void,
    Int32,
    Int64,
    Float,
    Double,
    /// Object references and raw addresses.
    Address,
}

impl Type {
    pub const fn is_int(&self) -> bool {
        matches!(self, Type::Int32 | Type::Int64)
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    pub const fn is_address(&self) -> bool {
        matches!(self, Type::Address)
    }

    pub const fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Void => "Void",
            Type::Int32 => "Int32",
            Type::Int64 => "Int64",
            Type::Float => "Float",
            Type::Double => "Double",
            Type::Address => "Address",
        };

        f.write_str(name)
    }
}
