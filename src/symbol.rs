use std::fmt;

use crate::{typ::Type, utils::index_set::{IndexSet, KeyIndex}};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub usize);

impl KeyIndex for SymbolId {
    fn index(&self) -> usize {
        self.0
    }

    fn from_index(index: usize) -> Self {
        SymbolId(index)
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type SymbolSet = IndexSet<SymbolId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Local,
    Parameter,
    Static,
    /// Instance field. Fields sharing `owner` and `offset` name the same storage
    /// (a subclass field shadowing its parent's, for example).
    Field { owner: u32, offset: u32 },
    /// Every element of every array with the symbol's element type.
    ArrayElement,
    Method { pure: bool },
    Class,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub typ: Type,
    pub name: String,
    pub volatile: bool,
    pub unresolved: bool,
    /// Created by partial redundancy elimination.
    pub temp: bool,
}

impl Symbol {
    pub fn new(kind: SymbolKind, typ: Type, name: impl Into<String>) -> Self {
        Self {
            kind,
            typ,
            name: name.into(),
            volatile: false,
            unresolved: false,
            temp: false,
        }
    }

    /// Locals and parameters.
    pub fn is_auto(&self) -> bool {
        matches!(self.kind, SymbolKind::Local | SymbolKind::Parameter)
    }

    pub fn is_field(&self) -> bool {
        matches!(self.kind, SymbolKind::Field { .. })
    }

    pub fn is_method(&self) -> bool {
        matches!(self.kind, SymbolKind::Method { .. })
    }

    /// Storage that lives in the heap or in statics.
    pub fn is_memory(&self) -> bool {
        matches!(
            self.kind,
            SymbolKind::Static | SymbolKind::Field { .. } | SymbolKind::ArrayElement
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn add(&mut self, symbol: Symbol) -> SymbolId {
        self.symbols.push(symbol);
        SymbolId(self.symbols.len() - 1)
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols.iter().enumerate().map(|(i, s)| (SymbolId(i), s))
    }

    /// The array element symbol for `typ`, created on first use.
    pub fn array_element(&mut self, typ: Type) -> SymbolId {
        let existing = self
            .iter()
            .find(|(_, s)| s.kind == SymbolKind::ArrayElement && s.typ == typ)
            .map(|(id, _)| id);

        match existing {
            Some(id) => id,
            None => self.add(Symbol::new(SymbolKind::ArrayElement, typ, format!("<{} elements>", typ))),
        }
    }

    pub fn add_temp(&mut self, typ: Type) -> SymbolId {
        let name = format!("pre_temp{}", self.symbols.iter().filter(|s| s.temp).count());
        let mut symbol = Symbol::new(SymbolKind::Local, typ, name);
        symbol.temp = true;
        self.add(symbol)
    }

    /// Every symbol a write to `id` may modify.
    pub fn aliases_of(&self, id: SymbolId) -> SymbolSet {
        let mut set = SymbolSet::new(self.len());
        let symbol = self.get(id);

        match symbol.kind {
            SymbolKind::Field { owner, offset } => {
                for (other, s) in self.iter() {
                    if matches!(s.kind, SymbolKind::Field { owner: o, offset: off } if o == owner && off == offset)
                    {
                        set.insert(other);
                    }
                }
            }
            SymbolKind::ArrayElement => {
                for (other, s) in self.iter() {
                    if s.kind == SymbolKind::ArrayElement && s.typ == symbol.typ {
                        set.insert(other);
                    }
                }
            }
            _ => {
                set.insert(id);
            }
        }

        if symbol.unresolved {
            set.union_with(&self.memory_symbols());
        }

        set
    }

    /// Every static, field and array element symbol.
    pub fn memory_symbols(&self) -> SymbolSet {
        let mut set = SymbolSet::new(self.len());
        for (id, s) in self.iter() {
            if s.is_memory() {
                set.insert(id);
            }
        }
        set
    }

    /// Two field symbols that denote the same storage with the same type.
    pub fn shadows(&self, a: SymbolId, b: SymbolId) -> bool {
        let (sa, sb) = (self.get(a), self.get(b));

        match (sa.kind, sb.kind) {
            (
                SymbolKind::Field { owner: oa, offset: fa },
                SymbolKind::Field { owner: ob, offset: fb },
            ) => a != b && oa == ob && fa == fb && sa.typ == sb.typ,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_writes_alias_shadowed_fields() {
        let mut table = SymbolTable::new();
        let f = table.add(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "A.f"));
        let g = table.add(Symbol::new(SymbolKind::Field { owner: 1, offset: 8 }, Type::Int32, "B.f"));
        let h = table.add(Symbol::new(SymbolKind::Field { owner: 1, offset: 16 }, Type::Int32, "A.h"));

        let aliases = table.aliases_of(f);
        assert!(aliases.contains(f));
        assert!(aliases.contains(g));
        assert!(!aliases.contains(h));
        assert!(table.shadows(f, g));
        assert!(!table.shadows(f, h));
    }

    #[test]
    fn array_elements_are_shared_per_type() {
        let mut table = SymbolTable::new();
        let a = table.array_element(Type::Int32);
        let b = table.array_element(Type::Int32);
        let c = table.array_element(Type::Address);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
