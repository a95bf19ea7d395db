use std::{fmt, ops::Range};

use fxhash::FxBuildHasher;
use indexmap::{map::Entry, IndexMap};
use miette::SourceSpan;

use crate::isa::REG_COUNT;

// Label name -> absolute address
type FxMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Location within source
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Span {
    offs: SrcOffset,
    len: usize,
}

impl Span {
    pub fn new(offs: SrcOffset, len: usize) -> Self {
        Span { offs, len }
    }

    pub fn dummy() -> Self {
        Span {
            offs: SrcOffset(0),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn offs(&self) -> usize {
        self.offs.0
    }

    pub fn end(&self) -> usize {
        self.offs.0 + self.len
    }

    /// Same span moved `by` bytes further into the source.
    pub fn shift(self, by: usize) -> Self {
        Span::new(SrcOffset(self.offs.0 + by), self.len)
    }
}

impl From<Span> for SourceSpan {
    fn from(value: Span) -> Self {
        SourceSpan::new(value.offs().into(), value.len())
    }
}

impl From<Span> for Range<usize> {
    fn from(value: Span) -> Self {
        value.offs()..value.end()
    }
}

/// Used to refer to offsets from the start of a source file.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct SrcOffset(pub usize);

/// Index into the register file. Always below [`REG_COUNT`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Register(u8);

impl Register {
    /// Program counter.
    pub const PC: Register = Register(26);
    /// Stack pointer.
    pub const SP: Register = Register(27);
    /// Status flags, see [`crate::runtime::FLAG_Z`] and [`crate::runtime::FLAG_S`].
    pub const ST: Register = Register(28);

    pub fn new(index: u8) -> Option<Register> {
        ((index as usize) < REG_COUNT).then_some(Register(index))
    }

    /// Build from a 5-bit instruction field. Upper bits are discarded.
    pub(crate) fn from_field(bits: u16) -> Register {
        Register((bits & 0b11111) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Conventional name of a special-purpose register.
    pub fn alias(self) -> Option<&'static str> {
        match self {
            Register::PC => Some("PC"),
            Register::SP => Some("SP"),
            Register::ST => Some("ST"),
            _ => None,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Label definitions collected by the first assembler pass.
#[derive(Debug, Default)]
pub struct LabelTable {
    table: FxMap<String, LabelDef>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LabelDef {
    pub addr: u16,
    pub span: Span,
}

impl LabelTable {
    pub fn new() -> Self {
        LabelTable {
            table: IndexMap::with_hasher(FxBuildHasher::default()),
        }
    }

    /// Record a definition. Returns the previous definition if the name is taken.
    pub fn insert(&mut self, name: &str, addr: u16, span: Span) -> Result<(), LabelDef> {
        match self.table.entry(name.to_string()) {
            Entry::Occupied(prev) => Err(*prev.get()),
            Entry::Vacant(slot) => {
                slot.insert(LabelDef { addr, span });
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<u16> {
        self.table.get(name).map(|def| def.addr)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Labels in order of definition.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.table.iter().map(|(name, def)| (name.as_str(), def.addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_bounds() {
        assert_eq!(Register::new(0).map(Register::index), Some(0));
        assert_eq!(Register::new(31).map(Register::index), Some(31));
        assert_eq!(Register::new(32), None);
        assert_eq!(Register::from_field(0xFFFF).index(), 31);
        assert_eq!(Register::PC.to_string(), "r26");
        assert_eq!(Register::SP.alias(), Some("SP"));
        assert_eq!(Register::new(3).and_then(Register::alias), None);
    }

    #[test]
    fn label_table_rejects_duplicates() {
        let mut labels = LabelTable::new();
        let span = Span::new(SrcOffset(4), 3);
        assert!(labels.insert("top", 128, span).is_ok());
        assert!(labels.insert("end", 132, Span::dummy()).is_ok());

        let prev = labels.insert("top", 140, Span::dummy()).unwrap_err();
        assert_eq!(prev, LabelDef { addr: 128, span });
        assert_eq!(labels.get("top"), Some(128));
        assert_eq!(labels.get("missing"), None);

        let names: Vec<_> = labels.iter().collect();
        assert_eq!(names, vec![("top", 128), ("end", 132)]);
    }
}
