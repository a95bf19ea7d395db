use std::fmt::Write as _;

use crate::{
    error::LoadError,
    isa::Instruction,
    runtime::CODE_MAX_WORDS,
    symbol::{LabelTable, Span},
};

/// Assembly intermediate representation: resolved instructions in program order.
#[derive(Debug, Default)]
pub struct Air {
    ast: Vec<AirStmt>,
    labels: LabelTable,
}

/// Single encoded statement and where it came from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AirStmt {
    /// Memory address the instruction is loaded at
    pub addr: u16,
    pub instr: Instruction,
    /// Source line, counted from 1
    pub line: usize,
    pub span: Span,
}

impl AirStmt {
    pub fn emit(&self) -> u16 {
        self.instr.encode()
    }
}

impl Air {
    pub fn new() -> Self {
        Air {
            ast: Vec::new(),
            labels: LabelTable::new(),
        }
    }

    pub fn add_stmt(&mut self, stmt: AirStmt) {
        self.ast.push(stmt)
    }

    pub(crate) fn set_labels(&mut self, labels: LabelTable) {
        self.labels = labels;
    }

    /// Labels resolved while assembling.
    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn get(&self, idx: usize) -> Option<&AirStmt> {
        self.ast.get(idx)
    }

    pub fn len(&self) -> usize {
        self.ast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ast.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AirStmt> {
        self.ast.iter()
    }

    /// Encoded words in program order.
    pub fn emit(&self) -> Vec<u16> {
        self.ast.iter().map(AirStmt::emit).collect()
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.emit())
    }
}

impl<'a> IntoIterator for &'a Air {
    type Item = &'a AirStmt;
    type IntoIter = std::slice::Iter<'a, AirStmt>;
    fn into_iter(self) -> Self::IntoIter {
        self.ast.iter()
    }
}

/// Lowercase hex, four digits per word, no separators.
pub fn to_hex(words: &[u16]) -> String {
    let mut out = String::with_capacity(words.len() * 4);
    for word in words {
        let _ = write!(out, "{word:04x}");
    }
    out
}

/// Inverse of [`to_hex`], with the checks the machine applies before loading.
pub fn parse_hex(code: &str) -> Result<Vec<u16>, LoadError> {
    if code.is_empty() {
        return Err(LoadError::EmptyCode);
    }
    if code.len() % 4 != 0 || !code.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(LoadError::MalformedCode);
    }
    if code.len() / 4 > CODE_MAX_WORDS {
        return Err(LoadError::CodeTooLong);
    }
    code.as_bytes()
        .chunks_exact(4)
        .map(|group| {
            // Every byte was checked to be an ASCII hex digit
            let group = std::str::from_utf8(group).map_err(|_| LoadError::MalformedCode)?;
            u16::from_str_radix(group, 16).map_err(|_| LoadError::MalformedCode)
        })
        .collect()
}
