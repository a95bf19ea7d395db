use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Reason an assembly run was aborted. No binary is produced alongside any of these.
#[derive(Debug, Error, Diagnostic)]
pub enum AsmError {
    #[error("syntax error on line: {line}")]
    #[diagnostic(code(asm::syntax))]
    Syntax {
        line: String,
        #[help]
        hint: String,
        #[source_code]
        src: String,
        #[label("unexpected here")]
        span: SourceSpan,
    },

    #[error("invalid register: {number} -- registers must be in the range [0,32)")]
    #[diagnostic(
        code(asm::register),
        help("registers are written `r0` through `r31`")
    )]
    InvalidRegister {
        number: String,
        #[source_code]
        src: String,
        #[label("no such register")]
        span: SourceSpan,
    },

    #[error("invalid immediate: {value} -- immediates must be in the range [-16,15]")]
    #[diagnostic(
        code(asm::immediate),
        help("larger constants can be built with shifts and additions")
    )]
    InvalidImmediate {
        value: String,
        #[source_code]
        src: String,
        #[label("out-of-range literal")]
        span: SourceSpan,
    },

    #[error("unknown label: {name}")]
    #[diagnostic(
        code(asm::unknown_label),
        help("labels are defined with `name:` before the instruction they mark")
    )]
    UnknownLabel {
        name: String,
        #[source_code]
        src: String,
        #[label("not defined anywhere")]
        span: SourceSpan,
    },

    #[error("duplicate label: {name}")]
    #[diagnostic(
        code(asm::duplicate_label),
        help("labels are only allowed once per program")
    )]
    DuplicateLabel {
        name: String,
        #[source_code]
        src: String,
        #[label("duplicate label")]
        span: SourceSpan,
        #[label("first defined here")]
        first: SourceSpan,
    },
}

/// Reason a hex program was refused by [`crate::Machine::load`]. Nothing is written to memory.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("Empty code string")]
    #[diagnostic(code(load::empty))]
    EmptyCode,

    #[error("Malformed code string")]
    #[diagnostic(
        code(load::malformed),
        help("code must be made of groups of exactly 4 hexadecimal digits")
    )]
    MalformedCode,

    #[error("Code string too long")]
    #[diagnostic(
        code(load::too_long),
        help("at most 256 instructions fit in program memory")
    )]
    CodeTooLong,
}

/// Terminal failure of a running program.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error, Diagnostic)]
pub enum Fault {
    #[error("Unknown opcode encountered")]
    #[diagnostic(code(vm::bad_opcode))]
    BadOpcode,

    #[error("Program attempted to access non-existent memory location")]
    #[diagnostic(code(vm::memory_bounds))]
    MemoryBounds,

    #[error("Misaligned memory address in store-word or load-word instruction")]
    #[diagnostic(
        code(vm::memory_alignment),
        help("word accesses and the program counter must use even addresses")
    )]
    MemoryAlignment,

    #[error("Program took too many steps (limit: 10000)")]
    #[diagnostic(
        code(vm::step_limit),
        help("check for loops that never reach HALT")
    )]
    StepLimitExceeded,
}
