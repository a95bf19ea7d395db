// Parsing
mod parser;
pub use parser::{assemble, assemble_hex, AsmParser};
mod air;
pub use air::{parse_hex, to_hex, Air, AirStmt};
mod lexer;

// Instruction set
mod isa;
pub use isa::{
    s_ext, Instruction, Opcode, OpcodeSpec, Shape, IMM_MAX, IMM_MIN, INSTR_WIDTH, OPCODE_TABLE,
    REG_COUNT,
};
mod symbol;
pub use symbol::{LabelDef, LabelTable, Register, Span, SrcOffset};

// Running
mod runtime;
pub use runtime::{
    Event, Machine, PauseFlag, Status, CODE_MAX_WORDS, CODE_START, FLAG_S, FLAG_Z, MEMORY_SIZE,
    OUTPUT_MAX_LEN, STACK_START, STEP_LIMIT,
};
pub mod output;

mod error;
pub use error::{AsmError, Fault, LoadError};

pub mod env;

/// Amount of lines to show as context, each side of focus line (line containing span).
pub const DIAGNOSTIC_CONTEXT_LINES: usize = 8;
