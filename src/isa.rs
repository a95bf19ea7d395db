//! Instruction format shared by the assembler and the machine.
//!
//! Every instruction is one big-endian 16-bit word. Bits 15-10 hold the opcode, the
//! remaining bits depend on the opcode's [`Shape`]:
//!
//! | Shape | Bits 9-5 | Bits 4-0          |
//! |-------|----------|-------------------|
//! | `R0`  | unused   | unused            |
//! | `R1`  | dest     | unused            |
//! | `R2`  | dest     | src               |
//! | `I`   | dest     | signed imm5       |
//! | `J`   | signed 10-bit relative offset |

use std::fmt;

use crate::symbol::Register;

/// Size of an encoded instruction in bytes.
pub const INSTR_WIDTH: u16 = 2;
pub const REG_COUNT: usize = 32;
pub const IMM_MIN: i16 = -16;
pub const IMM_MAX: i16 = 15;

const OPCODE_SHIFT: u16 = 10;
const DEST_SHIFT: u16 = 5;
const REG_MASK: u16 = 0b11111;
const IMM_BITS: u32 = 5;
const OFFSET_BITS: u32 = 10;

/// Operand layout of an instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Shape {
    R0,
    R1,
    R2,
    I,
    J,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operands = match self {
            Shape::R0 => "no operands",
            Shape::R1 => "a register",
            Shape::R2 => "two registers",
            Shape::I => "a register and an immediate",
            Shape::J => "a label",
        };
        f.write_str(operands)
    }
}

/// Table row pairing a mnemonic with its encoding.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OpcodeSpec {
    pub mnemonic: &'static str,
    pub opcode: Opcode,
    pub shape: Shape,
}

macro_rules! opcodes {
    ( $( $name:ident = $value:literal, $mnemonic:literal, $shape:ident; )* ) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
        #[repr(u8)]
        pub enum Opcode {
            $( $name = $value, )*
        }

        /// Every opcode of the instruction set.
        pub const OPCODE_TABLE: &[OpcodeSpec] = &[
            $( OpcodeSpec { mnemonic: $mnemonic, opcode: Opcode::$name, shape: Shape::$shape }, )*
        ];

        impl Opcode {
            pub fn spec(self) -> OpcodeSpec {
                match self {
                    $( Opcode::$name => OpcodeSpec {
                        mnemonic: $mnemonic,
                        opcode: Opcode::$name,
                        shape: Shape::$shape,
                    }, )*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            /// The unknown opcode value.
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(Opcode::$name), )*
                    other => Err(other),
                }
            }
        }
    };
}

opcodes! {
    Halt  = 0b000000, "HALT",  R0;
    Not   = 0b000001, "NOT",   R1;
    Push  = 0b000010, "PUSH",  R1;
    Pop   = 0b000011, "POP",   R1;
    Print = 0b000100, "PRINT", R1;
    Read  = 0b000101, "READ",  R1;
    Sl    = 0b000110, "SL",    R2;
    Sru   = 0b000111, "SRU",   R2;
    Srs   = 0b001000, "SRS",   R2;
    Mov   = 0b001001, "MOV",   R2;
    Add   = 0b001010, "ADD",   R2;
    Sub   = 0b001011, "SUB",   R2;
    And   = 0b001100, "AND",   R2;
    Or    = 0b001101, "OR",    R2;
    Xor   = 0b001110, "XOR",   R2;
    Cmp   = 0b001111, "CMP",   R2;
    Sw    = 0b010000, "SW",    R2;
    Lw    = 0b010001, "LW",    R2;
    Sb    = 0b010010, "SB",    R2;
    Lb    = 0b010011, "LB",    R2;
    Movi  = 0b010100, "MOVI",  I;
    Addi  = 0b010101, "ADDI",  I;
    Subi  = 0b010110, "SUBI",  I;
    Andi  = 0b010111, "ANDI",  I;
    Ori   = 0b011000, "ORI",   I;
    Xori  = 0b011001, "XORI",  I;
    Jmp   = 0b011010, "JMP",   J;
    Jmpeq = 0b011011, "JMPEQ", J;
    Jmpne = 0b011100, "JMPNE", J;
    Jmpgt = 0b011101, "JMPGT", J;
    Jmplt = 0b011110, "JMPLT", J;
    Jmpge = 0b011111, "JMPGE", J;
    Jmple = 0b100000, "JMPLE", J;
    Break = 0b111111, "BREAK", R0;
}

impl Opcode {
    /// Case-insensitive mnemonic lookup.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Opcode> {
        OPCODE_TABLE
            .iter()
            .find(|spec| spec.mnemonic.eq_ignore_ascii_case(mnemonic))
            .map(|spec| spec.opcode)
    }

    pub fn mnemonic(self) -> &'static str {
        self.spec().mnemonic
    }

    pub fn shape(self) -> Shape {
        self.spec().shape
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A decoded instruction. The variant always agrees with `opcode.shape()`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instruction {
    R0 {
        opcode: Opcode,
    },
    R1 {
        opcode: Opcode,
        dest: Register,
    },
    R2 {
        opcode: Opcode,
        dest: Register,
        src: Register,
    },
    I {
        opcode: Opcode,
        dest: Register,
        /// Within [`IMM_MIN`]..=[`IMM_MAX`].
        imm: i16,
    },
    J {
        opcode: Opcode,
        /// Added to the already advanced program counter.
        offset: i16,
    },
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match *self {
            Instruction::R0 { opcode }
            | Instruction::R1 { opcode, .. }
            | Instruction::R2 { opcode, .. }
            | Instruction::I { opcode, .. }
            | Instruction::J { opcode, .. } => opcode,
        }
    }

    /// Pack into a single word.
    ///
    /// Immediates and offsets are masked to their field width, so range checks belong to
    /// whoever builds the instruction.
    pub fn encode(&self) -> u16 {
        let op = (self.opcode() as u16) << OPCODE_SHIFT;
        match *self {
            Instruction::R0 { .. } => op,
            Instruction::R1 { dest, .. } => op | dest_field(dest),
            Instruction::R2 { dest, src, .. } => op | dest_field(dest) | src.index() as u16,
            Instruction::I { dest, imm, .. } => {
                debug_assert!((IMM_MIN..=IMM_MAX).contains(&imm));
                op | dest_field(dest) | (imm as u16 & field_mask(IMM_BITS))
            }
            Instruction::J { offset, .. } => op | (offset as u16 & field_mask(OFFSET_BITS)),
        }
    }

    /// Unpack a word. Fails with the raw opcode if it is not part of the instruction set.
    pub fn decode(word: u16) -> Result<Instruction, u8> {
        let opcode = Opcode::try_from((word >> OPCODE_SHIFT) as u8)?;
        let dest = Register::from_field(word >> DEST_SHIFT);
        let src = Register::from_field(word);
        Ok(match opcode.shape() {
            Shape::R0 => Instruction::R0 { opcode },
            Shape::R1 => Instruction::R1 { opcode, dest },
            Shape::R2 => Instruction::R2 { opcode, dest, src },
            Shape::I => Instruction::I {
                opcode,
                dest,
                imm: s_ext(word, IMM_BITS) as i16,
            },
            Shape::J => Instruction::J {
                opcode,
                offset: s_ext(word, OFFSET_BITS) as i16,
            },
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::R0 { opcode } => write!(f, "{opcode}"),
            Instruction::R1 { opcode, dest } => write!(f, "{opcode} {dest}"),
            Instruction::R2 { opcode, dest, src } => write!(f, "{opcode} {dest} {src}"),
            Instruction::I { opcode, dest, imm } => write!(f, "{opcode} {dest} {imm}"),
            Instruction::J { opcode, offset } => write!(f, "{opcode} {offset:+}"),
        }
    }
}

#[inline]
fn dest_field(dest: Register) -> u16 {
    (dest.index() as u16 & REG_MASK) << DEST_SHIFT
}

#[inline]
fn field_mask(bits: u32) -> u16 {
    (1u16 << bits) - 1
}

/// Sign-extend the low `bits` of `val` to a full word.
#[inline]
pub fn s_ext(val: u16, bits: u32) -> u16 {
    debug_assert!(bits > 0 && bits < 16);
    // Sign bit
    let sign = val & (1u16 << (bits - 1));
    // Bits lower than sign bit
    let magnitude = val & field_mask(bits);
    // Negative input sets the sign bit and everything above it
    let sign_extension = (!sign).wrapping_add(1);
    magnitude | sign_extension
}
