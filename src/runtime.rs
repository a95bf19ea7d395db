use std::{cell::Cell, collections::VecDeque, fmt, rc::Rc};

use crate::{
    air::parse_hex,
    error::{Fault, LoadError},
    isa::{Instruction, Opcode, INSTR_WIDTH, REG_COUNT},
    symbol::Register,
};

/// Bytes of addressable memory, shared by code, stack and data.
pub const MEMORY_SIZE: usize = 1024;
/// Address the first instruction is loaded at.
pub const CODE_START: u16 = 128;
/// Most instructions a single program may contain.
pub const CODE_MAX_WORDS: usize = 256;
/// Initial stack pointer. The stack grows downwards.
pub const STACK_START: u16 = MEMORY_SIZE as u16 - 2;
/// Steps a single call to [`Machine::run`] may take.
pub const STEP_LIMIT: u32 = 10_000;
/// Characters of console output kept.
pub const OUTPUT_MAX_LEN: usize = 128;

/// Zero flag in the status register.
pub const FLAG_Z: u16 = 1 << 0;
/// Sign flag in the status register.
pub const FLAG_S: u16 = 1 << 1;

/// Outcome of a step or a run.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Status {
    /// Only returned by [`Machine::step`]; the program can keep going.
    InProgress,
    /// Pause flag was set before the next step.
    Paused,
    /// `BREAK` was executed. Run or step again to resume.
    Breakpoint,
    /// `HALT` was executed.
    Success,
    Failure(Fault),
}

impl Status {
    /// Whether the program has ended for good. Needs a reset and load to run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Failure(_))
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Status::Failure(_))
    }

    pub fn message(self) -> String {
        match self {
            Status::InProgress => "Execution in progress...".to_string(),
            Status::Paused => "Paused".to_string(),
            Status::Breakpoint => "Breakpoint reached".to_string(),
            Status::Success => "Execution successful".to_string(),
            Status::Failure(fault) => fault.to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// State change reported to subscribers, after it happened.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Event {
    RegisterChanged { index: usize, value: u16 },
    MemoryChanged { addr: u16, value: u8 },
    OutputChanged,
    InputChanged,
}

/// Shared pause request, checked once before every step.
///
/// Clones refer to the same flag, so a subscriber can hold one and stop a run at the next
/// instruction boundary.
#[derive(Clone, Debug, Default)]
pub struct PauseFlag(Rc<Cell<bool>>);

impl PauseFlag {
    pub fn set(&self, paused: bool) {
        self.0.set(paused)
    }

    pub fn is_set(&self) -> bool {
        self.0.get()
    }
}

type Subscriber = Box<dyn FnMut(&Event)>;

/// Complete program state during runtime.
///
/// Subscribers are called synchronously and must not try to reach back into the machine.
pub struct Machine {
    /// System memory, big-endian words
    mem: Box<[u8; MEMORY_SIZE]>,
    /// 32x 16-bit registers, including PC, SP and ST
    reg: [u16; REG_COUNT],
    paused: PauseFlag,
    input: VecDeque<char>,
    output: VecDeque<char>,
    subscribers: Vec<Subscriber>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("reg", &self.reg)
            .field("paused", &self.paused.is_set())
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl Machine {
    pub fn new() -> Self {
        let mut reg = [0; REG_COUNT];
        reg[Register::PC.index()] = CODE_START;
        reg[Register::SP.index()] = STACK_START;
        Machine {
            mem: Box::new([0; MEMORY_SIZE]),
            reg,
            paused: PauseFlag::default(),
            input: VecDeque::new(),
            output: VecDeque::new(),
            subscribers: Vec::new(),
        }
    }

    /// Convenience for a fresh machine with `code` loaded.
    pub fn from_hex(code: &str) -> Result<Self, LoadError> {
        let mut machine = Machine::new();
        machine.load(code)?;
        Ok(machine)
    }

    /// Register a callback for every [`Event`].
    pub fn subscribe(&mut self, subscriber: impl FnMut(&Event) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    fn notify(&mut self, event: Event) {
        for subscriber in &mut self.subscribers {
            subscriber(&event);
        }
    }

    /// Zero registers and memory, then set PC and SP to their initial values.
    ///
    /// Console buffers are cleared as well. Subscribers and the pause flag are kept.
    pub fn reset(&mut self) {
        for index in 0..REG_COUNT {
            self.set_reg(index, 0);
        }
        self.set_reg(Register::PC.index(), CODE_START);
        self.set_reg(Register::SP.index(), STACK_START);
        for addr in 0..MEMORY_SIZE as u16 {
            self.set_mem(addr, 0);
        }
        self.output.clear();
        self.notify(Event::OutputChanged);
        self.input.clear();
        self.notify(Event::InputChanged);
    }

    /// Write a hex program to memory at [`CODE_START`]. Nothing is written on error.
    pub fn load(&mut self, code: &str) -> Result<(), LoadError> {
        let words = parse_hex(code)?;
        self.load_words(&words)
    }

    /// Write already decoded words to memory at [`CODE_START`].
    pub fn load_words(&mut self, words: &[u16]) -> Result<(), LoadError> {
        if words.is_empty() {
            return Err(LoadError::EmptyCode);
        }
        if words.len() > CODE_MAX_WORDS {
            return Err(LoadError::CodeTooLong);
        }
        let mut addr = CODE_START;
        for &word in words {
            self.store_word(addr, word);
            addr += INSTR_WIDTH;
        }
        Ok(())
    }

    // Control interface

    pub fn set_paused(&mut self, paused: bool) {
        self.paused.set(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_set()
    }

    /// Handle to the pause flag which outlives borrows of the machine.
    pub fn pause_flag(&self) -> PauseFlag {
        self.paused.clone()
    }

    /// Queue characters for `READ`.
    pub fn push_input(&mut self, input: &str) {
        self.input.extend(input.chars());
        self.notify(Event::InputChanged);
    }

    /// Console output, most recent [`OUTPUT_MAX_LEN`] characters.
    pub fn output(&self) -> String {
        self.output.iter().collect()
    }

    /// Characters not yet consumed by `READ`.
    pub fn pending_input(&self) -> String {
        self.input.iter().collect()
    }

    // Inspection

    /// Panics if `index` is not below [`REG_COUNT`].
    pub fn reg(&self, index: usize) -> u16 {
        self.reg[index]
    }

    pub fn regs(&self) -> &[u16; REG_COUNT] {
        &self.reg
    }

    pub fn pc(&self) -> u16 {
        self.reg[Register::PC.index()]
    }

    pub fn sp(&self) -> u16 {
        self.reg[Register::SP.index()]
    }

    pub fn flags(&self) -> u16 {
        self.reg[Register::ST.index()]
    }

    /// Panics if `addr` is outside memory.
    pub fn mem(&self, addr: u16) -> u8 {
        self.mem[addr as usize]
    }

    pub fn memory(&self) -> &[u8; MEMORY_SIZE] {
        &self.mem
    }

    /// Host-side register write, reported like any other change. Panics if `index` is not
    /// below [`REG_COUNT`].
    pub fn set_reg(&mut self, index: usize, value: u16) {
        self.reg[index] = value;
        self.notify(Event::RegisterChanged { index, value });
    }

    /// Host-side memory write. Panics if `addr` is outside memory.
    pub fn set_mem(&mut self, addr: u16, value: u8) {
        self.mem[addr as usize] = value;
        self.notify(Event::MemoryChanged { addr, value });
    }

    // Execution

    /// Step until something other than [`Status::InProgress`] comes up, the pause flag is
    /// seen, or [`STEP_LIMIT`] steps have run.
    pub fn run(&mut self) -> Status {
        let mut steps = 0;
        loop {
            if steps == STEP_LIMIT {
                return Status::Failure(Fault::StepLimitExceeded);
            }
            if self.paused.is_set() {
                return Status::Paused;
            }
            let status = self.step();
            steps += 1;
            if status != Status::InProgress {
                return status;
            }
        }
    }

    /// Fetch, decode and execute a single instruction.
    pub fn step(&mut self) -> Status {
        let pc = self.pc();
        let word = match check_word_addr(pc) {
            Ok(addr) => self.load_word(addr),
            Err(fault) => return Status::Failure(fault),
        };
        // PC incremented before instruction is performed
        self.set_reg(Register::PC.index(), pc.wrapping_add(INSTR_WIDTH));

        let Ok(instr) = Instruction::decode(word) else {
            return Status::Failure(Fault::BadOpcode);
        };
        match self.execute(instr) {
            Ok(status) => status,
            Err(fault) => Status::Failure(fault),
        }
    }

    fn execute(&mut self, instr: Instruction) -> Result<Status, Fault> {
        match instr {
            Instruction::R0 { opcode } => match opcode {
                Opcode::Halt => return Ok(Status::Success),
                Opcode::Break => return Ok(Status::Breakpoint),
                _ => unreachable!("{opcode} is not an R0 instruction"),
            },
            Instruction::R1 { opcode, dest } => self.exec_r1(opcode, dest)?,
            Instruction::R2 { opcode, dest, src } => self.exec_r2(opcode, dest, src)?,
            Instruction::I { opcode, dest, imm } => {
                let imm = imm as u16;
                match opcode {
                    Opcode::Movi => self.write(dest, imm),
                    Opcode::Addi => self.alu(dest, imm, u16::wrapping_add),
                    Opcode::Subi => self.alu(dest, imm, u16::wrapping_sub),
                    Opcode::Andi => self.alu(dest, imm, |a, b| a & b),
                    Opcode::Ori => self.alu(dest, imm, |a, b| a | b),
                    Opcode::Xori => self.alu(dest, imm, |a, b| a ^ b),
                    _ => unreachable!("{opcode} is not an I instruction"),
                }
            }
            Instruction::J { opcode, offset } => {
                let st = self.flags();
                let z = st & FLAG_Z != 0;
                let s = st & FLAG_S != 0;
                let taken = match opcode {
                    Opcode::Jmp => true,
                    Opcode::Jmpeq => z,
                    Opcode::Jmpne => !z,
                    Opcode::Jmpgt => s && !z,
                    Opcode::Jmplt => s,
                    Opcode::Jmpge => !s,
                    Opcode::Jmple => s || !z,
                    _ => unreachable!("{opcode} is not a J instruction"),
                };
                if taken {
                    let pc = self.pc().wrapping_add(offset as u16);
                    self.set_reg(Register::PC.index(), pc);
                }
            }
        }
        Ok(Status::InProgress)
    }

    fn exec_r1(&mut self, opcode: Opcode, dest: Register) -> Result<(), Fault> {
        match opcode {
            Opcode::Not => {
                let val = !self.read(dest);
                self.write(dest, val);
            }
            Opcode::Push => {
                let sp = check_word_addr(self.sp())?;
                let val = self.read(dest);
                self.store_word(sp, val);
                self.set_reg(Register::SP.index(), sp.wrapping_sub(2));
            }
            Opcode::Pop => {
                let sp = self.sp().wrapping_add(2);
                self.set_reg(Register::SP.index(), sp);
                let sp = check_word_addr(sp)?;
                let val = self.load_word(sp);
                self.write(dest, val);
            }
            Opcode::Print => {
                let addr = check_byte_addr(self.read(dest))?;
                let ch = char::from(self.mem(addr));
                self.output.push_back(ch);
                while self.output.len() > OUTPUT_MAX_LEN {
                    self.output.pop_front();
                }
                self.notify(Event::OutputChanged);
            }
            Opcode::Read => {
                let addr = check_byte_addr(self.read(dest))?;
                // Code points past a byte are truncated, empty queue reads as NUL
                let code = self.input.pop_front().map_or(0, |ch| ch as u32 as u8);
                self.set_mem(addr, code);
                self.notify(Event::InputChanged);
            }
            _ => unreachable!("{opcode} is not an R1 instruction"),
        }
        Ok(())
    }

    fn exec_r2(&mut self, opcode: Opcode, dest: Register, src: Register) -> Result<(), Fault> {
        let rhs = self.read(src);
        match opcode {
            Opcode::Sl => self.alu(dest, rhs, |a, b| ((a as u32) << (b & 31)) as u16),
            Opcode::Sru => self.alu(dest, rhs, |a, b| ((a as u32) >> (b & 31)) as u16),
            Opcode::Srs => self.alu(dest, rhs, |a, b| ((a as i16 as i32) >> (b & 31)) as u16),
            Opcode::Mov => self.write(dest, rhs),
            Opcode::Add => self.alu(dest, rhs, u16::wrapping_add),
            Opcode::Sub => self.alu(dest, rhs, u16::wrapping_sub),
            Opcode::And => self.alu(dest, rhs, |a, b| a & b),
            Opcode::Or => self.alu(dest, rhs, |a, b| a | b),
            Opcode::Xor => self.alu(dest, rhs, |a, b| a ^ b),
            Opcode::Cmp => {
                let lhs = self.read(dest);
                let mut st = self.flags() & !(FLAG_Z | FLAG_S);
                if lhs == rhs {
                    st |= FLAG_Z;
                }
                if lhs < rhs {
                    st |= FLAG_S;
                }
                self.set_reg(Register::ST.index(), st);
            }
            Opcode::Sw => {
                let addr = check_word_addr(self.read(dest))?;
                self.store_word(addr, rhs);
            }
            Opcode::Lw => {
                let addr = check_word_addr(rhs)?;
                let val = self.load_word(addr);
                self.write(dest, val);
            }
            Opcode::Sb => {
                let addr = check_byte_addr(self.read(dest))?;
                self.set_mem(addr, (rhs & 0xFF) as u8);
            }
            Opcode::Lb => {
                let addr = check_byte_addr(rhs)?;
                let val = self.mem(addr) as u16;
                self.write(dest, val);
            }
            _ => unreachable!("{opcode} is not an R2 instruction"),
        }
        Ok(())
    }

    #[inline]
    fn read(&self, reg: Register) -> u16 {
        self.reg[reg.index()]
    }

    #[inline]
    fn write(&mut self, reg: Register, val: u16) {
        self.set_reg(reg.index(), val);
    }

    /// `dest = op(dest, rhs)`, then update Z and S from the result.
    fn alu(&mut self, dest: Register, rhs: u16, op: impl FnOnce(u16, u16) -> u16) {
        let res = op(self.read(dest), rhs);
        self.write(dest, res);
        self.set_flags(res);
    }

    fn set_flags(&mut self, val: u16) {
        let mut st = self.flags() & !(FLAG_Z | FLAG_S);
        if val == 0 {
            st |= FLAG_Z;
        }
        if (val as i16) < 0 {
            st |= FLAG_S;
        }
        self.set_reg(Register::ST.index(), st);
    }

    /// `addr` must have passed [`check_word_addr`].
    fn load_word(&self, addr: u16) -> u16 {
        let addr = addr as usize;
        u16::from_be_bytes([self.mem[addr], self.mem[addr + 1]])
    }

    /// `addr` must have passed [`check_word_addr`].
    fn store_word(&mut self, addr: u16, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.set_mem(addr, hi);
        self.set_mem(addr + 1, lo);
    }
}

/// Both bytes of the word must exist, and the word must be aligned.
fn check_word_addr(addr: u16) -> Result<u16, Fault> {
    if addr as usize + 1 >= MEMORY_SIZE {
        Err(Fault::MemoryBounds)
    } else if addr % 2 != 0 {
        Err(Fault::MemoryAlignment)
    } else {
        Ok(addr)
    }
}

fn check_byte_addr(addr: u16) -> Result<u16, Fault> {
    if addr as usize >= MEMORY_SIZE {
        Err(Fault::MemoryBounds)
    } else {
        Ok(addr)
    }
}
