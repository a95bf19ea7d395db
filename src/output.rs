use std::cell::RefCell;
use std::str::Chars;

use colored::{ColoredString, Colorize};

use crate::isa::REG_COUNT;
use crate::runtime::{Event, Machine, FLAG_S, FLAG_Z};
use crate::symbol::Register;

#[derive(Clone, Copy, Debug)]
pub enum Output {
    /// Program and report output, to stdout
    Normal,
    /// Machine event trace, to stderr
    Trace(Condition),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// Dropped with `--minimal`
    Sometimes,
}

struct Decolored<'a> {
    chars: Chars<'a>,
}

impl Output {
    thread_local! {
        static IS_LINE_START: RefCell<bool> = const { RefCell::new(true) };
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_line_start(new_value: bool) -> bool {
        Self::IS_LINE_START.with(|value| value.replace(new_value))
    }
    /// Private. Use [`Output::start_new_line`].
    fn is_line_start() -> bool {
        Self::IS_LINE_START.with(|value| *value.borrow())
    }
    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }
    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }

    fn set_line_start_from_str(string: &str) {
        let last = Decolored::new(string).last();
        if let Some(ch) = last {
            Output::set_line_start(ch == '\n');
        }
    }

    pub fn print_str(&self, string: &str) {
        match self {
            Self::Normal => {
                // Program output is printed as-is, even with `--minimal`
                print!("{}", string);
                Self::set_line_start_from_str(string);
            }

            Self::Trace(condition) => match (Self::is_minimal(), *condition) {
                (false, _) => {
                    eprint!("{}", ColoredString::from(string).blue());
                    Self::set_line_start_from_str(string);
                }
                (true, Condition::Always) => {
                    eprint!("{}", decolor(string));
                    Self::set_line_start_from_str(string);
                }
                (true, Condition::Sometimes) => (),
            },
        }
    }

    pub fn start_new_line(&self) {
        if !Self::is_line_start() {
            self.print_str("\n");
        }
    }

    /// One line per event.
    pub fn print_event(&self, event: &Event) {
        self.print_str(&format!("{}\n", describe_event(event)));
    }

    pub fn print_registers(&self, machine: &Machine) {
        if Self::is_minimal() {
            for (index, value) in machine.regs().iter().enumerate() {
                self.print_str(&format!("{} {}\n", reg_name(index), value));
            }
            return;
        }

        self.print_str("\x1b[2m┌────────────────────────────────────┐\x1b[0m\n");
        self.print_str(
            "\x1b[2m│        \x1b[3mhex     int    uint    char\x1b[0m\x1b[2m │\x1b[0m\n",
        );
        for index in 0..REG_COUNT {
            self.print_str("\x1b[2m│\x1b[0m");
            self.print_str(&format!(" \x1b[1m{:<3}\x1b[0m ", reg_name(index)));
            if index == Register::ST.index() {
                self.print_flags(machine.flags());
            } else {
                self.print_integer(machine.reg(index));
            }
            self.print_str(" \x1b[2m│\x1b[0m\n");
        }
        self.print_str("\x1b[2m└────────────────────────────────────┘\x1b[0m\n");
    }

    fn print_flags(&self, st: u16) {
        let flag = |mask, name| if st & mask != 0 { name } else { "-" };
        self.print_str(&format!(
            "0x{:04x}  {:>22}",
            st,
            format!("{}{}", flag(FLAG_S, "S"), flag(FLAG_Z, "Z"))
        ));
    }

    pub fn print_integer(&self, value: u16) {
        if Self::is_minimal() {
            self.print_str(&format!("{}", value));
            return;
        }
        self.print_str(&format!("0x{:04x}  ", value));
        self.print_str(&format!("{:-6}  ", value as i16));
        self.print_str(&format!("{:-6}  ", value));
        self.print_char_display(value);
    }

    fn print_char_display(&self, value: u16) {
        debug_assert!(
            !Self::is_minimal(),
            "`print_char_display` should not be called if `--minimal`"
        );
        self.print_str("   ");
        // Print 3 characters
        match value {
            // Control characters a program is likely to print
            0x00 => self.print_str("NUL"),
            0x09 => self.print_str("HT "),
            0x0a => self.print_str("LF "),
            0x0d => self.print_str("CR "),
            0x7f => self.print_str("DEL"),

            0x20 => self.print_str("[_]"),

            0x21..=0x7e => self.print_str(&format!("{:<3}", value as u8 as char)),

            0x00..=0x7f => self.print_str("\x1b[2m───\x1b[0m"),
            0x0080.. => self.print_str("\x1b[2m┄┄┄\x1b[0m"),
        }
    }
}

/// `PC`, `SP` and `ST` by name, everything else as `rN`.
pub fn reg_name(index: usize) -> String {
    let reg = Register::new(index as u8);
    match reg.and_then(Register::alias) {
        Some(alias) => alias.to_string(),
        None => format!("r{index}"),
    }
}

fn describe_event(event: &Event) -> String {
    match *event {
        Event::RegisterChanged { index, value } => {
            format!("{:<5} <- 0x{:04x}", reg_name(index), value)
        }
        Event::MemoryChanged { addr, value } => {
            format!("[{:03x}] <- 0x{:02x}", addr, value)
        }
        Event::OutputChanged => "output changed".to_string(),
        Event::InputChanged => "input changed".to_string(),
    }
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl Iterator for Decolored<'_> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

fn decolor(string: &str) -> String {
    Decolored::new(string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decolored() {
        assert_eq!(decolor("r1 <- 0x0002"), "r1 <- 0x0002");
        assert_eq!(decolor("\x1b[1mPC \x1b[0m 0x0080"), "PC  0x0080");
        assert_eq!(decolor("abc\x1b[0xyz"), "abc");
        assert_eq!(decolor("abc\x1bw[0bxyzmdef"), "abcdef");
    }

    #[test]
    fn register_names() {
        assert_eq!(reg_name(0), "r0");
        assert_eq!(reg_name(25), "r25");
        assert_eq!(reg_name(26), "PC");
        assert_eq!(reg_name(27), "SP");
        assert_eq!(reg_name(28), "ST");
        assert_eq!(reg_name(31), "r31");
    }

    #[test]
    fn event_lines() {
        let pc = Event::RegisterChanged {
            index: 26,
            value: 130,
        };
        assert_eq!(describe_event(&pc), "PC    <- 0x0082");
        let mem = Event::MemoryChanged {
            addr: 1022,
            value: 0x12,
        };
        assert_eq!(describe_event(&mem), "[3fe] <- 0x12");
        assert_eq!(describe_event(&Event::OutputChanged), "output changed");
    }
}
