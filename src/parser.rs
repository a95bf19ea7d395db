use crate::{
    air::{Air, AirStmt},
    error::AsmError,
    isa::{Instruction, Opcode, Shape, IMM_MAX, IMM_MIN, INSTR_WIDTH},
    lexer::{tokenize, Token, TokenKind},
    runtime::CODE_START,
    symbol::{LabelTable, Register, Span, SrcOffset},
};

/// Assemble program text into encoded instruction words.
pub fn assemble(src: &str) -> Result<Vec<u16>, AsmError> {
    Ok(AsmParser::new(src).parse()?.emit())
}

/// Assemble program text into the lowercase hex form accepted by [`crate::Machine::load`].
pub fn assemble_hex(src: &str) -> Result<String, AsmError> {
    Ok(AsmParser::new(src).parse()?.to_hex())
}

/// A comment-free, trimmed, non-empty line of source.
#[derive(Debug)]
struct SrcLine<'a> {
    text: &'a str,
    /// Offset of `text` from the start of the source
    offs: usize,
    /// Counted from 1
    number: usize,
}

/// Split source into lines, dropping `#` comments, surrounding whitespace and empty lines.
fn preprocess(src: &str) -> Vec<SrcLine<'_>> {
    let mut lines = Vec::new();
    let mut offs = 0;
    for (i, raw) in src.split('\n').enumerate() {
        let start = offs;
        offs += raw.len() + 1;

        let code = match raw.find('#') {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        let text = code.trim();
        if text.is_empty() {
            continue;
        }
        lines.push(SrcLine {
            text,
            offs: start + (code.len() - code.trim_start().len()),
            number: i + 1,
        });
    }
    lines
}

/// Line split into an optional `name:` prefix and the instruction that follows it.
struct SplitLine<'a> {
    label: Option<Token>,
    /// Tokens after the label, whitespace included
    rest: &'a [Token],
}

fn split_label(toks: &[Token]) -> SplitLine<'_> {
    match toks {
        [word, colon, rest @ ..]
            if word.kind == TokenKind::Word
                && colon.kind == TokenKind::Colon
                && colon.span.offs() == word.span.end() =>
        {
            let rest = match rest {
                [ws, rest @ ..] if ws.kind == TokenKind::Whitespace => rest,
                rest => rest,
            };
            SplitLine {
                label: Some(*word),
                rest,
            }
        }
        _ => SplitLine {
            label: None,
            rest: toks,
        },
    }
}

/// Two-pass assembler: collects label addresses, then encodes every instruction line.
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    lines: Vec<SrcLine<'a>>,
}

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            lines: preprocess(src),
        }
    }

    /// Create AIR out of the source. The first failure aborts the whole run.
    pub fn parse(self) -> Result<Air, AsmError> {
        let lexed: Vec<Vec<Token>> = self
            .lines
            .iter()
            .map(|line| tokenize(line.text).collect())
            .collect();

        let labels = self.scan_labels(&lexed)?;

        let mut air = Air::new();
        let mut addr = CODE_START;
        for (line, toks) in self.lines.iter().zip(&lexed) {
            let split = split_label(toks);
            if split.rest.is_empty() {
                continue;
            }
            let instr = LineParser::new(&self, line, split.rest, &labels).parse_instr(addr)?;
            air.add_stmt(AirStmt {
                addr,
                instr,
                line: line.number,
                span: Span::new(SrcOffset(line.offs), line.text.len()),
            });
            addr = addr.wrapping_add(INSTR_WIDTH);
        }
        air.set_labels(labels);
        Ok(air)
    }

    /// First pass. Every line that is not just a label takes up one instruction slot; the
    /// second pass rejects the ones that turn out not to be instructions.
    fn scan_labels(&self, lexed: &[Vec<Token>]) -> Result<LabelTable, AsmError> {
        let mut labels = LabelTable::new();
        let mut addr = CODE_START;
        for (line, toks) in self.lines.iter().zip(lexed) {
            let split = split_label(toks);
            if let Some(label) = split.label {
                let span = label.span.shift(line.offs);
                let name = self.get_span(span);
                if let Err(first) = labels.insert(name, addr, span) {
                    return Err(AsmError::DuplicateLabel {
                        name: name.to_string(),
                        src: self.src.to_string(),
                        span: span.into(),
                        first: first.span.into(),
                    });
                }
            }
            if !split.rest.is_empty() {
                addr = addr.wrapping_add(INSTR_WIDTH);
            }
        }
        Ok(labels)
    }

    fn get_span(&self, span: Span) -> &'a str {
        &self.src[span.offs()..span.end()]
    }
}

/// Second-pass parser for the instruction part of one line.
struct LineParser<'p, 'a> {
    parser: &'p AsmParser<'a>,
    line: &'p SrcLine<'a>,
    toks: std::slice::Iter<'p, Token>,
    labels: &'p LabelTable,
}

impl<'p, 'a> LineParser<'p, 'a> {
    fn new(
        parser: &'p AsmParser<'a>,
        line: &'p SrcLine<'a>,
        toks: &'p [Token],
        labels: &'p LabelTable,
    ) -> Self {
        LineParser {
            parser,
            line,
            toks: toks.iter(),
            labels,
        }
    }

    /// Mnemonic decides the shape; operands are then checked against it.
    fn parse_instr(mut self, addr: u16) -> Result<Instruction, AsmError> {
        let head = match self.toks.next() {
            Some(tok) if tok.kind == TokenKind::Word => *tok,
            Some(tok) => {
                return Err(self.syntax(tok.span, "lines should start with a mnemonic or `label:`"))
            }
            None => unreachable!("label-only lines are skipped"),
        };
        let Some(opcode) = Opcode::from_mnemonic(self.text(head.span)) else {
            return Err(self.syntax(
                head.span,
                format!("`{}` is not a known mnemonic", self.text(head.span)),
            ));
        };

        let shape = opcode.shape();
        let ops: Vec<Token> = self.operands(opcode)?;
        let arity = match shape {
            Shape::R0 => 0,
            Shape::R1 | Shape::J => 1,
            Shape::R2 | Shape::I => 2,
        };
        if ops.len() != arity {
            let span = ops.get(arity).map_or(head.span, |tok| tok.span);
            return Err(self.syntax(span, format!("`{opcode}` expects {shape}")));
        }

        let instr = match shape {
            Shape::R0 => Instruction::R0 { opcode },
            Shape::R1 => Instruction::R1 {
                opcode,
                dest: self.expect_reg(ops[0], opcode)?,
            },
            Shape::R2 => Instruction::R2 {
                opcode,
                dest: self.expect_reg(ops[0], opcode)?,
                src: self.expect_reg(ops[1], opcode)?,
            },
            Shape::I => Instruction::I {
                opcode,
                dest: self.expect_reg(ops[0], opcode)?,
                imm: self.expect_imm(ops[1], opcode)?,
            },
            Shape::J => {
                let target = self.expect_label(ops[0], opcode)?;
                let offset = target as i32 - addr as i32 - INSTR_WIDTH as i32;
                // Packed as-is; offsets wider than 10 bits only arise in programs too long
                // to load.
                Instruction::J {
                    opcode,
                    offset: offset as i16,
                }
            }
        };
        Ok(instr)
    }

    /// Collect whitespace-separated operand tokens.
    fn operands(&mut self, opcode: Opcode) -> Result<Vec<Token>, AsmError> {
        let mut ops = Vec::new();
        while let Some(tok) = self.toks.next() {
            if tok.kind != TokenKind::Whitespace {
                return Err(self.syntax(tok.span, "operands must be separated by whitespace"));
            }
            match self.toks.next() {
                Some(op) if matches!(op.kind, TokenKind::Word | TokenKind::NegInt) => ops.push(*op),
                Some(op) => return Err(self.wrong_operand(op.span, opcode)),
                None => break,
            }
        }
        Ok(ops)
    }

    fn expect_reg(&self, tok: Token, opcode: Opcode) -> Result<Register, AsmError> {
        let text = self.text(tok.span);
        let digits = match text.strip_prefix(['r', 'R']) {
            Some(digits) if tok.kind == TokenKind::Word && is_decimal(digits) => digits,
            _ => return Err(self.wrong_operand(tok.span, opcode)),
        };
        digits
            .parse::<u8>()
            .ok()
            .and_then(Register::new)
            .ok_or_else(|| AsmError::InvalidRegister {
                number: digits.to_string(),
                src: self.parser.src.to_string(),
                span: self.abs(tok.span).into(),
            })
    }

    fn expect_imm(&self, tok: Token, opcode: Opcode) -> Result<i16, AsmError> {
        let text = self.text(tok.span);
        let is_literal = match tok.kind {
            TokenKind::NegInt => true,
            TokenKind::Word => is_decimal(text),
            _ => false,
        };
        if !is_literal {
            return Err(self.wrong_operand(tok.span, opcode));
        }
        text.parse::<i16>()
            .ok()
            .filter(|val| (IMM_MIN..=IMM_MAX).contains(val))
            .ok_or_else(|| AsmError::InvalidImmediate {
                value: text.to_string(),
                src: self.parser.src.to_string(),
                span: self.abs(tok.span).into(),
            })
    }

    fn expect_label(&self, tok: Token, opcode: Opcode) -> Result<u16, AsmError> {
        if tok.kind != TokenKind::Word {
            return Err(self.wrong_operand(tok.span, opcode));
        }
        let name = self.text(tok.span);
        self.labels
            .get(name)
            .ok_or_else(|| AsmError::UnknownLabel {
                name: name.to_string(),
                src: self.parser.src.to_string(),
                span: self.abs(tok.span).into(),
            })
    }

    fn syntax(&self, span: Span, hint: impl Into<String>) -> AsmError {
        AsmError::Syntax {
            line: self.line.text.to_string(),
            hint: hint.into(),
            src: self.parser.src.to_string(),
            span: self.abs(span).into(),
        }
    }

    fn wrong_operand(&self, span: Span, opcode: Opcode) -> AsmError {
        self.syntax(span, format!("`{opcode}` expects {}", opcode.shape()))
    }

    /// Text of a line-relative span
    fn text(&self, span: Span) -> &'a str {
        &self.line.text[span.offs()..span.end()]
    }

    fn abs(&self, span: Span) -> Span {
        span.shift(self.line.offs)
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(index: u8) -> Register {
        Register::new(index).unwrap()
    }

    #[test]
    fn preprocess_lines() {
        let src = "  # header\r\nHALT   # stop\n\n\t\nloop:\r\n";
        let lines = preprocess(src);
        let texts: Vec<_> = lines.iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["HALT", "loop:"]);
        assert_eq!(lines[0].number, 2);
        assert_eq!(&src[lines[0].offs..lines[0].offs + 4], "HALT");
        assert_eq!(&src[lines[1].offs..lines[1].offs + 5], "loop:");
    }

    #[test]
    fn assemble_movi() {
        assert_eq!(assemble_hex("MOVI r0 5").unwrap(), "5005");
        assert_eq!(assemble("movi R0 5").unwrap(), vec![0x5005]);
    }

    #[test]
    fn operands_split_on_any_whitespace() {
        assert_eq!(assemble("MOVI\u{a0}r0 5").unwrap(), vec![0x5005]);
        assert_eq!(assemble("\u{3000}MOVI\tr0\u{2003}5\r").unwrap(), vec![0x5005]);
    }

    #[test]
    fn assemble_self_loop() {
        assert_eq!(assemble_hex("loop: JMP loop").unwrap(), "6bfe");
        assert_eq!(assemble_hex("loop:\nJMP loop").unwrap(), "6bfe");
    }

    #[test]
    fn assemble_empty() {
        assert_eq!(assemble_hex("").unwrap(), "");
        assert_eq!(assemble_hex("# nothing here\n\n   \n").unwrap(), "");
        assert_eq!(assemble_hex("only_a_label:").unwrap(), "");
    }

    #[test]
    fn parse_every_shape() {
        let air = AsmParser::new(
            r#"
            start:
                HALT
                push r31
                Add r1 r2
                SUBI r4 -16
                ANDI r4 15
                JMPNE start
            "#,
        )
        .parse()
        .unwrap();
        let instrs: Vec<_> = air.iter().map(|stmt| stmt.instr).collect();
        assert_eq!(
            instrs,
            vec![
                Instruction::R0 { opcode: Opcode::Halt },
                Instruction::R1 { opcode: Opcode::Push, dest: reg(31) },
                Instruction::R2 { opcode: Opcode::Add, dest: reg(1), src: reg(2) },
                Instruction::I { opcode: Opcode::Subi, dest: reg(4), imm: -16 },
                Instruction::I { opcode: Opcode::Andi, dest: reg(4), imm: 15 },
                Instruction::J { opcode: Opcode::Jmpne, offset: 128 - 138 - 2 },
            ]
        );
        let addrs: Vec<_> = air.iter().map(|stmt| stmt.addr).collect();
        assert_eq!(addrs, vec![128, 130, 132, 134, 136, 138]);
    }

    #[test]
    fn labels_advance_by_instruction_lines_only() {
        let air = AsmParser::new(
            "a:\nb:\nHALT\nc:\nHALT\nHALT\nd:\nJMP a\nJMP d\nJMP e\ne:",
        )
        .parse()
        .unwrap();
        let labels: Vec<_> = air.labels().iter().collect();
        assert_eq!(
            labels,
            vec![("a", 128), ("b", 128), ("c", 130), ("d", 134), ("e", 140)]
        );
        // Forward and backward references
        assert_eq!(
            air.emit()[3..],
            [
                (0b011010 << 10) | (((128i16 - 134 - 2) as u16) & 0x3FF),
                (0b011010 << 10) | (((134i16 - 136 - 2) as u16) & 0x3FF),
                0b011010 << 10,
            ]
        );
    }

    #[test]
    fn duplicate_label() {
        let err = assemble("a: HALT\na: HALT").unwrap_err();
        assert!(matches!(err, AsmError::DuplicateLabel { ref name, .. } if name == "a"));
        assert_eq!(err.to_string(), "duplicate label: a");

        let err = assemble("a:\nHALT\na:\nHALT").unwrap_err();
        assert!(matches!(err, AsmError::DuplicateLabel { .. }));
    }

    #[test]
    fn duplicate_label_wins_over_later_errors() {
        // Labels are collected before any instruction is checked
        let err = assemble("BOGUS\nx:\nx:").unwrap_err();
        assert!(matches!(err, AsmError::DuplicateLabel { .. }));
    }

    #[test]
    fn unknown_label() {
        let err = assemble("JMP nowhere").unwrap_err();
        assert!(matches!(err, AsmError::UnknownLabel { ref name, .. } if name == "nowhere"));
        assert_eq!(err.to_string(), "unknown label: nowhere");
    }

    #[test]
    fn invalid_register() {
        let err = assemble("NOT r32").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid register: 32 -- registers must be in the range [0,32)"
        );
        let err = assemble("MOV r1 r99999999999").unwrap_err();
        assert!(matches!(
            err,
            AsmError::InvalidRegister { ref number, .. } if number == "99999999999"
        ));
    }

    #[test]
    fn invalid_immediate() {
        for line in ["ADDI r0 16", "ADDI r0 -17", "MOVI r1 100000"] {
            let err = assemble(line).unwrap_err();
            assert!(matches!(err, AsmError::InvalidImmediate { .. }), "{line}");
        }
        let err = assemble("ORI r0 -17").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid immediate: -17 -- immediates must be in the range [-16,15]"
        );
    }

    #[test]
    fn syntax_errors() {
        let cases = [
            "FOO",
            "HALT r1",
            "NOT",
            "NOT r1 r2",
            "ADD r1",
            "ADD r1 5",
            "ADD r1,r2",
            "MOVI r1 r2",
            "MOVI 5 r1",
            "JMP",
            "JMP -4",
            "JMP a b",
            "5:0",
            ":",
            "b:: HALT",
            "b : HALT",
        ];
        for line in cases {
            let err = assemble(&format!("a:\n{line}")).unwrap_err();
            assert!(matches!(err, AsmError::Syntax { .. }), "{line}: {err}");
        }
        let err = assemble("ADD r1 r2 r3").unwrap_err();
        assert_eq!(err.to_string(), "syntax error on line: ADD r1 r2 r3");
    }

    #[test]
    fn first_failing_line_is_reported() {
        let err = assemble("JMP missing\nNOT r40").unwrap_err();
        assert!(matches!(err, AsmError::UnknownLabel { .. }));
        let err = assemble("NOT r40\nJMP missing").unwrap_err();
        assert!(matches!(err, AsmError::InvalidRegister { .. }));
    }

    #[test]
    fn error_span_points_into_source() {
        let src = "HALT\n   ADDI r2 20  # too big\n";
        let AsmError::InvalidImmediate { span, .. } = assemble(src).unwrap_err() else {
            panic!("expected invalid immediate");
        };
        assert_eq!(&src[span.offset()..span.offset() + span.len()], "20");
    }

    #[test]
    fn statements_keep_source_position() {
        let src = "# header\nstart:\n    MOVI r1 -2   # comment\n\nend: HALT\n";
        let air = AsmParser::new(src).parse().unwrap();
        let stmts: Vec<_> = air
            .iter()
            .map(|stmt| (stmt.addr, stmt.line, &src[std::ops::Range::from(stmt.span)]))
            .collect();
        assert_eq!(stmts, vec![(128, 3, "MOVI r1 -2"), (130, 5, "end: HALT")]);
    }
}
