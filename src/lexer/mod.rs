use crate::lexer::cursor::Cursor;
use crate::symbol::{Span, SrcOffset};

pub mod cursor;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Token { kind, span }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    /// Mnemonic, register, label or unsigned number; resolved by the parser.
    Word,
    /// Negative decimal literal such as `-12`
    NegInt,
    Colon,
    Whitespace,
    Unknown,
    Eof,
}

/// Test if a character is considered to be whitespace. Lines are already split on `\n`.
pub(crate) fn is_whitespace(c: char) -> bool {
    c.is_whitespace() && c != '\n'
}

/// Test if a character can be part of a word.
pub(crate) fn is_word(c: char) -> bool {
    // Plain numbers are words too; they double as immediates and label names.
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_')
}

/// Lex a single preprocessed line. Whitespace tokens are kept so the parser can check
/// adjacency; spans are relative to the start of the line.
pub fn tokenize(line: &str) -> impl Iterator<Item = Token> + '_ {
    let mut cursor = Cursor::new(line);
    let mut offs = 0;
    std::iter::from_fn(move || {
        let token = cursor.advance_token(offs);
        offs = token.span.end();
        (token.kind != TokenKind::Eof).then_some(token)
    })
}

impl Cursor<'_> {
    pub fn advance_token(&mut self, offs: usize) -> Token {
        let first_char = match self.bump() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, Span::new(SrcOffset(offs), 0)),
        };
        let kind = match first_char {
            c if is_whitespace(c) => {
                self.take_while(is_whitespace);
                TokenKind::Whitespace
            }
            c if is_word(c) => {
                self.take_while(is_word);
                TokenKind::Word
            }
            '-' if self.first().is_ascii_digit() => {
                self.take_while(|c| c.is_ascii_digit());
                TokenKind::NegInt
            }
            ':' => TokenKind::Colon,
            _ => TokenKind::Unknown,
        };
        let token = Token::new(kind, Span::new(SrcOffset(offs), self.pos_in_token()));
        self.reset_pos();
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<(TokenKind, &str)> {
        tokenize(line)
            .map(|tok| (tok.kind, &line[tok.span.offs()..tok.span.end()]))
            .collect()
    }

    #[test]
    fn instruction_line() {
        use TokenKind::*;
        assert_eq!(
            kinds("ADDI r3\t-16"),
            vec![
                (Word, "ADDI"),
                (Whitespace, " "),
                (Word, "r3"),
                (Whitespace, "\t"),
                (NegInt, "-16"),
            ]
        );
    }

    #[test]
    fn label_line() {
        use TokenKind::*;
        assert_eq!(kinds("loop_1:"), vec![(Word, "loop_1"), (Colon, ":")]);
        assert_eq!(
            kinds("a: HALT"),
            vec![(Word, "a"), (Colon, ":"), (Whitespace, " "), (Word, "HALT")]
        );
    }

    #[test]
    fn unknown_characters() {
        use TokenKind::*;
        assert_eq!(
            kinds("ADD r1,r2"),
            vec![
                (Word, "ADD"),
                (Whitespace, " "),
                (Word, "r1"),
                (Unknown, ","),
                (Word, "r2"),
            ]
        );
        assert_eq!(kinds("- 5"), vec![(Unknown, "-"), (Whitespace, " "), (Word, "5")]);
    }

    #[test]
    fn unicode_whitespace() {
        use TokenKind::*;
        assert_eq!(
            kinds("MOVI\u{a0}r0\u{2003}5"),
            vec![
                (Word, "MOVI"),
                (Whitespace, "\u{a0}"),
                (Word, "r0"),
                (Whitespace, "\u{2003}"),
                (Word, "5"),
            ]
        );
    }

    #[test]
    fn empty_line() {
        assert_eq!(tokenize("").count(), 0);
    }
}
