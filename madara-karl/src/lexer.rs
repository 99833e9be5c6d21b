use crate::error::{KarlError, KarlResult, Position};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Integer(i64),
    Double(f64),
    String(String),
    Ident(String),
    /// `#ident`, already stripped of its leading `#`.
    SysIdent(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    Eq,
    EqEq,
    NotEq,
    Not,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Question,
    Colon,
    Semi,
    SemiGt,
    FatArrow,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    KwIf,
    KwElse,
    KwWhile,
    KwForEach,

    Eof,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.col,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.get(self.pos + ahead).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.advance();
                    self.advance();
                    while !(self.peek().is_none() || (self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/'))) {
                        self.advance();
                    }
                    self.advance();
                    self.advance();
                }
                _ => break,
            }
        }
    }

    /// Tokenizes the whole source up front. KaRL expressions are short, so
    /// there is no benefit to streaming token-by-token the way a file
    /// parser would.
    pub fn tokenize(mut self) -> KarlResult<Vec<(Token, Position)>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let start = self.position();
            let Some(c) = self.peek() else {
                tokens.push((Token::Eof, start));
                break;
            };

            let token = match c {
                b'0'..=b'9' => self.lex_number()?,
                b'.' if self.peek_at(1).map(|d| d.is_ascii_digit()).unwrap_or(false) => self.lex_number()?,
                b'.' if self.peek_at(1).map(|d| d == b'_' || d.is_ascii_alphabetic()).unwrap_or(false) => {
                    self.advance();
                    let name = self.lex_identifier_str(start)?;
                    Token::Ident(format!(".{name}"))
                }
                b'"' => self.lex_string()?,
                b'#' => {
                    self.advance();
                    let name = self.lex_identifier_str(start)?;
                    Token::SysIdent(name)
                }
                c if c == b'_' || c.is_ascii_alphabetic() => {
                    let name = self.lex_identifier_str(start)?;
                    match name.as_str() {
                        "if" => Token::KwIf,
                        "else" => Token::KwElse,
                        "while" => Token::KwWhile,
                        "for_each" => Token::KwForEach,
                        _ => Token::Ident(name),
                    }
                }
                b'+' => {
                    self.advance();
                    match self.peek() {
                        Some(b'+') => {
                            self.advance();
                            Token::PlusPlus
                        }
                        Some(b'=') => {
                            self.advance();
                            Token::PlusEq
                        }
                        _ => Token::Plus,
                    }
                }
                b'-' => {
                    self.advance();
                    match self.peek() {
                        Some(b'-') => {
                            self.advance();
                            Token::MinusMinus
                        }
                        Some(b'=') => {
                            self.advance();
                            Token::MinusEq
                        }
                        _ => Token::Minus,
                    }
                }
                b'*' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        Token::StarEq
                    } else {
                        Token::Star
                    }
                }
                b'/' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        Token::SlashEq
                    } else {
                        Token::Slash
                    }
                }
                b'%' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        Token::PercentEq
                    } else {
                        Token::Percent
                    }
                }
                b'=' => {
                    self.advance();
                    match self.peek() {
                        Some(b'=') => {
                            self.advance();
                            Token::EqEq
                        }
                        Some(b'>') => {
                            self.advance();
                            Token::FatArrow
                        }
                        _ => Token::Eq,
                    }
                }
                b'!' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        Token::NotEq
                    } else {
                        Token::Not
                    }
                }
                b'<' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        Token::LtEq
                    } else {
                        Token::Lt
                    }
                }
                b'>' => {
                    self.advance();
                    if self.peek() == Some(b'=') {
                        self.advance();
                        Token::GtEq
                    } else {
                        Token::Gt
                    }
                }
                b'&' if self.peek_at(1) == Some(b'&') => {
                    self.advance();
                    self.advance();
                    Token::AndAnd
                }
                b'|' if self.peek_at(1) == Some(b'|') => {
                    self.advance();
                    self.advance();
                    Token::OrOr
                }
                b'?' => {
                    self.advance();
                    Token::Question
                }
                b':' => {
                    self.advance();
                    Token::Colon
                }
                b';' => {
                    self.advance();
                    if self.peek() == Some(b'>') {
                        self.advance();
                        Token::SemiGt
                    } else {
                        Token::Semi
                    }
                }
                b',' => {
                    self.advance();
                    Token::Comma
                }
                b'(' => {
                    self.advance();
                    Token::LParen
                }
                b')' => {
                    self.advance();
                    Token::RParen
                }
                b'{' => {
                    self.advance();
                    Token::LBrace
                }
                b'}' => {
                    self.advance();
                    Token::RBrace
                }
                b'[' => {
                    self.advance();
                    Token::LBracket
                }
                b']' => {
                    self.advance();
                    Token::RBracket
                }
                other => {
                    return Err(KarlError::new(
                        format!("unexpected character '{}'", other as char),
                        start,
                    ));
                }
            };
            tokens.push((token, start));
        }
        Ok(tokens)
    }

    fn lex_identifier_str(&mut self, start: Position) -> KarlResult<String> {
        let begin = self.pos;
        while matches!(self.peek(), Some(c) if c == b'_' || c.is_ascii_alphanumeric()) {
            self.advance();
        }
        if self.pos == begin {
            return Err(KarlError::new("expected identifier after '#'", start));
        }
        Ok(std::str::from_utf8(&self.src[begin..self.pos]).unwrap().to_string())
    }

    fn lex_number(&mut self) -> KarlResult<Token> {
        let start = self.pos;
        let mut is_double = false;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            is_double = true;
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_double = true;
            self.advance();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance();
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if is_double {
            Ok(Token::Double(text.parse().map_err(|_| {
                KarlError::new(format!("invalid numeric literal '{text}'"), self.position())
            })?))
        } else {
            Ok(Token::Integer(text.parse().map_err(|_| {
                KarlError::new(format!("invalid numeric literal '{text}'"), self.position())
            })?))
        }
    }

    fn lex_string(&mut self) -> KarlResult<Token> {
        let start = self.position();
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(KarlError::new("unterminated string literal", start)),
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(c) => out.push(c as char),
                    None => return Err(KarlError::new("unterminated string literal", start)),
                },
                Some(c) => out.push(c as char),
            }
        }
        Ok(Token::String(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn lexes_arithmetic_and_assignment() {
        assert_eq!(
            kinds("x += 1"),
            vec![Token::Ident("x".into()), Token::PlusEq, Token::Integer(1), Token::Eof]
        );
    }

    #[test]
    fn lexes_system_call() {
        assert_eq!(
            kinds("#print(\"hi\")"),
            vec![
                Token::SysIdent("print".into()),
                Token::LParen,
                Token::String("hi".into()),
                Token::RParen,
                Token::Eof
            ]
        );
    }

    #[test]
    fn lexes_control_flow_punctuation() {
        assert_eq!(
            kinds("(x > 0) => y"),
            vec![
                Token::LParen,
                Token::Ident("x".into()),
                Token::Gt,
                Token::Integer(0),
                Token::RParen,
                Token::FatArrow,
                Token::Ident("y".into()),
                Token::Eof
            ]
        );
        assert_eq!(kinds("a ;> b"), vec![Token::Ident("a".into()), Token::SemiGt, Token::Ident("b".into()), Token::Eof]);
    }

    #[test]
    fn lexes_dot_prefixed_local_identifiers() {
        assert_eq!(
            kinds(".arg0 + .arg1"),
            vec![Token::Ident(".arg0".into()), Token::Plus, Token::Ident(".arg1".into()), Token::Eof]
        );
    }

    #[test]
    fn a_bare_dot_before_a_digit_is_still_a_number() {
        assert_eq!(kinds(".5"), vec![Token::Double(0.5), Token::Eof]);
    }
}
