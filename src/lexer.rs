//! Lexer. Hand-written rather than generated: the grammar here is small
//! and irregular enough (handler-shaped calls, arrow-function sugar,
//! three kinds of assignment) that a plain recursive-descent lexer and
//! parser read more plainly than a generated grammar would. See
//! DESIGN.md for the full rationale.

use crate::diagnostics::{LexError, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Ident(String),
    True,
    False,
    Const,
    Let,
    Var,
    If,
    Else,
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Semicolon,
    Colon,
    Arrow,
    Eq,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PlusPlus,
    MinusMinus,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Int(n) => format!("integer {}", n),
            TokenKind::Ident(s) => format!("identifier '{}'", s),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{:?}", other),
        }
    }
}

fn keyword(ident: &str) -> Option<TokenKind> {
    match ident {
        "const" => Some(TokenKind::Const),
        "let" => Some(TokenKind::Let),
        "var" => Some(TokenKind::Var),
        "if" => Some(TokenKind::If),
        "else" => Some(TokenKind::Else),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        _ => None,
    }
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    _src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Lexer<'a> {
        Lexer { chars: src.chars().collect(), pos: 0, line: 1, column: 1, _src: src }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    self.bump();
                    self.bump();
                    while !(self.peek().is_none() || (self.peek() == Some('*') && self.peek2() == Some('/'))) {
                        self.bump();
                    }
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let span = self.span();
            let Some(c) = self.peek() else {
                tokens.push(Token { kind: TokenKind::Eof, span });
                break;
            };
            let kind = match c {
                '0'..='9' => self.lex_number(),
                c if c.is_alphabetic() || c == '_' => self.lex_ident(),
                '{' => { self.bump(); TokenKind::LBrace }
                '}' => { self.bump(); TokenKind::RBrace }
                '(' => { self.bump(); TokenKind::LParen }
                ')' => { self.bump(); TokenKind::RParen }
                '[' => { self.bump(); TokenKind::LBracket }
                ']' => { self.bump(); TokenKind::RBracket }
                '.' => { self.bump(); TokenKind::Dot }
                ',' => { self.bump(); TokenKind::Comma }
                ';' => { self.bump(); TokenKind::Semicolon }
                ':' => { self.bump(); TokenKind::Colon }
                '=' => {
                    self.bump();
                    match self.peek() {
                        Some('=') => { self.bump(); TokenKind::EqEq }
                        Some('>') => { self.bump(); TokenKind::Arrow }
                        _ => TokenKind::Eq,
                    }
                }
                '!' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::NotEq
                    } else {
                        TokenKind::Bang
                    }
                }
                '<' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Lte
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::Gte
                    } else {
                        TokenKind::Gt
                    }
                }
                '&' if self.peek2() == Some('&') => {
                    self.bump();
                    self.bump();
                    TokenKind::AndAnd
                }
                '|' if self.peek2() == Some('|') => {
                    self.bump();
                    self.bump();
                    TokenKind::OrOr
                }
                '+' => {
                    self.bump();
                    match self.peek() {
                        Some('+') => { self.bump(); TokenKind::PlusPlus }
                        Some('=') => { self.bump(); TokenKind::PlusEq }
                        _ => TokenKind::Plus,
                    }
                }
                '-' => {
                    self.bump();
                    match self.peek() {
                        Some('-') => { self.bump(); TokenKind::MinusMinus }
                        Some('=') => { self.bump(); TokenKind::MinusEq }
                        _ => TokenKind::Minus,
                    }
                }
                '*' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::StarEq
                    } else {
                        TokenKind::Star
                    }
                }
                '/' => {
                    self.bump();
                    if self.peek() == Some('=') {
                        self.bump();
                        TokenKind::SlashEq
                    } else {
                        TokenKind::Slash
                    }
                }
                '%' => { self.bump(); TokenKind::Percent }
                other => return Err(LexError::UnexpectedChar { ch: other, span }),
            };
            tokens.push(Token { kind, span });
        }
        Ok(tokens)
    }

    fn lex_number(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        TokenKind::Int(text.parse().unwrap_or(0))
    }

    fn lex_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        keyword(&text).unwrap_or(TokenKind::Ident(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_destructuring() {
        let kinds = kinds("const { flight, override } = inav;");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Const,
                TokenKind::LBrace,
                TokenKind::Ident("flight".into()),
                TokenKind::Comma,
                TokenKind::Ident("override".into()),
                TokenKind::RBrace,
                TokenKind::Eq,
                TokenKind::Ident("inav".into()),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_compound_operators() {
        let kinds = kinds("a += 1; b++; c <= 2 && d >= 3 || !e;");
        assert!(kinds.contains(&TokenKind::PlusEq));
        assert!(kinds.contains(&TokenKind::PlusPlus));
        assert!(kinds.contains(&TokenKind::Lte));
        assert!(kinds.contains(&TokenKind::AndAnd));
        assert!(kinds.contains(&TokenKind::Gte));
        assert!(kinds.contains(&TokenKind::OrOr));
        assert!(kinds.contains(&TokenKind::Bang));
    }

    #[test]
    fn rejects_unknown_character() {
        let err = Lexer::new("a $ b").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar { ch: '$', .. }));
    }

    #[test]
    fn skips_line_and_block_comments() {
        let kinds = kinds("// hi\nlet a = 1; /* block */ let b = 2;");
        assert_eq!(kinds.iter().filter(|k| **k == TokenKind::Let).count(), 2);
    }
}
