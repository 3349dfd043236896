//! Recursive-descent parser. Produces the canonical AST
//! directly — surface sugar like `else if` chains is lowered to separate
//! `if` handlers with accumulated `!cond` guards during parsing, so later
//! stages never see it.

use crate::ast::*;
use crate::diagnostics::{ParseError, Span};
use crate::lexer::{Lexer, Token, TokenKind};

enum ArrowBody {
    Expr(Expr),
    Block(Vec<AssignStmt>),
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

pub fn parse(src: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    Parser { tokens, pos: 0 }.parse_program()
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_n(&self, n: usize) -> &Token {
        let i = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[i]
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                found: self.peek().kind.describe(),
                expected: format!("{:?}", kind),
                span: self.span(),
            })
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), ParseError> {
        let span = self.span();
        match self.advance().kind {
            TokenKind::Ident(name) => Ok((name, span)),
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                expected: "identifier".to_string(),
                span,
            }),
        }
    }

    fn expect_keyword_ident(&mut self, word: &str) -> Result<Span, ParseError> {
        let span = self.span();
        match &self.peek().kind {
            TokenKind::Ident(name) if name == word => {
                self.advance();
                Ok(span)
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.describe(),
                expected: format!("'{}'", word),
                span,
            }),
        }
    }

    fn peek_is_ident(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == word)
    }

    // ---- program ----

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::Eof) {
            self.parse_statement(&mut statements)?;
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self, out: &mut Vec<Statement>) -> Result<(), ParseError> {
        match &self.peek().kind {
            TokenKind::Const => {
                if self.peek_n(1).kind == TokenKind::LBrace {
                    out.push(self.parse_destructuring()?);
                } else {
                    out.push(self.parse_let_const(true)?);
                }
                Ok(())
            }
            TokenKind::Let => {
                out.push(self.parse_let_const(false)?);
                Ok(())
            }
            TokenKind::Var => {
                out.push(self.parse_var_decl()?);
                Ok(())
            }
            TokenKind::If => {
                let handlers = self.parse_if_chain()?;
                out.extend(handlers.into_iter().map(Statement::EventHandler));
                Ok(())
            }
            TokenKind::Ident(name) if name == "on" => {
                out.push(Statement::EventHandler(self.parse_on()?));
                Ok(())
            }
            TokenKind::Ident(name) if name == "edge" => {
                out.push(Statement::EventHandler(self.parse_edge()?));
                Ok(())
            }
            TokenKind::Ident(name) if name == "sticky" => {
                out.push(Statement::EventHandler(self.parse_sticky()?));
                Ok(())
            }
            TokenKind::Ident(name) if name == "delay" => {
                out.push(Statement::EventHandler(self.parse_delay()?));
                Ok(())
            }
            TokenKind::Ident(name) if name == "timer" => {
                out.push(Statement::EventHandler(self.parse_timer()?));
                Ok(())
            }
            TokenKind::Ident(name) if name == "whenChanged" => {
                out.push(Statement::EventHandler(self.parse_when_changed()?));
                Ok(())
            }
            _ => Err(ParseError::UnexpectedToken {
                found: self.peek().kind.describe(),
                expected: "statement".to_string(),
                span: self.span(),
            }),
        }
    }

    fn parse_destructuring(&mut self) -> Result<Statement, ParseError> {
        let span = self.span();
        self.expect(TokenKind::Const)?;
        self.expect(TokenKind::LBrace)?;
        let mut names = Vec::new();
        loop {
            let (name, _) = self.expect_ident()?;
            names.push(name);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Eq)?;
        self.expect_keyword_ident("inav")?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Statement::Destructuring { names, span })
    }

    fn parse_let_const(&mut self, is_const: bool) -> Result<Statement, ParseError> {
        let span = self.span();
        if is_const {
            self.expect(TokenKind::Const)?;
        } else {
            self.expect(TokenKind::Let)?;
        }
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Statement::LetConst { name, value, span })
    }

    fn parse_var_decl(&mut self) -> Result<Statement, ParseError> {
        let span = self.span();
        self.expect(TokenKind::Var)?;
        let (name, _) = self.expect_ident()?;
        self.expect(TokenKind::Eq)?;
        let init = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Statement::VarDecl { name, init, span })
    }

    // ---- if / else-if / else lowering ----

    fn parse_if_chain(&mut self) -> Result<Vec<EventHandler>, ParseError> {
        let mut out = Vec::new();
        let mut accumulated_negation: Option<Expr> = None;
        loop {
            let span = self.span();
            self.expect(TokenKind::If)?;
            self.expect(TokenKind::LParen)?;
            let cond = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            let body = self.parse_assign_block()?;

            let full_condition = match &accumulated_negation {
                None => cond.clone(),
                Some(acc) => Expr::Logical { op: LogicalOp::And, left: Box::new(acc.clone()), right: Box::new(cond.clone()), span },
            };
            out.push(EventHandler { kind: HandlerKind::If { condition: full_condition }, body, span, reuse_inverted_of: None });

            let not_cond = Expr::Unary { op: UnOp::Not, arg: Box::new(cond), span };
            accumulated_negation = Some(match accumulated_negation {
                None => not_cond,
                Some(acc) => Expr::Logical { op: LogicalOp::And, left: Box::new(acc), right: Box::new(not_cond), span },
            });

            if self.matches(&TokenKind::Else) {
                if self.check(&TokenKind::If) {
                    continue;
                } else {
                    let span = self.span();
                    let body = self.parse_assign_block()?;
                    out.push(EventHandler {
                        kind: HandlerKind::If { condition: accumulated_negation.unwrap() },
                        body,
                        span,
                        reuse_inverted_of: None,
                    });
                    break;
                }
            } else {
                break;
            }
        }
        Ok(out)
    }

    // ---- handler-shaped calls ----

    fn parse_on(&mut self) -> Result<EventHandler, ParseError> {
        let span = self.span();
        self.expect_keyword_ident("on")?;
        self.expect(TokenKind::Dot)?;
        let (which, _) = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let handler = match which.as_str() {
            "arm" => {
                self.expect(TokenKind::LBrace)?;
                self.expect_keyword_ident("delay")?;
                self.expect(TokenKind::Colon)?;
                let delay = self.parse_expr()?;
                self.expect(TokenKind::RBrace)?;
                self.expect(TokenKind::Comma)?;
                let body = self.parse_arrow_block()?;
                EventHandler { kind: HandlerKind::OnArm { delay }, body, span, reuse_inverted_of: None }
            }
            "always" => {
                let body = self.parse_arrow_block()?;
                EventHandler { kind: HandlerKind::OnAlways, body, span, reuse_inverted_of: None }
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    found: format!("on.{}", other),
                    expected: "on.arm or on.always".to_string(),
                    span,
                })
            }
        };
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(handler)
    }

    fn parse_edge(&mut self) -> Result<EventHandler, ParseError> {
        let span = self.span();
        self.expect_keyword_ident("edge")?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_arrow_expr()?;
        self.expect(TokenKind::Comma)?;
        self.expect(TokenKind::LBrace)?;
        self.expect_keyword_ident("duration")?;
        self.expect(TokenKind::Colon)?;
        let duration = self.parse_expr()?;
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Comma)?;
        let body = self.parse_arrow_block()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(EventHandler { kind: HandlerKind::Edge { condition, duration }, body, span, reuse_inverted_of: None })
    }

    fn parse_sticky(&mut self) -> Result<EventHandler, ParseError> {
        let span = self.span();
        self.expect_keyword_ident("sticky")?;
        self.expect(TokenKind::LParen)?;
        let on = self.parse_arrow_expr()?;
        self.expect(TokenKind::Comma)?;
        let off = self.parse_arrow_expr()?;
        self.expect(TokenKind::Comma)?;
        let body = self.parse_arrow_block()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(EventHandler { kind: HandlerKind::Sticky { on, off }, body, span, reuse_inverted_of: None })
    }

    fn parse_delay(&mut self) -> Result<EventHandler, ParseError> {
        let span = self.span();
        self.expect_keyword_ident("delay")?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_arrow_expr()?;
        self.expect(TokenKind::Comma)?;
        self.expect(TokenKind::LBrace)?;
        self.expect_keyword_ident("duration")?;
        self.expect(TokenKind::Colon)?;
        let duration = self.parse_expr()?;
        self.expect(TokenKind::RBrace)?;
        self.expect(TokenKind::Comma)?;
        let body = self.parse_arrow_block()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(EventHandler { kind: HandlerKind::Delay { condition, duration }, body, span, reuse_inverted_of: None })
    }

    fn parse_timer(&mut self) -> Result<EventHandler, ParseError> {
        let span = self.span();
        self.expect_keyword_ident("timer")?;
        self.expect(TokenKind::LParen)?;
        let on_ms = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let off_ms = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let body = self.parse_arrow_block()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(EventHandler { kind: HandlerKind::Timer { on_ms, off_ms }, body, span, reuse_inverted_of: None })
    }

    fn parse_when_changed(&mut self) -> Result<EventHandler, ParseError> {
        let span = self.span();
        self.expect_keyword_ident("whenChanged")?;
        self.expect(TokenKind::LParen)?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let threshold = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let body = self.parse_arrow_block()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(EventHandler { kind: HandlerKind::WhenChanged { value, threshold }, body, span, reuse_inverted_of: None })
    }

    // ---- arrow functions (syntactic carriers only) ----

    fn parse_arrow(&mut self) -> Result<ArrowBody, ParseError> {
        self.expect(TokenKind::LParen)?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Arrow)?;
        if self.check(&TokenKind::LBrace) {
            Ok(ArrowBody::Block(self.parse_assign_block()?))
        } else {
            Ok(ArrowBody::Expr(self.parse_expr()?))
        }
    }

    fn parse_arrow_expr(&mut self) -> Result<Expr, ParseError> {
        match self.parse_arrow()? {
            ArrowBody::Expr(e) => Ok(e),
            ArrowBody::Block(_) => Err(ParseError::UnexpectedToken {
                found: "block body".to_string(),
                expected: "expression body".to_string(),
                span: self.span(),
            }),
        }
    }

    fn parse_arrow_block(&mut self) -> Result<Vec<AssignStmt>, ParseError> {
        match self.parse_arrow()? {
            ArrowBody::Block(b) => Ok(b),
            ArrowBody::Expr(_) => Err(ParseError::UnexpectedToken {
                found: "expression body".to_string(),
                expected: "block body".to_string(),
                span: self.span(),
            }),
        }
    }

    fn parse_assign_block(&mut self) -> Result<Vec<AssignStmt>, ParseError> {
        self.expect(TokenKind::LBrace)?;
        let mut out = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            out.push(self.parse_assign_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(out)
    }

    fn parse_assign_stmt(&mut self) -> Result<AssignStmt, ParseError> {
        let span = self.span();
        if self.matches(&TokenKind::PlusPlus) {
            let target = self.parse_member()?;
            self.expect(TokenKind::Semicolon)?;
            return Ok(AssignStmt { target, op: AssignOp::Increment, value: None, span });
        }
        if self.matches(&TokenKind::MinusMinus) {
            let target = self.parse_member()?;
            self.expect(TokenKind::Semicolon)?;
            return Ok(AssignStmt { target, op: AssignOp::Decrement, value: None, span });
        }
        let target = self.parse_member()?;
        let op = match self.advance().kind {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::AddAssign,
            TokenKind::MinusEq => AssignOp::SubAssign,
            TokenKind::StarEq => AssignOp::MulAssign,
            TokenKind::SlashEq => AssignOp::DivAssign,
            TokenKind::PlusPlus => {
                self.expect(TokenKind::Semicolon)?;
                return Ok(AssignStmt { target, op: AssignOp::Increment, value: None, span });
            }
            TokenKind::MinusMinus => {
                self.expect(TokenKind::Semicolon)?;
                return Ok(AssignStmt { target, op: AssignOp::Decrement, value: None, span });
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    found: other.describe(),
                    expected: "assignment operator".to_string(),
                    span,
                })
            }
        };
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(AssignStmt { target, op, value: Some(value), span })
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::OrOr) {
            let span = self.span();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::AndAnd) {
            let span = self.span();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Neq,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Lte => BinOp::Lte,
                TokenKind::Gte => BinOp::Gte,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.check(&TokenKind::Bang) {
            let span = self.span();
            self.advance();
            let arg = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnOp::Not, arg: Box::new(arg), span });
        }
        if self.check(&TokenKind::Minus) {
            self.advance();
            let arg = self.parse_unary()?;
            return Ok(match arg {
                Expr::Literal(Literal::Int(n)) => Expr::Literal(Literal::Int(-n)),
                other => Expr::Binary {
                    op: BinOp::Sub,
                    left: Box::new(Expr::Literal(Literal::Int(0))),
                    right: Box::new(other),
                    span: self.span(),
                },
            });
        }
        self.parse_call_or_primary()
    }

    fn parse_call_or_primary(&mut self) -> Result<Expr, ParseError> {
        if self.peek_is_ident("Math") {
            let span = self.span();
            self.advance();
            self.expect(TokenKind::Dot)?;
            self.expect_keyword_ident("abs")?;
            self.expect(TokenKind::LParen)?;
            let arg = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::Call { callee: Callee::MathAbs, args: vec![arg], span });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek().kind.clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(n)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(_) => self.parse_member(),
            other => Err(ParseError::UnexpectedToken { found: other.describe(), expected: "expression".to_string(), span }),
        }
    }

    /// `name`, `name.sub`, `name.sub.sub`, and any of those indexed with
    /// `[int-expr]`, at most three dots deep.
    fn parse_member(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        let (first, _) = self.expect_ident()?;
        let mut path = vec![first];
        while self.matches(&TokenKind::Dot) {
            let (seg, _) = self.expect_ident()?;
            path.push(seg);
        }
        let index = if self.matches(&TokenKind::LBracket) {
            let idx = self.parse_expr()?;
            self.expect(TokenKind::RBracket)?;
            Some(Box::new(idx))
        } else {
            None
        };
        Ok(Expr::Member { path, index, span })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vtx_by_distance() {
        let program = parse(
            "const { flight, override } = inav;\nif (flight.homeDistance > 100) { override.vtx.power = 3; }",
        )
        .unwrap();
        assert_eq!(program.statements.len(), 2);
        match &program.statements[1] {
            Statement::EventHandler(h) => match &h.kind {
                HandlerKind::If { condition } => {
                    assert!(matches!(condition, Expr::Binary { op: BinOp::Gt, .. }));
                }
                _ => panic!("expected if handler"),
            },
            _ => panic!("expected event handler"),
        }
    }

    #[test]
    fn parses_on_arm() {
        let program = parse(
            "const { flight, gvar, on } = inav;\non.arm({ delay: 1 }, () => { gvar[0] = flight.yaw; });",
        )
        .unwrap();
        match &program.statements[1] {
            Statement::EventHandler(h) => {
                assert!(matches!(h.kind, HandlerKind::OnArm { .. }));
                assert_eq!(h.body.len(), 1);
            }
            _ => panic!("expected event handler"),
        }
    }

    #[test]
    fn parses_else_if_chain_into_separate_handlers() {
        let program = parse(
            "var x = 0;\nif (x == 1) { x = 2; } else if (x == 3) { x = 4; } else { x = 5; }",
        )
        .unwrap();
        // one var decl + three lowered if-handlers
        assert_eq!(program.statements.len(), 4);
    }

    #[test]
    fn rejects_non_assignment_in_handler_body() {
        let err = parse("on.always(() => { if (true) {} });").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }
}
