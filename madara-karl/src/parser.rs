use crate::ast::{AssignOp, BinOp, LValue, Node, SysCall, UnaryOp};
use crate::error::{KarlError, KarlResult, Position};
use crate::lexer::{Lexer, Token};
use madara_context::Context;

/// Recursive-descent, precedence-climbing parser. `(cond)`-style groups
/// are disambiguated from the three control-flow forms by what follows
/// the closing paren: `=>` is a conditional, `{` is a while-loop, a
/// leading `;` inside the group is a for-loop, anything else is a plain
/// parenthesized expression (spec.md §4.2).
pub struct Parser<'a> {
    tokens: Vec<(Token, Position)>,
    pos: usize,
    ctx: &'a Context,
}

pub fn parse(src: &str, ctx: &Context) -> KarlResult<Node> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser { tokens, pos: 0, ctx };
    let node = parser.parse_stmt_sequence()?;
    parser.expect(&Token::Eof)?;
    Ok(node)
}

impl<'a> Parser<'a> {
    fn current(&self) -> &(Token, Position) {
        &self.tokens[self.pos]
    }

    fn check(&self, token: &Token) -> bool {
        &self.current().0 == token
    }

    fn advance(&mut self) -> (Token, Position) {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, token: &Token) -> KarlResult<()> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            let (found, pos) = self.current().clone();
            Err(KarlError::new(format!("expected {token:?}, found {found:?}"), pos))
        }
    }

    fn expect_ident(&mut self) -> KarlResult<String> {
        let (tok, pos) = self.current().clone();
        match tok {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(KarlError::new(format!("expected identifier, found {other:?}"), pos)),
        }
    }

    fn node_to_lvalue(&self, node: Node, pos: Position) -> KarlResult<LValue> {
        match node {
            Node::Variable(var) => Ok(LValue { var, index: None }),
            Node::Index(base, idx) => match *base {
                Node::Variable(var) => Ok(LValue { var, index: Some(idx) }),
                _ => Err(KarlError::new("invalid assignment target", pos)),
            },
            _ => Err(KarlError::new("invalid assignment target", pos)),
        }
    }

    /// Top-level: `expr (';' expr)*` with an optional trailing `;> expr`.
    pub fn parse_stmt_sequence(&mut self) -> KarlResult<Node> {
        let mut exprs = vec![self.parse_assignment()?];
        loop {
            if self.check(&Token::SemiGt) {
                self.advance();
                let ret = self.parse_assignment()?;
                let body = if exprs.len() == 1 {
                    exprs.pop().unwrap()
                } else {
                    Node::Sequence(exprs)
                };
                return Ok(Node::SequenceReturn(Box::new(body), Box::new(ret)));
            }
            if self.check(&Token::Semi) {
                self.advance();
                if matches!(self.current().0, Token::Eof | Token::RBrace | Token::RParen) {
                    break;
                }
                exprs.push(self.parse_assignment()?);
            } else {
                break;
            }
        }
        Ok(if exprs.len() == 1 {
            exprs.into_iter().next().unwrap()
        } else {
            Node::Sequence(exprs)
        })
    }

    fn parse_block(&mut self) -> KarlResult<Node> {
        self.expect(&Token::LBrace)?;
        let body = self.parse_stmt_sequence()?;
        self.expect(&Token::RBrace)?;
        Ok(body)
    }

    /// A loop/conditional body is either a brace-delimited statement
    /// sequence or a single bare expression.
    fn parse_body(&mut self) -> KarlResult<Node> {
        if self.check(&Token::LBrace) {
            self.parse_block()
        } else {
            self.parse_assignment()
        }
    }

    fn parse_assignment(&mut self) -> KarlResult<Node> {
        let pos = self.current().1;
        let expr = self.parse_ternary()?;
        let op = match self.current().0 {
            Token::Eq => Some(AssignOp::Set),
            Token::PlusEq => Some(AssignOp::Add),
            Token::MinusEq => Some(AssignOp::Sub),
            Token::StarEq => Some(AssignOp::Mul),
            Token::SlashEq => Some(AssignOp::Div),
            Token::PercentEq => Some(AssignOp::Mod),
            _ => None,
        };
        let Some(op) = op else { return Ok(expr) };
        self.advance();
        let lvalue = self.node_to_lvalue(expr, pos)?;
        let rhs = self.parse_assignment()?;
        Ok(Node::Assign(op, lvalue, Box::new(rhs)))
    }

    fn parse_ternary(&mut self) -> KarlResult<Node> {
        let cond = self.parse_or()?;
        if self.check(&Token::Question) {
            self.advance();
            let then = self.parse_assignment()?;
            self.expect(&Token::Colon)?;
            let els = self.parse_assignment()?;
            Ok(Node::Ternary(Box::new(cond), Box::new(then), Box::new(els)))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> KarlResult<Node> {
        let mut lhs = self.parse_and()?;
        while self.check(&Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Node::LogicalOr(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> KarlResult<Node> {
        let mut lhs = self.parse_eq()?;
        while self.check(&Token::AndAnd) {
            self.advance();
            let rhs = self.parse_eq()?;
            lhs = Node::LogicalAnd(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> KarlResult<Node> {
        let mut lhs = self.parse_rel()?;
        loop {
            let op = match self.current().0 {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_rel()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_rel(&mut self) -> KarlResult<Node> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.current().0 {
                Token::Lt => BinOp::Lt,
                Token::LtEq => BinOp::LtEq,
                Token::Gt => BinOp::Gt,
                Token::GtEq => BinOp::GtEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_add()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> KarlResult<Node> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.current().0 {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> KarlResult<Node> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.current().0 {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> KarlResult<Node> {
        let pos = self.current().1;
        match self.current().0 {
            Token::Not => {
                self.advance();
                Ok(Node::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Token::Minus => {
                self.advance();
                Ok(Node::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::PlusPlus => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Node::PreIncrement(self.node_to_lvalue(inner, pos)?))
            }
            Token::MinusMinus => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Node::PreDecrement(self.node_to_lvalue(inner, pos)?))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> KarlResult<Node> {
        let (tok, pos) = self.current().clone();
        match tok {
            Token::Integer(v) => {
                self.advance();
                Ok(Node::Integer(v))
            }
            Token::Double(v) => {
                self.advance();
                Ok(Node::Double(v))
            }
            Token::String(s) => {
                self.advance();
                Ok(Node::Str(s))
            }
            Token::Ident(name) => {
                self.advance();
                let var = self.ctx.get_ref(&name);
                let mut node = Node::Variable(var);
                if self.check(&Token::LBracket) {
                    self.advance();
                    let idx = self.parse_assignment()?;
                    self.expect(&Token::RBracket)?;
                    node = Node::Index(Box::new(node), Box::new(idx));
                }
                Ok(node)
            }
            Token::SysIdent(name) => {
                self.advance();
                let Some(sys) = SysCall::from_name(&name) else {
                    return Err(KarlError::new(format!("unknown system call '#{name}'"), pos));
                };
                self.expect(&Token::LParen)?;

                // #delete_variable names a variable directly; it is not
                // evaluated as a value expression.
                if sys == SysCall::DeleteVariable {
                    let var_name = self.expect_ident()?;
                    self.expect(&Token::RParen)?;
                    let var = self.ctx.get_ref(&var_name);
                    return Ok(Node::Call(sys, vec![Node::Variable(var)]));
                }

                let mut args = Vec::new();
                if !self.check(&Token::RParen) {
                    loop {
                        args.push(self.parse_assignment()?);
                        if self.check(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen)?;
                Ok(Node::Call(sys, args))
            }
            Token::LParen => self.parse_paren_form(),
            Token::KwIf => self.parse_if(),
            Token::KwWhile => self.parse_while(),
            Token::KwForEach => self.parse_for_each(),
            other => Err(KarlError::new(format!("unexpected token {other:?}"), pos)),
        }
    }

    fn parse_paren_form(&mut self) -> KarlResult<Node> {
        self.expect(&Token::LParen)?;
        let first = self.parse_assignment()?;
        if self.check(&Token::Semi) {
            self.advance();
            let cond = self.parse_assignment()?;
            self.expect(&Token::Semi)?;
            let step = self.parse_assignment()?;
            self.expect(&Token::RParen)?;
            let body = self.parse_body()?;
            return Ok(Node::For(Box::new(first), Box::new(cond), Box::new(step), Box::new(body)));
        }
        self.expect(&Token::RParen)?;
        if self.check(&Token::FatArrow) {
            self.advance();
            let then = self.parse_assignment()?;
            return Ok(Node::If(Box::new(first), Box::new(then), None));
        }
        if self.check(&Token::LBrace) {
            let body = self.parse_block()?;
            return Ok(Node::While(Box::new(first), Box::new(body)));
        }
        Ok(first)
    }

    fn parse_if(&mut self) -> KarlResult<Node> {
        self.advance();
        self.expect(&Token::LParen)?;
        let cond = self.parse_assignment()?;
        self.expect(&Token::RParen)?;
        let then = self.parse_body()?;
        let els = if self.check(&Token::KwElse) {
            self.advance();
            Some(Box::new(self.parse_body()?))
        } else {
            None
        };
        Ok(Node::If(Box::new(cond), Box::new(then), els))
    }

    fn parse_while(&mut self) -> KarlResult<Node> {
        self.advance();
        self.expect(&Token::LParen)?;
        let cond = self.parse_assignment()?;
        self.expect(&Token::RParen)?;
        let body = self.parse_body()?;
        Ok(Node::While(Box::new(cond), Box::new(body)))
    }

    fn parse_for_each(&mut self) -> KarlResult<Node> {
        self.advance();
        self.expect(&Token::LParen)?;
        let name = self.expect_ident()?;
        self.expect(&Token::Comma)?;
        let array = self.parse_assignment()?;
        self.expect(&Token::RParen)?;
        let body = self.parse_body()?;
        let var = self.ctx.get_ref(&name);
        Ok(Node::ForEach(var, Box::new(array), Box::new(body)))
    }
}
