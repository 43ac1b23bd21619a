//! Recursive-descent parser for the detector-script language.
//!
//! The grammar is deliberately small: assignments, `if`/`else`, `for ... in`,
//! `break`/`continue`, and expressions over JSON-shaped values. There are no
//! user-defined functions, no imports, and no statement produces a value —
//! a script communicates only through the `result` binding.

use super::lexer::{tokenize, SpannedToken, Token};
use super::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Field {
        object: Box<Expr>,
        name: String,
    },
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Index { object: Expr, index: Expr },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign {
        target: AssignTarget,
        value: Expr,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    For {
        var: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
}

pub fn parse(source: &str) -> Result<Vec<Stmt>, SandboxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut program = Vec::new();
    while !parser.at_end() {
        program.push(parser.statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn err(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Parse {
            line: self.line(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), SandboxError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.err(format!("expected {what}")))
        }
    }

    // ── Statements ─────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, SandboxError> {
        match self.peek() {
            Some(Token::If) => self.if_statement(),
            Some(Token::For) => self.for_statement(),
            Some(Token::Break) => {
                self.pos += 1;
                Ok(Stmt::Break)
            }
            Some(Token::Continue) => {
                self.pos += 1;
                Ok(Stmt::Continue)
            }
            Some(Token::Ident(_)) => self.assignment(),
            Some(other) => Err(self.err(format!("unexpected token {other:?}"))),
            None => Err(self.err("unexpected end of script")),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, SandboxError> {
        self.expect(Token::If, "'if'")?;
        let cond = self.expression()?;
        let then_body = self.block()?;
        let else_body = if self.eat(&Token::Else) {
            if self.peek() == Some(&Token::If) {
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, SandboxError> {
        self.expect(Token::For, "'for'")?;
        let var = match self.advance() {
            Some(Token::Ident(name)) => name,
            _ => return Err(self.err("expected loop variable after 'for'")),
        };
        self.expect(Token::In, "'in'")?;
        let iter = self.expression()?;
        let body = self.block()?;
        Ok(Stmt::For { var, iter, body })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.at_end() {
                return Err(self.err("unterminated block (missing '}')"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn assignment(&mut self) -> Result<Stmt, SandboxError> {
        let lvalue = self.postfix()?;
        self.expect(Token::Assign, "'=' after assignment target")?;
        let value = self.expression()?;
        let target = match lvalue {
            Expr::Ident(name) => AssignTarget::Name(name),
            Expr::Index { object, index } => AssignTarget::Index {
                object: *object,
                index: *index,
            },
            Expr::Field { object, name } => AssignTarget::Index {
                object: *object,
                index: Expr::Str(name),
            },
            _ => return Err(self.err("invalid assignment target")),
        };
        Ok(Stmt::Assign { target, value })
    }

    // ── Expressions, lowest precedence first ───────────────────

    fn expression(&mut self) -> Result<Expr, SandboxError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.not_expr()?;
        while self.eat(&Token::And) {
            let rhs = self.not_expr()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::Not) {
            let expr = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => Some(BinOp::Eq),
            Some(Token::NotEq) => Some(BinOp::NotEq),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::LtEq) => Some(BinOp::LtEq),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::GtEq) => Some(BinOp::GtEq),
            _ => None,
        };
        let Some(op) = op else { return Ok(lhs) };
        self.pos += 1;
        let rhs = self.additive()?;
        // Chained comparisons are ambiguous over mixed types; reject them.
        if matches!(
            self.peek(),
            Some(
                Token::EqEq
                    | Token::NotEq
                    | Token::Lt
                    | Token::LtEq
                    | Token::Gt
                    | Token::GtEq
            )
        ) {
            return Err(self.err("comparisons cannot be chained"));
        }
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn additive(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, SandboxError> {
        if self.eat(&Token::Minus) {
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(expr),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.advance() {
                    Some(Token::Ident(name)) => name,
                    _ => return Err(self.err("expected field name after '.'")),
                };
                expr = Expr::Field {
                    object: Box::new(expr),
                    name,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(Token::RBracket, "']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, SandboxError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Null) => Ok(Expr::Null),
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.eat(&Token::RParen) {
                                break;
                            }
                            self.expect(Token::Comma, "',' or ')' in argument list")?;
                        }
                    }
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or ']' in list literal")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = self.expression()?;
                        self.expect(Token::Colon, "':' in map literal")?;
                        let value = self.expression()?;
                        entries.push((key, value));
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        self.expect(Token::Comma, "',' or '}' in map literal")?;
                    }
                }
                Ok(Expr::Map(entries))
            }
            Some(other) => Err(self.err(format!("unexpected token {other:?}"))),
            None => Err(self.err("unexpected end of script")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_if_for_and_assignment() {
        let src = r#"
            total = 0
            for d in ctx.days {
                if d.kind == "observed" and d.totals != null {
                    total = total + d.totals.units
                }
            }
            result = [total]
        "#;
        let program = parse(src).unwrap();
        assert_eq!(program.len(), 3);
        assert!(matches!(program[1], Stmt::For { .. }));
    }

    #[test]
    fn field_assignment_desugars_to_index() {
        let program = parse("acc.count = 1").unwrap();
        match &program[0] {
            Stmt::Assign {
                target: AssignTarget::Index { index, .. },
                ..
            } => assert!(matches!(index, Expr::Str(s) if s == "count")),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn rejects_chained_comparison() {
        assert!(matches!(
            parse("x = 1 < 2 < 3"),
            Err(SandboxError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_assignment_to_call() {
        assert!(parse("len(x) = 1").is_err());
    }

    #[test]
    fn parses_map_and_list_literals() {
        let program = parse(r#"m = {"a": 1, "b": [1, 2, 3]}"#).unwrap();
        assert_eq!(program.len(), 1);
    }
}
