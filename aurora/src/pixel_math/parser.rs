//! Precedence-climbing parser producing an [`Expr`] tree.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! ternary  := or ( '?' ternary ':' ternary )?
//! or       := and ( '||' and )*
//! and      := eq ( '&&' eq )*
//! eq       := rel ( ('==' | '!=') rel )*
//! rel      := add ( ('<' | '>' | '<=' | '>=') add )*
//! add      := mul ( ('+' | '-') mul )*
//! mul      := unary ( ('*' | '/' | '%') unary )*
//! unary    := ('-' | '+' | '!') unary | power
//! power    := primary ( '^' unary )?
//! primary  := number | ident | ident '(' args ')' | '(' ternary ')'
//! ```

use super::compile::CompileError;
use super::lexer::{Lexer, Token, TokenKind};

/// Maximum nesting of unary operators, calls and parentheses.
pub(crate) const MAX_DEPTH: usize = 64;

/// Maximum binary operators per expression. Operator chains build a tree as
/// deep as they are long, and lowering, evaluation and drop all recurse on it.
pub(crate) const MAX_OPERATORS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Eq,
    NotEq,
    And,
    Or,
}

impl BinaryOp {
    /// Binding power of left-associative infix operators.
    fn precedence(kind: &TokenKind) -> Option<(u8, BinaryOp)> {
        let entry = match kind {
            TokenKind::OrOr => (1, BinaryOp::Or),
            TokenKind::AndAnd => (2, BinaryOp::And),
            TokenKind::EqEq => (3, BinaryOp::Eq),
            TokenKind::NotEq => (3, BinaryOp::NotEq),
            TokenKind::Less => (4, BinaryOp::Less),
            TokenKind::Greater => (4, BinaryOp::Greater),
            TokenKind::LessEq => (4, BinaryOp::LessEq),
            TokenKind::GreaterEq => (4, BinaryOp::GreaterEq),
            TokenKind::Plus => (5, BinaryOp::Add),
            TokenKind::Minus => (5, BinaryOp::Sub),
            TokenKind::Star => (6, BinaryOp::Mul),
            TokenKind::Slash => (6, BinaryOp::Div),
            TokenKind::Percent => (6, BinaryOp::Rem),
            _ => return None,
        };
        Some(entry)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Ident {
        name: String,
        position: usize,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        position: usize,
    },
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    /// Peeked token (single lookahead).
    peeked: Option<Token>,
    depth: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            lexer: Lexer::new(input),
            peeked: None,
            depth: 0,
            operators: 0,
        }
    }

    fn peek(&mut self) -> Result<&Token, CompileError> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.lexer.next_token()?,
        };
        Ok(self.peeked.insert(token))
    }

    fn next(&mut self) -> Result<Token, CompileError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.lexer.next_token(),
        }
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> Result<Token, CompileError> {
        let token = self.next()?;
        if token.kind == expected {
            Ok(token)
        } else {
            Err(unexpected(&token, what))
        }
    }

    fn enter(&mut self, position: usize) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CompileError::TooDeep { position });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn parse_ternary(&mut self) -> Result<Expr, CompileError> {
        let condition = self.parse_binary(1)?;
        if self.peek()?.kind != TokenKind::Question {
            return Ok(condition);
        }
        let question = self.next()?;
        self.enter(question.position)?;
        let if_true = self.parse_ternary()?;
        self.expect(TokenKind::Colon, "':'")?;
        let if_false = self.parse_ternary()?;
        self.leave();
        Ok(Expr::Conditional(
            Box::new(condition),
            Box::new(if_true),
            Box::new(if_false),
        ))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let Some((precedence, op)) = BinaryOp::precedence(&self.peek()?.kind) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            let operator = self.next()?;
            self.operators += 1;
            if self.operators > MAX_OPERATORS {
                return Err(CompileError::TooManyOperators {
                    position: operator.position,
                });
            }
            let rhs = self.parse_binary(precedence + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let token = self.peek()?.clone();
        let op = match token.kind {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Plus => None,
            _ => return self.parse_power(),
        };
        self.next()?;
        self.enter(token.position)?;
        let operand = self.parse_unary()?;
        self.leave();
        Ok(match op {
            Some(op) => Expr::Unary(op, Box::new(operand)),
            None => operand,
        })
    }

    fn parse_power(&mut self) -> Result<Expr, CompileError> {
        let base = self.parse_primary()?;
        if self.peek()?.kind != TokenKind::Caret {
            return Ok(base);
        }
        let caret = self.next()?;
        self.enter(caret.position)?;
        // Right-associative: 2^3^2 == 2^(3^2)
        let exponent = self.parse_unary()?;
        self.leave();
        Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)))
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Number(value)),
            TokenKind::Ident(name) => {
                if self.peek()?.kind != TokenKind::LParen {
                    return Ok(Expr::Ident {
                        name,
                        position: token.position,
                    });
                }
                self.next()?;
                self.enter(token.position)?;
                let args = self.parse_args()?;
                self.leave();
                Ok(Expr::Call {
                    name,
                    args,
                    position: token.position,
                })
            }
            TokenKind::LParen => {
                self.enter(token.position)?;
                let inner = self.parse_ternary()?;
                self.expect(TokenKind::RParen, "')'")?;
                self.leave();
                Ok(inner)
            }
            _ => Err(unexpected(&token, "an operand")),
        }
    }

    /// Arguments after the opening parenthesis, consuming the closing one.
    fn parse_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        let mut args = Vec::new();
        if self.peek()?.kind == TokenKind::RParen {
            self.next()?;
            return Ok(args);
        }
        loop {
            args.push(self.parse_ternary()?);
            let token = self.next()?;
            match token.kind {
                TokenKind::Comma => continue,
                TokenKind::RParen => return Ok(args),
                _ => return Err(unexpected(&token, "',' or ')'")),
            }
        }
    }
}

fn unexpected(token: &Token, what: &str) -> CompileError {
    let found = match &token.kind {
        TokenKind::Eof => "end of expression".to_string(),
        TokenKind::Number(v) => format!("number {v}"),
        TokenKind::Ident(name) => format!("identifier `{name}`"),
        other => format!("{other:?}"),
    };
    CompileError::Syntax {
        message: format!("expected {what}, found {found}"),
        position: token.position,
    }
}

/// Parse a complete expression.
pub(crate) fn parse(input: &str) -> Result<Expr, CompileError> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_ternary()?;
    let token = parser.next()?;
    if token.kind != TokenKind::Eof {
        return Err(unexpected(&token, "end of expression"));
    }
    Ok(expr)
}
