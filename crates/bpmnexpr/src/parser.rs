//! Parser: recursive descent over the lexer's tokens
//!
//! Conditions parse to a single [`Expr`]; scripts parse to a list of
//! [`Stmt`]s separated by semicolons.

use crate::lexer::{syntax, Lexer, Token, TokenKind};
use bpmncore::{EvalError, Value};

/// A variable reference, as a path from the variable map root
pub type Path = Vec<String>;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(Path),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Subtract,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Assign {
        target: Path,
        op: AssignOp,
        value: Expr,
    },
    Expr(Expr),
    /// `next()` or `done()`
    Continue,
}

/// Names accepted for the continuation call.
const CONTINUATIONS: &[&str] = &["next", "done"];

/// Prefixes under `this.` that alias the variable map itself.
const SCOPES: &[&str] = &["context", "variables"];

/// Deepest expression tree the parser will build.
pub const MAX_DEPTH: usize = 128;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, EvalError> {
        let tokens = Lexer::new(input).tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    /// Parse a condition
    pub fn parse_expression(input: &str) -> Result<Expr, EvalError> {
        let mut parser = Self::new(input)?;
        let expr = parser.expression()?;
        parser.expect(TokenKind::Eof)?;
        Ok(expr)
    }

    /// Parse a script body
    pub fn parse_script(input: &str) -> Result<Vec<Stmt>, EvalError> {
        let mut parser = Self::new(input)?;
        let mut statements = Vec::new();

        loop {
            while parser.check(TokenKind::Semicolon) {
                parser.advance();
            }
            if parser.check(TokenKind::Eof) {
                break;
            }
            statements.push(parser.statement()?);
            if !parser.check(TokenKind::Eof) {
                parser.expect(TokenKind::Semicolon)?;
            }
        }

        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt, EvalError> {
        if self.is_continuation_call() {
            self.advance();
            self.expect(TokenKind::OpenParen)?;
            self.expect(TokenKind::CloseParen)?;
            return Ok(Stmt::Continue);
        }

        let start = self.pos;
        let expr = self.expression()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => AssignOp::Set,
            TokenKind::PlusAssign => AssignOp::Add,
            TokenKind::MinusAssign => AssignOp::Subtract,
            _ => return Ok(Stmt::Expr(expr)),
        };

        let Expr::Variable(target) = expr else {
            let token = &self.tokens[start];
            return Err(syntax(token.line, token.col, "Invalid assignment target"));
        };
        self.advance();
        let value = self.expression()?;
        Ok(Stmt::Assign { target, op, value })
    }

    fn is_continuation_call(&self) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Identifier
            && CONTINUATIONS.contains(&token.text.as_str())
            && self.tokens.get(self.pos + 1).map(|t| t.kind) == Some(TokenKind::OpenParen)
    }

    fn expression(&mut self) -> Result<Expr, EvalError> {
        self.logical_or()
    }

    fn logical_or(&mut self) -> Result<Expr, EvalError> {
        self.chain(Self::logical_and, |kind| match kind {
            TokenKind::OrOr => Some(BinaryOp::Or),
            _ => None,
        })
    }

    fn logical_and(&mut self) -> Result<Expr, EvalError> {
        self.chain(Self::equality, |kind| match kind {
            TokenKind::AndAnd => Some(BinaryOp::And),
            _ => None,
        })
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        self.chain(Self::comparison, |kind| match kind {
            TokenKind::EqualEqual => Some(BinaryOp::Equal),
            TokenKind::BangEqual => Some(BinaryOp::NotEqual),
            TokenKind::StrictEqual => Some(BinaryOp::StrictEqual),
            TokenKind::StrictNotEqual => Some(BinaryOp::StrictNotEqual),
            _ => None,
        })
    }

    fn comparison(&mut self) -> Result<Expr, EvalError> {
        self.chain(Self::additive, |kind| match kind {
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessEqual => Some(BinaryOp::LessEqual),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterEqual => Some(BinaryOp::GreaterEqual),
            _ => None,
        })
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        self.chain(Self::multiplicative, |kind| match kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Subtract),
            _ => None,
        })
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        self.chain(Self::unary, |kind| match kind {
            TokenKind::Star => Some(BinaryOp::Multiply),
            TokenKind::Slash => Some(BinaryOp::Divide),
            TokenKind::Percent => Some(BinaryOp::Remainder),
            _ => None,
        })
    }

    /// Left-associative run of operands at one precedence level. Every
    /// operator nests the tree one level deeper.
    fn chain(
        &mut self,
        operand: fn(&mut Self) -> Result<Expr, EvalError>,
        operator: fn(TokenKind) -> Option<BinaryOp>,
    ) -> Result<Expr, EvalError> {
        let depth = self.depth;
        let mut left = operand(self)?;
        while let Some(op) = operator(self.peek_kind()) {
            self.descend()?;
            self.advance();
            let right = operand(self)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn descend(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            let token = self.peek();
            return Err(syntax(
                token.line,
                token.col,
                format!("Expression nested deeper than {} levels", MAX_DEPTH),
            ));
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek_kind() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.primary(),
        };
        self.descend()?;
        self.advance();
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let token = self.advance().clone();
        let expr = match token.kind {
            TokenKind::NumberLiteral => {
                let n: f64 = token
                    .text
                    .parse()
                    .map_err(|_| syntax(token.line, token.col, format!("Invalid number '{}'", token.text)))?;
                Expr::Literal(Value::Number(n))
            }
            TokenKind::StringLiteral => Expr::Literal(Value::String(token.text)),
            TokenKind::True => Expr::Literal(Value::Bool(true)),
            TokenKind::False => Expr::Literal(Value::Bool(false)),
            TokenKind::Null | TokenKind::Undefined => Expr::Literal(Value::Null),
            TokenKind::OpenParen => {
                self.descend()?;
                let inner = self.expression()?;
                self.expect(TokenKind::CloseParen)?;
                self.depth -= 1;
                inner
            }
            TokenKind::This => {
                self.expect(TokenKind::Dot)?;
                let first = self.expect(TokenKind::Identifier)?.text.clone();
                if SCOPES.contains(&first.as_str()) && self.check(TokenKind::Dot) {
                    self.advance();
                    let head = self.expect(TokenKind::Identifier)?.text.clone();
                    self.member_path(head)?
                } else {
                    self.member_path(first)?
                }
            }
            TokenKind::Identifier => self.member_path(token.text)?,
            other => {
                return Err(syntax(
                    token.line,
                    token.col,
                    format!("Unexpected token: expected expression, found {}", other),
                ));
            }
        };

        if self.check(TokenKind::OpenParen) {
            let paren = self.peek();
            return Err(EvalError::Unsupported(format!(
                "function calls are not available (column {})",
                paren.col
            )));
        }
        Ok(expr)
    }

    fn member_path(&mut self, head: String) -> Result<Expr, EvalError> {
        let mut path = vec![head];
        while self.check(TokenKind::Dot) {
            self.advance();
            path.push(self.expect(TokenKind::Identifier)?.text.clone());
        }
        Ok(Expr::Variable(path))
    }

    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let index = self.pos.min(self.tokens.len() - 1);
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        &self.tokens[index]
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token, EvalError> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        let found = self.peek();
        Err(syntax(
            found.line,
            found.col,
            format!("Unexpected token: expected {}, found {}", kind, found.kind),
        ))
    }
}
