//! Lexer: tokenizes condition and script sources
//!
//! Produces a stream of tokens that the parser consumes. Handles
//! identifiers, keywords, string and number literals, operators and
//! `//` / `/* */` comments.

use bpmncore::EvalError;

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text of the token; unescaped contents for string literals
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    This,
    True,
    False,
    Null,
    Undefined,

    // Identifiers and literals
    Identifier,
    StringLiteral,
    NumberLiteral,

    // Punctuation
    Dot,
    OpenParen,
    CloseParen,
    Semicolon,

    // Operators
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    EqualEqual,
    BangEqual,
    StrictEqual,
    StrictNotEqual,
    AndAnd,
    OrOr,
    Assign,
    PlusAssign,
    MinusAssign,

    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::This => "this",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Identifier => "identifier",
            Self::StringLiteral => "string literal",
            Self::NumberLiteral => "number",
            Self::Dot => ".",
            Self::OpenParen => "(",
            Self::CloseParen => ")",
            Self::Semicolon => ";",
            Self::Bang => "!",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::EqualEqual => "==",
            Self::BangEqual => "!=",
            Self::StrictEqual => "===",
            Self::StrictNotEqual => "!==",
            Self::AndAnd => "&&",
            Self::OrOr => "||",
            Self::Assign => "=",
            Self::PlusAssign => "+=",
            Self::MinusAssign => "-=",
            Self::Eof => "end of input",
        };
        f.write_str(s)
    }
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>, EvalError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }

            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, EvalError> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        let (kind, width) = match ch {
            '.' if !self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => (TokenKind::Dot, 1),
            '(' => (TokenKind::OpenParen, 1),
            ')' => (TokenKind::CloseParen, 1),
            ';' => (TokenKind::Semicolon, 1),
            '*' => (TokenKind::Star, 1),
            '/' => (TokenKind::Slash, 1),
            '%' => (TokenKind::Percent, 1),
            '+' if self.peek_at(1) == Some('=') => (TokenKind::PlusAssign, 2),
            '+' => (TokenKind::Plus, 1),
            '-' if self.peek_at(1) == Some('=') => (TokenKind::MinusAssign, 2),
            '-' => (TokenKind::Minus, 1),
            '<' if self.peek_at(1) == Some('=') => (TokenKind::LessEqual, 2),
            '<' => (TokenKind::Less, 1),
            '>' if self.peek_at(1) == Some('=') => (TokenKind::GreaterEqual, 2),
            '>' => (TokenKind::Greater, 1),
            '=' if self.lookahead("===") => (TokenKind::StrictEqual, 3),
            '=' if self.peek_at(1) == Some('=') => (TokenKind::EqualEqual, 2),
            '=' => (TokenKind::Assign, 1),
            '!' if self.lookahead("!==") => (TokenKind::StrictNotEqual, 3),
            '!' if self.peek_at(1) == Some('=') => (TokenKind::BangEqual, 2),
            '!' => (TokenKind::Bang, 1),
            '&' if self.peek_at(1) == Some('&') => (TokenKind::AndAnd, 2),
            '|' if self.peek_at(1) == Some('|') => (TokenKind::OrOr, 2),
            '"' | '\'' => return self.read_string_literal(ch),
            c if c.is_ascii_digit() || c == '.' => return self.read_number(),
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                return Ok(self.read_identifier_or_keyword())
            }
            _ => {
                return Err(syntax(line, col, format!("Unexpected character: '{}'", ch)));
            }
        };

        let text: String = self.input[self.pos..self.pos + width].iter().collect();
        for _ in 0..width {
            self.advance();
        }
        Ok(Token::new(kind, text, line, col))
    }

    fn read_string_literal(&mut self, quote: char) -> Result<Token, EvalError> {
        let line = self.line;
        let col = self.col;
        self.advance(); // opening quote

        let mut text = String::new();
        loop {
            let Some(ch) = self.peek_at(0) else {
                return Err(syntax(line, col, "Unterminated string literal"));
            };
            self.advance();
            match ch {
                c if c == quote => break,
                '\\' => {
                    let Some(escaped) = self.peek_at(0) else {
                        return Err(syntax(line, col, "Unterminated string literal"));
                    };
                    self.advance();
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                '\n' => return Err(syntax(line, col, "Unterminated string literal")),
                c => text.push(c),
            }
        }

        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    fn read_number(&mut self) -> Result<Token, EvalError> {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();
        let mut seen_dot = false;

        while let Some(ch) = self.peek_at(0) {
            if ch.is_ascii_digit() {
                text.push(ch);
            } else if ch == '.' && !seen_dot && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                seen_dot = true;
                text.push(ch);
            } else {
                break;
            }
            self.advance();
        }

        if self.peek_at(0).is_some_and(|c| c.is_ascii_alphabetic() || c == '_') {
            return Err(syntax(line, col, format!("Invalid number literal '{}'", text)));
        }
        Ok(Token::new(TokenKind::NumberLiteral, text, line, col))
    }

    fn read_identifier_or_keyword(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();

        while let Some(ch) = self.peek_at(0) {
            if !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$') {
                break;
            }
            text.push(ch);
            self.advance();
        }

        let kind = match text.as_str() {
            "this" => TokenKind::This,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "undefined" => TokenKind::Undefined,
            _ => TokenKind::Identifier,
        };

        Token::new(kind, text, line, col)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), EvalError> {
        while let Some(ch) = self.peek_at(0) {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '/' && self.peek_at(1) == Some('/') {
                while self.peek_at(0).is_some_and(|c| c != '\n') {
                    self.advance();
                }
            } else if ch == '/' && self.peek_at(1) == Some('*') {
                let (line, col) = (self.line, self.col);
                self.advance();
                self.advance();
                loop {
                    if self.pos >= self.input.len() {
                        return Err(syntax(line, col, "Unterminated block comment"));
                    }
                    if self.lookahead("*/") {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn advance(&mut self) {
        if self.pos < self.input.len() {
            if self.input[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn lookahead(&self, expected: &str) -> bool {
        expected
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }
}

/// Syntax error at a source position. The line is folded into the message
/// since scripts may span several lines.
pub(crate) fn syntax(line: usize, col: usize, message: impl Into<String>) -> EvalError {
    let message = message.into();
    EvalError::Syntax {
        col,
        message: if line > 1 {
            format!("{} (line {})", message, line)
        } else {
            message
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_condition_tokens() {
        let tokens = Lexer::new("this.input <= 50").tokenize().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::This);
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
        assert_eq!(tokens[2].text, "input");
        assert_eq!(tokens[3].kind, TokenKind::LessEqual);
        assert_eq!(tokens[4].kind, TokenKind::NumberLiteral);
        assert_eq!(tokens[4].text, "50");
        assert_eq!(tokens[4].col, 15);
        assert_eq!(tokens[5].kind, TokenKind::Eof);
    }

    #[test]
    fn test_multi_char_operators() {
        assert_eq!(
            kinds("=== !== == != = += -= && || ! >="),
            vec![
                TokenKind::StrictEqual,
                TokenKind::StrictNotEqual,
                TokenKind::EqualEqual,
                TokenKind::BangEqual,
                TokenKind::Assign,
                TokenKind::PlusAssign,
                TokenKind::MinusAssign,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Bang,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_script_with_comments_spans_lines() {
        let tokens = Lexer::new("// set it\nthis.context.input = 2; /* go */\nnext();")
            .tokenize()
            .unwrap();

        assert_eq!(tokens[0].kind, TokenKind::This);
        assert_eq!(tokens[0].line, 2);
        let next = tokens.iter().find(|t| t.text == "next").unwrap();
        assert_eq!(next.line, 3);
        assert_eq!(next.col, 1);
    }

    #[test]
    fn test_string_literals() {
        let tokens = Lexer::new(r#"'it\'s' "a\"b""#).tokenize().unwrap();
        assert_eq!(tokens[0].text, "it's");
        assert_eq!(tokens[1].text, "a\"b");
    }

    #[test]
    fn test_decimal_numbers() {
        let tokens = Lexer::new("1.5 .25").tokenize().unwrap();
        assert_eq!(tokens[0].text, "1.5");
        assert_eq!(tokens[1].kind, TokenKind::NumberLiteral);
        assert_eq!(tokens[1].text, ".25");
    }

    #[test]
    fn test_errors_carry_position() {
        let err = Lexer::new("a # b").tokenize().unwrap_err();
        assert_eq!(
            err,
            EvalError::Syntax {
                col: 3,
                message: "Unexpected character: '#'".to_string()
            }
        );
        assert!(Lexer::new("'open").tokenize().is_err());
        assert!(Lexer::new("/* open").tokenize().is_err());
        assert!(Lexer::new("12abc").tokenize().is_err());
    }
}
