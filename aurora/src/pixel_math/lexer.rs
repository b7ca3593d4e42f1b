use super::compile::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    EqEq,
    NotEq,
    Bang,
    AndAnd,
    OrOr,
    Question,
    Colon,
    Eof,
}

/// Token with the byte offset of its first character.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

#[derive(Debug)]
pub(crate) struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, position: usize, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            message: message.into(),
            position,
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_byte_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek_byte().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_whitespace();
        let start = self.pos;
        let Some(b) = self.peek_byte() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position: start,
            });
        };

        let kind = match b {
            b'0'..=b'9' | b'.' => return self.read_number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Ok(self.read_ident()),
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'^' => TokenKind::Caret,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b',' => TokenKind::Comma,
            b'?' => TokenKind::Question,
            b':' => TokenKind::Colon,
            b'<' | b'>' | b'=' | b'!' | b'&' | b'|' => return self.read_operator(b),
            _ => {
                return Err(self.error(start, format!("unexpected character {:?}", b as char)));
            }
        };
        self.pos += 1;
        Ok(Token {
            kind,
            position: start,
        })
    }

    /// Operators that may span two characters.
    fn read_operator(&mut self, first: u8) -> Result<Token, CompileError> {
        let start = self.pos;
        let second = self.peek_byte_at(1);
        let (kind, len) = match (first, second) {
            (b'<', Some(b'=')) => (TokenKind::LessEq, 2),
            (b'>', Some(b'=')) => (TokenKind::GreaterEq, 2),
            (b'=', Some(b'=')) => (TokenKind::EqEq, 2),
            (b'!', Some(b'=')) => (TokenKind::NotEq, 2),
            (b'&', Some(b'&')) => (TokenKind::AndAnd, 2),
            (b'|', Some(b'|')) => (TokenKind::OrOr, 2),
            (b'<', _) => (TokenKind::Less, 1),
            (b'>', _) => (TokenKind::Greater, 1),
            (b'!', _) => (TokenKind::Bang, 1),
            (b'=', _) => return Err(self.error(start, "expected '=='")),
            (b'&', _) => return Err(self.error(start, "expected '&&'")),
            _ => return Err(self.error(start, "expected '||'")),
        };
        self.pos += len;
        Ok(Token {
            kind,
            position: start,
        })
    }

    fn read_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        let mut digits = 0usize;

        while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
            digits += 1;
        }
        if self.peek_byte() == Some(b'.') {
            self.pos += 1;
            while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
                digits += 1;
            }
        }
        if digits == 0 {
            return Err(self.error(start, "expected digit"));
        }

        // Exponent, only when followed by digits so `2e` is not half a number
        if matches!(self.peek_byte(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_byte_at(1), Some(b'+' | b'-')));
            if self.peek_byte_at(1 + sign).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1 + sign;
                while self.peek_byte().is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error(start, "invalid number"))?;
        let value: f64 = text
            .parse()
            .map_err(|_| self.error(start, format!("invalid number: {text}")))?;
        Ok(Token {
            kind: TokenKind::Number(value),
            position: start,
        })
    }

    fn read_ident(&mut self) -> Token {
        let start = self.pos;
        while self
            .peek_byte()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_')
        {
            self.pos += 1;
        }
        // Identifier bytes are ASCII
        let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        Token {
            kind: TokenKind::Ident(name),
            position: start,
        }
    }
}

/// Tokenize the whole input, ending with [`TokenKind::Eof`].
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, CompileError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
