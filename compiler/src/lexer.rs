//! Character-at-a-time lexer, tracking line/column for every token.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    And,
    Assign,
    Bang,
    Begin,
    BooleanKw,
    Break,
    Colon,
    ColonAssign,
    Comma,
    Do,
    Dot,
    Else,
    Elsif,
    End,
    Eof,
    Eq,
    Exit,
    False,
    For,
    Function,
    Greater,
    GreaterEq,
    Id,
    If,
    InOut,
    IntegerKw,
    IntegerLit,
    Less,
    LessEq,
    LParen,
    LSquare,
    Minus,
    Neq,
    Of,
    Or,
    Out,
    Plus,
    Procedure,
    Program,
    Read,
    Repeat,
    RParen,
    RSquare,
    Semicolon,
    Slash,
    Star,
    StringKw,
    StringLit,
    Then,
    To,
    True,
    Until,
    Vector,
    While,
    Write,
    Writeln,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn eof(line: u32, col: u32) -> Self {
        Token { kind: TokenKind::Eof, lexeme: String::new(), line, col }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

fn keyword(word: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match word {
        "and" => And,
        "begin" => Begin,
        "boolean" => BooleanKw,
        "break" => Break,
        "do" => Do,
        "else" => Else,
        "elsif" => Elsif,
        "end" => End,
        "exit" => Exit,
        "false" => False,
        "for" => For,
        "function" => Function,
        "if" => If,
        "inout" => InOut,
        "integer" => IntegerKw,
        "of" => Of,
        "or" => Or,
        "out" => Out,
        "procedure" => Procedure,
        "program" => Program,
        "read" => Read,
        "repeat" => Repeat,
        "string" => StringKw,
        "then" => Then,
        "to" => To,
        "true" => True,
        "until" => Until,
        "vector" => Vector,
        "while" => While,
        "write" => Write,
        "writeln" => Writeln,
        _ => return None,
    })
}

pub struct Lexer<'a> {
    src: &'a [u8],
    current: usize,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer { src: source.as_bytes(), current: 0, line: 1, col: 1 }
    }

    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        loop {
            match self.next_token() {
                Ok(tok) => {
                    let is_eof = tok.kind == TokenKind::Eof;
                    tokens.push(tok);
                    if is_eof {
                        break;
                    }
                }
                Err(e) => errors.push(e),
            }
        }
        (tokens, errors)
    }

    fn peek(&self) -> u8 {
        *self.src.get(self.current).unwrap_or(&0)
    }

    fn advance(&mut self) -> u8 {
        let c = self.peek();
        self.current += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'#' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn make(&self, kind: TokenKind, lexeme: String, line: u32, col: u32) -> Token {
        Token { kind, lexeme, line, col }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let (line, col) = (self.line, self.col);
        if self.current >= self.src.len() {
            return Ok(Token::eof(line, col));
        }
        let c = self.advance();
        use TokenKind::*;
        let tok = match c {
            b'+' => self.make(Plus, "+".into(), line, col),
            b'-' => self.make(Minus, "-".into(), line, col),
            b'*' => self.make(Star, "*".into(), line, col),
            b'/' => self.make(Slash, "/".into(), line, col),
            b'(' => self.make(LParen, "(".into(), line, col),
            b')' => self.make(RParen, ")".into(), line, col),
            b'[' => self.make(LSquare, "[".into(), line, col),
            b']' => self.make(RSquare, "]".into(), line, col),
            b',' => self.make(Comma, ",".into(), line, col),
            b';' => self.make(Semicolon, ";".into(), line, col),
            b'.' => self.make(Dot, ".".into(), line, col),
            b':' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(ColonAssign, ":=".into(), line, col)
                } else {
                    self.make(Colon, ":".into(), line, col)
                }
            }
            b'=' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(Eq, "==".into(), line, col)
                } else {
                    self.make(Assign, "=".into(), line, col)
                }
            }
            b'!' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(Neq, "!=".into(), line, col)
                } else {
                    self.make(Bang, "!".into(), line, col)
                }
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(LessEq, "<=".into(), line, col)
                } else {
                    self.make(Less, "<".into(), line, col)
                }
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.advance();
                    self.make(GreaterEq, ">=".into(), line, col)
                } else {
                    self.make(Greater, ">".into(), line, col)
                }
            }
            b'"' | b'\'' => self.string_literal(c, line, col)?,
            b'0'..=b'9' => self.integer_literal(line, col),
            c if c.is_ascii_alphabetic() || c == b'_' => self.identifier_or_keyword(line, col),
            other => {
                return Err(LexError {
                    message: format!("unexpected character '{}'", other as char),
                    line,
                    col,
                })
            }
        };
        Ok(tok)
    }

    fn string_literal(&mut self, delim: u8, line: u32, col: u32) -> Result<Token, LexError> {
        let start = self.current;
        while self.peek() != delim {
            if self.current >= self.src.len() {
                return Err(LexError { message: "unterminated string literal".into(), line, col });
            }
            self.advance();
        }
        let bytes = &self.src[start..self.current];
        self.advance();
        let text = String::from_utf8_lossy(bytes).into_owned();
        Ok(self.make(TokenKind::StringLit, text, line, col))
    }

    fn integer_literal(&mut self, line: u32, col: u32) -> Token {
        let start = self.current - 1;
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.current]).into_owned();
        self.make(TokenKind::IntegerLit, text, line, col)
    }

    fn identifier_or_keyword(&mut self, line: u32, col: u32) -> Token {
        let start = self.current - 1;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.current]).into_owned();
        match keyword(&text) {
            Some(kind) => self.make(kind, text, line, col),
            None => self.make(TokenKind::Id, text, line, col),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, errors) = Lexer::new(src).tokenize();
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn recognizes_operators() {
        assert_eq!(
            kinds(":= = == != <= >= < >"),
            vec![
                TokenKind::ColonAssign,
                TokenKind::Assign,
                TokenKind::Eq,
                TokenKind::Neq,
                TokenKind::LessEq,
                TokenKind::GreaterEq,
                TokenKind::Less,
                TokenKind::Greater,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn recognizes_keywords_vs_identifiers() {
        assert_eq!(
            kinds("program foo"),
            vec![TokenKind::Program, TokenKind::Id, TokenKind::Eof]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(kinds("# comment\nbegin"), vec![TokenKind::Begin, TokenKind::Eof]);
    }

    #[test]
    fn string_literals_accept_either_delimiter() {
        let (tokens, errors) = Lexer::new(r#" "hi" 'there' "#).tokenize();
        assert!(errors.is_empty());
        assert_eq!(tokens[0].lexeme, "hi");
        assert_eq!(tokens[1].lexeme, "there");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let (_, errors) = Lexer::new("\"oops").tokenize();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn tracks_line_and_column() {
        let (tokens, _) = Lexer::new("a\nb").tokenize();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
    }
}
